use anchore_admission_controller_core::{BackendError, Credential};
use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use http::{header, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client as HttpClient},
    rt::TokioExecutor,
};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio::time;
use tracing::{debug, trace};

const USER_AGENT: &str = concat!("AnchoreAdmissionController/", env!("CARGO_PKG_VERSION"));

/// A JSON client for the image backend's REST API.
///
/// Requests are not retried.
#[derive(Clone)]
pub struct Client {
    base: String,
    http: HttpClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    timeout: Duration,
}

// === impl Client ===

impl Client {
    /// Builds a client for the API rooted at `endpoint`. Both `http` and
    /// `https` endpoints are supported.
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = endpoint.trim_end_matches('/').to_string();
        let uri = base
            .parse::<Uri>()
            .with_context(|| format!("invalid backend endpoint {endpoint:?}"))?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(anyhow!(
                "backend endpoint {endpoint:?} must be an absolute http(s) URL"
            ));
        }

        let https = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .context("failed to configure TLS")?
            .https_or_http()
            .enable_http1()
            .build();
        let http = HttpClient::builder(TokioExecutor::new()).build(https);

        Ok(Self {
            base,
            http,
            timeout,
        })
    }

    pub(crate) fn url(&self, path: &str, query: &[(&str, &str)]) -> String {
        build_url(&self.base, path, query)
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        credential: Option<&Credential>,
        url: String,
    ) -> Result<T, BackendError> {
        self.send(Method::GET, credential, url, None).await
    }

    pub(crate) async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        credential: &Credential,
        url: String,
        body: &B,
    ) -> Result<T, BackendError> {
        let body = serde_json::to_vec(body).context("failed to encode request body")?;
        self.send(Method::POST, Some(credential), url, Some(body))
            .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        credential: Option<&Credential>,
        url: String,
        body: Option<Vec<u8>>,
    ) -> Result<T, BackendError> {
        let mut req = Request::builder()
            .method(method.clone())
            .uri(&url)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, "application/json");
        if let Some(credential) = credential {
            req = req.header(header::AUTHORIZATION, basic_auth(credential));
        }
        let body = match body {
            Some(body) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Full::from(body)
            }
            None => Full::default(),
        };
        let req = req
            .body(body)
            .with_context(|| format!("failed to build request for {url}"))?;

        debug!(%method, %url, "Sending backend request");
        let (status, bytes) = time::timeout(self.timeout, self.exchange(req))
            .await
            .map_err(|_| anyhow!("{method} {url} timed out after {:?}", self.timeout))?
            .with_context(|| format!("{method} {url} failed"))?;
        trace!(%status, body = ?bytes);

        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound);
        }
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.into()))
    }

    async fn exchange(&self, req: Request<Full<Bytes>>) -> anyhow::Result<(StatusCode, Bytes)> {
        let rsp = self.http.request(req).await?;
        let status = rsp.status();
        let bytes = rsp.into_body().collect().await?.to_bytes();
        Ok((status, bytes))
    }
}

fn build_url(base: &str, path: &str, query: &[(&str, &str)]) -> String {
    let mut url = format!("{base}{path}");
    if !query.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query)
            .finish();
        url.push('?');
        url.push_str(&query);
    }
    url
}

fn basic_auth(credential: &Credential) -> String {
    let token = STANDARD.encode(format!("{}:{}", credential.username, credential.password));
    format!("Basic {token}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::Server;
    use serde_json::Value;

    #[test]
    fn rejects_relative_endpoints() {
        assert!(Client::new("anchore:8228", Duration::from_secs(1)).is_err());
        assert!(Client::new("/v1", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn builds_urls() {
        let base = "http://anchore.example.com:8228/v1";
        assert_eq!(
            build_url(base, "/version", &[]),
            "http://anchore.example.com:8228/v1/version"
        );
        assert_eq!(
            build_url(base, "/images", &[("fulltag", "docker.io/library/alpine:3.19")]),
            "http://anchore.example.com:8228/v1/images?fulltag=docker.io%2Flibrary%2Falpine%3A3.19"
        );
        assert_eq!(
            build_url(
                base,
                "/images/sha256:abc/check",
                &[("tag", "alpine"), ("interactive", "true")]
            ),
            "http://anchore.example.com:8228/v1/images/sha256:abc/check?tag=alpine&interactive=true"
        );
    }

    #[test]
    fn encodes_basic_auth() {
        assert_eq!(
            basic_auth(&Credential::new("admin", "foobar")),
            "Basic YWRtaW46Zm9vYmFy"
        );
    }

    #[tokio::test]
    async fn maps_response_statuses() {
        let server = Server::start(vec![
            (404, r#"{"detail": "not found"}"#),
            (500, "oops"),
            (200, "not json"),
            (200, "[]"),
        ])
        .await;
        let client = server.client();

        let res = client.get::<Vec<Value>>(None, client.url("/images", &[])).await;
        assert!(matches!(res, Err(BackendError::NotFound)), "{res:?}");

        let res = client.get::<Vec<Value>>(None, client.url("/images", &[])).await;
        assert!(
            matches!(res, Err(BackendError::Status { status: 500, ref body }) if body == "oops"),
            "{res:?}"
        );

        let res = client.get::<Vec<Value>>(None, client.url("/images", &[])).await;
        assert!(matches!(res, Err(BackendError::Decode(_))), "{res:?}");

        let res = client.get::<Vec<Value>>(None, client.url("/images", &[])).await;
        assert!(res.expect("empty list must decode").is_empty());
    }

    #[tokio::test]
    async fn sends_credentials_and_user_agent() {
        let server = Server::start(vec![(200, "{}")]).await;
        let client = server.client();
        let credential = Credential::new("admin", "foobar");
        client
            .get::<Value>(Some(&credential), client.url("/images", &[("fulltag", "alpine")]))
            .await
            .expect("request must succeed");

        let request = server.requests()[0].to_ascii_lowercase();
        assert!(
            request.starts_with("get /v1/images?fulltag=alpine http/1.1"),
            "{request}"
        );
        assert!(
            request.contains("authorization: basic ywrtaw46zm9vymfy"),
            "{request}"
        );
        assert!(
            request.contains("user-agent: anchoreadmissioncontroller/"),
            "{request}"
        );
    }

    #[tokio::test]
    async fn times_out_unresponsive_backends() {
        // Connections complete in the accept backlog but are never answered.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener must bind");
        let addr = listener.local_addr().expect("listener must have an address");
        let client = Client::new(&format!("http://{addr}"), Duration::from_millis(50))
            .expect("client must build");

        let error = client
            .get::<Value>(None, client.url("/version", &[]))
            .await
            .expect_err("request must time out");
        assert!(error.to_string().contains("timed out"), "{error}");
        drop(listener);
    }
}
