#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod client;
mod images;
mod legacy;
mod model;
mod v1;

#[cfg(test)]
mod test_util;

pub use self::{client::Client, legacy::LegacyBackend, v1::V1Backend};
use anchore_admission_controller_core::ImageBackend;
use anyhow::{Context, Result};
use std::{fmt, str::FromStr, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::info;

/// The backend API version to speak.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ApiVersion {
    /// Ask the backend at startup.
    #[default]
    Auto,
    Legacy,
    V1,
}

#[derive(Clone, Debug, Error)]
#[error("invalid API version {0:?}; expected one of auto, legacy, v1")]
pub struct InvalidApiVersion(String);

/// Connects to the backend at `endpoint`, detecting its API version if
/// necessary.
pub async fn connect(
    endpoint: &str,
    version: ApiVersion,
    timeout: Duration,
) -> Result<Arc<dyn ImageBackend>> {
    let client = Client::new(endpoint, timeout)?;
    let version = match version {
        ApiVersion::Auto => detect(&client)
            .await
            .with_context(|| format!("failed to detect API version of {endpoint}"))?,
        version => version,
    };
    info!(%endpoint, %version, "Using image backend");

    let backend: Arc<dyn ImageBackend> = match version {
        ApiVersion::V1 => Arc::new(V1Backend::new(client)),
        ApiVersion::Legacy | ApiVersion::Auto => Arc::new(LegacyBackend::new(client)),
    };
    Ok(backend)
}

/// Determines the API version from the backend's unauthenticated version
/// endpoint.
pub async fn detect(client: &Client) -> Result<ApiVersion> {
    let rsp = client
        .get::<model::VersionResponse>(None, client.url("/version", &[]))
        .await?;
    if rsp.is_legacy() {
        return Ok(ApiVersion::Legacy);
    }
    Ok(ApiVersion::V1)
}

// === impl ApiVersion ===

impl FromStr for ApiVersion {
    type Err = InvalidApiVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "legacy" => Ok(Self::Legacy),
            "v1" => Ok(Self::V1),
            s => Err(InvalidApiVersion(s.to_string())),
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => "auto".fmt(f),
            Self::Legacy => "legacy".fmt(f),
            Self::V1 => "v1".fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::Server;

    #[test]
    fn parses_api_versions() {
        for v in [ApiVersion::Auto, ApiVersion::Legacy, ApiVersion::V1] {
            assert_eq!(v.to_string().parse::<ApiVersion>().unwrap(), v);
        }
        assert!("v2".parse::<ApiVersion>().is_err());
    }

    #[tokio::test]
    async fn detects_api_versions_from_the_backend() {
        let server = Server::start(vec![
            (
                200,
                r#"{"service": {"version": "0.9.4"}, "api": {"version": "0.1.14"}}"#,
            ),
            (200, r#"{"service": {"version": "4.9.0"}, "api": {}}"#),
        ])
        .await;
        let client = server.client();
        assert_eq!(detect(&client).await.expect("must detect"), ApiVersion::Legacy);
        assert_eq!(detect(&client).await.expect("must detect"), ApiVersion::V1);

        let requests = server.requests();
        assert!(requests[0].starts_with("GET /v1/version HTTP/1.1"), "{}", requests[0]);
        assert!(
            !requests[0].to_ascii_lowercase().contains("authorization:"),
            "{}",
            requests[0]
        );
    }

    #[tokio::test]
    async fn detection_failures_are_fatal() {
        let server = Server::start(vec![(500, "oops")]).await;
        let error = connect(&server.endpoint(), ApiVersion::Auto, Duration::from_secs(5))
            .await
            .err()
            .expect("detection must fail");
        assert!(
            error.to_string().contains("failed to detect API version"),
            "{error}"
        );
    }
}
