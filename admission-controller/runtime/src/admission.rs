use crate::{
    config::SharedSnapshot,
    core::{Evaluator, ImageBackend, NamespaceResolver, ObjectMeta, PodSpec},
    k8s::WorkloadKind,
    metrics::AdmissionMetrics,
};
use anyhow::{anyhow, Context, Result};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::DynamicObject;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// Serves validating admission reviews for workloads.
#[derive(Clone)]
pub struct Admission {
    snapshot: SharedSnapshot,
    backend: Option<Arc<dyn ImageBackend>>,
    namespaces: Arc<dyn NamespaceResolver>,
    metrics: AdmissionMetrics,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl AdmissionService ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => admission.admit(req).await,
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(
        snapshot: SharedSnapshot,
        backend: Option<Arc<dyn ImageBackend>>,
        namespaces: Arc<dyn NamespaceResolver>,
        metrics: AdmissionMetrics,
    ) -> Self {
        Self {
            snapshot,
            backend,
            namespaces,
            metrics,
        }
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        let span = info_span!(
            "admit",
            uid = %req.uid,
            kind = %req.kind.kind,
            ns = ?req.namespace,
            name = %req.name,
        );
        self.admit_inner(req).instrument(span).await
    }

    async fn admit_inner(self, req: AdmissionRequest) -> AdmissionResponse {
        let mut rsp = AdmissionResponse::from(&req);

        let Some(kind) =
            WorkloadKind::from_group_kind(&req.kind.group, &req.kind.version, &req.kind.kind)
        else {
            info!(
                group = %req.kind.group,
                version = %req.kind.version,
                "Unsupported admission request kind"
            );
            self.metrics.decided(&req.kind.kind, true);
            rsp.result.message = "unsupported admission request kind".to_string();
            return rsp;
        };

        let (meta, pod_specs) = match extract(kind, req) {
            Ok(extracted) => extracted,
            Err(error) => {
                info!(%error, "Failed to parse {kind}");
                self.metrics.decided(kind.as_str(), false);
                return rsp.deny(format!("{error:#}"));
            }
        };

        // Evaluation works on a consistent snapshot even if the configuration
        // is reloaded concurrently.
        let snapshot = self.snapshot.read().clone();
        let evaluator = Evaluator {
            config: &snapshot.config.validator,
            selectors: &snapshot.config.policy_selectors,
            backend: self.backend.clone(),
            credentials: &snapshot.credentials,
            namespaces: &*self.namespaces,
        };
        let decision = evaluator.decide(&meta, &pod_specs).await;
        self.metrics.decided(kind.as_str(), decision.allowed);

        if !decision.allowed {
            info!(message = %decision.message, "Denied");
            return rsp.deny(decision.message);
        }
        debug!(message = %decision.message, "Allowed");
        rsp.result.message = decision.message;
        rsp
    }
}

/// Decodes the admitted object. The object's name and namespace fall back to
/// the request's, since they may not be set on objects being created.
fn extract(kind: WorkloadKind, req: AdmissionRequest) -> Result<(ObjectMeta, Vec<PodSpec>)> {
    let obj = req
        .object
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;
    let value = serde_json::to_value(&obj).context("failed to encode object")?;
    let (mut meta, pod_specs) = kind.extract(value)?;

    if meta.namespace.as_deref().unwrap_or_default().is_empty() {
        meta.namespace = req.namespace;
    }
    if meta.name.as_deref().unwrap_or_default().is_empty() && !req.name.is_empty() {
        meta.name = Some(req.name);
    }
    Ok((meta, pod_specs))
}

fn json_response(rsp: Review) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}
