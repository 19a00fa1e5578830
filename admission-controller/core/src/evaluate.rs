use crate::{
    backend::ImageBackend,
    credentials::CredentialResolver,
    gate::{self, NamespaceLookupFailure, NamespaceResolver, PolicySelector},
    queue::AnalysisRequestQueue,
    reduce::reduce,
    validation::{Mode, Validator, Verdict},
};
use futures::future;
use k8s_openapi::{api::core::v1::PodSpec, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Controls how images are validated.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorConfig {
    /// When disabled, every object is admitted without consulting the backend.
    #[serde(default = "ValidatorConfig::default_enabled")]
    pub enabled: bool,

    /// Submit images for analysis when the backend has no record of them, or
    /// when they are admitted in break-glass mode.
    #[serde(default)]
    pub request_analysis: bool,

    #[serde(default)]
    pub namespace_lookup_failure: NamespaceLookupFailure,
}

/// The admission decision for a single object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub message: String,
}

/// Evaluates every container image in an object against the ordered policy
/// selectors.
///
/// An evaluator borrows a configuration snapshot for the duration of one
/// admission request and holds no state of its own.
pub struct Evaluator<'a> {
    pub config: &'a ValidatorConfig,
    pub selectors: &'a [PolicySelector],
    pub backend: Option<Arc<dyn ImageBackend>>,
    pub credentials: &'a dyn CredentialResolver,
    pub namespaces: &'a dyn NamespaceResolver,
}

// === impl ValidatorConfig ===

impl ValidatorConfig {
    fn default_enabled() -> bool {
        true
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            request_analysis: false,
            namespace_lookup_failure: NamespaceLookupFailure::default(),
        }
    }
}

// === impl Decision ===

impl From<Verdict> for Decision {
    fn from(verdict: Verdict) -> Self {
        Self {
            allowed: verdict.is_valid,
            message: verdict.message,
        }
    }
}

// === impl Evaluator ===

impl Evaluator<'_> {
    /// Decides whether an object may be admitted, then submits any analysis
    /// requests that evaluation produced.
    pub async fn decide(&self, meta: &ObjectMeta, pod_specs: &[PodSpec]) -> Decision {
        let (verdict, mut queue) = self.evaluate_object(meta, pod_specs).await;
        let decision = Decision::from(verdict);
        queue.dispatch_all().await;
        decision
    }

    #[instrument(skip_all, fields(name = ?meta.name, namespace = ?meta.namespace))]
    pub async fn evaluate_object(
        &self,
        meta: &ObjectMeta,
        pod_specs: &[PodSpec],
    ) -> (Verdict, AnalysisRequestQueue) {
        let mut queue = AnalysisRequestQueue::new();

        if !self.config.enabled {
            debug!("Validation disabled");
            return (Verdict::valid("validation disabled"), queue);
        }

        if pod_specs.is_empty() {
            info!("No pod specs found to validate");
            return (Verdict::valid("no pod specs found to validate"), queue);
        }

        let mut verdicts = Vec::with_capacity(pod_specs.len());
        for spec in pod_specs {
            let (verdict, pod_queue) = self.evaluate_pod(meta, spec).await;
            verdicts.push(verdict);
            queue.import_requests_from(pod_queue);
        }

        (reduce(verdicts, "results for pods:"), queue)
    }

    async fn evaluate_pod(
        &self,
        meta: &ObjectMeta,
        spec: &PodSpec,
    ) -> (Verdict, AnalysisRequestQueue) {
        let mut queue = AnalysisRequestQueue::new();

        let images = spec
            .init_containers
            .iter()
            .flatten()
            .chain(spec.containers.iter())
            .filter_map(|c| c.image.as_deref())
            .collect::<Vec<_>>();
        if images.is_empty() {
            let name = meta.name.as_deref().unwrap_or_default();
            info!("No container images to validate");
            return (
                Verdict::valid(format!("no container specs to validate for pod {name:?}")),
                queue,
            );
        }

        // Images are evaluated concurrently; results are collected in
        // container order.
        let results =
            future::join_all(images.into_iter().map(|image| self.evaluate_image(meta, image)))
                .await;

        let mut verdicts = Vec::with_capacity(results.len());
        for (verdict, image_queue) in results {
            verdicts.push(verdict);
            queue.import_requests_from(image_queue);
        }

        (reduce(verdicts, "results for images:"), queue)
    }

    #[instrument(skip(self, meta))]
    pub async fn evaluate_image(
        &self,
        meta: &ObjectMeta,
        image: &str,
    ) -> (Verdict, AnalysisRequestQueue) {
        let mut queue = AnalysisRequestQueue::new();

        let gate = match gate::resolve(
            meta,
            image,
            self.selectors,
            self.namespaces,
            self.config.namespace_lookup_failure,
        )
        .await
        {
            Ok(Some(gate)) => gate,
            Ok(None) => {
                info!("No selector matched, image is unmanaged");
                return (
                    Verdict::valid(format!("no selector match found for image {image:?}")),
                    queue,
                );
            }
            Err(error) => {
                error!(%error, "Failed to determine gate configuration");
                return (
                    Verdict::invalid(format!("validation not possible: {error}")),
                    queue,
                );
            }
        };
        debug!(mode = %gate.mode, user = %gate.policy_reference.username, "Gate configuration");

        let credential = match self
            .credentials
            .select_credential(&gate.policy_reference.username)
        {
            Ok(credential) => credential,
            Err(error) => {
                error!(%error, "Missing credentials for matched selector");
                return (
                    Verdict::invalid(format!("validation not possible: {error}")),
                    queue,
                );
            }
        };

        let verdict = match Validator::new(&gate, self.backend.as_deref(), &credential, image) {
            Ok(validator) => validator.validate().await,
            Err(error) => {
                error!(%error, "Unable to validate");
                return (Verdict::invalid(format!("unable to validate: {error}")), queue);
            }
        };

        if self.should_request_analysis(&verdict) {
            queue.add(self.backend.clone(), credential, image);
        }

        info!(valid = verdict.is_valid, digest = %verdict.image_digest, "Image evaluated");
        (verdict, queue)
    }

    fn should_request_analysis(&self, verdict: &Verdict) -> bool {
        if !self.config.request_analysis {
            return false;
        }

        verdict.mode == Some(Mode::BreakGlass)
            || (!verdict.is_valid && verdict.image_digest.is_empty())
    }
}
