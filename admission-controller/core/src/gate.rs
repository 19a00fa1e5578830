use crate::{
    selector::{ResourceSelector, SelectorType},
    validation::Mode,
};
use anyhow::{anyhow, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Names the backend principal whose credentials are used for validation and,
/// in policy mode, the policy bundle to evaluate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyReference {
    pub username: String,

    #[serde(default)]
    pub policy_bundle_id: String,
}

/// A single rule in the ordered selector list.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySelector {
    pub selector: ResourceSelector,
    pub mode: Mode,
    #[serde(default)]
    pub policy_reference: PolicyReference,
}

/// The validation settings that apply to a single image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateConfiguration {
    pub mode: Mode,
    pub policy_reference: PolicyReference,
}

/// Determines what happens to a namespace selector when the namespace cannot be
/// looked up.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceLookupFailure {
    /// The selector is ignored and evaluation continues with the next one.
    #[default]
    Skip,

    /// Resolution stops and the image fails validation.
    Deny,
}

#[derive(Debug, Error)]
#[error("failed to look up namespace {namespace:?}: {source}")]
pub struct NamespaceLookupError {
    pub namespace: String,
    #[source]
    pub source: anyhow::Error,
}

/// Fetches the metadata of a namespace by name.
#[async_trait::async_trait]
pub trait NamespaceResolver: Send + Sync {
    async fn namespace_metadata(&self, name: &str) -> Result<ObjectMeta>;
}

// === impl PolicySelector ===

impl PolicySelector {
    pub fn new(selector: ResourceSelector, mode: Mode, policy_reference: PolicyReference) -> Self {
        Self {
            selector,
            mode,
            policy_reference,
        }
    }

    fn gate(&self) -> GateConfiguration {
        GateConfiguration {
            mode: self.mode.clone(),
            policy_reference: self.policy_reference.clone(),
        }
    }
}

// === impl PolicyReference ===

impl PolicyReference {
    pub fn new(username: impl Into<String>, policy_bundle_id: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            policy_bundle_id: policy_bundle_id.into(),
        }
    }
}

/// Returns the gate configuration of the first selector that matches the object
/// or image, or `None` when no selector applies.
///
/// Namespace selectors look up the object's namespace. When that lookup fails
/// the selector is skipped, unless `on_lookup_failure` is
/// [`NamespaceLookupFailure::Deny`].
pub async fn resolve(
    meta: &ObjectMeta,
    image: &str,
    selectors: &[PolicySelector],
    namespaces: &dyn NamespaceResolver,
    on_lookup_failure: NamespaceLookupFailure,
) -> Result<Option<GateConfiguration>, NamespaceLookupError> {
    debug!(selectors = selectors.len(), "Determining gate configuration");

    // Only successful lookups are remembered, so that a transient failure is
    // retried by the next namespace selector.
    let mut ns_meta: Option<ObjectMeta> = None;

    for (idx, policy) in selectors.iter().enumerate() {
        let matched = match policy.selector.type_ {
            SelectorType::General => policy.selector.matches(Some(meta), image),
            SelectorType::Image => policy.selector.matches(None, image),
            SelectorType::Namespace => {
                if ns_meta.is_none() {
                    match lookup_namespace(meta, namespaces).await {
                        Ok(ns) => ns_meta = Some(ns),
                        Err(error) => match on_lookup_failure {
                            NamespaceLookupFailure::Skip => {
                                warn!(%error, selector = idx, "Skipping namespace selector");
                                continue;
                            }
                            NamespaceLookupFailure::Deny => return Err(error),
                        },
                    }
                }
                policy.selector.matches(ns_meta.as_ref(), image)
            }
        };

        if matched {
            info!(selector = idx, mode = %policy.mode, "Matched policy selector");
            return Ok(Some(policy.gate()));
        }
    }

    Ok(None)
}

async fn lookup_namespace(
    meta: &ObjectMeta,
    namespaces: &dyn NamespaceResolver,
) -> Result<ObjectMeta, NamespaceLookupError> {
    let namespace = meta.namespace.clone().unwrap_or_default();
    if namespace.is_empty() {
        return Err(NamespaceLookupError {
            namespace,
            source: anyhow!("object has no namespace"),
        });
    }

    namespaces
        .namespace_metadata(&namespace)
        .await
        .map_err(|source| NamespaceLookupError { namespace, source })
}
