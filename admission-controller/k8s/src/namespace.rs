use anchore_admission_controller_core::{NamespaceResolver, ObjectMeta};
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Namespace;
use kube::Api;
use tokio::time;
use tracing::debug;

/// Looks up namespace metadata from the Kubernetes API.
#[derive(Clone)]
pub struct ClusterNamespaces {
    api: Api<Namespace>,
}

// === impl ClusterNamespaces ===

impl ClusterNamespaces {
    const LOOKUP_TIMEOUT: time::Duration = time::Duration::from_secs(5);

    pub fn new(client: kube::Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait::async_trait]
impl NamespaceResolver for ClusterNamespaces {
    async fn namespace_metadata(&self, name: &str) -> Result<ObjectMeta> {
        debug!(namespace = %name, "Looking up namespace");
        let ns = time::timeout(Self::LOOKUP_TIMEOUT, self.api.get(name))
            .await
            .with_context(|| format!("timed out looking up namespace {name:?}"))?
            .with_context(|| format!("failed to get namespace {name:?}"))?;
        Ok(ns.metadata)
    }
}
