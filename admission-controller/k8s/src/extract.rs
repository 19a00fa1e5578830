use anchore_admission_controller_core::{ObjectMeta, PodSpec};
use anyhow::{Context, Result};
use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
    batch::v1::{CronJob, Job},
    core::v1::{Pod, PodTemplateSpec},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

/// The workload kinds whose pod templates are validated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Pod,
    Deployment,
    Job,
    CronJob,
    DaemonSet,
    StatefulSet,
    ReplicaSet,
}

// === impl WorkloadKind ===

impl WorkloadKind {
    /// Maps an admission request's group, version and kind to a supported
    /// workload kind.
    pub fn from_group_kind(group: &str, version: &str, kind: &str) -> Option<Self> {
        match (group, version, kind) {
            ("", "v1", "Pod") => Some(Self::Pod),
            ("apps", "v1", "Deployment") => Some(Self::Deployment),
            ("apps", "v1", "DaemonSet") => Some(Self::DaemonSet),
            ("apps", "v1", "StatefulSet") => Some(Self::StatefulSet),
            ("apps", "v1", "ReplicaSet") => Some(Self::ReplicaSet),
            ("batch", "v1", "Job") => Some(Self::Job),
            ("batch", "v1" | "v1beta1", "CronJob") => Some(Self::CronJob),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pod => "Pod",
            Self::Deployment => "Deployment",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
            Self::DaemonSet => "DaemonSet",
            Self::StatefulSet => "StatefulSet",
            Self::ReplicaSet => "ReplicaSet",
        }
    }

    /// Decodes an object of this kind and returns its metadata along with the
    /// pod specs it would run.
    ///
    /// Objects without a pod template yield no pod specs.
    pub fn extract(self, object: Value) -> Result<(ObjectMeta, Vec<PodSpec>)> {
        match self {
            Self::Pod => {
                let pod = decode::<Pod>(object)?;
                Ok((pod.metadata, pod.spec.into_iter().collect()))
            }
            Self::Deployment => {
                let obj = decode::<Deployment>(object)?;
                Ok((obj.metadata, template(obj.spec.map(|s| s.template))))
            }
            Self::DaemonSet => {
                let obj = decode::<DaemonSet>(object)?;
                Ok((obj.metadata, template(obj.spec.map(|s| s.template))))
            }
            Self::StatefulSet => {
                let obj = decode::<StatefulSet>(object)?;
                Ok((obj.metadata, template(obj.spec.map(|s| s.template))))
            }
            Self::ReplicaSet => {
                let obj = decode::<ReplicaSet>(object)?;
                Ok((obj.metadata, template(obj.spec.and_then(|s| s.template))))
            }
            Self::Job => {
                let obj = decode::<Job>(object)?;
                Ok((obj.metadata, template(obj.spec.map(|s| s.template))))
            }
            Self::CronJob => {
                let obj = decode::<CronJob>(object)?;
                let tpl = obj
                    .spec
                    .and_then(|s| s.job_template.spec)
                    .map(|s| s.template);
                Ok((obj.metadata, template(tpl)))
            }
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn template(tpl: Option<PodTemplateSpec>) -> Vec<PodSpec> {
    tpl.and_then(|t| t.spec).into_iter().collect()
}

/// Decodes `object` as `T`.
///
/// The object's `apiVersion` and `kind` are replaced with `T`'s so that
/// equivalent older API versions (e.g. `batch/v1beta1` CronJobs) decode into
/// the current type.
fn decode<T>(mut object: Value) -> Result<T>
where
    T: DeserializeOwned + k8s_openapi::Resource,
{
    if let Some(fields) = object.as_object_mut() {
        fields.insert("apiVersion".to_string(), T::API_VERSION.into());
        fields.insert("kind".to_string(), T::KIND.into());
    }
    serde_json::from_value(object).with_context(|| format!("failed to decode {}", T::KIND))
}
