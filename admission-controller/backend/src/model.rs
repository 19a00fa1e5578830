use anchore_admission_controller_core::{BackendError, Image};
use anyhow::anyhow;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

pub(crate) const REQUESTOR: &str = "anchore-admission-controller";

/// An image record as returned by the image listing and image add endpoints.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct AnchoreImage {
    #[serde(rename = "imageDigest", alias = "image_digest", default)]
    pub image_digest: String,

    #[serde(default)]
    pub analysis_status: String,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// The result of evaluating a policy bundle against one image, keyed by
/// digest and then by tag.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub(crate) struct PolicyEvaluation(BTreeMap<String, BTreeMap<String, Vec<PolicyCheckResult>>>);

#[derive(Debug, Deserialize)]
pub(crate) struct PolicyCheckResult {
    #[serde(default)]
    status: String,

    #[serde(rename = "policyId", default)]
    policy_id: String,

    #[serde(default)]
    last_evaluation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VersionResponse {
    #[serde(default)]
    api: VersionInfo,
}

#[derive(Debug, Default, Deserialize)]
struct VersionInfo {
    version: Option<String>,
}

// === impl AnchoreImage ===

impl From<AnchoreImage> for Image {
    fn from(image: AnchoreImage) -> Self {
        Self {
            digest: image.image_digest,
            analysis_status: image.analysis_status,
        }
    }
}

/// Selects the most recently created record. Records without a creation time
/// sort before all others.
pub(crate) fn latest_image(images: Vec<AnchoreImage>) -> Option<AnchoreImage> {
    images.into_iter().max_by_key(|image| image.created_at)
}

pub(crate) fn annotations() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([("requestor", REQUESTOR)])
}

/// The creation time attached to analysis requests, truncated to seconds.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

// === impl PolicyEvaluation ===

impl PolicyEvaluation {
    fn first_result(&self) -> Option<&PolicyCheckResult> {
        let (_, tags) = self.0.iter().next()?;
        let (_, results) = tags.iter().next()?;
        results.first()
    }
}

/// Returns true if the first evaluation's first result has passed.
///
/// An empty response is not a pass. A response that does not contain a
/// result is a decode error.
pub(crate) fn policy_check_passed(evaluations: &[PolicyEvaluation]) -> Result<bool, BackendError> {
    let Some(evaluation) = evaluations.first() else {
        return Ok(false);
    };
    let result = evaluation
        .first_result()
        .ok_or_else(|| BackendError::Decode(anyhow!("policy evaluation contains no results")))?;
    debug!(
        status = %result.status,
        policy_id = %result.policy_id,
        last_evaluation = ?result.last_evaluation,
        "Policy evaluation"
    );
    Ok(result.status.eq_ignore_ascii_case("pass"))
}

// === impl VersionResponse ===

impl VersionResponse {
    /// The legacy API reports its version; the v1 API leaves it unset.
    pub(crate) fn is_legacy(&self) -> bool {
        self.api.version.is_some()
    }
}
