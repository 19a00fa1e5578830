use crate::credentials::Credential;
use thiserror::Error;

/// The analysis status reported for images whose analysis has completed.
pub const ANALYZED_STATUS: &str = "analyzed";

/// The backend's view of an image reference.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Image {
    pub digest: String,
    pub analysis_status: String,
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend has no record of the image.
    #[error("image does not exist")]
    NotFound,

    #[error("unexpected response status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The image-related operations the admission controller needs from an image
/// security backend.
///
/// One implementation exists per backend API version; the implementation is
/// chosen once at startup.
#[async_trait::async_trait]
pub trait ImageBackend: Send + Sync {
    /// Returns the most recently created image record for `image`.
    ///
    /// Fails with [`BackendError::NotFound`] when the backend has never seen
    /// the image.
    async fn get(&self, credential: &Credential, image: &str) -> Result<Image, BackendError>;

    /// Submits `image` for analysis.
    async fn analyze(&self, credential: &Credential, image: &str) -> Result<(), BackendError>;

    /// Evaluates the policy bundle (or the account's default bundle, if
    /// `policy_bundle_id` is empty) against an analyzed image.
    async fn does_policy_check_pass(
        &self,
        credential: &Credential,
        digest: &str,
        image: &str,
        policy_bundle_id: &str,
    ) -> Result<bool, BackendError>;
}

// === impl Image ===

impl Image {
    pub fn is_analyzed(&self) -> bool {
        self.analysis_status == ANALYZED_STATUS
    }
}

// === impl BackendError ===

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}
