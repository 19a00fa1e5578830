use crate::{
    backend::ImageBackend,
    credentials::Credential,
    gate::GateConfiguration,
};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::{error, info};

/// The validation strategy applied to an image.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum Mode {
    /// The image must be analyzed and pass the referenced policy bundle.
    Policy,

    /// The image must be analyzed.
    Analysis,

    /// The image is always admitted.
    BreakGlass,

    /// A mode name that is not recognized. Validation with an unrecognized
    /// mode always fails.
    Unknown(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("got unexpected value {0:?} for validation mode from matching selector")]
pub struct UnknownMode(pub String);

/// The outcome of validating one image, or the rollup of several outcomes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Verdict {
    /// The mode that produced this verdict. Unset for rollups and for images
    /// that no selector applies to.
    pub mode: Option<Mode>,
    pub is_valid: bool,
    pub message: String,
    /// The image digest known to the backend. Empty when the backend has no
    /// record of the image.
    pub image_digest: String,
}

/// A validation strategy bound to the image it validates.
pub enum Validator<'a> {
    Policy {
        backend: Option<&'a dyn ImageBackend>,
        credential: &'a Credential,
        image: &'a str,
        policy_bundle_id: &'a str,
    },
    Analysis {
        backend: Option<&'a dyn ImageBackend>,
        credential: &'a Credential,
        image: &'a str,
    },
    BreakGlass,
}

const NO_BACKEND_MESSAGE: &str =
    "No valid policy reference with valid credentials found. Failing validation";

// === impl Mode ===

impl Mode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Policy => "policy",
            Self::Analysis => "analysis",
            Self::BreakGlass => "breakglass",
            Self::Unknown(s) => s,
        }
    }
}

impl From<String> for Mode {
    fn from(s: String) -> Self {
        match s.as_str() {
            "policy" => Self::Policy,
            "analysis" => Self::Analysis,
            "breakglass" => Self::BreakGlass,
            _ => Self::Unknown(s),
        }
    }
}

impl From<&str> for Mode {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Verdict ===

impl Verdict {
    pub fn valid(message: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: message.into(),
            ..Self::default()
        }
    }

    fn with_mode(self, mode: Mode) -> Self {
        Self {
            mode: Some(mode),
            ..self
        }
    }

    fn with_digest(self, digest: impl Into<String>) -> Self {
        Self {
            image_digest: digest.into(),
            ..self
        }
    }
}

// === impl Validator ===

impl<'a> Validator<'a> {
    /// Binds the strategy named by `gate` to an image.
    ///
    /// Fails if the gate's mode is not recognized.
    pub fn new(
        gate: &'a GateConfiguration,
        backend: Option<&'a dyn ImageBackend>,
        credential: &'a Credential,
        image: &'a str,
    ) -> Result<Self, UnknownMode> {
        match &gate.mode {
            Mode::Policy => Ok(Self::Policy {
                backend,
                credential,
                image,
                policy_bundle_id: &gate.policy_reference.policy_bundle_id,
            }),
            Mode::Analysis => Ok(Self::Analysis {
                backend,
                credential,
                image,
            }),
            Mode::BreakGlass => Ok(Self::BreakGlass),
            Mode::Unknown(mode) => Err(UnknownMode(mode.clone())),
        }
    }

    pub async fn validate(&self) -> Verdict {
        match *self {
            Self::Policy {
                backend,
                credential,
                image,
                policy_bundle_id,
            } => policy(backend, credential, image, policy_bundle_id).await,
            Self::Analysis {
                backend,
                credential,
                image,
            } => analysis(backend, credential, image).await,
            Self::BreakGlass => break_glass(),
        }
    }
}

/// Checks that the backend has analyzed `image`.
pub async fn analysis(
    backend: Option<&dyn ImageBackend>,
    credential: &Credential,
    image: &str,
) -> Verdict {
    let Some(backend) = backend else {
        error!(%image, "{}", NO_BACKEND_MESSAGE);
        return Verdict::invalid(NO_BACKEND_MESSAGE).with_mode(Mode::Analysis);
    };

    let found = match backend.get(credential, image).await {
        Ok(found) => found,
        Err(e) if e.is_not_found() => {
            info!(%image, "Image is not known to the backend");
            return Verdict::invalid(format!("Image {image:?} is not analyzed"))
                .with_mode(Mode::Analysis);
        }
        Err(error) => {
            error!(%error, %image, "Failed to check image analysis status");
            return Verdict::invalid(format!(
                "error checking Anchore for image analysis status: {error}"
            ))
            .with_mode(Mode::Analysis);
        }
    };

    let digest = &found.digest;
    if found.is_analyzed() {
        info!(%image, %digest, "Image is analyzed");
        return Verdict::valid(format!("Image {image:?} with digest {digest:?} is analyzed"))
            .with_mode(Mode::Analysis)
            .with_digest(digest);
    }

    info!(%image, %digest, status = %found.analysis_status, "Image is not analyzed");
    Verdict::invalid(format!(
        "Image {image:?} with digest {digest:?} is not analyzed"
    ))
    .with_mode(Mode::Analysis)
    .with_digest(digest)
}

/// Checks that `image` is analyzed and passes the given policy bundle.
///
/// An image that fails the analysis check is returned unchanged.
pub async fn policy(
    backend: Option<&dyn ImageBackend>,
    credential: &Credential,
    image: &str,
    policy_bundle_id: &str,
) -> Verdict {
    let analyzed = analysis(backend, credential, image).await;
    if !analyzed.is_valid {
        return analyzed;
    }
    let (Some(backend), false) = (backend, analyzed.image_digest.is_empty()) else {
        return Verdict::invalid(format!(
            "Image {image:?} has no digest, policy cannot be evaluated"
        ))
        .with_mode(Mode::Policy);
    };

    let digest = analyzed.image_digest;
    match backend
        .does_policy_check_pass(credential, &digest, image, policy_bundle_id)
        .await
    {
        Ok(true) => {
            info!(%image, %digest, %policy_bundle_id, "Image passed policy checks");
            Verdict::valid(format!(
                "Image {image:?} with digest {digest:?} passed policy checks for policy bundle {policy_bundle_id:?}"
            ))
            .with_mode(Mode::Policy)
            .with_digest(digest)
        }
        Ok(false) => {
            info!(%image, %digest, %policy_bundle_id, "Image failed policy checks");
            Verdict::invalid(format!(
                "Image {image:?} with digest {digest:?} failed policy checks for policy bundle {policy_bundle_id:?}"
            ))
            .with_mode(Mode::Policy)
            .with_digest(digest)
        }
        Err(error) => {
            error!(%error, %image, %digest, "Failed to check policy");
            Verdict::invalid(format!(
                "error checking if policy check passes for image {digest:?}: {error}"
            ))
            .with_mode(Mode::Policy)
            .with_digest(digest)
        }
    }
}

/// Admits the image without consulting the backend.
pub fn break_glass() -> Verdict {
    info!("Break glass mode, skipping image checks");
    Verdict::valid("no check requirements in config").with_mode(Mode::BreakGlass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gate::PolicyReference,
        tests::{Call, FakeBackend},
    };

    fn admin() -> Credential {
        Credential::new("admin", "secret")
    }

    #[test]
    fn parses_modes() {
        assert_eq!(Mode::from("policy"), Mode::Policy);
        assert_eq!(Mode::from("analysis"), Mode::Analysis);
        assert_eq!(Mode::from("breakglass"), Mode::BreakGlass);
        assert_eq!(Mode::from("audit"), Mode::Unknown("audit".to_string()));
        assert_eq!(Mode::from("audit").to_string(), "audit");
    }

    #[test]
    fn unknown_modes_fail_to_bind() {
        let gate = GateConfiguration {
            mode: Mode::from("audit"),
            policy_reference: PolicyReference::new("admin", ""),
        };
        let cred = admin();
        let err = Validator::new(&gate, None, &cred, "alpine").err();
        assert_eq!(err, Some(UnknownMode("audit".to_string())));
    }

    #[tokio::test]
    async fn analysis_without_backend_fails() {
        let v = analysis(None, &admin(), "alpine").await;
        assert!(!v.is_valid);
        assert_eq!(v.image_digest, "");
        assert_eq!(v.message, NO_BACKEND_MESSAGE);
    }

    #[tokio::test]
    async fn analysis_of_unknown_image_has_no_digest() {
        let backend = FakeBackend::default();
        let v = analysis(Some(&backend), &admin(), "ubuntu").await;
        assert!(!v.is_valid);
        assert_eq!(v.image_digest, "");
        assert_eq!(v.mode, Some(Mode::Analysis));
    }

    #[tokio::test]
    async fn analysis_reports_backend_errors() {
        let backend = FakeBackend::default().offline();
        let v = analysis(Some(&backend), &admin(), "alpine").await;
        assert!(!v.is_valid);
        assert_eq!(v.image_digest, "");
        assert!(v.message.starts_with("error checking Anchore"), "{}", v.message);
    }

    #[tokio::test]
    async fn analysis_requires_analyzed_status() {
        let backend = FakeBackend::default()
            .with_image("alpine", "sha256:aaa", "analyzed")
            .with_image("debian", "sha256:ddd", "analyzing");

        let v = analysis(Some(&backend), &admin(), "alpine").await;
        assert!(v.is_valid);
        assert_eq!(v.image_digest, "sha256:aaa");

        let v = analysis(Some(&backend), &admin(), "debian").await;
        assert!(!v.is_valid);
        assert_eq!(v.image_digest, "sha256:ddd");
    }

    #[tokio::test]
    async fn policy_is_not_checked_for_unanalyzed_images() {
        let backend = FakeBackend::default().with_image("debian", "sha256:ddd", "analyzing");
        let v = policy(Some(&backend), &admin(), "debian", "bundle").await;
        assert!(!v.is_valid);
        assert_eq!(v.image_digest, "sha256:ddd");
        assert_eq!(
            backend.calls(),
            vec![Call::Get("admin".to_string(), "debian".to_string())]
        );
    }

    #[tokio::test]
    async fn policy_checks_the_analyzed_digest() {
        let backend = FakeBackend::default()
            .with_image("alpine", "sha256:aaa", "analyzed")
            .passing("sha256:aaa");
        let v = policy(Some(&backend), &admin(), "alpine", "bundle").await;
        assert!(v.is_valid);
        assert_eq!(v.mode, Some(Mode::Policy));
        assert_eq!(v.image_digest, "sha256:aaa");
        assert_eq!(
            backend.calls(),
            vec![
                Call::Get("admin".to_string(), "alpine".to_string()),
                Call::PolicyCheck(
                    "admin".to_string(),
                    "sha256:aaa".to_string(),
                    "alpine".to_string(),
                    "bundle".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn policy_errors_keep_the_digest() {
        let backend = FakeBackend::default()
            .with_image("alpine", "sha256:aaa", "analyzed")
            .failing_policy_checks();
        let v = policy(Some(&backend), &admin(), "alpine", "").await;
        assert!(!v.is_valid);
        assert_eq!(v.image_digest, "sha256:aaa");
        assert!(v.message.contains("policy check"), "{}", v.message);
    }

    #[tokio::test]
    async fn break_glass_never_calls_the_backend() {
        let gate = GateConfiguration {
            mode: Mode::BreakGlass,
            policy_reference: PolicyReference::new("admin", ""),
        };
        let backend = FakeBackend::default().offline();
        let cred = admin();
        let v = Validator::new(&gate, Some(&backend), &cred, "alpine")
            .unwrap()
            .validate()
            .await;
        assert!(v.is_valid);
        assert_eq!(v.mode, Some(Mode::BreakGlass));
        assert!(backend.calls().is_empty());
    }
}
