use crate::{backend::ImageBackend, credentials::Credential};
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

/// Collects analysis requests while an admission request is evaluated so that
/// they can be submitted once the admission decision is final.
///
/// Dispatching never affects the decision: failures are logged and dropped.
#[derive(Default)]
pub struct AnalysisRequestQueue {
    requests: Vec<AnalysisRequest>,
}

struct AnalysisRequest {
    backend: Option<Arc<dyn ImageBackend>>,
    credential: Credential,
    image: String,
}

// === impl AnalysisRequestQueue ===

impl AnalysisRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plans an analysis request. Nothing is sent until [`Self::dispatch_all`].
    pub fn add(
        &mut self,
        backend: Option<Arc<dyn ImageBackend>>,
        credential: Credential,
        image: impl Into<String>,
    ) {
        self.requests.push(AnalysisRequest {
            backend,
            credential,
            image: image.into(),
        });
    }

    /// Appends all of `other`'s requests, preserving their order.
    pub fn import_requests_from(&mut self, other: AnalysisRequestQueue) {
        self.requests.extend(other.requests);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Submits every queued request in order and empties the queue.
    ///
    /// Returns the number of requests that were accepted by the backend.
    pub async fn dispatch_all(&mut self) -> usize {
        let requests = std::mem::take(&mut self.requests);
        debug!(requests = requests.len(), "Dispatching analysis requests");

        let mut accepted = 0;
        for request in requests {
            if request.dispatch().await {
                accepted += 1;
            }
        }
        accepted
    }
}

impl fmt::Debug for AnalysisRequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.requests.iter().map(|r| &r.image))
            .finish()
    }
}

// === impl AnalysisRequest ===

impl AnalysisRequest {
    async fn dispatch(self) -> bool {
        let Self {
            backend,
            credential,
            image,
        } = self;

        let Some(backend) = backend else {
            info!(%image, "No backend configured to request image analysis, skipping");
            return false;
        };

        info!(%image, user = %credential.username, "Requesting image analysis");
        match backend.analyze(&credential, &image).await {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, %image, "Failed to request image analysis, ignoring");
                false
            }
        }
    }
}
