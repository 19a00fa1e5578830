use crate::{client::Client, images, model};
use anchore_admission_controller_core::{BackendError, Credential, Image, ImageBackend};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// An image backend speaking the v1 engine API.
#[derive(Clone)]
pub struct V1Backend {
    client: Client,
}

#[derive(Debug, Serialize)]
struct AnalysisRequest<'a> {
    source: ImageSource<'a>,
    annotations: BTreeMap<&'static str, &'static str>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    tag: RegistryTagSource<'a>,
}

#[derive(Debug, Serialize)]
struct RegistryTagSource<'a> {
    pull_string: &'a str,
}

// === impl V1Backend ===

impl V1Backend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ImageBackend for V1Backend {
    async fn get(&self, credential: &Credential, image: &str) -> Result<Image, BackendError> {
        images::get(&self.client, credential, image).await
    }

    async fn analyze(&self, credential: &Credential, image: &str) -> Result<(), BackendError> {
        let request = AnalysisRequest::new(image, model::now());
        images::add(&self.client, credential, image, &request).await
    }

    async fn does_policy_check_pass(
        &self,
        credential: &Credential,
        digest: &str,
        image: &str,
        policy_bundle_id: &str,
    ) -> Result<bool, BackendError> {
        images::policy_check(&self.client, credential, digest, image, policy_bundle_id).await
    }
}

// === impl AnalysisRequest ===

impl<'a> AnalysisRequest<'a> {
    fn new(pull_string: &'a str, created_at: DateTime<Utc>) -> Self {
        Self {
            source: ImageSource {
                tag: RegistryTagSource { pull_string },
            },
            annotations: model::annotations(),
            created_at,
        }
    }
}
