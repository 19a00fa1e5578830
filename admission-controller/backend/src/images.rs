//! Image operations shared by all API versions.

use crate::{
    client::Client,
    model::{self, AnchoreImage, PolicyEvaluation},
};
use anchore_admission_controller_core::{BackendError, Credential, Image};
use anyhow::anyhow;
use serde::Serialize;
use tracing::{info, warn};

pub(crate) async fn get(
    client: &Client,
    credential: &Credential,
    image: &str,
) -> Result<Image, BackendError> {
    info!(%image, "Getting image from backend");
    let url = client.url("/images", &[("fulltag", image)]);
    let images = match client.get::<Vec<AnchoreImage>>(Some(credential), url).await {
        Ok(images) => images,
        Err(BackendError::NotFound) => {
            info!(%image, "Image not found");
            return Err(BackendError::NotFound);
        }
        Err(error) => {
            warn!(%error, %image, "Failed to get image");
            return Err(error);
        }
    };

    let found = model::latest_image(images)
        .ok_or_else(|| anyhow!("no images found with tag {image:?}"))?;
    info!(
        %image,
        status = %found.analysis_status,
        digest = %found.image_digest,
        "Image found"
    );
    Ok(found.into())
}

pub(crate) async fn add<B: Serialize>(
    client: &Client,
    credential: &Credential,
    image: &str,
    request: &B,
) -> Result<(), BackendError> {
    let url = client.url("/images", &[("autosubscribe", "false")]);
    let images: Vec<AnchoreImage> = client.post(credential, url, request).await?;
    let Some(added) = images.into_iter().next() else {
        return Err(anyhow!(
            "no image record received in successful response to image add request for {image:?}"
        )
        .into());
    };
    info!(%image, digest = %added.image_digest, "Image analysis requested");
    Ok(())
}

pub(crate) async fn policy_check(
    client: &Client,
    credential: &Credential,
    digest: &str,
    image: &str,
    policy_bundle_id: &str,
) -> Result<bool, BackendError> {
    let mut query = vec![("tag", image), ("interactive", "true")];
    if !policy_bundle_id.is_empty() {
        query.push(("policyId", policy_bundle_id));
    }
    let url = client.url(&format!("/images/{digest}/check"), &query);
    let evaluations: Vec<PolicyEvaluation> = client.get(Some(credential), url).await?;
    model::policy_check_passed(&evaluations)
}
