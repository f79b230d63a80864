use std::sync::Arc;

use axum::{Extension, Json};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{info, instrument};

use llmrelay_providers::ImageRequest;

use crate::{
    dispatcher::Dispatcher,
    error::{ApiError, ApiResult},
    types::{ImageBody, ImageObject, ImageResponse},
};

const MAX_IMAGES: u32 = 10;

/// `POST /image`
#[instrument(skip_all, fields(n = body.n))]
pub async fn generate_image(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Json(body): Json<ImageBody>,
) -> ApiResult<Json<ImageResponse>> {
    if body.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".to_string()));
    }
    let mut request = ImageRequest::new(body.prompt);
    if let Some(n) = body.n {
        if n == 0 || n > MAX_IMAGES {
            return Err(ApiError::BadRequest(format!(
                "n must be between 1 and {MAX_IMAGES}"
            )));
        }
        request.n = n;
    }
    if let Some(size) = body.size {
        request.size = size;
    }

    let images = dispatcher.generate_image(&request).await?;
    info!(count = images.len(), "Images generated");

    Ok(Json(ImageResponse {
        model: dispatcher.models().image,
        images: images
            .iter()
            .map(|image| ImageObject {
                b64_json: STANDARD.encode(&image.bytes),
            })
            .collect(),
    }))
}
