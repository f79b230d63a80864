use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

use crate::{
    dispatcher::Dispatcher,
    types::{HealthResponse, ModelList, ModelObject},
};

/// `GET /models`: configured model per capability.
pub async fn list_models(Extension(dispatcher): Extension<Arc<Dispatcher>>) -> Json<ModelList> {
    let now = Utc::now().timestamp();
    let models = dispatcher.models();
    let owner = dispatcher.provider_name().to_lowercase();
    let data = [
        ("chat", models.chat),
        ("image", models.image),
        ("transcription", models.transcription),
        ("speech", models.speech),
    ]
    .into_iter()
    .map(|(capability, id)| ModelObject {
        id,
        object: "model".to_string(),
        capability: capability.to_string(),
        created: now,
        owned_by: owner.clone(),
    })
    .collect();

    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}

/// `GET /health`: liveness probe with relay counters.
pub async fn health(Extension(dispatcher): Extension<Arc<Dispatcher>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        relay: dispatcher.metrics(),
    })
}
