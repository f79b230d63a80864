use std::sync::Arc;

use axum::{http::HeaderMap, response::Response, Extension, Json};
use tracing::{info, instrument};

use llmrelay_providers::ChatRequest;

use crate::{
    dispatcher::Dispatcher,
    error::ApiResult,
    streaming::StreamFormat,
    types::{ChatBody, ChatResponse},
};

/// `POST /chat`: full completion in one JSON body.
#[instrument(skip_all, fields(messages = body.messages.len()))]
pub async fn chat(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Json(body): Json<ChatBody>,
) -> ApiResult<Json<ChatResponse>> {
    let request = ChatRequest::from(body);
    let response = dispatcher.chat(&request).await?;
    info!(chars = response.len(), "Chat completed");
    Ok(Json(ChatResponse { response }))
}

/// `POST /chat/stream`: completion relayed chunk by chunk, framed per `Accept`.
#[instrument(skip_all, fields(messages = body.messages.len(), format = tracing::field::Empty))]
pub async fn chat_stream(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> ApiResult<Response> {
    let format = StreamFormat::from_headers(&headers);
    tracing::Span::current().record("format", format.content_type());

    let request = ChatRequest::from(body);
    let frames = dispatcher.stream_chat(&request).await?;
    Ok(format.into_response(frames))
}
