use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, Multipart},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Extension, Json,
};
use tracing::{info, instrument};

use llmrelay_providers::{SpeechRequest, TranscriptionRequest};

use crate::{
    dispatcher::Dispatcher,
    error::{ApiError, ApiResult},
    streaming::StreamFormat,
    types::{SpeechBody, TranscriptionResponse},
};

const DEFAULT_FILENAME: &str = "audio.wav";

fn multipart_error(e: MultipartError) -> ApiError {
    ApiError::BadRequest(e.body_text())
}

/// `POST /audio/transcribe`: multipart `file` plus optional `language`.
#[instrument(skip_all)]
pub async fn transcribe(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    mut multipart: Multipart,
) -> ApiResult<Json<TranscriptionResponse>> {
    let mut audio = None;
    let mut filename = None;
    let mut language = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                filename = field.file_name().map(str::to_string);
                audio = Some(field.bytes().await.map_err(multipart_error)?);
            }
            Some("language") => {
                let value = field.text().await.map_err(multipart_error)?;
                language = Some(value.trim().to_string()).filter(|v| !v.is_empty());
            }
            _ => {}
        }
    }

    let audio = audio
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing audio field `file`".to_string()))?;
    let request = TranscriptionRequest {
        audio,
        filename: filename.unwrap_or_else(|| DEFAULT_FILENAME.to_string()),
        language,
    };
    info!(
        filename = %request.filename,
        size = request.audio.len(),
        "Transcribing upload"
    );

    let text = dispatcher.transcribe(&request).await?;
    Ok(Json(TranscriptionResponse { text }))
}

fn speech_request(body: SpeechBody) -> ApiResult<SpeechRequest> {
    if body.input.trim().is_empty() {
        return Err(ApiError::BadRequest("input must not be empty".to_string()));
    }
    Ok(SpeechRequest::from(body))
}

/// `POST /audio/speech`: the whole synthesized clip in one body.
#[instrument(skip_all, fields(format = body.format.as_str()))]
pub async fn speech(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Json(body): Json<SpeechBody>,
) -> ApiResult<Response> {
    let request = speech_request(body)?;
    let audio = dispatcher.speech(&request).await?;

    let mut response = audio.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(request.format.mime()),
    );
    Ok(response)
}

/// `POST /audio/speech/stream`: synthesized audio relayed as it arrives.
#[instrument(skip_all, fields(format = body.format.as_str()))]
pub async fn speech_stream(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Json(body): Json<SpeechBody>,
) -> ApiResult<Response> {
    let request = speech_request(body)?;
    let frames = dispatcher.stream_speech(&request).await?;
    let format = StreamFormat::Raw {
        content_type: request.format.mime(),
    };
    Ok(format.into_response(frames))
}
