//! OpenAI-compatible HTTP provider.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use futures::StreamExt;
use llmrelay_core::{BoxUpstream, StreamUpstream, UpstreamError};
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::{
    error::{ProviderError, ProviderResult},
    provider::LlmProvider,
    retry::response_to_error,
    sse::{SseDecoder, DONE_MARKER},
    types::{
        ChatMessage, ChatRequest, GeneratedImage, ImageRequest, ModelSet, SpeechRequest,
        TranscriptionRequest,
    },
};

const PROVIDER: &str = "OpenAI";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub base_url: String,
    pub api_key: String,
    pub models: ModelSet,
    pub voice: String,
    pub language: String,
    pub connect_timeout: Duration,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            models: ModelSet {
                chat: "gpt-4.1-nano".to_string(),
                image: "gpt-image-1".to_string(),
                transcription: "gpt-4o-mini-transcribe".to_string(),
                speech: "gpt-4o-mini-tts".to_string(),
            },
            voice: "alloy".to_string(),
            language: "ru".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

pub struct OpenAIProvider {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig) -> ProviderResult<Self> {
        // No overall request timeout: streaming bodies are bounded by the
        // relay's idle timeout instead.
        let client = Client::builder()
            .user_agent(concat!("llmrelay/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Share an existing connection pool.
    pub fn with_client(client: Client, mut config: OpenAIConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self { client, config }
    }

    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.config.base_url, path))
            .bearer_auth(&self.config.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> ProviderResult<Response> {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(response_to_error(response, PROVIDER).await);
        }
        Ok(response)
    }

    fn chat_body<'a>(&'a self, request: &'a ChatRequest, stream: bool) -> ChatCompletionBody<'a> {
        ChatCompletionBody {
            model: &self.config.models.chat,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    fn speech_body(&self, request: &SpeechRequest) -> serde_json::Value {
        json!({
            "model": self.config.models.speech,
            "input": request.input,
            "voice": request.voice.as_deref().unwrap_or(self.config.voice.as_str()),
            "response_format": request.format.as_str(),
        })
    }
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamEventError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamEventError {
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Parse one SSE payload. `Ok(None)` for events without content.
fn parse_stream_event(data: &str) -> Result<Option<String>, UpstreamError> {
    let event: StreamEvent = serde_json::from_str(data)
        .map_err(|e| UpstreamError::Protocol(format!("malformed stream event: {e}")))?;

    if let Some(error) = event.error {
        let rate_limited = error
            .kind
            .as_deref()
            .is_some_and(|kind| kind.contains("rate_limit"));
        return Err(if rate_limited {
            UpstreamError::RateLimited(error.message)
        } else {
            UpstreamError::Other(error.message)
        });
    }

    Ok(event
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

fn stream_error(e: reqwest::Error) -> UpstreamError {
    UpstreamError::Connection(e.to_string())
}

/// Turn a chat-completions SSE body into a stream of content deltas.
fn chat_delta_stream(
    response: Response,
) -> impl futures::Stream<Item = Result<Bytes, UpstreamError>> + Send + 'static {
    async_stream::stream! {
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(read) = body.next().await {
            let bytes = match read {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(stream_error(e));
                    return;
                }
            };
            let events = match decoder.push(&bytes) {
                Ok(events) => events,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            for data in events {
                if data.trim() == DONE_MARKER {
                    return;
                }
                match parse_stream_event(&data) {
                    Ok(Some(delta)) => yield Ok(Bytes::from(delta)),
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        let tail = match decoder.finish() {
            Ok(tail) => tail,
            Err(e) => {
                yield Err(e);
                return;
            }
        };
        if let Some(data) = tail {
            if data.trim() == DONE_MARKER {
                return;
            }
            match parse_stream_event(&data) {
                Ok(Some(delta)) => yield Ok(Bytes::from(delta)),
                Ok(None) => {}
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        yield Err(UpstreamError::Connection(
            "stream ended before completion marker".to_string(),
        ));
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn models(&self) -> ModelSet {
        self.config.models.clone()
    }

    async fn chat(&self, request: &ChatRequest) -> ProviderResult<String> {
        let response = self
            .send(self.post("/chat/completions").json(&self.chat_body(request, false)))
            .await?;
        let parsed: ChatCompletionResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::invalid_response(PROVIDER, "no choices in completion"))?;
        debug!(chars = content.len(), "Chat completion received");
        Ok(content)
    }

    async fn chat_stream(&self, request: &ChatRequest) -> ProviderResult<BoxUpstream> {
        let response = self
            .send(self.post("/chat/completions").json(&self.chat_body(request, true)))
            .await?;
        debug!(model = %self.config.models.chat, "Chat stream opened");
        Ok(StreamUpstream::boxed(chat_delta_stream(response)))
    }

    async fn generate_image(&self, request: &ImageRequest) -> ProviderResult<Vec<GeneratedImage>> {
        let model = &self.config.models.image;
        let mut body = json!({
            "model": model,
            "prompt": request.prompt,
            "n": request.n,
            "size": request.size,
        });
        // gpt-image models always return base64 and reject the parameter.
        if model.starts_with("dall-e") {
            body["response_format"] = json!("b64_json");
        }

        let response = self
            .send(self.post("/images/generations").json(&body))
            .await?;
        let parsed: ImageResponse = response.json().await?;

        let mut images = Vec::with_capacity(parsed.data.len());
        for (i, data) in parsed.data.into_iter().enumerate() {
            let encoded = data.b64_json.ok_or_else(|| {
                ProviderError::invalid_response(PROVIDER, format!("image #{} has no b64_json", i + 1))
            })?;
            let bytes = STANDARD.decode(encoded)?;
            debug!(index = i + 1, size = bytes.len(), "Image decoded");
            images.push(GeneratedImage {
                bytes: Bytes::from(bytes),
            });
        }
        if images.is_empty() {
            return Err(ProviderError::invalid_response(PROVIDER, "no images returned"));
        }
        Ok(images)
    }

    async fn transcribe(&self, request: &TranscriptionRequest) -> ProviderResult<String> {
        let language = request
            .language
            .clone()
            .unwrap_or_else(|| self.config.language.clone());
        let file = multipart::Part::bytes(request.audio.to_vec()).file_name(request.filename.clone());
        let form = multipart::Form::new()
            .text("model", self.config.models.transcription.clone())
            .text("language", language)
            .part("file", file);

        let response = self
            .send(self.post("/audio/transcriptions").multipart(form))
            .await?;
        let parsed: TranscriptionResponse = response.json().await?;
        debug!(chars = parsed.text.len(), "Transcription received");
        Ok(parsed.text)
    }

    async fn speech(&self, request: &SpeechRequest) -> ProviderResult<Bytes> {
        let response = self
            .send(self.post("/audio/speech").json(&self.speech_body(request)))
            .await?;
        Ok(response.bytes().await?)
    }

    async fn speech_stream(&self, request: &SpeechRequest) -> ProviderResult<BoxUpstream> {
        let response = self
            .send(self.post("/audio/speech").json(&self.speech_body(request)))
            .await?;
        let audio = response
            .bytes_stream()
            .filter(|read| futures::future::ready(!matches!(read, Ok(bytes) if bytes.is_empty())))
            .map(|read| read.map_err(stream_error));
        Ok(StreamUpstream::boxed(audio))
    }
}
