use serde::{Deserialize, Serialize};

use llmrelay_core::MetricsSnapshot;
use llmrelay_providers::{AudioFormat, ChatMessage, ChatRequest, SpeechRequest};

// ─── Request types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ChatBody {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl From<ChatBody> for ChatRequest {
    fn from(body: ChatBody) -> Self {
        ChatRequest {
            messages: body.messages,
            temperature: body.temperature,
            max_tokens: body.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageBody {
    pub prompt: String,
    pub n: Option<u32>,
    pub size: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeechBody {
    pub input: String,
    pub voice: Option<String>,
    #[serde(default)]
    pub format: AudioFormat,
}

impl From<SpeechBody> for SpeechRequest {
    fn from(body: SpeechBody) -> Self {
        SpeechRequest {
            input: body.input,
            voice: body.voice,
            format: body.format,
        }
    }
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageObject {
    pub b64_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResponse {
    pub model: String,
    pub images: Vec<ImageObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResponse {
    pub text: String,
}

// ── Models ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ModelObject {
    pub id: String,
    pub object: String,
    pub capability: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelObject>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub relay: MetricsSnapshot,
}
