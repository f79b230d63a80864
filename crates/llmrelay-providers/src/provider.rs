use async_trait::async_trait;
use bytes::Bytes;
use llmrelay_core::BoxUpstream;

use crate::{
    error::ProviderResult,
    types::{
        ChatRequest, GeneratedImage, ImageRequest, ModelSet, SpeechRequest, TranscriptionRequest,
    },
};

/// A remote model service. Implementations hold their own connection pool
/// and are shared across requests behind an `Arc`.
///
/// Streaming methods resolve once the upstream has accepted the request,
/// so status errors surface here rather than inside the stream.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    fn models(&self) -> ModelSet;

    async fn chat(&self, request: &ChatRequest) -> ProviderResult<String>;

    async fn chat_stream(&self, request: &ChatRequest) -> ProviderResult<BoxUpstream>;

    async fn generate_image(&self, request: &ImageRequest) -> ProviderResult<Vec<GeneratedImage>>;

    async fn transcribe(&self, request: &TranscriptionRequest) -> ProviderResult<String>;

    async fn speech(&self, request: &SpeechRequest) -> ProviderResult<Bytes>;

    async fn speech_stream(&self, request: &SpeechRequest) -> ProviderResult<BoxUpstream>;
}
