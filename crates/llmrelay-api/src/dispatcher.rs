//! Request dispatcher: validates inbound requests, calls the provider, and
//! drives one relay session per streaming request.

use std::{future::Future, sync::Arc};

use bytes::Bytes;
use futures::{
    future,
    stream::{self, StreamExt},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use llmrelay_core::{
    BoxUpstream, CoreResult, MetricsSnapshot, Relay, RelayConfig, RelayMetrics, RelayResult,
    TokenBudget,
};
use llmrelay_providers::{
    with_retry, ChatRequest, GeneratedImage, ImageRequest, LlmProvider, ModelSet, ProviderError,
    ProviderResult, RetryConfig, SpeechRequest, TranscriptionRequest,
};

use crate::{
    error::{ApiError, ApiResult},
    streaming::{BodyFrame, FrameStream, HttpBodyWriter},
};

/// Shared by all handlers. Holds the provider handle and the relay policy.
pub struct Dispatcher {
    provider: Arc<dyn LlmProvider>,
    relay_config: RelayConfig,
    retry: RetryConfig,
    budget: TokenBudget,
    metrics: Arc<RelayMetrics>,
    shutdown: CancellationToken,
}

/// Why a stream could not be started, and whether a fresh attempt may help.
struct StartFailure {
    error: ApiError,
    retryable: bool,
    retry_after_secs: Option<u64>,
}

impl StartFailure {
    fn fatal(error: ApiError) -> Self {
        Self {
            error,
            retryable: false,
            retry_after_secs: None,
        }
    }
}

impl From<ProviderError> for StartFailure {
    fn from(e: ProviderError) -> Self {
        Self {
            retryable: e.is_retryable(),
            retry_after_secs: e.retry_after(),
            error: ApiError::from(e),
        }
    }
}

impl Dispatcher {
    /// Rejects an invalid relay configuration up front.
    pub fn new(provider: Arc<dyn LlmProvider>, relay_config: RelayConfig) -> CoreResult<Self> {
        relay_config.validate()?;
        Ok(Self {
            provider,
            relay_config,
            retry: RetryConfig::default(),
            budget: TokenBudget::default(),
            metrics: RelayMetrics::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_token_budget(mut self, budget: TokenBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Cancelling `token` aborts every active relay session.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn models(&self) -> ModelSet {
        self.provider.models()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Non-empty messages within the prompt budget. Returns the estimate.
    pub fn check_prompt(&self, request: &ChatRequest) -> ApiResult<usize> {
        if request.messages.is_empty() {
            return Err(ApiError::BadRequest("messages must not be empty".to_string()));
        }
        Ok(self.budget.check(request.role_content_pairs())?)
    }

    pub async fn chat(&self, request: &ChatRequest) -> ApiResult<String> {
        self.check_prompt(request)?;
        let text = with_retry(&self.retry, "chat", move || self.provider.chat(request)).await?;
        Ok(text)
    }

    pub async fn generate_image(&self, request: &ImageRequest) -> ApiResult<Vec<GeneratedImage>> {
        let images = with_retry(&self.retry, "image", move || {
            self.provider.generate_image(request)
        })
        .await?;
        Ok(images)
    }

    pub async fn transcribe(&self, request: &TranscriptionRequest) -> ApiResult<String> {
        let text = with_retry(&self.retry, "transcribe", move || {
            self.provider.transcribe(request)
        })
        .await?;
        Ok(text)
    }

    pub async fn speech(&self, request: &SpeechRequest) -> ApiResult<Bytes> {
        let audio = with_retry(&self.retry, "speech", move || self.provider.speech(request)).await?;
        Ok(audio)
    }

    pub async fn stream_chat(&self, request: &ChatRequest) -> ApiResult<FrameStream> {
        self.check_prompt(request)?;
        self.relay_stream("chat_stream", move || self.provider.chat_stream(request))
            .await
    }

    pub async fn stream_speech(&self, request: &SpeechRequest) -> ApiResult<FrameStream> {
        self.relay_stream("speech_stream", move || self.provider.speech_stream(request))
            .await
    }

    /// Open an upstream and relay it, retrying with a fresh session only
    /// while nothing has reached the client. Once the first frame is out
    /// the stream is committed and failures travel in-band.
    async fn relay_stream<F, Fut>(&self, operation: &str, mut open: F) -> ApiResult<FrameStream>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<BoxUpstream>>,
    {
        let mut attempt = 0;
        loop {
            let failure = match open().await {
                Ok(upstream) => match self.start_session(upstream).await {
                    Ok(frames) => return Ok(frames),
                    Err(failure) => failure,
                },
                Err(e) => StartFailure::from(e),
            };

            if !failure.retryable || attempt >= self.retry.max_retries || self.shutdown.is_cancelled() {
                return Err(failure.error);
            }
            attempt += 1;
            let delay = self.retry.delay_for(attempt, failure.retry_after_secs);
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure.error,
                "Stream failed before first chunk, retrying"
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(ApiError::Unavailable("server is shutting down".to_string()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Spawn a relay session and wait for its first frame.
    async fn start_session(&self, upstream: BoxUpstream) -> Result<FrameStream, StartFailure> {
        let relay = Relay::new(self.relay_config.clone())
            .map_err(|e| StartFailure::fatal(e.into()))?
            .with_metrics(self.metrics.clone())
            .with_cancellation(self.shutdown.child_token());
        let (writer, mut rx) = HttpBodyWriter::channel();
        let task = tokio::spawn(relay.run(upstream, writer));

        let first = rx.recv().await;
        if let Some(frame @ (BodyFrame::Chunk { .. } | BodyFrame::Done)) = first {
            debug!("Stream committed");
            let frames = stream::once(future::ready(frame)).chain(ReceiverStream::new(rx));
            return Ok(frames.boxed());
        }

        // Failed before any chunk: the relay has sent its abort marker and is
        // finishing, so its result is the error to report.
        drop(rx);
        match task.await {
            Ok(RelayResult::Aborted { reason, .. }) => {
                info!(reason = reason.kind(), "Stream aborted before first chunk");
                Err(StartFailure {
                    error: ApiError::from(&reason),
                    retryable: reason.is_retryable(),
                    retry_after_secs: None,
                })
            }
            Ok(RelayResult::Completed { .. }) => Ok(stream::empty().boxed()),
            Err(e) => Err(StartFailure::fatal(ApiError::Internal(format!(
                "relay task failed: {e}"
            )))),
        }
    }
}
