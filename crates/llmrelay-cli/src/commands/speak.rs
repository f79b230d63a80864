use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

use llmrelay_core::{AsyncWriteClient, Relay, RelayResult};
use llmrelay_providers::{with_retry, AudioFormat, LlmProvider, SpeechRequest};

use crate::{
    commands::{build_provider, interrupt_token},
    config::AppConfig,
};

/// Relay synthesized speech into `out` as it streams. A partial file is
/// removed when the stream aborts.
pub async fn run(
    text: &str,
    out: &Path,
    voice: Option<String>,
    format: AudioFormat,
    config: &AppConfig,
) -> anyhow::Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("Nothing to synthesize: --text is empty");
    }
    let provider = build_provider(config)?;
    let request = SpeechRequest {
        input: text.to_string(),
        voice,
        format,
    };

    let relay = Relay::new(config.relay.to_relay_config())
        .context("Invalid relay configuration")?
        .with_cancellation(interrupt_token());

    let upstream = with_retry(&config.retry, "speech_stream", || provider.speech_stream(&request))
        .await
        .context("Failed to open speech stream")?;

    let file = tokio::fs::File::create(out)
        .await
        .with_context(|| format!("Cannot create {}", out.display()))?;

    match relay.run(upstream, AsyncWriteClient::new(file)).await {
        RelayResult::Completed {
            total_chunks,
            total_bytes,
        } => {
            info!(
                path = %out.display(),
                chunks = total_chunks,
                bytes = total_bytes,
                "Audio saved"
            );
            println!("{}", out.display());
            Ok(())
        }
        RelayResult::Aborted { reason, .. } => {
            if let Err(e) = tokio::fs::remove_file(out).await {
                warn!(path = %out.display(), error = %e, "Could not remove partial audio file");
            }
            anyhow::bail!("Speech stream aborted: {reason}")
        }
    }
}
