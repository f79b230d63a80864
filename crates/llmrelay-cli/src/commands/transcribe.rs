use std::path::Path;

use anyhow::Context;
use bytes::Bytes;

use llmrelay_providers::{with_retry, LlmProvider, TranscriptionRequest};

use crate::{commands::build_provider, config::AppConfig};

/// Print the transcription of an audio file.
pub async fn run(file: &Path, language: Option<String>, config: &AppConfig) -> anyhow::Result<()> {
    let provider = build_provider(config)?;

    let audio = tokio::fs::read(file)
        .await
        .with_context(|| format!("Cannot read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio.wav".to_string());

    let request = TranscriptionRequest {
        audio: Bytes::from(audio),
        filename,
        language,
    };
    let text = with_retry(&config.retry, "transcribe", || provider.transcribe(&request))
        .await
        .context("Transcription failed")?;

    println!("{text}");
    Ok(())
}
