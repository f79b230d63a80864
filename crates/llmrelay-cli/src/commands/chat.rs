use anyhow::Context;

use llmrelay_core::{AsyncWriteClient, Relay, RelayResult};
use llmrelay_providers::{with_retry, ChatMessage, ChatRequest, LlmProvider};

use crate::{
    commands::{build_provider, interrupt_token},
    config::AppConfig,
};

/// Relay one chat completion to stdout as it streams.
pub async fn run(
    prompt: &str,
    system: Option<&str>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    stats: bool,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let provider = build_provider(config)?;

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));
    let request = ChatRequest {
        messages,
        temperature,
        max_tokens,
    };
    config
        .provider
        .token_budget()
        .check(request.role_content_pairs())?;

    let relay = Relay::new(config.relay.to_relay_config())
        .context("Invalid relay configuration")?
        .with_cancellation(interrupt_token());

    let upstream = with_retry(&config.retry, "chat_stream", || provider.chat_stream(&request))
        .await
        .context("Failed to open chat stream")?;

    let writer = AsyncWriteClient::new(tokio::io::stdout());
    let (result, report) = relay.run_with_report(upstream, writer).await;
    println!();

    if stats {
        let secs = report.elapsed_ms as f64 / 1000.0;
        eprintln!(
            "\n[stats] {} chunks | {} bytes | {:.2} s | {:.1} chunks/s | session {}",
            report.chunks_forwarded,
            report.bytes_forwarded,
            secs,
            report.chunks_forwarded as f64 / secs.max(0.001),
            report.session_id,
        );
    }

    match result {
        RelayResult::Completed { .. } => Ok(()),
        RelayResult::Aborted {
            reason,
            chunks_forwarded,
            ..
        } => anyhow::bail!("Stream aborted after {chunks_forwarded} chunks: {reason}"),
    }
}
