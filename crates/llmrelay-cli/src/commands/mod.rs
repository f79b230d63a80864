pub mod chat;
pub mod image;
pub mod serve;
pub mod speak;
pub mod transcribe;

use anyhow::Context;
use llmrelay_providers::OpenAIProvider;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{AppConfig, API_KEY_ENV};

/// Build the provider client from configuration. Fails without an API key.
pub fn build_provider(config: &AppConfig) -> anyhow::Result<OpenAIProvider> {
    let api_key = config.provider.resolved_api_key().with_context(|| {
        format!("No API key: set provider.api_key, LLMRELAY_PROVIDER__API_KEY or {API_KEY_ENV}")
    })?;
    let provider = OpenAIProvider::new(config.provider.to_openai_config(api_key))
        .context("Failed to build HTTP client")?;
    Ok(provider)
}

/// A token cancelled on the first Ctrl-C, so a running relay can stop cleanly.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping relay");
            child.cancel();
        }
    });
    token
}
