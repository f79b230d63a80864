use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use llmrelay_api::{serve, Dispatcher, ServerConfig};

use crate::{commands::build_provider, config::AppConfig};

/// Start the HTTP relay server.
pub async fn run(host: Option<&str>, port: Option<u16>, config: &AppConfig) -> anyhow::Result<()> {
    let provider = build_provider(config)?;
    let relay_config = config.relay.to_relay_config();

    let dispatcher = Dispatcher::new(Arc::new(provider), relay_config.clone())
        .context("Invalid relay configuration")?
        .with_retry(config.retry.clone())
        .with_token_budget(config.provider.token_budget());

    let server_config = ServerConfig {
        host: host.unwrap_or(&config.server.host).to_string(),
        port: port.unwrap_or(config.server.port),
        request_timeout_secs: config.server.request_timeout_secs,
    };

    info!(
        host = %server_config.host,
        port = server_config.port,
        chat_model = %config.provider.chat_model,
        idle_timeout_ms = relay_config.max_idle_timeout.as_millis() as u64,
        max_chunk_size = relay_config.max_chunk_size,
        "Server starting"
    );

    serve(Arc::new(dispatcher), server_config).await?;
    Ok(())
}
