use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Extension, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use crate::{
    dispatcher::Dispatcher,
    middleware::{not_found, request_id_middleware, timeout_error_body},
    routes::{
        audio::{speech, speech_stream, transcribe},
        chat::{chat, chat_stream},
        image::generate_image,
        models::{health, list_models},
    },
};

/// Largest accepted audio upload (the provider's own limit).
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Configuration for the API server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Deadline for producing the response head. Bodies already streaming
    /// are bounded by the relay idle timeout instead.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_secs: 120,
        }
    }
}

/// Build the axum router with all routes and middleware.
pub fn build_router(dispatcher: Arc<Dispatcher>, timeout_secs: u64) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/models", get(list_models))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/image", post(generate_image))
        .route(
            "/audio/transcribe",
            post(transcribe).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/audio/speech", post(speech))
        .route("/audio/speech/stream", post(speech_stream))
        .fallback(not_found)
        .layer(Extension(dispatcher))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TimeoutLayer::new(Duration::from_secs(timeout_secs)))
        .layer(middleware::map_response(timeout_error_body))
        .layer(cors)
        .layer(trace_layer)
}

/// Start the HTTP server and block until a shutdown signal is received.
/// Active relays are cancelled when the signal arrives.
pub async fn serve(dispatcher: Arc<Dispatcher>, config: ServerConfig) -> anyhow::Result<()> {
    let shutdown = dispatcher.shutdown_token();
    let router = build_router(dispatcher, config.request_timeout_secs);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(address = %addr, "Starting llmrelay API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Resolves on SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
