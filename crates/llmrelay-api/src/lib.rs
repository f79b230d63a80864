//! # llmrelay-api
//!
//! HTTP API server for llmrelay.
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | `POST` | `/chat` | Chat completion, one JSON body |
//! | `POST` | `/chat/stream` | Relayed chat stream (text, SSE or NDJSON by `Accept`) |
//! | `POST` | `/image` | Image generation |
//! | `POST` | `/audio/transcribe` | Multipart speech-to-text |
//! | `POST` | `/audio/speech` | Text-to-speech, whole clip |
//! | `POST` | `/audio/speech/stream` | Relayed text-to-speech stream |
//! | `GET` | `/models` | Configured models |
//! | `GET` | `/health` | Liveness probe |

pub mod dispatcher;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod streaming;
pub mod types;


pub use dispatcher::Dispatcher;
pub use error::{ApiError, ApiResult};
pub use server::{build_router, serve, ServerConfig};
pub use streaming::StreamFormat;
