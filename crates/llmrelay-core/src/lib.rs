//! # llmrelay-core
//!
//! Streaming relay between an upstream LLM provider and a waiting client.
//!
//! ## Pieces
//!
//! | Type | Role |
//! |---|---|
//! | [`Upstream`] | pull side: next chunk, end, or failure |
//! | [`ClientWriter`] | push side: outbound transport |
//! | [`Relay`] | one session: ordering, back-pressure, fail-fast aborts |
//! | [`RelayMetrics`] | process-wide atomic counters |
//! | [`TokenBudget`] | prompt size guard |

pub mod chunk;
pub mod error;
pub mod metrics;
pub mod relay;
pub mod session;
pub mod tokens;
pub mod transport;
pub mod upstream;

pub use chunk::StreamChunk;
pub use error::{CoreError, CoreResult, TransportError, UpstreamError};
pub use metrics::{MetricsSnapshot, RelayMetrics, SessionGuard};
pub use relay::{relay, AbortReason, Relay, RelayConfig, RelayResult, SessionReport};
pub use session::{RelaySession, SessionState};
pub use tokens::{estimate_message_tokens, estimate_tokens, TokenBudget};
pub use transport::{AsyncWriteClient, ClientWriter};
pub use upstream::{BoxUpstream, StreamUpstream, Upstream};
