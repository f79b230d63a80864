//! # llmrelay-providers
//!
//! Model service adapters. Streaming calls hand back a [`BoxUpstream`]
//! ready to be driven by a relay session.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use llmrelay_providers::{ChatMessage, ChatRequest, LlmProvider, OpenAIConfig, OpenAIProvider};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = OpenAIProvider::new(OpenAIConfig {
//!         api_key: std::env::var("OPENAI_API_KEY")?,
//!         ..OpenAIConfig::default()
//!     })?;
//!     let reply = provider
//!         .chat(&ChatRequest::new(vec![ChatMessage::user("Hi")]))
//!         .await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```
//!
//! [`BoxUpstream`]: llmrelay_core::BoxUpstream

pub mod error;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod sse;
pub mod types;

pub use error::{ProviderError, ProviderResult};
pub use openai::{OpenAIConfig, OpenAIProvider, DEFAULT_BASE_URL};
pub use provider::LlmProvider;
pub use retry::{with_retry, RetryConfig};
pub use types::{
    AudioFormat, ChatMessage, ChatRequest, GeneratedImage, ImageRequest, ModelSet, Role,
    SpeechRequest, TranscriptionRequest,
};
