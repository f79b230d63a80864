use std::{path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use llmrelay_core::{RelayConfig, TokenBudget};
use llmrelay_providers::{ModelSet, OpenAIConfig, RetryConfig};

/// Fallback when `provider.api_key` is left empty.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Full runtime configuration loaded from TOML + env vars.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub relay: RelaySettings,
    pub provider: ProviderSettings,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelaySettings {
    pub max_idle_timeout_ms: u64,
    pub max_chunk_size: usize,
    pub flush_every_chunk: bool,
}

impl RelaySettings {
    pub fn to_relay_config(&self) -> RelayConfig {
        RelayConfig {
            max_idle_timeout: Duration::from_millis(self.max_idle_timeout_ms),
            max_chunk_size: self.max_chunk_size,
            flush_every_chunk: self.flush_every_chunk,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderSettings {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub chat_model: String,
    pub image_model: String,
    pub transcription_model: String,
    pub speech_model: String,
    pub voice: String,
    pub language: String,
    /// 0 disables the prompt budget.
    pub max_prompt_tokens: usize,
    pub connect_timeout_secs: u64,
}

impl ProviderSettings {
    /// The configured key, else `OPENAI_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            return Some(self.api_key.trim().to_string());
        }
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn to_openai_config(&self, api_key: String) -> OpenAIConfig {
        OpenAIConfig {
            base_url: self.base_url.clone(),
            api_key,
            models: ModelSet {
                chat: self.chat_model.clone(),
                image: self.image_model.clone(),
                transcription: self.transcription_model.clone(),
                speech: self.speech_model.clone(),
            },
            voice: self.voice.clone(),
            language: self.language.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn token_budget(&self) -> TokenBudget {
        TokenBudget::new(Some(self.max_prompt_tokens).filter(|max| *max > 0))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for daily-rotated log files; unset logs to stderr only.
    pub dir: Option<String>,
    pub file: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let openai = OpenAIConfig::default();
        let relay = RelayConfig::default();
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                request_timeout_secs: 120,
            },
            relay: RelaySettings {
                max_idle_timeout_ms: relay.max_idle_timeout.as_millis() as u64,
                max_chunk_size: relay.max_chunk_size,
                flush_every_chunk: relay.flush_every_chunk,
            },
            provider: ProviderSettings {
                base_url: openai.base_url,
                api_key: String::new(),
                chat_model: openai.models.chat,
                image_model: openai.models.image,
                transcription_model: openai.models.transcription,
                speech_model: openai.models.speech,
                voice: openai.voice,
                language: openai.language,
                max_prompt_tokens: 1024,
                connect_timeout_secs: openai.connect_timeout.as_secs(),
            },
            retry: RetryConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                dir: None,
                file: "llmrelay.log".to_string(),
            },
        }
    }
}

/// Load configuration from:
/// 1. Built-in defaults
/// 2. `config/default.toml` (if present)
/// 3. A custom config file path (if provided)
/// 4. Environment variables `LLMRELAY_<SECTION>__<KEY>`
pub fn load_config(config_file: Option<&PathBuf>) -> Result<AppConfig, ConfigError> {
    // Layer 1: defaults baked in
    let defaults = Config::try_from(&AppConfig::default())?;
    let mut builder = Config::builder()
        .add_source(defaults)
        // Layer 2: project default.toml
        .add_source(File::with_name("config/default").required(false));

    // Layer 3: optional user-supplied config file
    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    // Layer 4: environment variables (LLMRELAY_SERVER__PORT, LLMRELAY_PROVIDER__API_KEY, ...)
    builder = builder.add_source(
        Environment::with_prefix("LLMRELAY")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// Expand a leading `~` to the home directory.
pub fn expand_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(raw)
}
