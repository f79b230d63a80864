use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use llmrelay_providers::AudioFormat;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;

use config::{expand_path, load_config, LoggingConfig};

/// llmrelay: streaming relay for hosted LLM, image and speech APIs
#[derive(Debug, Parser)]
#[command(name = "llmrelay", version, about, long_about = None, arg_required_else_help = true)]
struct Cli {
    /// Path to a custom configuration file (TOML).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log format: "pretty" (default) or "json".
    #[arg(long, global = true, default_value = "pretty", value_name = "FORMAT")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the HTTP relay server.
    Serve {
        /// Address to bind to.
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on.
        #[arg(long, short = 'p')]
        port: Option<u16>,
    },

    /// Stream a chat completion to stdout.
    Chat {
        /// User prompt.
        #[arg(long)]
        prompt: String,

        /// Optional system prompt sent before the user turn.
        #[arg(long)]
        system: Option<String>,

        /// Sampling temperature.
        #[arg(long)]
        temperature: Option<f32>,

        /// Maximum completion tokens.
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Print chunk, byte and timing stats after the response.
        #[arg(long)]
        stats: bool,
    },

    /// Stream synthesized speech into a file.
    Speak {
        /// Text to synthesize.
        #[arg(long)]
        text: String,

        /// Output audio file.
        #[arg(long, short = 'o')]
        out: PathBuf,

        /// Voice name (provider default when omitted).
        #[arg(long)]
        voice: Option<String>,

        /// Audio container: mp3, wav, opus, aac, flac or pcm.
        #[arg(long, default_value = "mp3", value_parser = parse_audio_format)]
        format: AudioFormat,
    },

    /// Transcribe an audio file and print the text.
    Transcribe {
        /// Audio file to upload.
        file: PathBuf,

        /// ISO-639-1 language code of the audio.
        #[arg(long)]
        language: Option<String>,
    },

    /// Generate images and save them as PNG files.
    Image {
        /// Image description.
        #[arg(long)]
        prompt: String,

        /// Output directory.
        #[arg(long, short = 'o', default_value = ".")]
        out: PathBuf,

        /// Number of images.
        #[arg(short = 'n', default_value_t = 1)]
        n: u32,

        /// Image size, e.g. 1024x1024.
        #[arg(long, default_value = "1024x1024")]
        size: String,
    },
}

fn parse_audio_format(raw: &str) -> Result<AudioFormat, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_lowercase()))
        .map_err(|_| format!("unsupported audio format `{raw}`"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let cfg = load_config(cli.config.as_ref())
        .context("Failed to load configuration")?;

    // Initialise tracing; the guard flushes the log file on exit
    let _log_guard = init_tracing(&cli.log_format, &cfg.logging)
        .context("Failed to initialise logging")?;

    match cli.command {
        Commands::Serve { host, port } => {
            commands::serve::run(host.as_deref(), port, &cfg).await?;
        }
        Commands::Chat { prompt, system, temperature, max_tokens, stats } => {
            commands::chat::run(&prompt, system.as_deref(), temperature, max_tokens, stats, &cfg).await?;
        }
        Commands::Speak { text, out, voice, format } => {
            commands::speak::run(&text, &out, voice, format, &cfg).await?;
        }
        Commands::Transcribe { file, language } => {
            commands::transcribe::run(&file, language, &cfg).await?;
        }
        Commands::Image { prompt, out, n, size } => {
            commands::image::run(&prompt, &out, n, &size, &cfg).await?;
        }
    }

    Ok(())
}

/// Console output goes to stderr so relayed text on stdout stays clean.
fn init_tracing(log_format: &str, logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("invalid log level `{}`", logging.level))?;

    let (file_layer, guard) = match &logging.dir {
        Some(dir) => {
            let dir = expand_path(dir);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(&dir, &logging.file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);

    if log_format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    }
    Ok(guard)
}
