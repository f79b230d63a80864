use std::path::Path;

use anyhow::Context;
use chrono::Utc;

use llmrelay_providers::{with_retry, ImageRequest, LlmProvider};

use crate::{commands::build_provider, config::AppConfig};

/// Generate `n` images and write them into `out`.
pub async fn run(prompt: &str, out: &Path, n: u32, size: &str, config: &AppConfig) -> anyhow::Result<()> {
    let provider = build_provider(config)?;
    let request = ImageRequest {
        prompt: prompt.to_string(),
        n,
        size: size.to_string(),
    };

    let images = with_retry(&config.retry, "image", || provider.generate_image(&request))
        .await
        .context("Image generation failed")?;

    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("Cannot create {}", out.display()))?;

    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    for (i, image) in images.iter().enumerate() {
        let path = out.join(format!("image-{stamp}-{}.png", i + 1));
        tokio::fs::write(&path, &image.bytes)
            .await
            .with_context(|| format!("Cannot write {}", path.display()))?;
        println!("{}", path.display());
    }
    Ok(())
}
