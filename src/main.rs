use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr, eyre};
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use imgload::domain::entities::{Image, ImageRequest};
use imgload::domain::ports::ImageRequestCache;
use imgload::infrastructure::image::{
    AutoPurgingImageCache, HttpImageFetcher, ImageDownloader, RasterImageDecoder,
};
use imgload::infrastructure::{AppConfig, CliArgs, StorageManager};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config() -> Result<(AppConfig, Vec<String>)> {
    let mut args = CliArgs::parse();
    let urls = std::mem::take(&mut args.urls);

    let storage = StorageManager::new()?;
    let mut config = storage
        .load_config(args.config.as_deref())
        .wrap_err("failed to load configuration")?;
    config.merge_with_args(args);

    Ok((config, urls))
}

fn output_path(output_dir: &Path, url: &str) -> PathBuf {
    let digest = Sha256::digest(url.as_bytes());
    output_dir.join(format!("{}.png", &hex::encode(digest)[..16]))
}

async fn save_image(image: Image, path: PathBuf) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        image
            .bitmap()
            .save_with_format(&path, image::ImageFormat::Png)
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    })
    .await?
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let (config, urls) = load_config()?;
    init_logging(&config)?;

    info!(version = imgload::VERSION, urls = urls.len(), "Starting imgload");

    let fetcher = Arc::new(HttpImageFetcher::new(config.downloader.timeout())?);
    let cache = if config.cache.enabled {
        Some(Arc::new(AutoPurgingImageCache::new(
            config.cache.memory_capacity,
            config.cache.preferred_memory_usage_after_purge,
        )?))
    } else {
        None
    };

    let downloader = ImageDownloader::builder(fetcher)
        .config(
            config
                .downloader
                .to_downloader_config(config.credential.clone()),
        )
        .cache(cache.clone().map(|c| c as Arc<dyn ImageRequestCache>))
        .decoder(Arc::new(RasterImageDecoder::new(config.downloader.image_scale)))
        .build()?
        .install_default();

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .wrap_err_with(|| format!("failed to create {}", config.output_dir.display()))?;

    let filter = config.filter.build();
    let mut tasks = JoinSet::new();
    for url in urls {
        let downloader = downloader.clone();
        let filter = filter.clone();
        let path = output_path(&config.output_dir, &url);
        tasks.spawn(async move {
            let response = downloader.fetch(ImageRequest::new(url.clone()), filter).await;
            let saved = match response.result {
                Ok(image) => save_image(image, path).await,
                Err(error) => Err(eyre!(error)),
            };
            (url, saved)
        });
    }

    let mut failed = 0usize;
    let mut total = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (url, saved) = joined?;
        total += 1;
        match saved {
            Ok(path) => println!("{url} -> {}", path.display()),
            Err(error) => {
                failed += 1;
                warn!(url = %url, error = %error, "Download failed");
                eprintln!("{url}: {error:#}");
            }
        }
    }

    if let Some(cache) = &cache {
        info!(stats = %cache.stats(), "Cache statistics");
    }

    if failed > 0 {
        return Err(eyre!("{failed} of {total} downloads failed"));
    }
    Ok(())
}
