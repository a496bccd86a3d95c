use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, bail};
use futures_util::future::join_all;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use photocache::infrastructure::{
    AppConfig, CacheEntry, CliArgs, Command, ConfigStore, DiskImageCache, HttpImageFetcher,
    RemoteImageCache,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

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
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let store = ConfigStore::new()?;
    let mut config = store.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

fn create_cache(config: &AppConfig) -> Result<RemoteImageCache> {
    let disk_cache = Arc::new(DiskImageCache::new(
        config.effective_cache_dir(),
        config.cache.max_disk_bytes,
    ));
    let fetcher = Arc::new(HttpImageFetcher::new(
        config.cache.timeout(),
        config.cache.retries,
    )?);

    Ok(RemoteImageCache::new(
        config.cache.remote_cache_config(),
        disk_cache,
        fetcher,
    ))
}

async fn get(cache: &RemoteImageCache, urls: &[String]) -> Result<()> {
    let results = join_all(urls.iter().map(|url| cache.get_image(url))).await;

    let mut failed = 0;
    for (url, result) in urls.iter().zip(results) {
        match result {
            Ok(loaded) => {
                let (width, height) = loaded.dimensions();
                let path = cache.disk().path_for(&loaded.key);
                println!("{}\t{width}x{height}\t{}", loaded.source, path.display());
            }
            Err(e) => {
                failed += 1;
                warn!(url = %url, kind = %e.kind(), error = %e, "Failed to get image");
                eprintln!("{}\t{url}\t{e}", e.kind());
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} images failed", urls.len());
    }
    Ok(())
}

fn path(cache: &RemoteImageCache, urls: &[String]) -> Result<()> {
    let mut invalid = 0;
    for url in urls {
        match cache.cache_path(url) {
            Some(path) => println!("{}", path.display()),
            None => {
                invalid += 1;
                eprintln!("invalid-input\t{url}");
            }
        }
    }

    if invalid > 0 {
        bail!("{invalid} invalid URLs");
    }
    Ok(())
}

fn print_entries(entries: &[CacheEntry]) {
    for entry in entries {
        let modified = entry.modified.map_or_else(
            || "-".to_string(),
            |time| time.format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        println!("{}\t{}\t{}", entry.size, modified, entry.key);
    }
}

async fn run(args: CliArgs, config: AppConfig) -> Result<()> {
    let cache = create_cache(&config)?;
    info!(root = %cache.disk().root().display(), "Cache ready");

    match args.command {
        Command::Get { urls } => get(&cache, &urls).await,
        Command::Path { urls } => path(&cache, &urls),
        Command::List { json } => {
            let entries = cache.disk().entries().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_entries(&entries);
            }
            Ok(())
        }
        Command::Clear => {
            let removed = cache.clear_all().await?;
            println!("Removed {removed} entries");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;

    info!(version = photocache::VERSION, "Starting {}", photocache::NAME);

    run(args, config).await
}
