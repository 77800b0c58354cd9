use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use planet::aggregate::Aggregator;
use planet::check::{check_urls, render_markdown};
use planet::config::Config;
use planet::feed::Fetcher;
use planet::render::{JsonRenderer, RenderContext, Renderer};
use planet::storage::{Cache, CacheError};

#[derive(Parser, Debug)]
#[command(name = "planet", about = "Feed aggregator producing a paginated timeline")]
struct Args {
    /// Configuration file
    #[arg(long, short, value_name = "FILE", default_value = "planet.toml")]
    config: PathBuf,

    /// Render from the cache without fetching any feed
    #[arg(long)]
    offline: bool,

    /// Report subscribed URLs that redirect or fail, then exit
    #[arg(long, conflicts_with = "offline")]
    check_urls: bool,
}

fn init_tracing(default_level: &str) {
    // RUST_LOG wins over the configured level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    init_tracing(&config.log_level);

    let sources = config.sources().context("Invalid feed configuration")?;
    if sources.is_empty() {
        tracing::warn!("No feeds configured; output will be empty");
    }

    if args.check_urls {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_deref().unwrap_or("planet"))
            .build()
            .context("Failed to build HTTP client")?;
        let options = config.aggregate_options();
        let reports = check_urls(
            &client,
            &sources,
            options.concurrency_limit,
            options.feed_timeout,
        )
        .await;
        print!("{}", render_markdown(&reports));
        return Ok(());
    }

    std::fs::create_dir_all(&config.cache_directory).with_context(|| {
        format!(
            "Failed to create cache directory {}",
            config.cache_directory.display()
        )
    })?;

    let cache_path = config.cache_path();
    let cache_path_str = cache_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in cache path"))?;
    let cache = match Cache::open(cache_path_str).await {
        Ok(cache) => cache,
        Err(CacheError::InstanceLocked) => {
            eprintln!("Error: Another planet run appears to be using the cache. Wait for it to finish and try again.");
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open cache: {}", e));
        }
    };

    let fetcher = Fetcher::with_user_agent(config.user_agent.as_deref())
        .context("Failed to build HTTP client")?;

    let aggregator = Aggregator::new(cache.clone(), fetcher, config.aggregate_options());

    let pages = if args.offline {
        tracing::info!("Offline mode: rendering from cache only");
        aggregator.build_pages(&sources).await?
    } else {
        let output = aggregator.run(&sources).await?;
        output.pages
    };

    let statuses = cache.statuses().await.context("Failed to read feed statuses")?;
    let context = RenderContext::new(&config, &sources, &statuses);
    JsonRenderer::new(&config.output_dir)
        .render(&context, &pages)
        .context("Failed to render output")?;

    println!(
        "Rendered {} page(s) from {} feed(s) to {}",
        pages.len(),
        sources.len(),
        config.output_dir.display()
    );
    Ok(())
}
