use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use xlytics::config::{parse_metadata_format, Config};
use xlytics::{FetchRequest, Pipeline, TwitterClient};

/// Fetch X posts and archive their media and metadata.
#[derive(Debug, Parser)]
#[command(name = "xlytics", version, about)]
struct Cli {
    /// Output directory (overrides OUTPUT_NAME)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Maximum concurrent media downloads (overrides DOWNLOAD_CONCURRENCY)
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Metadata file format: jsonl or json (overrides METADATA_FORMAT)
    #[arg(long, global = true)]
    format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search recent posts matching a query
    Search {
        query: String,
        /// Maximum number of posts to fetch
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Fetch a single post by URL or numeric id
    Url { target: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("Fatal error: {e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(output) = cli.output {
        config.output_dir = output;
    }
    if let Some(concurrency) = cli.concurrency {
        config.download_concurrency = concurrency;
    }
    if let Some(format) = cli.format.as_deref() {
        config.metadata_format = parse_metadata_format(format).context("Invalid --format")?;
    }
    config.validate().context("Invalid configuration")?;

    info!(
        output = %config.output_dir.display(),
        concurrency = config.download_concurrency,
        format = ?config.metadata_format,
        "Configuration loaded"
    );

    let client = TwitterClient::new(&config).context("Failed to initialize X API client")?;
    let pipeline = Pipeline::new(Arc::new(client), config.pipeline_options())
        .context("Failed to initialize pipeline")?;

    let request = match cli.command {
        Command::Search { query, limit } => FetchRequest::search(query, limit),
        Command::Url { target } => FetchRequest::lookup(target),
    };

    let result = pipeline.run(request).await.context("Run failed")?;

    println!(
        "{} posts, media: {} attempted, {} succeeded, {} failed -> {}",
        result.posts.len(),
        result.media_attempted,
        result.media_succeeded,
        result.media_failed,
        result.metadata_path.display()
    );

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,xlytics=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
