use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use songforge_server::cache::CacheManager;
use songforge_server::config::{AppConfig, CliConfig, FileConfig};
use songforge_server::generation::GenerationService;
use songforge_server::remote::{RequestSigner, SynthesisClient};
use songforge_server::server::{self, run_server, RequestsLoggingLevel, ServerState};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the command line.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory where generated audio files are cached.
    #[clap(long, value_parser = parse_path, default_value = "cache")]
    pub cache_dir: PathBuf,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8002)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9092)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// The maximum age of cached audio in client caches, in seconds.
    #[clap(long, default_value_t = 86400)]
    pub content_cache_age_sec: usize,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// Access key of the synthesis API.
    #[clap(long, env = "VOLC_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,

    /// Secret key of the synthesis API.
    #[clap(long, env = "VOLC_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Scheme and host of the synthesis API.
    #[clap(long)]
    pub remote_endpoint: Option<String>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            cache_dir: self.cache_dir.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            content_cache_age_sec: self.content_cache_age_sec,
            frontend_dir_path: self.frontend_dir_path.clone(),
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            remote_endpoint: self.remote_endpoint.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    let credentials = config
        .remote
        .credentials()
        .context("Synthesis API credentials are required (--access-key/--secret-key)")?;

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    info!("Opening audio cache at {:?}...", config.cache_dir);
    let cache = CacheManager::open(
        &config.cache_dir,
        config.download.timeout(),
        config.download.buffer_size,
    )
    .await
    .with_context(|| format!("Failed to open cache directory {:?}", config.cache_dir))?;

    let signer = RequestSigner::new(credentials, config.remote.scope());
    let client = SynthesisClient::new(
        &config.remote.endpoint,
        config.remote.actions(),
        signer,
        config.remote.request_timeout(),
    )?;
    info!(
        "Synthesis API at {} ({}/{})",
        config.remote.endpoint, config.remote.region, config.remote.service
    );

    let generation = GenerationService::new(
        Arc::new(client),
        config.polling.to_policy(),
        Arc::new(cache),
    );

    let shutdown = CancellationToken::new();
    let state = ServerState::new(
        config.server_config(),
        Arc::new(generation),
        shutdown.clone(),
        config.jobs.retention(),
    );

    info!("Ready to serve at port {}!", config.port);
    info!("Metrics available at port {}!", config.metrics_port);

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down, cancelling in-flight generations...");
                signal_token.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    run_server(state).await
}
