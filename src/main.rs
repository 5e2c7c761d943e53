use claude_openai_proxy::config::config_search_paths;
use claude_openai_proxy::{build_router, AppState, ProxyConfig, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-openai-proxy",
    about = "OpenAI-compatible chat completions endpoint backed by Anthropic",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// JSONL request log path (overrides config)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_openai_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file;
    }

    let logger = match config.log_file {
        Some(ref path) => SharedLogger::new(path)?,
        None => SharedLogger::disabled(),
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.upstream.timeout_secs))
        .build()?;

    let state = AppState::from_env(config.clone(), client, logger.clone());

    info!("claude-openai-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:  {}", config.messages_url());
    info!("  Model:     {} (default)", config.defaults.model);
    info!("  Port:      {}", config.port);
    if let Some(ref path) = config.log_file {
        info!("  Log file:  {}", path.display());
    }

    // Not fatal: every request reports it instead.
    if state.api_key.is_none() {
        warn!("{}", config.missing_api_key_error());
    }

    logger.info(
        "startup",
        format!(
            "Starting claude-openai-proxy upstream={} port={}",
            config.upstream.base_url, config.port
        ),
    );

    let app = build_router(Arc::new(state));
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OPENAI_BASE_URL=http://localhost:{}/v1", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
