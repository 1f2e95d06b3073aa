use anthropic_relay::config::{config_search_paths, TargetConfig};
use anthropic_relay::providers::TargetProvider;
use anthropic_relay::{build_router, AppState, ProxyConfig, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "anthropic-relay",
    about = "Serve Anthropic Messages API clients from OpenAI or ChatGPT backends",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Target provider: openai or chatgpt (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Target model name (overrides config)
    #[arg(long)]
    model: Option<String>,

    /// Process-wide JSONL event log
    #[arg(long, default_value = "anthropic-relay.log")]
    log_file: PathBuf,

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
                .unwrap_or_else(|_| "anthropic_relay=info,tower_http=info".into()),
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

    let config = load_config(&cli)?;
    let credentials = config.resolve_credentials()?;
    let logger = SharedLogger::new(&cli.log_file)?;
    let target_url = config.effective_target_url();

    info!("anthropic-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("  Provider:     {}", config.target.provider);
    info!("  Target:       {} ({})", config.target.model, target_url);
    info!("  Reported as:  {}", config.target.spoof_model);
    info!(
        "  Passthrough:  {}",
        if config.passthrough.matchers.is_empty() {
            "off".to_string()
        } else {
            config.passthrough.matchers.join(", ")
        }
    );
    info!("  Port:         {}", config.port);
    info!("  Log file:     {}", cli.log_file.display());
    if let Some(ref dir) = config.sessions.log_dir {
        info!("  Session logs: {}", dir.display());
    }

    logger.info(
        "startup",
        format!(
            "Starting anthropic-relay provider={} target={} port={}",
            config.target.provider, target_url, config.port
        ),
    );

    // Connect and per-read idle limits; no total deadline.
    let client = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .read_timeout(config.read_timeout())
        .build()?;

    let port = config.port;
    let state = Arc::new(AppState::new(config, client, credentials, logger.clone()));

    let app = build_router(state.clone());
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  ANTHROPIC_BASE_URL=http://localhost:{} claude", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, flushing {} session log(s)", state.sessions.len());
    state.sessions.close_all();
    logger.info("shutdown", "Relay stopped");
    logger.close();

    Ok(())
}

/// Config file if one is found; otherwise `--provider` and `--model` alone
/// are enough to run.
fn load_config(cli: &Cli) -> anyhow::Result<ProxyConfig> {
    let provider = match cli.provider.as_deref() {
        Some(name) => Some(
            TargetProvider::from_name(name)
                .ok_or_else(|| anyhow::anyhow!("Unknown provider '{}' (expected openai or chatgpt)", name))?,
        ),
        None => None,
    };

    let mut config = match ProxyConfig::find_and_load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => match (provider, cli.model.as_ref(), cli.config.is_none()) {
            (Some(provider), Some(model), true) => ProxyConfig {
                port: 4222,
                target: TargetConfig::new(provider, model.clone()),
                passthrough: Default::default(),
                upstream: Default::default(),
                sessions: Default::default(),
            },
            _ => return Err(e.into()),
        },
    };

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(provider) = provider {
        if provider != config.target.provider {
            config.target.provider = provider;
            config.target.url = None;
        }
    }
    if let Some(ref model) = cli.model {
        config.target.model = model.clone();
    }

    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
