use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use scenecast_config::{ConfigManager, LogLevel};
use scenecast_server::logging::init_logging;
use scenecast_server::{run_server, AppState};
use scenecast_session::{RedisSessionStore, StoreHandle};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug, Clone)]
#[command(name = "scenecast-server")]
#[command(about = "Scenecast scene server")]
#[command(version)]
struct Cli {
    /// Server port (overrides config)
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Bind host (overrides config)
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Shared secret for protocol endpoints (overrides config)
    #[arg(long, env = "SCENECAST_API_KEY")]
    api_key: Option<String>,

    /// Redis URL for the distributed session store (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Log level (overrides config and RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Config file path (defaults to ~/.scenecast/config.json)
    #[arg(long, env = "SCENECAST_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 展开配置文件路径
    let config_path = match cli.config.as_deref() {
        Some(path) => {
            scenecast_config::expand_tilde(path).unwrap_or_else(|| PathBuf::from(path))
        }
        None => scenecast_config::default_config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?,
    };

    let config_manager = match ConfigManager::load(&config_path).await {
        Ok(cm) => cm,
        Err(e) => {
            eprintln!("Failed to load config from {:?}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    // CLI 参数覆盖配置文件
    let overrides = cli.clone();
    config_manager
        .update(move |config| {
            if let Some(port) = overrides.port {
                config.server.port = port;
            }
            if let Some(host) = overrides.host {
                config.server.host = host;
            }
            if let Some(api_key) = overrides.api_key {
                config.access.api_key = Some(api_key);
            }
            if let Some(redis_url) = overrides.redis_url {
                config.session_store.redis_url = Some(redis_url);
            }
            if let Some(level) = overrides.log_level.as_deref() {
                config.logging.level = level.parse::<LogLevel>()?;
            }
            Ok(())
        })
        .await?;
    let config = config_manager.snapshot().await;

    init_logging(&config.logging, cli.log_level.as_deref());
    tracing::info!("Config loaded from {:?}", config_manager.path());
    tracing::debug!(
        host = %config.server.host,
        port = config.server.port,
        auth = config.access.api_key.is_some(),
        origins = ?config.access.allowed_origins,
        "server configuration"
    );

    let store = connect_store(
        config.session_store.redis_url.as_deref(),
        Duration::from_millis(config.session_store.op_timeout_ms),
    )
    .await;

    let sweep_interval = Duration::from_secs(config.rate_limit.sweep_interval_secs);
    let state = Arc::new(AppState::new(config, store));

    let shutdown = CancellationToken::new();
    let sweeper = Arc::clone(&state.limiter).spawn_sweeper(sweep_interval, shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
        }
        signal.cancel();
    });

    let result = run_server(state, shutdown.clone()).await;
    shutdown.cancel();
    let _ = sweeper.await;
    result
}

/// 连接分布式会话存储。连接失败时会话仍可在本地工作，只是无法判断跨实例的会话。
async fn connect_store(redis_url: Option<&str>, op_timeout: Duration) -> StoreHandle {
    let Some(url) = redis_url else {
        tracing::info!("No session store configured, running single-instance");
        return StoreHandle::unavailable();
    };

    match tokio::time::timeout(op_timeout, RedisSessionStore::connect(url)).await {
        Ok(Ok(store)) => {
            tracing::info!("Session store connected");
            StoreHandle::new(Arc::new(store), op_timeout)
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Session store unavailable, continuing without it");
            StoreHandle::unavailable()
        }
        Err(_) => {
            tracing::warn!("Session store connection timed out, continuing without it");
            StoreHandle::unavailable()
        }
    }
}
