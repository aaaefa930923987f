use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use octoidp_auth::http::AnonymousSubjectResolver;
use octoidp_server::config::DEFAULT_CONFIG_PATH;
use octoidp_server::{App, load_config, observability, spawn_purge_task};
use tokio_util::sync::CancellationToken;

/// OctoIdP identity provider server.
#[derive(Debug, Parser)]
#[command(name = "octoidp-server", version, about)]
struct Cli {
    /// Configuration file.
    #[arg(long, env = "OCTOIDP_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `server.port`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    observability::init_tracing("info");

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    observability::apply_logging_level(&config.logging.level);
    tracing::info!(
        path = %config_path.display(),
        issuer = %config.idp.issuer(),
        "Configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let app = App::from_config(&config, Arc::new(AnonymousSubjectResolver), shutdown.clone())?;
    let purge = spawn_purge_task(
        app.stores.clone(),
        Duration::from_secs(config.server.purge_interval_secs),
        shutdown.clone(),
    );

    let addr = config.server.addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "Listening");

    let signal = shutdown.clone();
    axum::serve(listener, app.router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = purge.await;
    Ok(())
}
