use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use alertpush_server::app;
use alertpush_server::state::AppState;

/// Forwards Alertmanager webhooks to DingTalk and WeChat Work.
#[derive(Debug, Parser)]
#[command(name = "alertpush", version)]
struct Cli {
    /// Configuration file path.
    #[arg(long = "config.file", env = "ALERTPUSH_CONFIG", default_value = "config/alertpush.toml")]
    config_file: PathBuf,

    /// Address to listen on for the webhook and API.
    #[arg(long = "web.listen-address", default_value = "0.0.0.0:8080")]
    listen_address: SocketAddr,

    /// URL under which alertpush is reachable, used when payloads carry none.
    #[arg(long = "web.external-url")]
    external_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("alertpush=info".parse()?))
        .init();

    let cli = Cli::parse();

    tracing::info!(
        config = %cli.config_file.display(),
        listen = %cli.listen_address,
        "alertpush starting"
    );

    let state = AppState::load(&cli.config_file, cli.external_url.clone())
        .map_err(|e| anyhow::anyhow!("Failed to load configuration '{}': {}", cli.config_file.display(), e))?;
    {
        let snapshot = state.registry.snapshot();
        tracing::info!(
            receivers = snapshot.config.receivers.len(),
            chart_enrichment = snapshot.enrichment_enabled(),
            "Configuration loaded"
        );
    }

    let reload_handle = spawn_reload_on_hangup(state.clone())?;

    let listener = tokio::net::TcpListener::bind(cli.listen_address).await?;
    let app = app::build_http_app(state);
    tracing::info!(http = %cli.listen_address, "Server started");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "HTTP server error");
    }

    if let Some(h) = reload_handle {
        h.abort();
    }
    tracing::info!("Server stopped");
    Ok(())
}

/// Reloads the configuration on every SIGHUP.
#[cfg(unix)]
fn spawn_reload_on_hangup(state: AppState) -> Result<Option<tokio::task::JoinHandle<()>>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    Ok(Some(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, reloading configuration");
            if let Err(e) = state.reload() {
                tracing::error!(error = %e, "Reload failed, keeping previous configuration");
            }
        }
    })))
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_state: AppState) -> Result<Option<tokio::task::JoinHandle<()>>> {
    Ok(None)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
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
    tracing::info!("Shutting down gracefully");
}
