use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comfymcp_server::config::{ServerConfig, Transport};
use comfymcp_server::dispatcher::Dispatcher;
use comfymcp_server::mcp::McpServer;
use comfymcp_server::router::build_app_router;
use comfymcp_server::state::AppState;
use comfymcp_server::stdio;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let mut config = ServerConfig::from_env().context("Invalid configuration")?;
    if let Some(arg) = std::env::args().nth(1) {
        config.transport = arg
            .parse::<Transport>()
            .with_context(|| format!("Unknown transport argument '{arg}'"))?;
    }

    // --- Tracing ---
    // Stdout carries protocol frames in stdio and MCP modes, so logs go to stderr.
    let writer = if config.transport.uses_stdout() {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "comfymcp_server=debug,comfymcp_comfyui=info,comfymcp_core=info,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .init();

    tracing::info!(
        comfyui_url = %config.comfyui_url,
        template_dir = %config.template_dir.display(),
        transport = ?config.transport,
        "Loaded server configuration",
    );

    let dispatcher = Arc::new(Dispatcher::from_config(&config));

    match config.transport {
        Transport::Stdio => run_stdio(dispatcher).await,
        Transport::Mcp => run_mcp(dispatcher).await,
        Transport::WebSocket => run_server(dispatcher, config).await,
    }
}

async fn run_stdio(dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let cancel = tokio_util::sync::CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    tracing::info!("Serving tool calls on stdio");
    stdio::serve_stdio(dispatcher, cancel)
        .await
        .context("Stdio transport failed")?;
    tracing::info!("Stdio transport finished");
    Ok(())
}

async fn run_mcp(dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let cancel = tokio_util::sync::CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    tracing::info!("Serving MCP on stdio");
    McpServer::new(dispatcher)
        .serve_stdio(cancel)
        .await
        .context("MCP transport failed")?;
    tracing::info!("MCP transport finished");
    Ok(())
}

async fn run_server(dispatcher: Arc<Dispatcher>, config: ServerConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::new(
        config
            .host
            .parse()
            .with_context(|| format!("Invalid HOST address '{}'", config.host))?,
        config.port,
    );

    let state = AppState::new(dispatcher, config);
    let ws_manager = Arc::clone(&state.ws_manager);
    let shutdown = state.shutdown.clone();
    let app = build_app_router(state);

    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    let signal_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    shutdown.cancel();

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;
    // Give connection tasks a moment to flush their Close frames.
    tokio::time::sleep(Duration::from_millis(100)).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
