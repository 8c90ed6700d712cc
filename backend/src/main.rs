//! Streamable HTTP MCP server.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use streamhttp::config::{Config, SessionPolicy};
use streamhttp::{create_app_with_state, logging, state::AppState};

/// Time in-flight work gets to finish after Ctrl+C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// MCP server speaking the Streamable HTTP transport with resumable streams
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(long, env = "STREAMHTTP_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Answer requests with one JSON body instead of an SSE stream
    #[arg(long)]
    json_response: bool,

    /// How sessions are assigned to clients
    #[arg(long, value_enum)]
    session_mode: Option<SessionPolicy>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_figment(
        args.port,
        args.json_response.then_some(true),
        args.session_mode,
        args.log_level,
        args.log_file,
    )?;

    // Hold the guard so buffered file logs are flushed on exit
    let _log_guard = logging::init(config.log_level.as_deref(), config.log_file.as_deref())?;
    info!(
        "Configuration loaded: response_mode={:?}, session_policy={:?}",
        config.response_mode, config.session_policy
    );

    let state = AppState::new(&config);
    let app = create_app_with_state(state.clone());

    // Bind to 0.0.0.0 to be accessible from all interfaces (Docker, network, etc.)
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    let shutdown_state = state.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down gracefully...");

        if !shutdown_state.shutdown(SHUTDOWN_GRACE).await {
            warn!(
                "Background work still running after {:?}, abandoning it",
                SHUTDOWN_GRACE
            );
        }
        info!("Server shutting down");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}
