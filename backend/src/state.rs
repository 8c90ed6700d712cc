//! Application state management.

use crate::config::{Config, ResponseMode, SessionPolicy};
use crate::mcp::{McpHandler, SessionRegistry, ToolDispatcher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Live MCP sessions
    sessions: SessionRegistry,
    /// JSON-RPC method handling and tool dispatch
    handler: McpHandler,
    /// JSON bodies or SSE streams
    response_mode: ResponseMode,
    /// Interval between SSE keep-alive comments
    keep_alive: Duration,
    /// Cancelled once the server stops accepting work; closes open streams
    shutdown: CancellationToken,
}

impl AppState {
    /// Create application state from configuration.
    pub fn new(config: &Config) -> Self {
        Self::with_sessions(config, SessionRegistry::new(config.session_policy))
    }

    /// Create application state around an existing session registry.
    pub fn with_sessions(config: &Config, sessions: SessionRegistry) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                sessions,
                handler: McpHandler::new(ToolDispatcher::new()),
                response_mode: config.response_mode,
                keep_alive: config.keep_alive,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    pub fn handler(&self) -> &McpHandler {
        &self.inner.handler
    }

    pub fn response_mode(&self) -> ResponseMode {
        self.inner.response_mode
    }

    pub fn session_policy(&self) -> SessionPolicy {
        self.inner.sessions.policy()
    }

    pub fn keep_alive(&self) -> Duration {
        self.inner.keep_alive
    }

    /// Token cancelled when open SSE streams must close.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Wait for in-flight work, then close every open stream.
    ///
    /// Returns `false` if work was still running after `grace`.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let drained = self.inner.sessions.shutdown(grace).await;
        self.inner.shutdown.cancel();
        drained
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}
