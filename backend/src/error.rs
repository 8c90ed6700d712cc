//! Error taxonomy for the MCP transport.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use streamhttp_types::Marker;

/// Errors raised while serving an MCP request.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// The client referenced a session the registry never created.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A session-bound operation arrived without a session id.
    #[error("Mcp-Session-Id header required")]
    MissingSessionId,

    /// Resumption was requested from a marker the log never produced.
    #[error("Unknown event id: {0}")]
    UnknownMarker(Marker),

    /// The resumption header could not be parsed as a marker.
    #[error("Invalid Last-Event-ID: {0}")]
    InvalidMarker(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Rendered verbatim to the client as the tool result text.
    #[error("{0}")]
    InvalidArguments(String),

    /// The client went away while events were still being delivered.
    #[error("Client disconnected mid-stream")]
    TransportWriteFailure,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, McpError>;

impl McpError {
    /// Whether the error is reported inside a tool result rather than as
    /// an HTTP failure.
    pub fn is_tool_error(&self) -> bool {
        matches!(self, Self::UnknownTool(_) | Self::InvalidArguments(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::MissingSessionId
            | Self::UnknownMarker(_)
            | Self::InvalidMarker(_)
            | Self::UnknownTool(_)
            | Self::InvalidArguments(_) => StatusCode::BAD_REQUEST,
            Self::TransportWriteFailure | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for McpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("MCP: {}", self);
            return internal_error_response();
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Generic server error: fixed status, plain-text body.
pub fn internal_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "Internal server error",
    )
        .into_response()
}
