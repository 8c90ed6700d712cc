//! Streamable HTTP MCP server library.
//!
//! This module exposes the application builder for use in tests.

use axum::http::{header, HeaderName, Method};
use axum::{response::Response, routing::get, Router};
use streamhttp_types::{LAST_EVENT_ID_HEADER, MCP_SESSION_ID_HEADER};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod state;

use state::AppState;

/// Create the Axum application router.
///
/// This function is used both by the main server binary and by integration tests.
pub fn create_app() -> Router {
    create_app_with_state(AppState::default())
}

/// Create the Axum application router with a given state.
pub fn create_app_with_state(state: AppState) -> Router {
    // MCP Streamable HTTP endpoint (has its own session management)
    let mcp_router = Router::new().route(
        "/mcp",
        get(api::mcp::mcp_get)
            .post(api::mcp::mcp_post)
            .delete(api::mcp::mcp_delete),
    );

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(MCP_SESSION_ID_HEADER),
            HeaderName::from_static(LAST_EVENT_ID_HEADER),
        ])
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID_HEADER)])
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .merge(mcp_router)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Render a panic in a request handler as a generic server error.
fn handle_panic(_err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    tracing::error!("Request handler panicked");
    error::internal_error_response()
}

/// Health check endpoint.
async fn health() -> &'static str {
    "OK"
}
