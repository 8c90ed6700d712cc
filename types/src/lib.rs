//! Shared wire types for the streamhttp MCP server.
//!
//! This crate contains the JSON-RPC envelopes, tool shapes and event
//! payloads exchanged between the server and its clients.

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 3000;

/// MCP protocol version we support.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Header carrying the session identifier, in both directions.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header carrying the resumption marker on reconnect.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

pub mod events;
pub mod jsonrpc;
pub mod tool;

// Re-export commonly used types
pub use events::{EventPayload, Marker, StreamEvent, StreamId};
pub use jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
pub use tool::{CallToolParams, CallToolResult, Content, ToolDefinition, ToolListResult};
