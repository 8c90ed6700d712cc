//! MCP (Model Context Protocol) Streamable HTTP support.
//!
//! ## Components
//!
//! - [`event_log`] - append-only, marker-ordered record of outbound events
//! - [`session`] - session registry keyed by the `Mcp-Session-Id` header
//! - [`context`] - per-invocation view of the inbound request headers
//! - [`tools`] - built-in tools and their dispatcher
//! - [`handler`] - JSON-RPC method handling
//!
//! The HTTP side of the transport lives in [`crate::api::mcp`].

pub mod context;
pub mod event_log;
pub mod handler;
pub mod session;
pub mod tools;

pub use context::RequestContext;
pub use event_log::{EventLog, InMemoryEventLog};
pub use handler::McpHandler;
pub use session::{Session, SessionRegistry};
pub use tools::{EventSink, ToolDispatcher};
