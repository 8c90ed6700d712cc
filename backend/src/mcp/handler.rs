//! MCP JSON-RPC request handler.
//!
//! Handles MCP protocol methods and routes tool calls to the dispatcher
//! together with the context of the request that carried them.

use crate::error::McpError;
use crate::mcp::context::RequestContext;
use crate::mcp::session::Session;
use crate::mcp::tools::{EventSink, ToolDispatcher};
use serde_json::{json, Value};
use streamhttp_types::jsonrpc::{INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};
use streamhttp_types::{
    CallToolParams, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ToolListResult,
    PROTOCOL_VERSION,
};
use tracing::{debug, error, info};

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "streamhttp";

/// MCP request handler.
pub struct McpHandler {
    tools: ToolDispatcher,
}

impl McpHandler {
    pub fn new(tools: ToolDispatcher) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &ToolDispatcher {
        &self.tools
    }

    /// Handle an MCP JSON-RPC request.
    ///
    /// Always yields exactly one response; failures become JSON-RPC errors.
    pub async fn handle_request(
        &self,
        session: &Session,
        request: JsonRpcRequest,
        ctx: RequestContext,
        sink: EventSink,
    ) -> JsonRpcResponse {
        let id = request.id.clone();
        debug!(
            "MCP: Handling method {} in session {}",
            request.method,
            session.id()
        );

        match request.method.as_str() {
            "initialize" => self.handle_initialize(session, id),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => {
                self.handle_call_tool(id, request.params.unwrap_or(json!({})), ctx, sink)
                    .await
            }
            _ => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        }
    }

    /// Handle a client notification. Notifications never get a response.
    pub fn handle_notification(&self, session: &Session, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" | "initialized" => {
                debug!("MCP: Session {} initialized", session.id())
            }
            "notifications/cancelled" => {
                // Background work keeps running; its events stay resumable
                debug!(
                    "MCP: Client cancelled a request in session {}",
                    session.id()
                );
            }
            other => debug!("MCP: Ignoring notification {}", other),
        }
    }

    /// Handle the initialize request.
    fn handle_initialize(&self, session: &Session, id: Value) -> JsonRpcResponse {
        info!("MCP: Initialize in session {}", session.id());
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {},
                    "logging": {}
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    /// Handle the tools/list request.
    fn handle_list_tools(&self, id: Value) -> JsonRpcResponse {
        let result = ToolListResult {
            tools: self.tools.definitions().to_vec(),
        };
        match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
        }
    }

    /// Handle a tools/call request.
    async fn handle_call_tool(
        &self,
        id: Value,
        params: Value,
        ctx: RequestContext,
        sink: EventSink,
    ) -> JsonRpcResponse {
        let params: CallToolParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                return JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    format!("Invalid tools/call params: {}", e),
                )
            }
        };
        info!("MCP: Calling tool {}", params.name);

        let arguments = params.arguments.unwrap_or_default();
        let result = self
            .tools
            .call(&params.name, arguments, &ctx, &sink)
            .await
            .and_then(|result| {
                serde_json::to_value(result).map_err(|e| McpError::Internal(e.to_string()))
            });

        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                error!("MCP: Tool {} failed: {}", params.name, e);
                JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Tool call failed: {}", e))
            }
        }
    }
}

impl Default for McpHandler {
    fn default() -> Self {
        Self::new(ToolDispatcher::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionPolicy;
    use crate::mcp::session::SessionRegistry;
    use streamhttp_types::StreamId;

    async fn request(method: &str, params: Option<Value>) -> (JsonRpcResponse, usize) {
        let registry = SessionRegistry::new(SessionPolicy::PerClient);
        let session = registry.resolve(None).await.unwrap();
        let sink = EventSink::new(session.events(), StreamId::for_request("req-1", &json!(1)));
        let handler = McpHandler::default();
        let req = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: json!(1),
            method: method.into(),
            params,
        };
        let response = handler
            .handle_request(&session, req, RequestContext::default(), sink)
            .await;
        let events = session.events().events_after(0).await.len();
        (response, events)
    }

    #[tokio::test]
    async fn test_initialize() {
        let (response, _) = request("initialize", Some(json!({}))).await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_list_tools() {
        let (response, _) = request("tools/list", None).await;
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 4);
        assert_eq!(tools[2]["name"], "get_header");
        assert_eq!(tools[2]["inputSchema"]["required"], json!(["header_name"]));
    }

    #[tokio::test]
    async fn test_call_streaming_tool_emits_events() {
        let (response, events) = request(
            "tools/call",
            Some(json!({
                "name": "start-notification-stream",
                "arguments": { "count": 2, "interval": 0, "caller": "h" }
            })),
        )
        .await;
        assert!(!response.is_error());
        assert_eq!(response.result.unwrap()["isError"], false);
        assert_eq!(events, 3);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_tool_level_error() {
        let (response, _) = request("tools/call", Some(json!({ "name": "nope" }))).await;
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "Unknown tool: nope");
    }

    #[tokio::test]
    async fn test_bad_call_params() {
        let (response, _) = request("tools/call", Some(json!({ "arguments": {} }))).await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (response, _) = request("resources/list", None).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert_eq!(error.message, "Method not found: resources/list");
    }

    #[tokio::test]
    async fn test_notifications_emit_nothing() {
        let registry = SessionRegistry::new(SessionPolicy::PerClient);
        let session = registry.resolve(None).await.unwrap();
        let handler = McpHandler::default();
        for method in ["notifications/initialized", "notifications/cancelled", "other"] {
            handler.handle_notification(&session, &JsonRpcNotification::new(method, json!({})));
        }
        assert_eq!(session.events().last_marker().await, 0);
    }
}
