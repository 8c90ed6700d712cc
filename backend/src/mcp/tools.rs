//! Built-in tools and their dispatcher.

use crate::error::{McpError, Result};
use crate::mcp::context::RequestContext;
use crate::mcp::event_log::EventLog;
use garde::Validate;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Number, Value};
use std::sync::Arc;
use std::time::Duration;
use streamhttp_types::tool::{GetHeaderArgs, NotificationStreamArgs};
use streamhttp_types::{CallToolResult, EventPayload, Marker, StreamId, ToolDefinition};
use tracing::{debug, info};

/// Header carrying the authenticated user, set by a fronting proxy.
pub const FORWARDED_USER_HEADER: &str = "X-Forwarded-User";

pub const NOT_LOGGED_IN: &str = "Not logged in";
pub const NO_HEADERS: &str = "No headers found for request";
pub const MISSING_HEADER_NAME: &str = "Missing header_name argument";
pub const HEADER_NOT_FOUND: &str = "Not found";

/// Resource announced as updated at the end of a notification stream.
pub const TEST_RESOURCE_URI: &str = "http:///test_resource";
const NOTIFICATION_LOGGER: &str = "notification_stream";

/// Destination for events a tool emits while it runs.
#[derive(Clone)]
pub struct EventSink {
    log: Arc<dyn EventLog>,
    stream_id: StreamId,
}

impl EventSink {
    pub fn new(log: Arc<dyn EventLog>, stream_id: StreamId) -> Self {
        Self { log, stream_id }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Append an event to the session log and return its marker.
    pub async fn emit(&self, payload: EventPayload) -> Marker {
        self.log.append(self.stream_id.clone(), payload).await
    }

    /// Append an event for the session's standalone GET stream.
    pub async fn emit_standalone(&self, payload: EventPayload) -> Marker {
        self.log.append(StreamId::Standalone, payload).await
    }
}

/// Maps tool names and arguments to results.
pub struct ToolDispatcher {
    definitions: Vec<ToolDefinition>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self {
            definitions: builtin_definitions(),
        }
    }

    /// All tool definitions, in `tools/list` order.
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Invoke a tool, folding tool-level errors into an error result.
    pub async fn call(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        ctx: &RequestContext,
        sink: &EventSink,
    ) -> Result<CallToolResult> {
        match self.invoke(name, arguments, ctx, sink).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_tool_error() => {
                info!("MCP: Tool '{}' rejected: {}", name, e);
                Ok(CallToolResult::error(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Validate and run a tool invocation.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        ctx: &RequestContext,
        sink: &EventSink,
    ) -> Result<CallToolResult> {
        let definition = self
            .definition(name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;
        let arguments = match validate_arguments(&definition.input_schema, arguments) {
            // Same answer as an empty name: a normal result, not a tool error
            Err(McpError::InvalidArguments(message))
                if name == "get_header" && message == MISSING_HEADER_NAME =>
            {
                return Ok(CallToolResult::text(MISSING_HEADER_NAME));
            }
            validated => validated?,
        };
        debug!("MCP: Invoking tool '{}'", name);

        match name {
            "get_logged_in_user" => Ok(get_logged_in_user(ctx)),
            "get_request_headers" => Ok(get_request_headers(ctx)),
            "get_header" => Ok(get_header(ctx, parse_args(arguments)?)),
            "start-notification-stream" => {
                start_notification_stream(parse_args(arguments)?, sink).await
            }
            _ => Err(McpError::UnknownTool(name.to_string())),
        }
    }
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn get_logged_in_user(ctx: &RequestContext) -> CallToolResult {
    match ctx.header(FORWARDED_USER_HEADER) {
        Some(user) => {
            info!("MCP: Logged in user is '{}'", user);
            CallToolResult::text(user)
        }
        None => CallToolResult::text(NOT_LOGGED_IN),
    }
}

fn get_request_headers(ctx: &RequestContext) -> CallToolResult {
    if ctx.is_empty() {
        return CallToolResult::text(NO_HEADERS);
    }
    let lines = ctx
        .headers()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect::<Vec<_>>();
    CallToolResult::text(lines.join("\n"))
}

fn get_header(ctx: &RequestContext, args: GetHeaderArgs) -> CallToolResult {
    let name = match args.header_name.as_deref() {
        Some(name) if !name.is_empty() => name,
        _ => return CallToolResult::text(MISSING_HEADER_NAME),
    };
    match ctx.header(name) {
        Some(value) => CallToolResult::text(value),
        None => {
            debug!("MCP: Header {} not found", name);
            CallToolResult::text(HEADER_NOT_FOUND)
        }
    }
}

async fn start_notification_stream(
    args: NotificationStreamArgs,
    sink: &EventSink,
) -> Result<CallToolResult> {
    let NotificationStreamArgs {
        interval,
        count,
        caller,
    } = args;
    let pause = Duration::from_secs_f64(interval);

    for i in 1..=count {
        let text = format!(
            "[{}/{}] Event from '{}' - Use Last-Event-ID to resume if disconnected",
            i, count, caller
        );
        let marker = sink.emit(EventPayload::info(NOTIFICATION_LOGGER, text)).await;
        debug!(
            "Sent notification {}/{} for caller {} as event {}",
            i, count, caller, marker
        );
        if i < count {
            tokio::time::sleep(pause).await;
        }
    }

    sink.emit_standalone(EventPayload::ResourceUpdated {
        uri: TEST_RESOURCE_URI.to_string(),
    })
    .await;

    Ok(CallToolResult::text(format!(
        "Sent {} notifications with {}s interval for caller: {}",
        count, interval, caller
    )))
}

/// Deserialize validated arguments into a typed struct and check its ranges.
fn parse_args<T>(arguments: Map<String, Value>) -> Result<T>
where
    T: DeserializeOwned + Validate<Context = ()>,
{
    let args: T = serde_json::from_value(Value::Object(arguments))
        .map_err(|e| McpError::InvalidArguments(format!("Invalid arguments: {}", e)))?;
    args.validate()
        .map_err(|report| McpError::InvalidArguments(format!("Invalid arguments: {}", report)))?;
    Ok(args)
}

/// Check arguments against a tool's input schema.
///
/// Required keys must be present and non-null. Present values must match
/// or be coercible to the declared property type; numeric strings are
/// accepted for numbers and integral floats are normalised to integers.
pub fn validate_arguments(
    schema: &Value,
    mut arguments: Map<String, Value>,
) -> Result<Map<String, Value>> {
    if let Some(required) = schema["required"].as_array() {
        for key in required.iter().filter_map(Value::as_str) {
            if arguments.get(key).map_or(true, Value::is_null) {
                return Err(McpError::InvalidArguments(format!(
                    "Missing {} argument",
                    key
                )));
            }
        }
    }

    if let Some(properties) = schema["properties"].as_object() {
        for (key, property) in properties {
            let Some(expected) = property["type"].as_str() else {
                continue;
            };
            let Some(value) = arguments.get_mut(key) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            *value = coerce(key, expected, value.take())?;
        }
    }

    Ok(arguments)
}

fn coerce(key: &str, expected: &str, value: Value) -> Result<Value> {
    let mismatch = || {
        McpError::InvalidArguments(format!(
            "Invalid {} argument: expected {}",
            key, expected
        ))
    };

    match expected {
        "string" => match value {
            Value::String(_) => Ok(value),
            _ => Err(mismatch()),
        },
        "number" | "integer" => {
            let number = match &value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|n| n.is_finite())
            .ok_or_else(mismatch)?;

            if number.fract() == 0.0 && number.abs() < 9.0e15 {
                // Exact within f64's integer range.
                Ok(Value::Number(Number::from(number as i64)))
            } else if expected == "integer" {
                Err(mismatch())
            } else {
                Number::from_f64(number).map(Value::Number).ok_or_else(mismatch)
            }
        }
        "boolean" => match value {
            Value::Bool(_) => Ok(value),
            Value::String(s) if s == "true" => Ok(Value::Bool(true)),
            Value::String(s) if s == "false" => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },
        "object" => match value {
            Value::Object(_) => Ok(value),
            _ => Err(mismatch()),
        },
        _ => Ok(value),
    }
}

fn builtin_definitions() -> Vec<ToolDefinition> {
    let define = |name: &str, description: &str, input_schema: Value| ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    };

    vec![
        define(
            "get_logged_in_user",
            "Returns the logged in user from X-Forwarded-User header",
            json!({ "type": "object", "properties": {} }),
        ),
        define(
            "get_request_headers",
            "Returns all HTTP headers from the client request",
            json!({ "type": "object", "properties": {} }),
        ),
        define(
            "get_header",
            "Returns a specific HTTP header value",
            json!({
                "type": "object",
                "required": ["header_name"],
                "properties": {
                    "header_name": {
                        "type": "string",
                        "description": "The name of the header to retrieve (case-insensitive)"
                    }
                }
            }),
        ),
        define(
            "start-notification-stream",
            "Sends a stream of notifications with configurable count and interval",
            json!({
                "type": "object",
                "required": ["interval", "count", "caller"],
                "properties": {
                    "interval": {
                        "type": "number",
                        "description": "Interval between notifications in seconds"
                    },
                    "count": {
                        "type": "number",
                        "description": "Number of notifications to send"
                    },
                    "caller": {
                        "type": "string",
                        "description": "Identifier of the caller to include in notifications"
                    }
                }
            }),
        ),
    ]
}
