//! Outbound events delivered to clients over a session's event stream.

use crate::jsonrpc::{JsonRpcNotification, JsonRpcResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Per-log sequence number tagging each delivered event.
///
/// Markers start at 1 and increase by one with every append.
pub type Marker = u64;

/// Logical stream an event belongs to inside a session.
///
/// Events produced while answering a POSTed request are tagged with a
/// server-assigned key unique to that request, so its POST response stream
/// can pick them out even when clients reuse JSON-RPC ids. Everything else
/// goes to the standalone stream opened with GET.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamId {
    Request {
        /// Unique per inbound request.
        key: String,
        /// The client's JSON-RPC id, for diagnostics only.
        request_id: String,
    },
    Standalone,
}

impl StreamId {
    /// Stream for one inbound request carrying JSON-RPC id `id`.
    pub fn for_request(key: impl Into<String>, id: &Value) -> Self {
        Self::Request {
            key: key.into(),
            request_id: id.to_string(),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request { key, request_id } => write!(f, "request {} [{}]", request_id, key),
            Self::Standalone => f.write_str("standalone"),
        }
    }
}

/// What an event carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// A `notifications/message` log line.
    LogMessage {
        level: String,
        logger: Option<String>,
        data: String,
    },
    /// A `notifications/resources/updated` notice.
    ResourceUpdated { uri: String },
    /// The final JSON-RPC response of a request.
    Response(JsonRpcResponse),
}

impl EventPayload {
    pub fn info(logger: impl Into<String>, data: impl Into<String>) -> Self {
        Self::LogMessage {
            level: "info".to_string(),
            logger: Some(logger.into()),
            data: data.into(),
        }
    }

    /// Whether this payload terminates the request stream it belongs to.
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// Render the payload as the JSON-RPC message the client receives.
    pub fn to_message(&self) -> Value {
        match self {
            Self::LogMessage {
                level,
                logger,
                data,
            } => {
                let mut params = json!({ "level": level, "data": data });
                if let Some(logger) = logger {
                    params["logger"] = json!(logger);
                }
                to_value(&JsonRpcNotification::new("notifications/message", params))
            }
            Self::ResourceUpdated { uri } => to_value(&JsonRpcNotification::new(
                "notifications/resources/updated",
                json!({ "uri": uri }),
            )),
            Self::Response(response) => to_value(response),
        }
    }
}

fn to_value<T: Serialize>(message: &T) -> Value {
    // Envelopes are plain structs of strings and JSON values.
    serde_json::to_value(message).unwrap_or(Value::Null)
}

/// An immutable, marker-tagged record in a session's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub marker: Marker,
    pub stream_id: StreamId,
    pub payload: EventPayload,
}

impl StreamEvent {
    pub fn description(&self) -> String {
        let kind = match &self.payload {
            EventPayload::LogMessage { .. } => "log message",
            EventPayload::ResourceUpdated { .. } => "resource update",
            EventPayload::Response(_) => "response",
        };
        format!("#{} {} on {}", self.marker, kind, self.stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_message_renders_as_notification() {
        let payload = EventPayload::info("notification_stream", "hello");
        let msg = payload.to_message();
        assert_eq!(msg["jsonrpc"], "2.0");
        assert_eq!(msg["method"], "notifications/message");
        assert_eq!(msg["params"]["level"], "info");
        assert_eq!(msg["params"]["logger"], "notification_stream");
        assert_eq!(msg["params"]["data"], "hello");
        assert!(msg.get("id").is_none());
    }

    #[test]
    fn test_resource_update_renders_uri() {
        let payload = EventPayload::ResourceUpdated {
            uri: "http:///test_resource".to_string(),
        };
        let msg = payload.to_message();
        assert_eq!(msg["method"], "notifications/resources/updated");
        assert_eq!(msg["params"]["uri"], "http:///test_resource");
        assert!(!payload.is_response());
    }

    #[test]
    fn test_stream_id_for_request() {
        let a = StreamId::for_request("a", &json!(7));
        let b = StreamId::for_request("b", &json!(7));
        assert_ne!(a, b);
        assert_ne!(
            StreamId::for_request("k", &json!(1)),
            StreamId::for_request("k", &json!("1"))
        );
        assert_eq!(a.to_string(), "request 7 [a]");
        assert_eq!(StreamId::Standalone.to_string(), "standalone");
    }
}
