//! MCP Streamable HTTP endpoint handlers.
//!
//! Implements the MCP 2025-03-26 Streamable HTTP transport on a single path.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send a JSON-RPC message (returns JSON or SSE)
//! - `GET /mcp` - Open an SSE stream carrying every event of the session
//! - `DELETE /mcp` - Rejected; sessions live until shutdown
//!
//! ## Request lifecycle
//!
//! A POST resolves (or creates) its session, captures its headers into a
//! [`RequestContext`] and runs the request as a background work unit of
//! the session. Events the invocation emits land in the session's event
//! log; the response renders them either as one JSON document or as SSE
//! frames tagged with their marker. A `Last-Event-ID` header replays the
//! log after that marker before anything new is delivered.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use streamhttp_types::jsonrpc::{INTERNAL_ERROR, INVALID_REQUEST, JSONRPC_VERSION, PARSE_ERROR};
use streamhttp_types::{
    EventPayload, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, Marker, StreamEvent, StreamId,
    LAST_EVENT_ID_HEADER, MCP_SESSION_ID_HEADER,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ResponseMode, SessionPolicy};
use crate::error::{McpError, Result};
use crate::mcp::event_log::event_stream;
use crate::mcp::{EventSink, RequestContext, Session};
use crate::state::AppState;

/// Extract session ID from headers.
fn get_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract the resumption marker from headers.
fn get_last_event_id(headers: &HeaderMap) -> Result<Option<Marker>> {
    let Some(value) = headers.get(LAST_EVENT_ID_HEADER) else {
        return Ok(None);
    };
    let raw = String::from_utf8_lossy(value.as_bytes()).trim().to_string();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<Marker>()
        .map(Some)
        .map_err(|_| McpError::InvalidMarker(raw))
}

/// Attach the session id header to a response.
fn with_session(mut response: Response, session: &Session) -> Response {
    if let Ok(hv) = HeaderValue::from_str(session.id()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), hv);
    }
    response
}

fn jsonrpc_error(status: StatusCode, code: i32, message: String) -> Response {
    (
        status,
        Json(JsonRpcResponse::error(Value::Null, code, message)),
    )
        .into_response()
}

/// A stream of this request alone; JSON-RPC ids are chosen by clients
/// and may repeat across requests.
fn request_stream(request: &JsonRpcRequest) -> StreamId {
    StreamId::for_request(Uuid::new_v4().simple().to_string(), &request.id)
}

/// Render a logged event as an SSE frame tagged with its marker.
fn sse_frame(event: &StreamEvent) -> Event {
    Event::default()
        .event("message")
        .id(event.marker.to_string())
        .data(event.payload.to_message().to_string())
}

/// POST /mcp - Handle a JSON-RPC message.
///
/// Requests are answered with `application/json` in immediate mode and
/// with `text/event-stream` in streaming mode. Notifications and client
/// responses are acknowledged with 202 and no body.
pub async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let message: JsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) if e.is_syntax() || e.is_eof() => {
            return jsonrpc_error(
                StatusCode::BAD_REQUEST,
                PARSE_ERROR,
                format!("Parse error: {}", e),
            )
        }
        Err(e) => {
            return jsonrpc_error(
                StatusCode::BAD_REQUEST,
                INVALID_REQUEST,
                format!("Invalid request: {}", e),
            )
        }
    };

    let resume = match get_last_event_id(&headers) {
        Ok(resume) => resume,
        Err(e) => return e.into_response(),
    };

    let session_id = get_session_id(&headers);
    let session = match state.sessions().resolve(session_id.as_deref()).await {
        Ok(session) => session,
        Err(e) => {
            warn!("MCP POST rejected: {}", e);
            return e.into_response();
        }
    };
    debug!(
        "MCP POST: method={:?}, session={}, resume={:?}",
        message.method(),
        session.id(),
        resume
    );

    let request = match message {
        JsonRpcMessage::Request(request) => request,
        JsonRpcMessage::Notification(notification) => {
            state.handler().handle_notification(&session, &notification);
            return with_session(StatusCode::ACCEPTED.into_response(), &session);
        }
        JsonRpcMessage::Response(_) => {
            debug!("MCP: Client response acknowledged");
            return with_session(StatusCode::ACCEPTED.into_response(), &session);
        }
    };

    if request.jsonrpc != JSONRPC_VERSION {
        return with_session(
            (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(
                    request.id,
                    INVALID_REQUEST,
                    format!("Unsupported jsonrpc version: {}", request.jsonrpc),
                )),
            )
                .into_response(),
            &session,
        );
    }

    let ctx = RequestContext::from_headers(&headers)
        .with_session(session.id())
        .with_request_id(request.id.clone());

    let response = match state.response_mode() {
        ResponseMode::Immediate => respond_json(state, session.clone(), request, ctx, resume).await,
        ResponseMode::Streaming => respond_sse(state, session.clone(), request, ctx, resume).await,
    };

    match response {
        Ok(response) => with_session(response, &session),
        Err(e) => with_session(e.into_response(), &session),
    }
}

/// Run a request to completion, converting a panic into an internal error.
async fn run_request(
    state: AppState,
    session: Arc<Session>,
    request: JsonRpcRequest,
    ctx: RequestContext,
    sink: EventSink,
) -> Result<JsonRpcResponse> {
    let method = request.method.clone();
    let invocation = async {
        state
            .handler()
            .handle_request(&session, request, ctx, sink)
            .await
    };
    AssertUnwindSafe(invocation)
        .catch_unwind()
        .await
        .map_err(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("MCP: {} panicked: {}", method, reason);
            McpError::Internal(format!("{} panicked", method))
        })
}

/// Immediate mode: buffer replayed events, emitted events and the result
/// into one JSON document.
async fn respond_json(
    state: AppState,
    session: Arc<Session>,
    request: JsonRpcRequest,
    ctx: RequestContext,
    resume: Option<Marker>,
) -> Result<Response> {
    let log = session.events();
    let replayed = match resume {
        Some(marker) => log.replay_after(marker).await?,
        None => Vec::new(),
    };

    let stream_id = request_stream(&request);
    let start = log.last_marker().await;
    let sink = EventSink::new(log.clone(), stream_id.clone());

    let work = session.spawn(run_request(state, session.clone(), request, ctx, sink));
    let response = work
        .await
        .map_err(|e| McpError::Internal(format!("invocation task failed: {}", e)))??;

    let emitted: Vec<StreamEvent> = log
        .events_after(start)
        .await
        .into_iter()
        .filter(|e| e.stream_id == stream_id)
        .collect();

    if replayed.is_empty() && emitted.is_empty() {
        return Ok(Json(response).into_response());
    }

    let mut messages: Vec<Value> = replayed
        .iter()
        .chain(emitted.iter())
        .map(|e| e.payload.to_message())
        .collect();
    messages.push(
        serde_json::to_value(&response).map_err(|e| McpError::Internal(e.to_string()))?,
    );
    Ok(Json(Value::Array(messages)).into_response())
}

/// Streaming mode: flush every event of this request as it is appended and
/// close the stream after the final result.
async fn respond_sse(
    state: AppState,
    session: Arc<Session>,
    request: JsonRpcRequest,
    ctx: RequestContext,
    resume: Option<Marker>,
) -> Result<Response> {
    let log = session.events();
    let stream_id = request_stream(&request);

    // Subscribe before the work starts so no event can be missed.
    let subscription = log.subscribe(resume).await?;
    let boundary = subscription
        .replay
        .last()
        .map(|e| e.marker)
        .unwrap_or(subscription.from);

    let request_id = request.id.clone();
    let sink = EventSink::new(log.clone(), stream_id.clone());
    let work = run_request(state.clone(), session.clone(), request, ctx, sink.clone());
    session.spawn(async move {
        let response = work.await.unwrap_or_else(|e| {
            error!("MCP: {}", e);
            JsonRpcResponse::error(request_id, INTERNAL_ERROR, "Internal server error")
        });
        sink.emit(EventPayload::Response(response)).await;
    });

    let mut guard = DisconnectGuard::new(session.id(), &stream_id);
    let events =
        event_stream(log, subscription).take_until(state.shutdown_token().cancelled_owned());
    let frames = async_stream::stream! {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            let own = event.stream_id == stream_id;
            if event.marker > boundary && !own {
                continue;
            }
            let done = own && event.marker > boundary && event.payload.is_response();
            yield Ok::<_, Infallible>(sse_frame(&event));
            if done {
                guard.complete();
                break;
            }
        }
    };

    Ok(Sse::new(frames)
        .keep_alive(KeepAlive::new().interval(state.keep_alive()))
        .into_response())
}

/// Logs a transport write failure if a request stream is dropped before
/// its final result was delivered.
struct DisconnectGuard {
    session_id: String,
    stream_id: StreamId,
    completed: bool,
}

impl DisconnectGuard {
    fn new(session_id: &str, stream_id: &StreamId) -> Self {
        Self {
            session_id: session_id.to_string(),
            stream_id: stream_id.clone(),
            completed: false,
        }
    }

    fn complete(&mut self) {
        self.completed = true;
        debug!(
            "MCP: Stream {} of session {} closed",
            self.stream_id, self.session_id
        );
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.completed {
            warn!(
                "MCP: {} on {} of session {}; work continues and can be resumed",
                McpError::TransportWriteFailure,
                self.stream_id,
                self.session_id
            );
        }
    }
}

/// GET /mcp - Open SSE stream for server-initiated messages.
///
/// Carries every event of the session. With `Last-Event-ID` the events
/// after that marker are replayed first.
pub async fn mcp_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let resume = match get_last_event_id(&headers) {
        Ok(resume) => resume,
        Err(e) => return e.into_response(),
    };

    let session_id = get_session_id(&headers);
    let lookup = match (state.session_policy(), session_id.as_deref()) {
        (SessionPolicy::PerClient, None) => Err(McpError::MissingSessionId),
        (_, id) => state.sessions().resolve(id).await,
    };
    let session = match lookup {
        Ok(session) => session,
        Err(e) => {
            warn!("MCP GET rejected: {}", e);
            return e.into_response();
        }
    };

    let log = session.events();
    let subscription = match log.subscribe(resume).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!("MCP: Cannot resume session {}: {}", session.id(), e);
            return with_session(e.into_response(), &session);
        }
    };

    info!(
        "MCP: SSE stream opened for session {} (replaying {} events)",
        session.id(),
        subscription.replay.len()
    );

    let frames = event_stream(log, subscription)
        .take_until(state.shutdown_token().cancelled_owned())
        .map(|event| Ok::<_, Infallible>(sse_frame(&event)));
    let response = Sse::new(frames)
        .keep_alive(KeepAlive::new().interval(state.keep_alive()))
        .into_response();
    with_session(response, &session)
}

/// DELETE /mcp - Sessions cannot be terminated by clients.
pub async fn mcp_delete(headers: HeaderMap) -> Response {
    debug!(
        "MCP: Rejecting DELETE for session {:?}",
        get_session_id(&headers)
    );
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "GET, POST")],
        "Session termination is not supported",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_event_id_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(get_last_event_id(&headers).unwrap(), None);

        headers.insert(LAST_EVENT_ID_HEADER, HeaderValue::from_static(" 42 "));
        assert_eq!(get_last_event_id(&headers).unwrap(), Some(42));

        headers.insert(LAST_EVENT_ID_HEADER, HeaderValue::from_static("abc"));
        assert!(matches!(
            get_last_event_id(&headers),
            Err(McpError::InvalidMarker(raw)) if raw == "abc"
        ));
    }

    #[test]
    fn test_session_id_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(get_session_id(&headers), None);
        headers.insert(MCP_SESSION_ID_HEADER, HeaderValue::from_static(""));
        assert_eq!(get_session_id(&headers), None);
        headers.insert(MCP_SESSION_ID_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(get_session_id(&headers), Some("abc".to_string()));
    }
}
