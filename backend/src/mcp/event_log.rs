//! Append-only, marker-ordered event log backing resumable streams.
//!
//! Every session owns one log. Appends assign the next marker under the
//! same lock that stores the event and publishes it to live subscribers,
//! so append order, marker order and delivery order coincide.
//!
//! The log is unbounded: events are retained for the lifetime of the
//! session. Alternative stores (bounded, persistent) plug in through the
//! [`EventLog`] trait.

use crate::error::{McpError, Result};
use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use std::sync::Arc;
use streamhttp_types::{EventPayload, Marker, StreamEvent, StreamId};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Live channel capacity; slower receivers fall back to reading the log.
const LIVE_BUFFER: usize = 256;

/// A replay snapshot plus a live receiver registered atomically with it.
pub struct Subscription {
    /// Events after the subscription point, in marker order.
    pub replay: Vec<StreamEvent>,
    /// Receives every event appended after the snapshot was taken.
    pub live: broadcast::Receiver<StreamEvent>,
    /// Marker the subscription starts after.
    pub from: Marker,
}

/// Trait for event log backends.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Store an event and return its marker.
    async fn append(&self, stream_id: StreamId, payload: EventPayload) -> Marker;

    /// Marker of the most recent append, or 0 if nothing was appended.
    async fn last_marker(&self) -> Marker;

    /// Every event with a marker strictly greater than `marker`.
    async fn events_after(&self, marker: Marker) -> Vec<StreamEvent>;

    /// `events_after(marker)` together with a live receiver, taken
    /// without any append slipping in between.
    async fn subscribe_from(&self, marker: Marker) -> Subscription;

    /// A live receiver starting right after the current tail, with the
    /// tail read and the receiver registered without any append between.
    async fn subscribe_tail(&self) -> Subscription;

    /// Replay everything after a marker this log handed out before.
    async fn replay_after(&self, marker: Marker) -> Result<Vec<StreamEvent>> {
        check_marker(marker, self.last_marker().await)?;
        Ok(self.events_after(marker).await)
    }

    /// Subscribe for delivery, resuming after `resume` when given.
    async fn subscribe(&self, resume: Option<Marker>) -> Result<Subscription> {
        match resume {
            Some(marker) => {
                check_marker(marker, self.last_marker().await)?;
                Ok(self.subscribe_from(marker).await)
            }
            None => Ok(self.subscribe_tail().await),
        }
    }
}

/// A marker is resumable only if this log produced it.
fn check_marker(marker: Marker, last: Marker) -> Result<()> {
    if marker == 0 || marker > last {
        return Err(McpError::UnknownMarker(marker));
    }
    Ok(())
}

/// In-memory event log.
pub struct InMemoryEventLog {
    events: Mutex<Vec<StreamEvent>>,
    sender: broadcast::Sender<StreamEvent>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::with_capacity(LIVE_BUFFER)
    }

    /// Create a log whose live channel buffers `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            events: Mutex::new(Vec::new()),
            sender,
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, stream_id: StreamId, payload: EventPayload) -> Marker {
        let mut events = self.events.lock();
        let marker = events.last().map(|e| e.marker).unwrap_or(0) + 1;
        let event = StreamEvent {
            marker,
            stream_id,
            payload,
        };
        debug!("Event log append: {}", event.description());
        events.push(event.clone());
        // No receivers is fine, the event stays in the log for replay
        let _ = self.sender.send(event);
        marker
    }

    async fn last_marker(&self) -> Marker {
        self.events.lock().last().map(|e| e.marker).unwrap_or(0)
    }

    async fn events_after(&self, marker: Marker) -> Vec<StreamEvent> {
        let events = self.events.lock();
        tail(&events, marker)
    }

    async fn subscribe_from(&self, marker: Marker) -> Subscription {
        let events = self.events.lock();
        Subscription {
            replay: tail(&events, marker),
            live: self.sender.subscribe(),
            from: marker,
        }
    }

    async fn subscribe_tail(&self) -> Subscription {
        let events = self.events.lock();
        Subscription {
            replay: Vec::new(),
            live: self.sender.subscribe(),
            from: events.last().map(|e| e.marker).unwrap_or(0),
        }
    }
}

/// Markers are dense from 1, so the event with marker `m` sits at `m - 1`.
fn tail(events: &[StreamEvent], marker: Marker) -> Vec<StreamEvent> {
    let start = usize::try_from(marker).unwrap_or(usize::MAX).min(events.len());
    events[start..].to_vec()
}

/// Turn a subscription into an ordered, gap-free event stream.
///
/// Replayed events come first. Live events already covered by the replay
/// are skipped, and a receiver that lags behind the live channel re-reads
/// the missed range from the log.
pub fn event_stream(
    log: Arc<dyn EventLog>,
    subscription: Subscription,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    async_stream::stream! {
        let Subscription { replay, mut live, from } = subscription;
        let mut position = from;

        for event in replay {
            position = event.marker;
            yield event;
        }

        loop {
            match live.recv().await {
                Ok(event) => {
                    if event.marker <= position {
                        continue;
                    }
                    position = event.marker;
                    yield event;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Event stream lagged by {} events, re-reading from marker {}",
                        skipped, position
                    );
                    let resumed = log.subscribe_from(position).await;
                    live = resumed.live;
                    for event in resumed.replay {
                        position = event.marker;
                        yield event;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    fn log_line(text: &str) -> EventPayload {
        EventPayload::info("test", text)
    }

    fn data(event: &StreamEvent) -> String {
        match &event.payload {
            EventPayload::LogMessage { data, .. } => data.clone(),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_markers_start_at_one_without_gaps() {
        let log = InMemoryEventLog::new();
        let mut markers = Vec::new();
        for i in 0..5 {
            markers.push(
                log.append(StreamId::Standalone, log_line(&i.to_string()))
                    .await,
            );
        }
        assert_eq!(markers, vec![1, 2, 3, 4, 5]);
        assert_eq!(log.last_marker().await, 5);
        assert_eq!(log.len(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_unique_dense_markers() {
        let log = Arc::new(InMemoryEventLog::new());
        let mut handles = Vec::new();
        for task in 0..8 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                let mut markers = Vec::new();
                for i in 0..50 {
                    let payload = log_line(&format!("{}-{}", task, i));
                    markers.push(log.append(StreamId::Standalone, payload).await);
                }
                markers
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            let markers = handle.await.unwrap();
            assert!(markers.windows(2).all(|w| w[0] < w[1]));
            all.extend(markers);
        }
        all.sort_unstable();
        assert_eq!(all, (1..=400).collect::<Vec<Marker>>());

        let stored = log.events_after(0).await;
        assert!(stored.windows(2).all(|w| w[0].marker + 1 == w[1].marker));
    }

    #[tokio::test]
    async fn test_replay_after_returns_strictly_later_events() {
        let log = InMemoryEventLog::new();
        for text in ["a", "b", "c", "d"] {
            log.append(StreamId::Standalone, log_line(text)).await;
        }

        let replayed = log.replay_after(2).await.unwrap();
        let markers: Vec<_> = replayed.iter().map(|e| e.marker).collect();
        assert_eq!(markers, vec![3, 4]);
        assert_eq!(data(&replayed[0]), "c");

        // Idempotent while nothing new is appended
        let again = log.replay_after(2).await.unwrap();
        assert_eq!(
            again.iter().map(|e| e.marker).collect::<Vec<_>>(),
            markers
        );

        assert!(log.replay_after(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replay_rejects_unknown_markers() {
        let log = InMemoryEventLog::new();
        assert!(matches!(
            log.replay_after(1).await,
            Err(McpError::UnknownMarker(1))
        ));

        log.append(StreamId::Standalone, log_line("a")).await;
        assert!(matches!(
            log.replay_after(0).await,
            Err(McpError::UnknownMarker(0))
        ));
        assert!(matches!(
            log.replay_after(2).await,
            Err(McpError::UnknownMarker(2))
        ));
        assert!(log.subscribe(Some(7)).await.is_err());
    }

    #[tokio::test]
    async fn test_stream_replays_before_live_delivery() {
        let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        for text in ["a", "b", "c"] {
            log.append(StreamId::Standalone, log_line(text)).await;
        }

        let subscription = log.subscribe(Some(1)).await.unwrap();
        let stream = event_stream(log.clone(), subscription);
        tokio::pin!(stream);

        log.append(StreamId::Standalone, log_line("d")).await;

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(stream.next().await.unwrap().marker);
        }
        assert_eq!(seen, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_subscribe_without_resume_starts_at_tail() {
        let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        log.append(StreamId::Standalone, log_line("old")).await;

        let subscription = log.subscribe(None).await.unwrap();
        assert!(subscription.replay.is_empty());
        let stream = event_stream(log.clone(), subscription);
        tokio::pin!(stream);

        log.append(StreamId::Standalone, log_line("new")).await;
        let event = stream.next().await.unwrap();
        assert_eq!(event.marker, 2);
        assert_eq!(data(&event), "new");
    }

    #[tokio::test]
    async fn test_tail_subscription_never_replays_racing_appends() {
        let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        let writer = {
            let log = log.clone();
            tokio::spawn(async move {
                for i in 0..500 {
                    log.append(StreamId::Standalone, log_line(&i.to_string()))
                        .await;
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..200 {
            let subscription = log.subscribe(None).await.unwrap();
            assert!(subscription.replay.is_empty());
            let from = subscription.from;
            let stream = event_stream(log.clone(), subscription);
            tokio::pin!(stream);
            log.append(StreamId::Standalone, log_line("mine"))
                .await;
            // The first live event is the one right after the tail
            let first = stream.next().await.unwrap();
            assert_eq!(first.marker, from + 1);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_lagging_receiver_recovers_from_log() {
        let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::with_capacity(2));
        let subscription = log.subscribe(None).await.unwrap();
        let stream = event_stream(log.clone(), subscription);
        tokio::pin!(stream);

        for i in 1..=10 {
            log.append(StreamId::Standalone, log_line(&i.to_string()))
                .await;
        }

        let mut seen = Vec::new();
        while seen.len() < 10 {
            let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .unwrap()
                .unwrap();
            seen.push(event.marker);
        }
        assert_eq!(seen, (1..=10).collect::<Vec<Marker>>());
    }
}
