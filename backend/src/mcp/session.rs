//! MCP session management.
//!
//! Binds the opaque `Mcp-Session-Id` token to the state that outlives a
//! single HTTP request: the session's event log and the background work
//! units its tool invocations run on. Sessions are created on first
//! contact and dropped only when the process shuts down.

use crate::config::SessionPolicy;
use crate::error::{McpError, Result};
use crate::mcp::event_log::{EventLog, InMemoryEventLog};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use uuid::Uuid;

/// Builds the event log for a new session.
pub type EventLogFactory = Arc<dyn Fn() -> Arc<dyn EventLog> + Send + Sync>;

/// An MCP session.
pub struct Session {
    /// Unique session identifier.
    id: String,
    /// When the session was created.
    created_at: Instant,
    /// Ordered record of every event emitted in this session.
    events: Arc<dyn EventLog>,
    /// Background tool invocations running on behalf of this session.
    tasks: TaskTracker,
}

impl Session {
    fn new(events: Arc<dyn EventLog>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            created_at: Instant::now(),
            events,
            tasks: TaskTracker::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn events(&self) -> Arc<dyn EventLog> {
        self.events.clone()
    }

    /// Get the session age in seconds.
    pub fn age_secs(&self) -> u64 {
        self.created_at.elapsed().as_secs()
    }

    /// Run a tool invocation as a tracked background work unit.
    ///
    /// The work unit is independent of the HTTP connection that started it.
    pub fn spawn<F>(&self, work: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(work)
    }

    /// Number of background invocations still running.
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("age_secs", &self.age_secs())
            .field("active_tasks", &self.active_tasks())
            .finish()
    }
}

/// Registry mapping session ids to sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    policy: SessionPolicy,
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    /// The process-lifetime session in single-session mode.
    global: Option<Arc<Session>>,
    new_log: EventLogFactory,
}

impl SessionRegistry {
    /// Create a registry backed by in-memory event logs.
    pub fn new(policy: SessionPolicy) -> Self {
        Self::with_event_log(policy, Arc::new(|| Arc::new(InMemoryEventLog::new())))
    }

    /// Create a registry whose sessions use logs built by `new_log`.
    pub fn with_event_log(policy: SessionPolicy, new_log: EventLogFactory) -> Self {
        let mut sessions = HashMap::new();
        let global = match policy {
            SessionPolicy::Single => {
                let session = Arc::new(Session::new(new_log()));
                info!("Created global MCP session: {}", session.id);
                sessions.insert(session.id.clone(), session.clone());
                Some(session)
            }
            SessionPolicy::PerClient => None,
        };
        Self {
            policy,
            sessions: Arc::new(RwLock::new(sessions)),
            global,
            new_log,
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Resolve the session a request belongs to.
    ///
    /// A known id returns its session, an unknown one fails with
    /// [`McpError::SessionNotFound`], and no id creates a new session.
    /// In single-session mode every request gets the global session.
    pub async fn resolve(&self, id: Option<&str>) -> Result<Arc<Session>> {
        if let Some(global) = &self.global {
            return Ok(global.clone());
        }

        match id {
            Some(id) => self
                .get(id)
                .await
                .ok_or_else(|| McpError::SessionNotFound(id.to_string())),
            None => Ok(self.create().await),
        }
    }

    /// Get a session by ID.
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        if let Some(global) = &self.global {
            return Some(global.clone());
        }
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// Create and register a new session.
    async fn create(&self) -> Arc<Session> {
        // Id generation and insertion happen under the write lock so a
        // racing creator can never register over an existing session.
        let mut sessions = self.sessions.write().await;
        let session = loop {
            let candidate = Session::new((self.new_log)());
            if !sessions.contains_key(&candidate.id) {
                break Arc::new(candidate);
            }
        };
        sessions.insert(session.id.clone(), session.clone());
        info!("Created MCP session: {}", session.id);
        session
    }

    /// Get the number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Wait for background invocations of every session to finish.
    ///
    /// Returns false if work was still running when `grace` ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        for session in &sessions {
            session.tasks.close();
        }
        let all_done = async {
            for session in &sessions {
                session.tasks.wait().await;
            }
        };
        match tokio::time::timeout(grace, all_done).await {
            Ok(()) => {
                info!("All MCP sessions drained");
                true
            }
            Err(_) => {
                let pending: usize = sessions.iter().map(|s| s.active_tasks()).sum();
                warn!(
                    "Shutting down with {} MCP invocations still running",
                    pending
                );
                false
            }
        }
    }
}
