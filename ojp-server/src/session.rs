//! Server-side session manager (component F): session lifetime, attached
//! resources, and the cleanup task that expires idle sessions.
//!
//! Grounded on the donor's `Transaction` create/auto-rollback-on-drop
//! shape, generalized from one client-owned transaction to a full
//! per-session resource arena (§9 "arena-per-session" design note: no raw
//! back-pointers, resources close in reverse-registration order).

use ojp_proto::config::SessionConfig;
use ojp_proto::resource::{ResourceId, ResourceKind};
use ojp_proto::OjpError;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// One resource a session owns (§3 `Resource`): a tagged kind plus the
/// session-local id assigned when it was registered.
#[derive(Debug, Clone)]
pub struct OwnedResource {
    pub id: ResourceId,
    pub kind: ResourceKind,
}

/// §3's `ClientSession`: the underlying connection identifier (an index
/// into the owning pool, opaque here), its resource arena, and activity
/// bookkeeping for the cleanup task.
struct Session {
    conn_hash: String,
    is_xa: bool,
    resources: Vec<OwnedResource>,
    next_resource_id: ResourceId,
    last_activity_at: Instant,
    transaction_open: bool,
    terminated: bool,
}

/// Component F. One instance per `ProxyNode`.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    config: SessionConfig,
    cleanup_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            cleanup_task: std::sync::Mutex::new(None),
        }
    }

    /// Creates a session for a first stateful request with no SessionId
    /// yet. The caller has already allocated the underlying connection
    /// from G (or bound an XA session via H/I) and supplies its
    /// `conn_hash` for later cleanup decisions.
    pub async fn create(&self, conn_hash: &str, is_xa: bool) -> String {
        let session_id = uuid::Uuid::new_v4().to_string();
        let session = Session {
            conn_hash: conn_hash.to_string(),
            is_xa,
            resources: Vec::new(),
            next_resource_id: 1,
            last_activity_at: Instant::now(),
            transaction_open: false,
            terminated: false,
        };
        self.sessions.write().await.insert(session_id.clone(), session);
        tracing::info!(session_id, conn_hash, is_xa, "session created");
        session_id
    }

    /// `resolve(sessionId)` per §4.F: fails `SessionUnknown`-equivalent
    /// (`SessionInvalidated`, §7) if the session is missing or already
    /// terminated, and otherwise refreshes `lastActivityAt`.
    pub async fn touch(&self, session_id: &str) -> Result<(), OjpError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .filter(|s| !s.terminated)
            .ok_or_else(|| OjpError::SessionInvalidated {
                session_id: session_id.to_string(),
            })?;
        session.last_activity_at = Instant::now();
        Ok(())
    }

    pub async fn conn_hash_of(&self, session_id: &str) -> Result<String, OjpError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .filter(|s| !s.terminated)
            .map(|s| s.conn_hash.clone())
            .ok_or_else(|| OjpError::SessionInvalidated {
                session_id: session_id.to_string(),
            })
    }

    pub async fn set_transaction_open(&self, session_id: &str, open: bool) -> Result<(), OjpError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .filter(|s| !s.terminated)
            .ok_or_else(|| OjpError::SessionInvalidated {
                session_id: session_id.to_string(),
            })?;
        session.transaction_open = open;
        Ok(())
    }

    /// `register(resource)` per §4.F: assigns the next id within the
    /// session; the session owns everything registered against it.
    pub async fn register_resource(&self, session_id: &str, kind: ResourceKind) -> Result<ResourceId, OjpError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .filter(|s| !s.terminated)
            .ok_or_else(|| OjpError::SessionInvalidated {
                session_id: session_id.to_string(),
            })?;
        let id = session.next_resource_id;
        session.next_resource_id += 1;
        session.resources.push(OwnedResource { id, kind });
        session.last_activity_at = Instant::now();
        Ok(id)
    }

    pub async fn resource_kind(&self, session_id: &str, resource_id: ResourceId) -> Result<ResourceKind, OjpError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .filter(|s| !s.terminated)
            .ok_or_else(|| OjpError::SessionInvalidated {
                session_id: session_id.to_string(),
            })?;
        session
            .resources
            .iter()
            .find(|r| r.id == resource_id)
            .map(|r| r.kind)
            .ok_or_else(|| OjpError::Internal {
                component: "SessionManager".to_string(),
                details: format!("resource {resource_id} not found in session {session_id}"),
            })
    }

    /// `terminate(sessionId)` per §4.F: closes all owned resources in
    /// reverse-registration order, rolls back any open transaction, and
    /// reports what it closed so the caller can return the underlying
    /// connection to G (or forward to I for XA). Idempotent per invariant
    /// 7: terminating twice is a no-op after the first.
    pub async fn terminate(&self, session_id: &str) -> TerminationOutcome {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            None => TerminationOutcome {
                already_terminated: true,
                conn_hash: None,
                is_xa: false,
                rolled_back_transaction: false,
                closed_resources: Vec::new(),
            },
            Some(session) if session.terminated => TerminationOutcome {
                already_terminated: true,
                conn_hash: Some(session.conn_hash.clone()),
                is_xa: session.is_xa,
                rolled_back_transaction: false,
                closed_resources: Vec::new(),
            },
            Some(session) => {
                let mut closed: Vec<OwnedResource> = session.resources.drain(..).collect();
                closed.reverse();
                let rolled_back = session.transaction_open;
                session.transaction_open = false;
                session.terminated = true;
                let outcome = TerminationOutcome {
                    already_terminated: false,
                    conn_hash: Some(session.conn_hash.clone()),
                    is_xa: session.is_xa,
                    rolled_back_transaction: rolled_back,
                    closed_resources: closed,
                };
                tracing::info!(session_id, resources_closed = outcome.closed_resources.len(), "session terminated");
                outcome
            }
        }
    }

    pub async fn remove(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    /// Enumerates sessions whose `lastActivityAt` is older than the
    /// configured `session.timeoutMinutes`, terminating each. Returns the
    /// ids terminated so the caller can release their underlying
    /// connections. Single-purpose, invoked by the daemon cleanup task.
    pub async fn sweep_expired(&self) -> Vec<String> {
        let timeout = Duration::from_secs(self.config.timeout_minutes * 60);
        let expired: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, s)| !s.terminated && s.last_activity_at.elapsed() > timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &expired {
            self.terminate(id).await;
            tracing::warn!(session_id = %id, "session expired by cleanup task");
        }
        expired
    }

    /// Starts the daemon-class cleanup task on `session.cleanupIntervalMinutes`.
    pub fn spawn_cleanup_task(self: &std::sync::Arc<Self>) {
        let manager = std::sync::Arc::clone(self);
        let interval = Duration::from_secs(manager.config.cleanup_interval_minutes.max(1) * 60);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.sweep_expired().await;
            }
        });
        *self.cleanup_task.lock().unwrap() = Some(handle);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// What `terminate()` did, so the caller can drive resource release in the
/// owning pools without the session manager needing to know about them.
pub struct TerminationOutcome {
    pub already_terminated: bool,
    pub conn_hash: Option<String>,
    pub is_xa: bool,
    pub rolled_back_transaction: bool,
    pub closed_resources: Vec<OwnedResource>,
}
