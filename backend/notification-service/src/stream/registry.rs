/// Live Session Registry
///
/// Maps each advisor to the one session currently streaming to them.
/// Supports:
/// - Last-connection-wins registration
/// - Identity-checked unregistration, so a replaced writer cannot evict its successor
/// - Idle eviction for the liveness sweeper
/// - Diagnostic snapshots
use super::session::Session;
use crate::models::Notification;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// A freshly registered session and the receiving half of its queue
#[derive(Debug)]
pub struct Registration {
    pub session: Arc<Session>,
    pub queue: mpsc::Receiver<Notification>,
}

/// Diagnostic view of one registered session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub last_seen: DateTime<Utc>,
    pub active: bool,
}

/// Registry of live advisor sessions
///
/// Cheap to clone; all clones share the same map. Every key maps to an open
/// session: removal and closing always happen under the same write lock.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<i64, Arc<Session>>>>,
    inactivity_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            inactivity_timeout,
        }
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity_timeout
    }

    /// Register a new stream for an advisor
    ///
    /// Any session already registered for the advisor is closed and replaced
    /// within the same critical section.
    ///
    /// # Arguments
    ///
    /// * `advisor_id` - The advisor opening the stream
    /// * `capacity` - Size of the outbound queue
    pub async fn register(&self, advisor_id: i64, capacity: usize) -> Registration {
        let (session, queue) = Session::open(advisor_id, capacity);

        let mut sessions = self.sessions.write().await;
        if let Some(previous) = sessions.insert(advisor_id, session.clone()) {
            previous.close();
            info!(
                advisor_id,
                replaced_session = %previous.id(),
                "Closed existing stream for advisor"
            );
        }

        debug!(
            advisor_id,
            session_id = %session.id(),
            total_sessions = sessions.len(),
            "Registered advisor stream"
        );

        Registration { session, queue }
    }

    /// Remove an advisor's session if it is still the given one
    ///
    /// Returns `false` when the advisor has no session or has already been
    /// taken over by a newer connection; neither case changes anything.
    pub async fn unregister(&self, advisor_id: i64, session: &Session) -> bool {
        let mut sessions = self.sessions.write().await;
        let matches = sessions
            .get(&advisor_id)
            .map(|current| current.id() == session.id())
            .unwrap_or(false);

        if !matches {
            return false;
        }

        if let Some(removed) = sessions.remove(&advisor_id) {
            removed.close();
        }
        debug!(
            advisor_id,
            session_id = %session.id(),
            remaining = sessions.len(),
            "Unregistered advisor stream"
        );
        true
    }

    pub async fn lookup(&self, advisor_id: i64) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&advisor_id).cloned()
    }

    /// Last-seen time and liveness of every registered session
    pub async fn snapshot(&self) -> BTreeMap<i64, ConnectionStatus> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .map(|(advisor_id, session)| {
                (
                    *advisor_id,
                    ConnectionStatus {
                        last_seen: session.last_seen(),
                        active: session.idle_for() < self.inactivity_timeout,
                    },
                )
            })
            .collect()
    }

    /// Close and remove every session idle for longer than the inactivity timeout
    ///
    /// # Returns
    ///
    /// The advisors whose sessions were evicted
    pub async fn evict_idle(&self) -> Vec<i64> {
        let mut sessions = self.sessions.write().await;
        let mut evicted = Vec::new();

        sessions.retain(|advisor_id, session| {
            if session.idle_for() > self.inactivity_timeout {
                session.close();
                evicted.push(*advisor_id);
                false
            } else {
                true
            }
        });

        for advisor_id in &evicted {
            info!(advisor_id, "Cleaned up inactive stream");
        }
        evicted
    }

    /// Close every session (graceful shutdown)
    pub async fn close_all(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        for (_, session) in sessions.drain() {
            session.close();
        }
        count
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(5 * 60))
    }
}
