/// Server-side state of one advisor's live stream
///
/// A session owns the sending half of a bounded queue. Producers push into it
/// with `enqueue`, which never waits; the single stream writer owns the
/// receiving half. Closing a session cancels its token, which the writer
/// observes as a wakeup and exits on.
use crate::models::Notification;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier for one connection of an advisor
///
/// Two connections of the same advisor never share an id, which is what lets
/// a stale writer tell that it has been replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    /// Closed for new items, writer not yet exited
    Draining,
    Closed,
}

const OPEN: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

/// Result of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// Queue at capacity, item discarded
    Dropped,
    /// Session no longer accepts items
    Closed,
}

impl Enqueue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Enqueue::Queued => "queued",
            Enqueue::Dropped => "dropped",
            Enqueue::Closed => "closed",
        }
    }
}

pub struct Session {
    id: SessionId,
    advisor_id: i64,
    queue: mpsc::Sender<Notification>,
    last_activity: Mutex<Instant>,
    state: AtomicU8,
    shutdown: CancellationToken,
}

impl Session {
    /// Create an open session and the receiving half of its queue.
    pub(crate) fn open(
        advisor_id: i64,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let session = Arc::new(Self {
            id: SessionId::new(),
            advisor_id,
            queue: tx,
            last_activity: Mutex::new(Instant::now()),
            state: AtomicU8::new(OPEN),
            shutdown: CancellationToken::new(),
        });
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn advisor_id(&self) -> i64 {
        self.advisor_id
    }

    pub fn capacity(&self) -> usize {
        self.queue.max_capacity()
    }

    /// Items currently waiting for the writer
    pub fn queued(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    /// Push a notification without waiting.
    pub fn enqueue(&self, notification: Notification) -> Enqueue {
        if !self.is_open() {
            return Enqueue::Closed;
        }
        match self.queue.try_send(notification) {
            Ok(()) => Enqueue::Queued,
            Err(TrySendError::Full(_)) => Enqueue::Dropped,
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    /// Record activity on the connection.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Wall-clock time of the last activity
    pub fn last_seen(&self) -> DateTime<Utc> {
        let idle = chrono::Duration::from_std(self.idle_for())
            .unwrap_or_else(|_| chrono::Duration::zero());
        Utc::now() - idle
    }

    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::Acquire) {
            OPEN => SessionState::Open,
            DRAINING => SessionState::Draining,
            _ => SessionState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    /// Stop accepting items and wake the writer.
    ///
    /// Returns `true` only for the call that actually closed the session.
    pub(crate) fn close(&self) -> bool {
        let closed = self
            .state
            .compare_exchange(OPEN, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if closed {
            self.shutdown.cancel();
        }
        closed
    }

    /// Terminal transition, called once the writer has exited.
    pub(crate) fn finish(&self) {
        self.close();
        self.state.store(CLOSED, Ordering::Release);
    }

    /// Resolves once the session has been closed.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("advisor_id", &self.advisor_id)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::test_support::sample;

    #[tokio::test]
    async fn test_enqueue_until_full() {
        let (session, mut rx) = Session::open(1, 3);

        for i in 0..3 {
            assert_eq!(session.enqueue(sample(i, 1)), Enqueue::Queued);
        }
        assert_eq!(session.queued(), 3);
        assert_eq!(session.enqueue(sample(99, 1)), Enqueue::Dropped);
        assert_eq!(session.queued(), 3);

        // FIFO
        assert_eq!(rx.recv().await.unwrap().id, 0);
        assert_eq!(rx.recv().await.unwrap().id, 1);
        assert_eq!(session.enqueue(sample(4, 1)), Enqueue::Queued);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let (session, _rx) = Session::open(1, 0);
        assert_eq!(session.capacity(), 1);
        assert_eq!(session.enqueue(sample(1, 1)), Enqueue::Queued);
        assert_eq!(session.enqueue(sample(2, 1)), Enqueue::Dropped);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (session, _rx) = Session::open(1, 4);
        assert_eq!(session.state(), SessionState::Open);

        assert!(session.close());
        assert!(!session.close());
        assert_eq!(session.state(), SessionState::Draining);
        assert_eq!(session.enqueue(sample(1, 1)), Enqueue::Closed);

        // already cancelled, resolves immediately
        session.closed().await;

        session.finish();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_enqueue_after_writer_gone() {
        let (session, rx) = Session::open(1, 4);
        drop(rx);
        assert_eq!(session.enqueue(sample(1, 1)), Enqueue::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_resets_idle_time() {
        let (session, _rx) = Session::open(1, 4);
        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(session.idle_for(), Duration::from_secs(90));

        session.touch();
        assert_eq!(session.idle_for(), Duration::ZERO);
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
