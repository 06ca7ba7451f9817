/// Per-connection stream writer
///
/// Drains one session's queue onto the transport. The loop wakes on the
/// first of:
/// 1. Transport closed by the client
/// 2. Session closed by the registry (replacement or sweep)
/// 3. A queued notification
/// 4. A heartbeat interval without any event frame written
/// 5. A keepalive tick, which writes a comment frame
///
/// Actix only drops the response body after a socket write fails, so a
/// silent client disconnect is noticed on the write after it. Keepalive
/// comments bound that delay to a couple of keepalive periods.
///
/// Whatever ends the loop, including a panic, the session is unregistered
/// (only if still current) and closed before `run` returns.
use super::frames::{encode_event, keepalive_comment, ControlFrame};
use super::registry::{Registration, SessionRegistry};
use super::session::Session;
use crate::metrics;
use crate::models::Notification;
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use std::fmt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("client disconnected")]
    Disconnected,

    #[error("transport error: {0}")]
    Io(String),
}

/// Where frames go
///
/// `closed` must resolve when the client goes away, even if no frame is
/// being written at that moment.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&mut self, frame: Bytes) -> Result<(), SinkError>;

    async fn closed(&self);
}

/// Frame sink feeding an HTTP streaming body
pub struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
}

/// Body stream paired with a `ChannelSink`
pub type FrameStream = ReceiverStream<Result<Bytes, io::Error>>;

impl ChannelSink {
    /// Create a sink and the body stream it feeds.
    ///
    /// `buffer` bounds how many frames may sit between the writer and the socket.
    pub fn new(buffer: usize) -> (Self, FrameStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, ReceiverStream::new(rx))
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), SinkError> {
        self.tx
            .send(Ok(frame))
            .await
            .map_err(|_| SinkError::Disconnected)
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Why a stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamExit {
    /// The client went away
    Disconnected,
    /// The registry closed the session
    Evicted,
    /// Writing a frame failed
    Transport(String),
    /// The loop panicked
    Panicked(String),
}

impl StreamExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamExit::Disconnected => "disconnected",
            StreamExit::Evicted => "evicted",
            StreamExit::Transport(_) => "transport_error",
            StreamExit::Panicked(_) => "panicked",
        }
    }
}

impl fmt::Display for StreamExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamExit::Transport(e) | StreamExit::Panicked(e) => {
                write!(f, "{}: {}", self.as_str(), e)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

pub struct StreamWriter<S> {
    registry: SessionRegistry,
    session: Arc<Session>,
    queue: mpsc::Receiver<Notification>,
    sink: S,
    heartbeat_interval: Duration,
    keepalive_interval: Option<Duration>,
    /// When the last event frame went out; heartbeats count from here
    last_event: Instant,
}

impl<S> StreamWriter<S>
where
    S: FrameSink + 'static,
{
    pub fn new(
        registry: SessionRegistry,
        registration: Registration,
        sink: S,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            registry,
            session: registration.session,
            queue: registration.queue,
            sink,
            heartbeat_interval,
            keepalive_interval: None,
            last_event: Instant::now(),
        }
    }

    /// Write a comment frame every `interval` so dead sockets fail fast.
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval).filter(|i| !i.is_zero());
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Run the writer on its own task.
    pub fn spawn(self) -> JoinHandle<StreamExit> {
        tokio::spawn(self.run())
    }

    /// Run until the stream ends, then release the session.
    pub async fn run(mut self) -> StreamExit {
        let registry = self.registry.clone();
        let session = self.session.clone();
        let advisor_id = session.advisor_id();

        info!(advisor_id, session_id = %session.id(), "Advisor stream started");
        metrics::stream_opened();

        let exit = match AssertUnwindSafe(self.pump()).catch_unwind().await {
            Ok(exit) => exit,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(advisor_id, "Recovered from panic in advisor stream: {}", reason);
                StreamExit::Panicked(reason)
            }
        };

        registry.unregister(advisor_id, &session).await;
        session.finish();
        metrics::stream_closed(exit.as_str());

        match &exit {
            StreamExit::Transport(_) | StreamExit::Panicked(_) => {
                warn!(advisor_id, session_id = %session.id(), reason = %exit, "Advisor stream closed")
            }
            _ => {
                info!(advisor_id, session_id = %session.id(), reason = %exit, "Advisor stream closed")
            }
        }
        exit
    }

    async fn pump(&mut self) -> StreamExit {
        if let Err(exit) = self.write_control(ControlFrame::connected()).await {
            return exit;
        }

        let heartbeat = tokio::time::sleep_until(self.last_event + self.heartbeat_interval);
        tokio::pin!(heartbeat);

        let mut keepalive = self.keepalive_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;

                _ = self.sink.closed() => return StreamExit::Disconnected,

                _ = self.session.closed() => return StreamExit::Evicted,

                item = self.queue.recv() => {
                    let Some(notification) = item else {
                        return StreamExit::Evicted;
                    };
                    if let Err(exit) = self.write_notification(&notification).await {
                        return exit;
                    }
                }

                _ = heartbeat.as_mut() => {
                    if let Err(exit) = self.write_control(ControlFrame::heartbeat()).await {
                        return exit;
                    }
                    debug!(advisor_id = self.session.advisor_id(), "Heartbeat sent");
                }

                _ = next_tick(&mut keepalive) => {
                    if let Err(exit) = self.transmit(keepalive_comment()).await {
                        return exit;
                    }
                    metrics::frame_sent("keepalive");
                }
            }

            // unchanged unless an event frame went out
            heartbeat
                .as_mut()
                .reset(self.last_event + self.heartbeat_interval);
        }
    }

    async fn write_notification(&mut self, notification: &Notification) -> Result<(), StreamExit> {
        match encode_event(notification) {
            Ok(frame) => {
                self.transmit(frame).await?;
                self.last_event = Instant::now();
                metrics::frame_sent("notification");
                Ok(())
            }
            Err(e) => {
                // Skip the item, keep the stream
                error!(
                    advisor_id = self.session.advisor_id(),
                    notification_id = notification.id,
                    "Error serializing notification: {}",
                    e
                );
                Ok(())
            }
        }
    }

    async fn write_control(&mut self, frame: ControlFrame) -> Result<(), StreamExit> {
        let label = match frame {
            ControlFrame::Connected { .. } => "connected",
            ControlFrame::Heartbeat { .. } => "heartbeat",
        };
        let bytes =
            encode_event(&frame).map_err(|e| StreamExit::Transport(e.to_string()))?;
        self.transmit(bytes).await?;
        self.last_event = Instant::now();
        metrics::frame_sent(label);
        Ok(())
    }

    async fn transmit(&mut self, frame: Bytes) -> Result<(), StreamExit> {
        let sent = tokio::select! {
            biased;
            _ = self.session.closed() => return Err(StreamExit::Evicted),
            sent = self.sink.send(frame) => sent,
        };

        match sent {
            Ok(()) => {
                self.session.touch();
                Ok(())
            }
            Err(SinkError::Disconnected) => Err(StreamExit::Disconnected),
            Err(e) => Err(StreamExit::Transport(e.to_string())),
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::frames::decode_event;
    use crate::stream::session::SessionState;
    use crate::stream::test_support::sample;
    use futures::StreamExt;

    const HEARTBEAT: Duration = Duration::from_secs(30);

    async fn next_event(stream: &mut FrameStream) -> serde_json::Value {
        let frame = stream.next().await.unwrap().unwrap();
        decode_event(&frame).unwrap()
    }

    /// Sink that fails every write after the first `ok_writes`
    struct FailingSink {
        ok_writes: usize,
    }

    #[async_trait]
    impl FrameSink for FailingSink {
        async fn send(&mut self, _frame: Bytes) -> Result<(), SinkError> {
            if self.ok_writes == 0 {
                return Err(SinkError::Io("broken pipe".into()));
            }
            self.ok_writes -= 1;
            Ok(())
        }

        async fn closed(&self) {
            futures::future::pending::<()>().await
        }
    }

    /// Sink that panics on the first notification frame
    struct PanickingSink {
        writes: usize,
    }

    #[async_trait]
    impl FrameSink for PanickingSink {
        async fn send(&mut self, _frame: Bytes) -> Result<(), SinkError> {
            self.writes += 1;
            if self.writes > 1 {
                panic!("sink exploded");
            }
            Ok(())
        }

        async fn closed(&self) {
            futures::future::pending::<()>().await
        }
    }

    #[tokio::test]
    async fn test_connected_then_notifications_in_order() {
        let registry = SessionRegistry::default();
        let registration = registry.register(1, 50).await;
        let session = registration.session.clone();
        let (sink, mut stream) = ChannelSink::new(8);
        let handle = StreamWriter::new(registry.clone(), registration, sink, HEARTBEAT).spawn();

        assert_eq!(next_event(&mut stream).await["type"], "connected");

        for id in 1..=3 {
            session.enqueue(sample(id, 1));
        }
        for id in 1..=3 {
            let event = next_event(&mut stream).await;
            assert_eq!(event["id"], id);
            assert_eq!(event["type"], "new_diary");
        }

        drop(stream);
        assert_eq!(handle.await.unwrap(), StreamExit::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_after_quiet_interval() {
        let registry = SessionRegistry::default();
        let registration = registry.register(1, 50).await;
        let (sink, mut stream) = ChannelSink::new(8);
        let _handle = StreamWriter::new(registry, registration, sink, HEARTBEAT).spawn();

        let start = Instant::now();
        assert_eq!(next_event(&mut stream).await["type"], "connected");
        assert_eq!(next_event(&mut stream).await["type"], "heartbeat");
        assert!(start.elapsed() >= HEARTBEAT);
        assert_eq!(next_event(&mut stream).await["type"], "heartbeat");
        assert!(start.elapsed() >= HEARTBEAT * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_keep_session_alive() {
        let registry = SessionRegistry::default();
        let registration = registry.register(1, 50).await;
        let session = registration.session.clone();
        let (sink, mut stream) = ChannelSink::new(8);
        let _handle = StreamWriter::new(registry, registration, sink, HEARTBEAT).spawn();

        next_event(&mut stream).await;
        next_event(&mut stream).await;
        assert!(session.idle_for() < HEARTBEAT);
    }

    #[tokio::test]
    async fn test_disconnect_unregisters_without_sweeper() {
        let registry = SessionRegistry::default();
        let registration = registry.register(4, 50).await;
        let session = registration.session.clone();
        let (sink, mut stream) = ChannelSink::new(8);
        let handle = StreamWriter::new(registry.clone(), registration, sink, HEARTBEAT).spawn();

        next_event(&mut stream).await;
        drop(stream);

        assert_eq!(handle.await.unwrap(), StreamExit::Disconnected);
        assert!(registry.lookup(4).await.is_none());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_replacement_evicts_previous_writer() {
        let registry = SessionRegistry::default();
        let first = registry.register(4, 50).await;
        let (sink, mut stream) = ChannelSink::new(8);
        let handle = StreamWriter::new(registry.clone(), first, sink, HEARTBEAT).spawn();
        next_event(&mut stream).await;

        let second = registry.register(4, 50).await;
        assert_eq!(handle.await.unwrap(), StreamExit::Evicted);

        // the stale writer left the new session in place
        let current = registry.lookup(4).await.unwrap();
        assert_eq!(current.id(), second.session.id());
        assert!(current.is_open());
    }

    #[tokio::test]
    async fn test_transport_error_closes_session() {
        let registry = SessionRegistry::default();
        let registration = registry.register(2, 50).await;
        let session = registration.session.clone();
        let writer = StreamWriter::new(
            registry.clone(),
            registration,
            FailingSink { ok_writes: 1 },
            HEARTBEAT,
        );

        session.enqueue(sample(1, 2));
        let exit = writer.run().await;
        assert!(matches!(exit, StreamExit::Transport(_)));
        assert!(registry.lookup(2).await.is_none());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let registry = SessionRegistry::default();
        let registration = registry.register(3, 50).await;
        let session = registration.session.clone();
        let writer =
            StreamWriter::new(registry.clone(), registration, PanickingSink { writes: 0 }, HEARTBEAT);

        session.enqueue(sample(1, 3));
        let exit = writer.run().await;
        assert_eq!(exit, StreamExit::Panicked("sink exploded".into()));
        assert!(registry.lookup(3).await.is_none());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_counts_from_last_event_frame() {
        let registry = SessionRegistry::default();
        let registration = registry.register(1, 50).await;
        let session = registration.session.clone();
        let (sink, mut stream) = ChannelSink::new(8);
        let _handle = StreamWriter::new(registry, registration, sink, HEARTBEAT).spawn();

        let start = Instant::now();
        next_event(&mut stream).await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        session.enqueue(sample(1, 1));
        assert_eq!(next_event(&mut stream).await["type"], "new_diary");

        assert_eq!(next_event(&mut stream).await["type"], "heartbeat");
        assert!(start.elapsed() >= Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_does_not_postpone_heartbeat() {
        let registry = SessionRegistry::default();
        let registration = registry.register(1, 50).await;
        let (sink, mut stream) = ChannelSink::new(8);
        let _handle = StreamWriter::new(registry, registration, sink, HEARTBEAT)
            .with_keepalive(Duration::from_secs(5))
            .spawn();

        let start = Instant::now();
        next_event(&mut stream).await;

        let mut comments = 0;
        loop {
            let frame = stream.next().await.unwrap().unwrap();
            match decode_event(&frame) {
                Some(event) => {
                    assert_eq!(event["type"], "heartbeat");
                    break;
                }
                None => {
                    assert_eq!(&frame[..], b": ping\n\n");
                    comments += 1;
                }
            }
        }

        assert!(comments >= 5);
        assert!(start.elapsed() >= HEARTBEAT);
        assert!(start.elapsed() < HEARTBEAT + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_surfaces_dead_transport() {
        let registry = SessionRegistry::default();
        let registration = registry.register(6, 50).await;
        let writer = StreamWriter::new(
            registry.clone(),
            registration,
            FailingSink { ok_writes: 1 },
            HEARTBEAT,
        )
        .with_keepalive(Duration::from_secs(5));

        let start = Instant::now();
        let exit = writer.run().await;
        assert!(matches!(exit, StreamExit::Transport(_)));
        assert!(start.elapsed() < HEARTBEAT);
        assert!(registry.lookup(6).await.is_none());
    }

    #[test]
    fn test_exit_display() {
        assert_eq!(StreamExit::Evicted.to_string(), "evicted");
        assert_eq!(
            StreamExit::Transport("broken pipe".into()).to_string(),
            "transport_error: broken pipe"
        );
    }
}
