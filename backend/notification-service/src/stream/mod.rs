/// Live advisor notification streams
///
/// Pushes notifications to connected advisors over a long-lived
/// `text/event-stream` response.
///
/// Architecture:
/// 1. SessionRegistry: at most one live session per advisor, last connection wins
/// 2. Session: bounded outbound queue, never blocks producers
/// 3. StreamWriter: one task per connection draining the queue, with heartbeats
/// 4. Sweeper: periodic eviction of idle sessions

pub mod frames;
pub mod registry;
pub mod session;
pub mod sweeper;
pub mod writer;

pub use frames::ControlFrame;
pub use registry::{ConnectionStatus, Registration, SessionRegistry};
pub use session::{Enqueue, Session, SessionId, SessionState};
pub use sweeper::spawn_sweeper;
pub use writer::{ChannelSink, FrameSink, FrameStream, SinkError, StreamExit, StreamWriter};
