//! Stream frames and lifecycle types for the Stream Multiplexer and
//! Real-Time Connection Registry.

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::command::CommandId;
use crate::identity::UserIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameChannel {
    Stdout,
    Stderr,
    Status,
}

/// The terminal state carried by the unique terminal `status` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Completed,
    Failed,
    Cancelled,
    Timeout,
    /// Emitted only to the one subscriber whose queue overflowed
    ///; never the stream-wide terminal state.
    DroppedSlow,
    /// Emitted to every subscriber on orderly shutdown.
    ServerShutdown,
}

/// One unit of stream output. `seq` is monotonic from 1
/// within a stream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub channel: FrameChannel,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    /// Set only on the terminal `status` frame.
    pub terminal: Option<TerminalFrameInfo>,
    /// Set when this frame is the first one delivered to a late subscriber
    /// who missed earlier frames still in the ring buffer's retention
    /// window.
    pub gap: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TerminalFrameInfo {
    pub state: TerminalState,
    pub exit_code: Option<i32>,
}

impl Frame {
    pub fn output(seq: u64, channel: FrameChannel, payload: Vec<u8>) -> Self {
        Self {
            seq,
            channel,
            payload,
            timestamp: Utc::now(),
            terminal: None,
            gap: false,
        }
    }

    pub fn terminal(seq: u64, state: TerminalState, exit_code: Option<i32>) -> Self {
        Self {
            seq,
            channel: FrameChannel::Status,
            payload: Vec::new(),
            timestamp: Utc::now(),
            terminal: Some(TerminalFrameInfo { state, exit_code }),
            gap: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }
}

/// `starting -> running -> {completed, failed, cancelled, timeout}`
///. The terminal state is set exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamState::Completed | StreamState::Failed | StreamState::Cancelled | StreamState::Timeout
        )
    }
}

/// Identifies one subprocess invocation's stream.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub stream_id: Uuid,
    pub command_id: CommandId,
    pub owner: UserIdentity,
    pub started_at: DateTime<Utc>,
    pub state: StreamState,
}

impl StreamHandle {
    pub fn new(command_id: CommandId, owner: UserIdentity) -> Self {
        Self {
            stream_id: Uuid::new_v4(),
            command_id,
            owner,
            started_at: Utc::now(),
            state: StreamState::Starting,
        }
    }
}

/// One consumer's binding to one stream. Destroyed on
/// unsubscribe, on stream terminal + grace, or on subscriber disconnect.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub stream_id: Uuid,
    pub subscriber_id: Uuid,
    pub cursor: u64,
}

impl Subscription {
    pub fn new(stream_id: Uuid) -> Self {
        Self {
            stream_id,
            subscriber_id: Uuid::new_v4(),
            cursor: 0,
        }
    }
}
