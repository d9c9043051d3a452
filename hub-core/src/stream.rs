//! Stream Multiplexer.
//!
//! Fans a single producer (the Subprocess Runner, via [`crate::runner`]) out
//! to N subscribers, each holding an independent cursor into a bounded ring
//! buffer. Deliberately NOT built on `tokio::sync::broadcast`: broadcast
//! resyncs a lagged receiver by silently skipping its backlog and keeps
//! delivering, whereas a subscriber who falls behind capacity here must
//! receive a terminal `dropped_slow` frame and nothing further. Each
//! subscriber instead gets its own bounded `mpsc` queue fed by a single
//! fan-out task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hub_protocol::stream::Frame;
use hub_protocol::stream::FrameChannel;
use hub_protocol::stream::StreamHandle;
use hub_protocol::stream::StreamState;
use hub_protocol::stream::TerminalFrameInfo;
use hub_protocol::stream::TerminalState;
use hub_protocol::CommandId;
use hub_protocol::HubError;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

use crate::runner::OutputChannel;
use crate::runner::RunnerEvent;

/// A single subscriber's delivery queue. Bounded; a subscriber that cannot
/// keep up is dropped rather than resynced.
struct Subscriber {
    sender: mpsc::Sender<Frame>,
}

struct StreamInner {
    handle: StreamHandle,
    ring: Vec<Frame>,
    ring_capacity: usize,
    next_seq: u64,
    subscribers: HashMap<Uuid, Subscriber>,
    terminal: Option<TerminalFrameInfo>,
}

impl StreamInner {
    fn push(&mut self, frame: Frame) {
        if self.ring.len() >= self.ring_capacity {
            self.ring.remove(0);
        }
        self.ring.push(frame);
    }
}

/// Owns one in-flight or recently-finished execution's stream of output.
pub struct StreamMultiplexer {
    subscriber_queue_len: usize,
    post_terminal_grace: Duration,
    streams: Arc<Mutex<HashMap<Uuid, Arc<Mutex<StreamInner>>>>>,
}

impl StreamMultiplexer {
    pub fn new(subscriber_queue_len: usize, post_terminal_grace: Duration) -> Self {
        Self {
            subscriber_queue_len,
            post_terminal_grace,
            streams: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new stream ahead of producing any frames, so a subscriber
    /// racing the first output can still find it.
    pub async fn open(
        &self,
        command_id: CommandId,
        owner: hub_protocol::UserIdentity,
        ring_capacity: usize,
    ) -> StreamHandle {
        let handle = StreamHandle::new(command_id, owner);
        let inner = StreamInner {
            handle: handle.clone(),
            ring: Vec::with_capacity(ring_capacity.min(64)),
            ring_capacity,
            next_seq: 0,
            subscribers: HashMap::new(),
            terminal: None,
        };
        self.streams
            .lock()
            .await
            .insert(handle.stream_id, Arc::new(Mutex::new(inner)));
        handle
    }

    /// Replay whatever of the ring buffer is still retained to a newly
    /// joined subscriber. If the oldest retained frame isn't `seq == 0`,
    /// earlier frames were already evicted, and the first frame replayed is
    /// flagged `gap` so the subscriber knows its view starts mid-stream.
    pub async fn subscribe(
        &self,
        stream_id: Uuid,
    ) -> Result<(Uuid, mpsc::Receiver<Frame>), HubError> {
        let streams = self.streams.lock().await;
        let stream = streams
            .get(&stream_id)
            .ok_or(HubError::StreamNotFound(stream_id))?
            .clone();
        drop(streams);

        let (tx, rx) = mpsc::channel(self.subscriber_queue_len);
        let subscriber_id = Uuid::new_v4();
        let mut inner = stream.lock().await;
        let mut first = true;
        for frame in &inner.ring {
            let mut frame = frame.clone();
            if first {
                first = false;
                if frame.seq > 0 {
                    frame.gap = true;
                }
            }
            if tx.try_send(frame).is_err() {
                warn!(stream_id = %stream_id, "replay buffer overran subscriber queue on join");
                break;
            }
        }
        inner.subscribers.insert(subscriber_id, Subscriber { sender: tx });
        Ok((subscriber_id, rx))
    }

    pub async fn unsubscribe(&self, stream_id: Uuid, subscriber_id: Uuid) {
        if let Some(stream) = self.streams.lock().await.get(&stream_id).cloned() {
            stream.lock().await.subscribers.remove(&subscriber_id);
        }
    }

    pub async fn state(&self, stream_id: Uuid) -> Option<StreamState> {
        let stream = self.streams.lock().await.get(&stream_id)?.clone();
        Some(stream.lock().await.handle.state)
    }

    /// The identity that opened `stream_id`, for the Execution Bridge to
    /// authorize a subscription against before handing out a receiver.
    pub async fn owner(&self, stream_id: Uuid) -> Option<hub_protocol::UserIdentity> {
        let stream = self.streams.lock().await.get(&stream_id)?.clone();
        let inner = stream.lock().await;
        Some(inner.handle.owner.clone())
    }

    /// Emit a `ServerShutdown` terminal frame to every currently live
    /// stream, for an orderly process shutdown.
    pub async fn shutdown(&self) {
        let live: Vec<_> = self.streams.lock().await.values().cloned().collect();
        for stream in live {
            self.emit_terminal(&stream, TerminalState::ServerShutdown, None).await;
        }
    }

    /// Drive the runner's event stream into framed, sequenced output,
    /// fanning every frame out to current subscribers and dropping any
    /// subscriber whose queue is full.
    pub async fn pump(
        &self,
        stream_id: Uuid,
        mut events: mpsc::Receiver<RunnerEvent>,
        cancel: Arc<Notify>,
    ) {
        let stream = match self.streams.lock().await.get(&stream_id).cloned() {
            Some(s) => s,
            None => return,
        };

        loop {
            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(e) => e,
                    None => break,
                },
                _ = cancel.notified() => {
                    self.emit_terminal(&stream, TerminalState::Cancelled, None).await;
                    return;
                }
            };

            match event {
                RunnerEvent::Output(channel, payload) => {
                    let frame_channel = match channel {
                        OutputChannel::Stdout => FrameChannel::Stdout,
                        OutputChannel::Stderr => FrameChannel::Stderr,
                    };
                    self.emit_output(&stream, frame_channel, payload).await;
                }
                RunnerEvent::Exited { exit_code, signal } => {
                    let state = if exit_code == 0 {
                        TerminalState::Completed
                    } else {
                        TerminalState::Failed
                    };
                    let _ = signal;
                    self.emit_terminal(&stream, state, Some(exit_code)).await;
                    break;
                }
                RunnerEvent::Timeout => {
                    self.emit_terminal(&stream, TerminalState::Timeout, None).await;
                    break;
                }
                RunnerEvent::Cancelled => {
                    self.emit_terminal(&stream, TerminalState::Cancelled, None).await;
                    break;
                }
            }
        }

        let grace = self.post_terminal_grace;
        let streams = self.streams.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            streams.lock().await.remove(&stream_id);
        });
    }

    async fn emit_output(&self, stream: &Arc<Mutex<StreamInner>>, channel: FrameChannel, payload: Vec<u8>) {
        let mut inner = stream.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let frame = Frame::output(seq, channel, payload);
        inner.push(frame.clone());
        if inner.handle.state == StreamState::Starting {
            inner.handle.state = StreamState::Running;
        }
        self.fan_out(&mut inner, frame);
    }

    async fn emit_terminal(
        &self,
        stream: &Arc<Mutex<StreamInner>>,
        state: TerminalState,
        exit_code: Option<i32>,
    ) {
        let mut inner = stream.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let frame = Frame::terminal(seq, state, exit_code);
        inner.terminal = frame.terminal;
        inner.handle.state = match state {
            TerminalState::Completed => StreamState::Completed,
            TerminalState::Failed => StreamState::Failed,
            TerminalState::Cancelled => StreamState::Cancelled,
            TerminalState::Timeout => StreamState::Timeout,
            TerminalState::DroppedSlow | TerminalState::ServerShutdown => StreamState::Cancelled,
        };
        inner.push(frame.clone());
        self.fan_out(&mut inner, frame);
    }

    /// Push `frame` to every subscriber; any subscriber whose bounded queue
    /// is full is dropped and, where possible, sent one final
    /// `dropped_slow` terminal frame on a best-effort basis before removal.
    fn fan_out(&self, inner: &mut StreamInner, frame: Frame) {
        let mut dropped = Vec::new();
        for (subscriber_id, subscriber) in inner.subscribers.iter() {
            if subscriber.sender.try_send(frame.clone()).is_err() {
                dropped.push(*subscriber_id);
            }
        }
        for subscriber_id in dropped {
            if let Some(subscriber) = inner.subscribers.remove(&subscriber_id) {
                let drop_frame = Frame::terminal(frame.seq + 1, TerminalState::DroppedSlow, None);
                let _ = subscriber.sender.try_send(drop_frame);
            }
        }
    }
}
