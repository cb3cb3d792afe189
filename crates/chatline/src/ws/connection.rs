//! A single live client channel.
//!
//! A [`Connection`] is the hub-side handle: an identity, a bounded outbound
//! frame queue, a latest-presence slot and a close signal. The socket side is
//! driven by two tasks, [`run_writer`] draining both into the socket and
//! [`read_until_closed`] watching for the peer going away.
//!
//! Presence lists are snapshots, so only the newest one matters. They are
//! coalesced in a `watch` slot instead of the queue and never count toward
//! backpressure. `new-message` frames go through the bounded queue.

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;

use super::types::WsEvent;
use crate::identity::Identity;

/// Process-unique connection identifier.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Failure to push a frame to a connection. The connection is broken.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    #[error("connection {0} is not draining its outbound queue")]
    Backpressure(ConnectionId),

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Hub-side handle for one client channel.
///
/// Clones share the same queue, presence slot and close signal.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    identity: Identity,
    outbound: mpsc::Sender<String>,
    presence: Arc<watch::Sender<Option<String>>>,
    closed: CancellationToken,
}

/// Socket-side half of a connection, consumed by the writer task.
pub struct Outbound {
    rx: mpsc::Receiver<String>,
    presence: watch::Receiver<Option<String>>,
    closed: CancellationToken,
}

impl Connection {
    /// Create a connection for `identity` with room for `buffer` queued frames.
    pub fn new(identity: Identity, buffer: usize) -> (Self, Outbound) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (presence_tx, presence_rx) = watch::channel(None);
        let closed = CancellationToken::new();
        let conn = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            identity,
            outbound: tx,
            presence: Arc::new(presence_tx),
            closed: closed.clone(),
        };
        let outbound = Outbound {
            rx,
            presence: presence_rx,
            closed,
        };
        (conn, outbound)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Serialize `event` and hand it to the writer.
    pub fn send_event(&self, event: &WsEvent) -> Result<(), ChannelError> {
        let text = serde_json::to_string(event)?;
        self.send_serialized(event, text)
    }

    /// Hand over a frame already serialized from `event`.
    ///
    /// Presence lists replace any presence frame the writer has not sent yet.
    /// Everything else is queued without waiting.
    pub(crate) fn send_serialized(
        &self,
        event: &WsEvent,
        text: String,
    ) -> Result<(), ChannelError> {
        match event {
            WsEvent::PresenceList(_) => self.replace_presence(text),
            WsEvent::NewMessage(_) => self.send_text(text),
        }
    }

    /// Queue a frame without waiting.
    pub(crate) fn send_text(&self, text: String) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Closed(self.id));
        }
        self.outbound.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => ChannelError::Backpressure(self.id),
            TrySendError::Closed(_) => ChannelError::Closed(self.id),
        })
    }

    /// Overwrite the pending presence frame. Only fails once the writer is gone.
    pub(crate) fn replace_presence(&self, text: String) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed(self.id));
        }
        self.presence.send_replace(Some(text));
        Ok(())
    }

    /// Ask the writer to send a close frame and stop. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.outbound.is_closed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Outbound {
    /// Next frame to write, or `None` once the connection has been closed.
    ///
    /// Queued messages go before a pending presence frame.
    pub async fn next(&mut self) -> Option<String> {
        loop {
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return None,
                frame = self.rx.recv() => return frame,
                Ok(()) = self.presence.changed() => {
                    if let Some(text) = self.presence.borrow_and_update().clone() {
                        return Some(text);
                    }
                }
            }
        }
    }

    /// Next frame if one is already pending.
    pub fn try_next(&mut self) -> Option<String> {
        if self.closed.is_cancelled() {
            return None;
        }
        if let Ok(frame) = self.rx.try_recv() {
            return Some(frame);
        }
        if self.presence.has_changed().unwrap_or(false) {
            return self.presence.borrow_and_update().clone();
        }
        None
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Why the writer stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterExit {
    /// Closed by the hub (unregister, replacement or shutdown).
    Closed,
    /// Writing to the socket failed.
    WriteFailed(String),
}

/// Drain `outbound` into `sink`, pinging every `ping_interval`.
pub async fn run_writer<S>(
    mut sink: S,
    mut outbound: Outbound,
    ping_interval: Option<Duration>,
) -> WriterExit
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let mut ping =
        ping_interval.map(|period| tokio::time::interval_at(Instant::now() + period, period));

    loop {
        tokio::select! {
            frame = outbound.next() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        return WriterExit::WriteFailed(e.to_string());
                    }
                }
                None => {
                    // Peer may already be gone; the close frame is best effort.
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    return WriterExit::Closed;
                }
            },
            _ = tick(&mut ping) => {
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    return WriterExit::WriteFailed(e.to_string());
                }
            }
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Why the read loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadExit {
    PeerClosed,
    Error(String),
}

/// Consume the inbound half until the peer closes or the transport fails.
///
/// Payloads are ignored; this loop only exists to notice disconnects.
pub async fn read_until_closed<R, E>(
    mut stream: R,
    identity: &Identity,
    id: ConnectionId,
) -> ReadExit
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                info!("User {} closed WebSocket connection {}", identity, id);
                return ReadExit::PeerClosed;
            }
            Ok(Message::Text(_)) | Ok(Message::Binary(_)) => {
                debug!("Ignoring inbound payload from user {} on connection {}", identity, id);
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                warn!("WebSocket error for user {} connection {}: {}", identity, id, e);
                return ReadExit::Error(e.to_string());
            }
        }
    }

    debug!("WebSocket stream for user {} connection {} ended", identity, id);
    ReadExit::PeerClosed
}
