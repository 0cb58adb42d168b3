//! The session-to-connection channel.
//!
//! Fragments travel over a bounded queue; closing is a separate signal so it
//! can be delivered even when the queue is full. A closed connection still
//! drains fragments that were queued before the close.

use std::fmt;
use std::sync::{Arc, OnceLock};

use fragcast_rt::tasks::{mpsc, CancellationToken};

use crate::codec::Fragment;
use crate::ids::ConnectionId;

/// Why the server closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    SessionEnded,
    SessionNotLive,
    Evicted,
    ServerShutdown,
    SlowConsumer,
    BindingFailed,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionEnded => "session ended",
            Self::SessionNotLive => "session not live",
            Self::Evicted => "session evicted",
            Self::ServerShutdown => "server shutting down",
            Self::SlowConsumer => "slow consumer",
            Self::BindingFailed => "session binding failed",
        }
    }

    /// WebSocket close code.
    pub fn code(self) -> u16 {
        match self {
            Self::SessionEnded | Self::Evicted => 1000,
            Self::ServerShutdown => 1001,
            Self::SessionNotLive | Self::BindingFailed => 1008,
            Self::SlowConsumer => 1013,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-shot close signal carrying the first reason it was given.
#[derive(Debug, Clone, Default)]
pub struct Closer {
    token: CancellationToken,
    reason: Arc<OnceLock<CloseReason>>,
}

impl Closer {
    pub fn close(&self, reason: CloseReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn closed(&self) -> CloseReason {
        self.token.cancelled().await;
        self.reason().unwrap_or(CloseReason::Evicted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The queue was full; the connection has been closed as a slow consumer.
    Lagging,
    /// The receiving side is gone.
    Gone,
}

/// Session-side end: held by the session actor for every attached connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    frames: mpsc::Sender<Fragment>,
    closer: Closer,
}

/// Connection-side end: drained by the connection's write loop.
#[derive(Debug)]
pub struct ConnectionOutbox {
    pub(crate) frames: mpsc::Receiver<Fragment>,
    pub(crate) closer: Closer,
    /// Fragments written to the transport so far.
    pub(crate) sent: u64,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, capacity: usize) -> (Self, ConnectionOutbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closer = Closer::default();
        (
            Self {
                id,
                frames: tx,
                closer: closer.clone(),
            },
            ConnectionOutbox {
                frames: rx,
                closer,
                sent: 0,
            },
        )
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn deliver(&self, fragment: Fragment) -> Delivery {
        match self.frames.try_send(fragment) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::TrySendError::Full(_)) => {
                self.closer.close(CloseReason::SlowConsumer);
                Delivery::Lagging
            }
            Err(mpsc::TrySendError::Closed(_)) => Delivery::Gone,
        }
    }

    pub fn close(&self, reason: CloseReason) {
        self.closer.close(reason);
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }
}

impl ConnectionOutbox {
    pub fn closer(&self) -> &Closer {
        &self.closer
    }

    /// Next queued fragment without waiting.
    pub fn try_next(&mut self) -> Option<Fragment> {
        self.frames.try_recv().ok()
    }

    pub async fn next(&mut self) -> Option<Fragment> {
        self.frames.recv().await
    }
}
