//! Connection actor: bridges one transport to one session.
//!
//! Lifecycle: `Connecting → Attached → Closing → Closed`. While attached the
//! actor runs a read loop (decode and forward actions) and a write loop
//! (drain the outbox onto the transport); whichever ends first cancels the
//! other, and the connection is detached from the registry.

use core::pin::pin;
use std::sync::Arc;

use fragcast_rt::tasks::{timeout, Semaphore};
use futures::future::{self, Either};
use futures::{Sink, SinkExt, Stream, StreamExt};

use crate::codec::decode_action;
use crate::dispatch::Application;
use crate::error::{AttachError, BindingError, TransportError};
use crate::ids::{ConnectionId, SessionId};
use crate::outbox::{CloseReason, ConnectionHandle, ConnectionOutbox};
use crate::registry::Registry;
use crate::session::SessionRef;
use crate::transport::{Transport, WireMessage};

const HANDSHAKE_PREFIXES: [&str; 2] = ["session:", "start:"];

/// How a connection names the session it wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionBinding {
    /// Taken from the connection target, e.g. `/events/<id>`.
    Path(SessionId),
    /// The first inbound frame is `session:<id>`.
    Handshake,
}

impl SessionBinding {
    /// Parses a handshake frame. `start:<id>` is accepted as an older spelling.
    pub fn parse_handshake(frame: &str) -> Result<SessionId, BindingError> {
        let frame = frame.trim();
        HANDSHAKE_PREFIXES
            .iter()
            .find_map(|prefix| frame.strip_prefix(prefix))
            .ok_or_else(|| BindingError::MalformedHandshake(frame.to_string()))
            .and_then(SessionId::new)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Attached,
    Closing,
    Closed,
}

/// What happened over the lifetime of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub id: ConnectionId,
    pub session: Option<SessionId>,
    pub state: ConnectionState,
    /// Set when the server closed the connection.
    pub close_reason: Option<CloseReason>,
    /// Set when the transport failed.
    pub transport_error: Option<TransportError>,
    pub actions_forwarded: u64,
    pub frames_dropped: u64,
    pub fragments_sent: u64,
}

enum ReadEnd {
    PeerClosed,
    SessionGone,
    Failed(TransportError),
}

enum WriteEnd {
    Closed(CloseReason),
    Failed(TransportError),
}

pub struct ConnectionActor<A: Application> {
    registry: Registry<A>,
    report: ConnectionReport,
}

impl<A: Application> ConnectionActor<A> {
    pub fn new(registry: Registry<A>) -> Self {
        Self::with_id(registry, ConnectionId::new())
    }

    pub fn with_id(registry: Registry<A>, id: ConnectionId) -> Self {
        Self {
            registry,
            report: ConnectionReport {
                id,
                session: None,
                state: ConnectionState::Connecting,
                close_reason: None,
                transport_error: None,
                actions_forwarded: 0,
                frames_dropped: 0,
                fragments_sent: 0,
            },
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.report.id
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::trace!(
            connection = %self.report.id,
            from = ?self.report.state,
            to = ?next,
            "connection state"
        );
        self.report.state = next;
    }

    /// Drives the connection until it is closed and returns what happened.
    pub async fn run<T: Transport>(
        mut self,
        binding: SessionBinding,
        mut transport: T,
    ) -> ConnectionReport {
        let session_id = match self.bind(binding, &mut transport).await {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(connection = %self.report.id, %err, "session binding failed");
                self.close_transport(&mut transport, CloseReason::BindingFailed).await;
                self.transition(ConnectionState::Closed);
                return self.report;
            }
        };
        self.report.session = Some(session_id.clone());

        let capacity = self.registry.config().outbox_capacity;
        let (handle, mut outbox) = ConnectionHandle::new(self.report.id.clone(), capacity);
        let session = match self.registry.attach(&session_id, handle) {
            Ok(session) => session,
            Err(err) => {
                let reason = match err {
                    AttachError::SessionNotLive(_) => CloseReason::SessionNotLive,
                    AttachError::RegistryClosed => CloseReason::ServerShutdown,
                    AttachError::SessionUnavailable(_) => CloseReason::Evicted,
                };
                tracing::info!(
                    connection = %self.report.id,
                    session = %session_id,
                    %err,
                    "attach refused"
                );
                self.close_transport(&mut transport, reason).await;
                self.transition(ConnectionState::Closed);
                return self.report;
            }
        };
        self.transition(ConnectionState::Attached);
        tracing::info!(connection = %self.report.id, session = %session_id, "connection attached");

        let connection_id = self.report.id.clone();
        let (mut sink, mut stream) = transport.split();
        let outcome = {
            let report = &mut self.report;
            let pending = Arc::new(Semaphore::new(self.registry.config().max_pending_actions));
            let read = pin!(read_loop(
                &mut stream,
                &session,
                &connection_id,
                &pending,
                &mut report.actions_forwarded,
                &mut report.frames_dropped,
            ));
            let write = pin!(write_loop(&mut sink, &mut outbox));
            match future::select(read, write).await {
                Either::Left((end, _)) => Either::Left(end),
                Either::Right((end, _)) => Either::Right(end),
            }
        };
        self.transition(ConnectionState::Closing);

        match outcome {
            Either::Left(ReadEnd::PeerClosed) => {
                tracing::debug!(connection = %self.report.id, "peer closed");
                let _ = sink.close().await;
            }
            Either::Left(ReadEnd::SessionGone) => {
                self.report.close_reason = Some(CloseReason::Evicted);
                let _ = sink.send(WireMessage::Close(CloseReason::Evicted)).await;
            }
            Either::Left(ReadEnd::Failed(err)) | Either::Right(WriteEnd::Failed(err)) => {
                tracing::debug!(connection = %self.report.id, %err, "transport failed");
                self.report.transport_error = Some(err);
            }
            Either::Right(WriteEnd::Closed(reason)) => {
                tracing::debug!(connection = %self.report.id, %reason, "closed by server");
                self.report.close_reason = Some(reason);
            }
        }
        self.report.fragments_sent = outbox.sent;

        self.registry.detach(&session_id, &self.report.id);
        self.transition(ConnectionState::Closed);
        tracing::info!(
            connection = %self.report.id,
            session = %session_id,
            forwarded = self.report.actions_forwarded,
            dropped = self.report.frames_dropped,
            "connection closed"
        );
        self.report
    }

    async fn bind<T: Transport>(
        &self,
        binding: SessionBinding,
        transport: &mut T,
    ) -> Result<SessionId, BindingError> {
        match binding {
            SessionBinding::Path(id) => Ok(id),
            SessionBinding::Handshake => {
                let wait = self.registry.config().handshake_timeout();
                match timeout(wait, transport.next()).await {
                    Ok(Some(Ok(frame))) => SessionBinding::parse_handshake(&frame),
                    Ok(Some(Err(_))) | Ok(None) | Err(_) => Err(BindingError::MissingHandshake),
                }
            }
        }
    }

    async fn close_transport<T: Transport>(&mut self, transport: &mut T, reason: CloseReason) {
        self.report.close_reason = Some(reason);
        if let Err(err) = transport.send(WireMessage::Close(reason)).await {
            tracing::trace!(connection = %self.report.id, %err, "could not send close");
        }
    }
}

async fn read_loop<S>(
    stream: &mut S,
    session: &SessionRef,
    connection: &ConnectionId,
    pending: &Arc<Semaphore>,
    forwarded: &mut u64,
    dropped: &mut u64,
) -> ReadEnd
where
    S: Stream<Item = Result<String, TransportError>> + Unpin,
{
    while let Some(item) = stream.next().await {
        let text = match item {
            Ok(text) => text,
            Err(TransportError::Closed) => return ReadEnd::PeerClosed,
            Err(err) => return ReadEnd::Failed(err),
        };
        match decode_action(&text) {
            Ok(frame) => {
                if session
                    .submit_paced(frame, connection.clone(), pending)
                    .await
                    .is_err()
                {
                    return ReadEnd::SessionGone;
                }
                *forwarded += 1;
            }
            Err(err) => {
                // Malformed client input is not fatal.
                tracing::warn!(%connection, %err, "dropping undecodable frame");
                *dropped += 1;
            }
        }
    }
    ReadEnd::PeerClosed
}

async fn write_loop<S>(sink: &mut S, outbox: &mut ConnectionOutbox) -> WriteEnd
where
    S: Sink<WireMessage, Error = TransportError> + Unpin,
{
    loop {
        let next = {
            let frame = pin!(outbox.frames.recv());
            let closed = pin!(outbox.closer.closed());
            // Left is polled first, so queued fragments go out before a close.
            match future::select(frame, closed).await {
                Either::Left((frame, _)) => Either::Left(frame),
                Either::Right((reason, _)) => Either::Right(reason),
            }
        };
        match next {
            Either::Left(Some(fragment)) => {
                if let Err(err) = sink.send(WireMessage::Text(fragment.encode())).await {
                    return WriteEnd::Failed(err);
                }
                outbox.sent += 1;
            }
            // The session dropped this connection without saying why.
            Either::Left(None) => {
                let reason = outbox.closer.reason().unwrap_or(CloseReason::Evicted);
                return finish(sink, reason).await;
            }
            Either::Right(reason) => {
                while let Some(fragment) = outbox.try_next() {
                    if let Err(err) = sink.send(WireMessage::Text(fragment.encode())).await {
                        return WriteEnd::Failed(err);
                    }
                    outbox.sent += 1;
                }
                return finish(sink, reason).await;
            }
        }
    }
}

async fn finish<S>(sink: &mut S, reason: CloseReason) -> WriteEnd
where
    S: Sink<WireMessage, Error = TransportError> + Unpin,
{
    match sink.send(WireMessage::Close(reason)).await {
        Ok(()) => WriteEnd::Closed(reason),
        Err(err) => WriteEnd::Failed(err),
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
