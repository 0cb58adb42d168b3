//! Session actor: the single writer of one session's state.
//!
//! Everything that touches a session (actions, attach/detach, end, snapshot
//! requests) goes through one unbounded FIFO mailbox, so mutations are applied
//! strictly in the order they were enqueued and never overlap. Connections
//! bound their own share of it with [`SessionRef::submit_paced`].
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use fragcast_rt::tasks::{
    self as rt, mpsc, oneshot, timeout, CancellationToken, Instant, OwnedSemaphorePermit, Semaphore,
};

use crate::codec::{ActionFrame, Fragment};
use crate::config::SessionConfig;
use crate::dispatch::{Application, DispatchTable, Outcome, StateTag};
use crate::error::{InvalidAction, SessionError};
use crate::ids::{ConnectionId, SessionId};
use crate::outbox::{CloseReason, ConnectionHandle, Delivery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Live,
    Ended,
}

/// Point-in-time view of a session, answered from inside the actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SessionId,
    pub phase: Phase,
    pub tag: StateTag,
    pub fragment: Fragment,
    pub connections: usize,
    /// Number of actions applied so far.
    pub applied: u64,
}

/// Result of applying one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Rendered { fragment: Fragment, outcome: Outcome },
    Ignored(Ignored),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ignored {
    Ended,
    UnknownAction { tag: StateTag },
    Invalid(InvalidAction),
    Panicked,
}

pub enum SessionRequest {
    Snapshot,
}

pub enum SessionReply {
    Snapshot(Snapshot),
}

pub enum SessionMessage {
    Action {
        frame: ActionFrame,
        sender: ConnectionId,
        /// Released once the action has been applied or ignored.
        permit: Option<OwnedSemaphorePermit>,
    },
    Attach(ConnectionHandle),
    Detach(ConnectionId),
    /// Administrative end, queued behind pending actions.
    End,
    /// Close every attached connection and stop accepting actions.
    Terminate(CloseReason),
    /// Close every attached connection and stop the actor.
    Stop(CloseReason),
}

pub enum SessionInMsg {
    Request {
        sender: oneshot::Sender<SessionReply>,
        message: SessionRequest,
    },
    Message {
        message: SessionMessage,
    },
}

enum MessageResponse {
    NoReply,
    Stop,
}

/// Notified when a session ends on its own.
pub(crate) trait SessionObserver: Send + Sync {
    fn session_ended(&self, id: &SessionId);
}

/// Handle to a running session actor.
#[derive(Clone)]
pub struct SessionRef {
    id: SessionId,
    tx: mpsc::UnboundedSender<SessionInMsg>,
    cancellation_token: CancellationToken,
    request_timeout: Duration,
}

impl fmt::Debug for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRef")
            .field("id", &self.id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl SessionRef {
    pub(crate) fn spawn<A: Application>(
        id: SessionId,
        app: Arc<A>,
        table: Arc<DispatchTable<A::State>>,
        config: &SessionConfig,
        observer: Weak<dyn SessionObserver>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SessionInMsg>();
        let handle = SessionRef {
            id: id.clone(),
            tx,
            cancellation_token: CancellationToken::new(),
            request_timeout: config.request_timeout(),
        };
        let actor = SessionActor {
            state: A::State::default(),
            id,
            app,
            table,
            phase: Phase::Live,
            connections: HashMap::new(),
            observer,
            push_on_attach: config.push_on_attach,
            slow_dispatch: config.slow_dispatch(),
            applied: 0,
        };
        let token = handle.cancellation_token.clone();
        // Ignore the JoinHandle; the cancellation token reports when the actor is gone.
        let _join_handle = rt::spawn(async move {
            actor.run(&mut rx).await;
            // Close the mailbox before reporting the actor as gone.
            drop(rx);
            token.cancel();
        });
        handle
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Enqueues an action. Fails only if the actor has stopped.
    pub fn submit(&self, frame: ActionFrame, sender: ConnectionId) -> Result<(), SessionError> {
        self.send(SessionMessage::Action {
            frame,
            sender,
            permit: None,
        })
    }

    /// Like [`submit`](Self::submit), but first waits for a slot in `pending`.
    /// The slot is held until the actor is done with the action, so a client
    /// can never have more than the semaphore's permits in flight.
    pub async fn submit_paced(
        &self,
        frame: ActionFrame,
        sender: ConnectionId,
        pending: &Arc<Semaphore>,
    ) -> Result<(), SessionError> {
        let permit = pending
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SessionError::Stopped)?;
        self.send(SessionMessage::Action {
            frame,
            sender,
            permit: Some(permit),
        })
    }

    /// Asks the session to end once the actions queued before this call are applied.
    pub fn end(&self) -> Result<(), SessionError> {
        self.send(SessionMessage::End)
    }

    pub async fn snapshot(&self) -> Result<Snapshot, SessionError> {
        match self.request(SessionRequest::Snapshot).await? {
            SessionReply::Snapshot(snapshot) => Ok(snapshot),
        }
    }

    pub async fn request(&self, message: SessionRequest) -> Result<SessionReply, SessionError> {
        let (oneshot_tx, oneshot_rx) = oneshot::channel::<SessionReply>();
        self.tx.send(SessionInMsg::Request {
            sender: oneshot_tx,
            message,
        })?;

        match timeout(self.request_timeout, oneshot_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(SessionError::Stopped),
            Err(_) => Err(SessionError::RequestTimeout),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Cancelled once the actor has exited.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub(crate) fn attach(&self, connection: ConnectionHandle) -> Result<(), SessionError> {
        self.send(SessionMessage::Attach(connection))
    }

    pub(crate) fn detach(&self, connection: ConnectionId) -> Result<(), SessionError> {
        self.send(SessionMessage::Detach(connection))
    }

    pub(crate) fn terminate(&self, reason: CloseReason) -> Result<(), SessionError> {
        self.send(SessionMessage::Terminate(reason))
    }

    pub(crate) fn stop(&self, reason: CloseReason) -> Result<(), SessionError> {
        self.send(SessionMessage::Stop(reason))
    }

    fn send(&self, message: SessionMessage) -> Result<(), SessionError> {
        self.tx
            .send(SessionInMsg::Message { message })
            .map_err(|_error| SessionError::Stopped)
    }
}

struct SessionActor<A: Application> {
    id: SessionId,
    app: Arc<A>,
    table: Arc<DispatchTable<A::State>>,
    state: A::State,
    phase: Phase,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    observer: Weak<dyn SessionObserver>,
    push_on_attach: bool,
    slow_dispatch: Duration,
    applied: u64,
}

impl<A: Application> SessionActor<A> {
    async fn run(mut self, rx: &mut mpsc::UnboundedReceiver<SessionInMsg>) {
        tracing::debug!(session = %self.id, "session started");
        loop {
            if !self.receive(rx).await {
                break;
            }
        }
        self.teardown();
    }

    async fn receive(&mut self, rx: &mut mpsc::UnboundedReceiver<SessionInMsg>) -> bool {
        match rx.recv().await {
            Some(SessionInMsg::Request { sender, message }) => {
                let reply = self.handle_request(message);
                if sender.send(reply).is_err() {
                    tracing::trace!(session = %self.id, "requester went away before the reply");
                }
                true
            }
            Some(SessionInMsg::Message { message }) => match self.handle_message(message) {
                MessageResponse::NoReply => true,
                MessageResponse::Stop => false,
            },
            // Every handle is gone; nobody can reach this session any more.
            None => false,
        }
    }

    fn handle_request(&mut self, message: SessionRequest) -> SessionReply {
        match message {
            SessionRequest::Snapshot => SessionReply::Snapshot(Snapshot {
                id: self.id.clone(),
                phase: self.phase,
                tag: self.app.state_tag(&self.state),
                fragment: self.render_current().unwrap_or_default(),
                connections: self.connections.len(),
                applied: self.applied,
            }),
        }
    }

    fn handle_message(&mut self, message: SessionMessage) -> MessageResponse {
        match message {
            SessionMessage::Action {
                frame,
                sender,
                permit: _permit,
            } => {
                match self.apply(&frame, &sender) {
                    Applied::Rendered { fragment, outcome } => {
                        self.broadcast(&fragment);
                        if outcome == Outcome::End {
                            self.enter_ended();
                        }
                    }
                    Applied::Ignored(Ignored::Ended) => {
                        tracing::warn!(
                            session = %self.id,
                            connection = %sender,
                            action = %frame.action,
                            "dropping action for ended session"
                        );
                    }
                    Applied::Ignored(reason) => {
                        tracing::debug!(
                            session = %self.id,
                            connection = %sender,
                            action = %frame.action,
                            ?reason,
                            "action ignored"
                        );
                    }
                }
                MessageResponse::NoReply
            }
            SessionMessage::Attach(connection) => {
                self.attach(connection);
                MessageResponse::NoReply
            }
            SessionMessage::Detach(connection) => {
                if self.connections.remove(&connection).is_some() {
                    tracing::debug!(session = %self.id, %connection, "connection detached");
                }
                MessageResponse::NoReply
            }
            SessionMessage::End => {
                if self.phase == Phase::Live {
                    if let Some(fragment) = self.render_current() {
                        self.broadcast(&fragment);
                    }
                    self.enter_ended();
                }
                MessageResponse::NoReply
            }
            SessionMessage::Terminate(reason) => {
                self.phase = Phase::Ended;
                self.close_all(reason);
                MessageResponse::NoReply
            }
            SessionMessage::Stop(reason) => {
                self.close_all(reason);
                MessageResponse::Stop
            }
        }
    }

    /// Applies one action against the current state. Only called from the
    /// mailbox loop, which is what keeps at most one mutation in flight.
    fn apply(&mut self, frame: &ActionFrame, sender: &ConnectionId) -> Applied {
        if self.phase == Phase::Ended {
            return Applied::Ignored(Ignored::Ended);
        }
        let tag = self.app.state_tag(&self.state);
        let Some(handler) = self.table.resolve(tag, &frame.action) else {
            return Applied::Ignored(Ignored::UnknownAction { tag });
        };

        let started = Instant::now();
        let (app, id, state) = (&self.app, &self.id, &self.state);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            handler(state, &frame.attributes).map(|(next, outcome)| {
                let fragment = app.render(id, &next);
                (next, outcome, fragment)
            })
        }));
        let elapsed = started.elapsed();
        if elapsed > self.slow_dispatch {
            tracing::warn!(
                session = %self.id,
                action = %frame.action,
                ?elapsed,
                "slow action handler"
            );
        }

        match result {
            Ok(Ok((next, outcome, fragment))) => {
                self.state = next;
                self.applied += 1;
                tracing::trace!(session = %self.id, connection = %sender, action = %frame.action, "action applied");
                Applied::Rendered { fragment, outcome }
            }
            Ok(Err(invalid)) => Applied::Ignored(Ignored::Invalid(invalid)),
            Err(panic) => {
                // State was never replaced, so nothing to roll back.
                tracing::error!(
                    session = %self.id,
                    action = %frame.action,
                    panic = panic_message(panic.as_ref()),
                    "action handler panicked"
                );
                Applied::Ignored(Ignored::Panicked)
            }
        }
    }

    fn attach(&mut self, connection: ConnectionHandle) {
        if self.phase == Phase::Ended {
            connection.close(CloseReason::SessionEnded);
            return;
        }
        if self.push_on_attach {
            if let Some(fragment) = self.render_current() {
                if connection.deliver(fragment) != Delivery::Queued {
                    return;
                }
            }
        }
        tracing::debug!(session = %self.id, connection = %connection.id(), "connection attached");
        self.connections.insert(connection.id().clone(), connection);
    }

    fn render_current(&self) -> Option<Fragment> {
        let (app, id, state) = (&self.app, &self.id, &self.state);
        match panic::catch_unwind(AssertUnwindSafe(|| app.render(id, state))) {
            Ok(fragment) => Some(fragment),
            Err(panic) => {
                tracing::error!(
                    session = %self.id,
                    panic = panic_message(panic.as_ref()),
                    "render panicked"
                );
                None
            }
        }
    }

    fn broadcast(&mut self, fragment: &Fragment) {
        let mut dropped = Vec::new();
        for (id, connection) in &self.connections {
            match connection.deliver(fragment.clone()) {
                Delivery::Queued => {}
                Delivery::Lagging => {
                    tracing::warn!(session = %self.id, connection = %id, "outbox full, disconnecting slow consumer");
                    dropped.push(id.clone());
                }
                Delivery::Gone => dropped.push(id.clone()),
            }
        }
        for id in dropped {
            self.connections.remove(&id);
        }
    }

    fn enter_ended(&mut self) {
        self.phase = Phase::Ended;
        tracing::info!(session = %self.id, applied = self.applied, "session ended");
        if let Some(observer) = self.observer.upgrade() {
            observer.session_ended(&self.id);
        }
        self.close_all(CloseReason::SessionEnded);
    }

    fn close_all(&mut self, reason: CloseReason) {
        for (_, connection) in self.connections.drain() {
            connection.close(reason);
        }
    }

    fn teardown(&mut self) {
        self.close_all(CloseReason::Evicted);
        tracing::debug!(session = %self.id, "session stopped");
    }
}

/// Text of a `panic!` payload, for logging.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
