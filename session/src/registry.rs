//! Process-wide session registry.
//!
//! The registry is an owned value: create one at server start, hand clones to
//! whatever accepts connections, and call [`Registry::shutdown`] on the way
//! out. All bookkeeping sits behind a single lock that is never held across
//! an await point.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use fragcast_rt::tasks::{self as rt, CancellationToken, Instant, JoinHandle, MissedTickBehavior};

use crate::config::SessionConfig;
use crate::dispatch::{Application, DispatchTable};
use crate::error::{AttachError, SessionError};
use crate::ids::{ConnectionId, SessionId};
use crate::outbox::{CloseReason, ConnectionHandle};
use crate::session::{SessionObserver, SessionRef};

struct SessionEntry {
    handle: SessionRef,
    live: bool,
    connections: HashSet<ConnectionId>,
    /// Set while no connection is attached.
    idle_since: Option<Instant>,
}

impl SessionEntry {
    fn evict(self, reason: CloseReason) {
        if self.handle.stop(reason).is_err() {
            tracing::trace!(session = %self.handle.id(), "session actor already gone");
        }
    }
}

#[derive(Default)]
struct Sessions {
    map: HashMap<SessionId, SessionEntry>,
    closed: bool,
}

struct RegistryInner<A: Application> {
    app: Arc<A>,
    table: Arc<DispatchTable<A::State>>,
    config: SessionConfig,
    sessions: RwLock<Sessions>,
}

impl<A: Application> RegistryInner<A> {
    fn read(&self) -> RwLockReadGuard<'_, Sessions> {
        self.sessions.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Sessions> {
        self.sessions.write().unwrap_or_else(|p| p.into_inner())
    }

    fn mark_ended(&self, id: &SessionId) -> bool {
        let mut sessions = self.write();
        let Some(entry) = sessions.map.get_mut(id) else {
            return false;
        };
        let was_live = entry.live;
        entry.live = false;
        if entry.handle.terminate(CloseReason::SessionEnded).is_err() {
            tracing::trace!(session = %id, "session actor already gone");
        }
        if entry.connections.is_empty() {
            if let Some(entry) = sessions.map.remove(id) {
                entry.evict(CloseReason::SessionEnded);
            }
            tracing::debug!(session = %id, "ended session evicted");
        }
        if was_live {
            tracing::info!(session = %id, "session marked ended");
        }
        true
    }
}

impl<A: Application> SessionObserver for RegistryInner<A> {
    fn session_ended(&self, id: &SessionId) {
        self.mark_ended(id);
    }
}

/// Shared handle to the session map. Clones refer to the same registry.
pub struct Registry<A: Application> {
    inner: Arc<RegistryInner<A>>,
}

impl<A: Application> Clone for Registry<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Application> Registry<A> {
    pub fn new(app: A, config: SessionConfig) -> Self {
        let table = app.dispatch_table();
        tracing::debug!(handlers = table.len(), "registry created");
        Self {
            inner: Arc::new(RegistryInner {
                app: Arc::new(app),
                table: Arc::new(table),
                config,
                sessions: RwLock::new(Sessions::default()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn app(&self) -> &A {
        &self.inner.app
    }

    fn spawn_session(&self, id: &SessionId) -> SessionEntry {
        let observer: Weak<dyn SessionObserver> = Arc::downgrade(&self.inner) as Weak<dyn SessionObserver>;
        let handle = SessionRef::spawn(
            id.clone(),
            Arc::clone(&self.inner.app),
            Arc::clone(&self.inner.table),
            &self.inner.config,
            observer,
        );
        tracing::info!(session = %id, "session created");
        SessionEntry {
            handle,
            live: true,
            connections: HashSet::new(),
            idle_since: Some(Instant::now()),
        }
    }

    /// Returns the session for `id`, creating it if this is the first reference.
    pub fn get_or_create(&self, id: &SessionId) -> Result<SessionRef, AttachError> {
        if let Some(entry) = self.inner.read().map.get(id) {
            return Ok(entry.handle.clone());
        }
        let mut sessions = self.inner.write();
        if sessions.closed {
            return Err(AttachError::RegistryClosed);
        }
        // Someone may have created it between the two locks.
        if !sessions.map.contains_key(id) {
            let entry = self.spawn_session(id);
            sessions.map.insert(id.clone(), entry);
        }
        sessions
            .map
            .get(id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| AttachError::SessionUnavailable(id.clone()))
    }

    /// Adds `connection` to the session, creating the session if needed.
    ///
    /// Fails with [`AttachError::SessionNotLive`] for an ended session, in
    /// which case the connection set is left untouched.
    pub fn attach(
        &self,
        id: &SessionId,
        connection: ConnectionHandle,
    ) -> Result<SessionRef, AttachError> {
        let mut sessions = self.inner.write();
        if sessions.closed {
            return Err(AttachError::RegistryClosed);
        }
        if !sessions.map.contains_key(id) {
            let entry = self.spawn_session(id);
            sessions.map.insert(id.clone(), entry);
        }
        let Some(entry) = sessions.map.get_mut(id) else {
            return Err(AttachError::SessionUnavailable(id.clone()));
        };
        if !entry.live {
            return Err(AttachError::SessionNotLive(id.clone()));
        }

        let connection_id = connection.id().clone();
        if entry.handle.attach(connection).is_err() {
            tracing::error!(session = %id, "session actor is gone, dropping entry");
            sessions.map.remove(id);
            return Err(AttachError::SessionUnavailable(id.clone()));
        }
        entry.connections.insert(connection_id.clone());
        entry.idle_since = None;
        tracing::debug!(
            session = %id,
            connection = %connection_id,
            connections = entry.connections.len(),
            "attached"
        );
        Ok(entry.handle.clone())
    }

    /// Removes a connection. An ended session with no connections left is
    /// evicted; a live one is kept for reconnects until it idles out.
    pub fn detach(&self, id: &SessionId, connection: &ConnectionId) {
        let mut sessions = self.inner.write();
        let Some(entry) = sessions.map.get_mut(id) else {
            return;
        };
        if !entry.connections.remove(connection) {
            return;
        }
        if entry.handle.detach(connection.clone()).is_err() {
            tracing::trace!(session = %id, "session actor already gone");
        }
        tracing::debug!(
            session = %id,
            %connection,
            connections = entry.connections.len(),
            "detached"
        );
        if !entry.connections.is_empty() {
            return;
        }
        if entry.live {
            entry.idle_since = Some(Instant::now());
        } else if let Some(entry) = sessions.map.remove(id) {
            tracing::debug!(session = %id, "last connection left ended session, evicting");
            entry.evict(CloseReason::SessionEnded);
        }
    }

    /// Flags the session as ended and closes every attached connection.
    /// Returns `false` if the session is unknown.
    pub fn mark_ended(&self, id: &SessionId) -> bool {
        self.inner.mark_ended(id)
    }

    /// Ends the session after the actions already queued for it.
    pub fn end_session(&self, id: &SessionId) -> Result<(), SessionError> {
        let handle = self
            .inner
            .read()
            .map
            .get(id)
            .map(|entry| entry.handle.clone())
            .ok_or(SessionError::Stopped)?;
        handle.end()
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionRef> {
        self.inner.read().map.get(id).map(|entry| entry.handle.clone())
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.inner.read().map.contains_key(id)
    }

    pub fn is_live(&self, id: &SessionId) -> Option<bool> {
        self.inner.read().map.get(id).map(|entry| entry.live)
    }

    pub fn connection_count(&self, id: &SessionId) -> usize {
        self.inner
            .read()
            .map
            .get(id)
            .map_or(0, |entry| entry.connections.len())
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.inner.read().map.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Evicts every session that has had no connections for at least the
    /// configured idle timeout, live or not. Returns how many were evicted.
    pub fn reap_idle(&self, now: Instant) -> usize {
        let idle_timeout = self.inner.config.idle_timeout();
        let mut sessions = self.inner.write();
        let idle: Vec<SessionId> = sessions
            .map
            .iter()
            .filter(|(_, entry)| {
                entry
                    .idle_since
                    .is_some_and(|since| now.saturating_duration_since(since) >= idle_timeout)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &idle {
            if let Some(entry) = sessions.map.remove(id) {
                tracing::info!(session = %id, "evicting idle session");
                entry.evict(CloseReason::Evicted);
            }
        }
        idle.len()
    }

    /// Periodically calls [`Registry::reap_idle`] until `shutdown` is cancelled.
    pub fn spawn_reaper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        let period = self.inner.config.reap_interval();
        rt::spawn(async move {
            let mut ticker = rt::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let tick = std::pin::pin!(ticker.tick());
                let cancelled = std::pin::pin!(shutdown.cancelled());
                match futures::future::select(cancelled, tick).await {
                    futures::future::Either::Left(_) => break,
                    futures::future::Either::Right(_) => {
                        let evicted = registry.reap_idle(Instant::now());
                        if evicted > 0 {
                            tracing::debug!(evicted, "idle sweep");
                        }
                    }
                }
            }
            tracing::trace!("reaper stopped");
        })
    }

    /// Refuses further attaches and stops every session, closing their
    /// connections with [`CloseReason::ServerShutdown`].
    pub fn shutdown(&self) -> usize {
        let drained: Vec<(SessionId, SessionEntry)> = {
            let mut sessions = self.inner.write();
            sessions.closed = true;
            sessions.map.drain().collect()
        };
        let count = drained.len();
        for (_, entry) in drained {
            entry.evict(CloseReason::ServerShutdown);
        }
        tracing::info!(sessions = count, "registry shut down");
        count
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
