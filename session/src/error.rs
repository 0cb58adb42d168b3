use crate::ids::SessionId;

/// An inbound frame that could not be turned into an action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame has no action name")]
    EmptyAction,
    #[error("invalid action name '{0}'")]
    InvalidActionName(String),
    #[error("malformed attributes: {0}")]
    MalformedAttributes(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachError {
    #[error("session '{0}' has ended")]
    SessionNotLive(SessionId),
    #[error("session '{0}' is unavailable")]
    SessionUnavailable(SessionId),
    #[error("registry is shut down")]
    RegistryClosed,
}

/// Handler preconditions not met. Never surfaced to clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidAction {
    #[error("missing attribute '{0}'")]
    MissingAttribute(String),
    #[error("invalid value '{value}' for attribute '{key}'")]
    InvalidAttribute { key: String, value: String },
    #[error("rejected: {0}")]
    Rejected(String),
}

impl InvalidAction {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transport failure: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session actor has stopped")]
    Stopped,
    #[error("session request timed out")]
    RequestTimeout,
}

impl<T> From<fragcast_rt::tasks::mpsc::SendError<T>> for SessionError {
    fn from(_value: fragcast_rt::tasks::mpsc::SendError<T>) -> Self {
        Self::Stopped
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("connection closed before the session handshake")]
    MissingHandshake,
    #[error("malformed session handshake '{0}'")]
    MalformedHandshake(String),
    #[error("empty session id")]
    EmptySessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}
