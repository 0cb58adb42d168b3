use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::BindingError;

/// Client-supplied session token. Cheap to clone.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    /// Surrounding whitespace is trimmed; an empty token is rejected.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, BindingError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(BindingError::EmptySessionId);
        }
        Ok(Self(Arc::from(trimmed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned identity of one transport connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl Default for ConnectionId {
    fn default() -> Self {
        Self(format!("conn-{}", Uuid::new_v4()))
    }
}

impl ConnectionId {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
