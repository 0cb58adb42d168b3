//! Action dispatch keyed by `(state tag, action name)`.
//!
//! Handlers are pure: they read the current state and the action attributes
//! and return the next state. The session actor is the only caller.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::codec::{Attributes, Fragment};
use crate::error::InvalidAction;
use crate::ids::SessionId;

/// Names the phase of an application state for dispatch purposes.
pub type StateTag = &'static str;

/// What a successfully applied handler asks of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// Broadcast the resulting fragment, then end the session.
    End,
}

pub type HandlerResult<S> = Result<(S, Outcome), InvalidAction>;

pub type Handler<S> = Arc<dyn Fn(&S, &Attributes) -> HandlerResult<S> + Send + Sync>;

pub struct DispatchTable<S> {
    handlers: HashMap<StateTag, HashMap<String, Handler<S>>>,
}

impl<S> Default for DispatchTable<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S> fmt::Debug for DispatchTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<(StateTag, Vec<&str>)> = self
            .handlers
            .keys()
            .map(|tag| (*tag, self.actions_for(*tag)))
            .collect();
        entries.sort_by_key(|(tag, _)| *tag);
        f.debug_struct("DispatchTable")
            .field("handlers", &entries)
            .finish()
    }
}

impl<S> DispatchTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `action` while the state carries `tag`.
    /// A later registration for the same pair replaces the earlier one.
    pub fn on<F>(mut self, tag: StateTag, action: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&S, &Attributes) -> HandlerResult<S> + Send + Sync + 'static,
    {
        self.handlers
            .entry(tag)
            .or_default()
            .insert(action.into(), Arc::new(handler));
        self
    }

    /// Registers one handler for `action` under several tags.
    pub fn on_each<F>(mut self, tags: &[StateTag], action: &str, handler: F) -> Self
    where
        F: Fn(&S, &Attributes) -> HandlerResult<S> + Send + Sync + 'static,
    {
        let handler: Handler<S> = Arc::new(handler);
        for tag in tags {
            self.handlers
                .entry(*tag)
                .or_default()
                .insert(action.to_string(), Arc::clone(&handler));
        }
        self
    }

    pub fn resolve(&self, tag: StateTag, action: &str) -> Option<&Handler<S>> {
        self.handlers.get(tag)?.get(action)
    }

    /// Sorted action names legal under `tag`.
    pub fn actions_for(&self, tag: StateTag) -> Vec<&str> {
        let mut actions: Vec<&str> = self
            .handlers
            .get(tag)
            .map(|actions| actions.keys().map(String::as_str).collect())
            .unwrap_or_default();
        actions.sort_unstable();
        actions
    }

    pub fn len(&self) -> usize {
        self.handlers.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Server-side application behind a session: its state, how actions change
/// it, and how it is rendered.
pub trait Application: Send + Sync + 'static {
    type State: Clone + Default + Send + 'static;

    fn state_tag(&self, state: &Self::State) -> StateTag;

    /// Built once per registry and shared by every session.
    fn dispatch_table(&self) -> DispatchTable<Self::State>;

    fn render(&self, session: &SessionId, state: &Self::State) -> Fragment;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bump(state: &u32, _: &Attributes) -> HandlerResult<u32> {
        Ok((state + 1, Outcome::Continue))
    }

    #[test]
    fn resolves_by_tag_and_action() {
        let table = DispatchTable::new()
            .on("open", "bump", bump)
            .on("open", "close", |s: &u32, _: &Attributes| Ok((*s, Outcome::End)));

        assert!(table.resolve("open", "bump").is_some());
        assert!(table.resolve("closed", "bump").is_none());
        assert!(table.resolve("open", "missing").is_none());
        assert_eq!(table.len(), 2);

        let handler = table.resolve("open", "close").unwrap();
        assert_eq!(handler(&4, &Attributes::new()), Ok((4, Outcome::End)));
    }

    #[test]
    fn on_each_shares_handler_across_tags() {
        let table = DispatchTable::new().on_each(&["a", "b"], "bump", bump);
        assert_eq!(table.actions_for("a"), vec!["bump"]);
        assert_eq!(table.actions_for("b"), vec!["bump"]);
        assert!(table.actions_for("c").is_empty());
    }

    #[test]
    fn later_registration_wins() {
        let table = DispatchTable::new()
            .on("open", "bump", bump)
            .on("open", "bump", |s: &u32, _: &Attributes| {
                Ok((s + 10, Outcome::Continue))
            });
        let handler = table.resolve("open", "bump").unwrap();
        assert_eq!(handler(&0, &Attributes::new()), Ok((10, Outcome::Continue)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn handlers_surface_invalid_actions() {
        let table = DispatchTable::new().on("open", "set", |_: &u32, attrs: &Attributes| {
            Ok((attrs.parse::<u32>("value")?, Outcome::Continue))
        });
        let handler = table.resolve("open", "set").unwrap();
        assert_eq!(
            handler(&0, &Attributes::new()),
            Err(InvalidAction::MissingAttribute("value".to_string()))
        );
    }
}
