//! # fragcast-session
//!
//! Session core for server-pushed UI fragments.
//!
//! A server owns the authoritative state of each session. Clients attach over a
//! persistent duplex transport, receive a rendered HTML fragment after every
//! state change, and send actions back:
//!
//! - **[`codec`]** - the two textual frame shapes on the wire
//! - **[`Registry`]** - session id → session entry, attach/detach, liveness, eviction
//! - **[`ConnectionActor`]** - one per transport: read loop + write loop
//! - **[`SessionRef`]** - handle to the single-writer actor owning a session's state
//! - **[`DispatchTable`]** - `(state tag, action)` → pure handler
//!
//! ## Quick Start
//!
//! ```ignore
//! use fragcast_session::{Application, DispatchTable, Fragment, Outcome, Registry, SessionConfig};
//!
//! #[derive(Default)]
//! struct Counter;
//!
//! impl Application for Counter {
//!     type State = u64;
//!
//!     fn state_tag(&self, _state: &u64) -> &'static str {
//!         "counting"
//!     }
//!
//!     fn dispatch_table(&self) -> DispatchTable<u64> {
//!         DispatchTable::new().on("counting", "bump", |n, _| Ok((n + 1, Outcome::Continue)))
//!     }
//!
//!     fn render(&self, _id: &SessionId, n: &u64) -> Fragment {
//!         Fragment::new(format!("<b>{n}</b>"))
//!     }
//! }
//!
//! let registry = Registry::new(Counter, SessionConfig::default());
//! // hand `registry.clone()` to whatever accepts connections
//! let report = ConnectionActor::new(registry.clone())
//!     .run(SessionBinding::Path(id), transport)
//!     .await;
//! ```
//!
//! ## Guarantees
//!
//! - Actions for one session are applied one at a time, in mailbox order.
//! - Unknown or invalid actions are ignored silently; nothing is broadcast.
//! - A decode error drops the frame, never the connection.
//! - Ending a session refuses new attaches and closes existing connections
//!   after the final fragment has been delivered.

pub mod codec;
mod config;
mod connection;
mod dispatch;
pub mod error;
mod ids;
mod outbox;
mod registry;
mod session;
mod transport;

#[cfg(test)]
mod test_app;

pub use codec::{
    decode_action, decode_fragment, encode_action, encode_fragment, ActionFrame, Attributes,
    Fragment,
};
pub use config::SessionConfig;
pub use connection::{ConnectionActor, ConnectionReport, ConnectionState, SessionBinding};
pub use dispatch::{Application, DispatchTable, Handler, HandlerResult, Outcome, StateTag};
pub use error::{
    AttachError, BindingError, ConfigError, DecodeError, InvalidAction, SessionError,
    TransportError,
};
pub use ids::{ConnectionId, SessionId};
pub use outbox::{CloseReason, Closer, ConnectionHandle, ConnectionOutbox, Delivery};
pub use registry::Registry;
pub use session::{Applied, Ignored, Phase, SessionRef, SessionReply, SessionRequest, Snapshot};
pub use transport::{ChannelPeer, ChannelTransport, Transport, WireMessage};
