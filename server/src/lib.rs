//! WebSocket server for fragcast sessions.
//!
//! Wraps a [`fragcast_session::Registry`] in an axum router: every upgraded
//! socket becomes one [`fragcast_session::ConnectionActor`].

mod config;
mod server;
mod ws;

pub use config::ServerConfig;
pub use server::{build_router, serve, serve_with, start, ServerError, ServerHandle};
pub use ws::transport;
