//! Runtime wrapper to keep tokio out of the session and server code. Library
//! crates in this workspace reach the async runtime only through this crate,
//! so swapping the executor means touching a single place.
//!
//! Only the subset of tokio functionality actually used is reexported. Extend
//! it as needed.

pub mod tasks;
mod tracing;

pub use crate::tracing::{init_tracing, try_init_tracing, LogFormat, TracingError};
