//! Task-based runtime primitives.

mod tokio;

use std::future::Future;

use crate::tracing::{init_tracing, LogFormat};

pub use crate::tasks::tokio::mpsc;
pub use crate::tasks::tokio::oneshot;
pub use crate::tasks::tokio::{
    ctrl_c, interval, sleep, spawn, timeout, CancellationToken, Instant, JoinHandle,
    MissedTickBehavior, OwnedSemaphorePermit, Runtime, Semaphore, TcpListener,
};

/// Builds a multi-threaded runtime, installs the global subscriber in the
/// given format and drives `future` to completion.
pub fn run<F: Future>(format: LogFormat, future: F) -> std::io::Result<F::Output> {
    init_tracing(format);

    let rt = Runtime::new()?;
    Ok(rt.block_on(future))
}
