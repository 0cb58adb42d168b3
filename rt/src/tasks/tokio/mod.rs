//! Tokio.rs reexports to prevent tokio dependencies within external code
pub mod mpsc;
pub mod oneshot;

pub use tokio::{
    net::TcpListener,
    runtime::Runtime,
    signal::ctrl_c,
    sync::{OwnedSemaphorePermit, Semaphore},
    task::{spawn, JoinHandle},
    time::{interval, sleep, timeout, Instant, MissedTickBehavior},
};
pub use tokio_util::sync::CancellationToken;
