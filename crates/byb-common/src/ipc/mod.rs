//! Shared-memory IPC: a single-writer log plus the publisher that offers
//! encoded payloads onto it.
//!
//! The transport is deliberately small: a file-backed ring with an
//! offer/poll contract. Offers may be refused with `BackPressured` (the
//! attached consumer has not caught up) or `NotConnected` (no consumer
//! attached yet); the publisher retries both a bounded number of times.

mod log;
mod publisher;

pub use log::{Offer, SharedLog};
pub use publisher::{IpcPublisher, IpcPublisherConfig};

use thiserror::Error;

/// IPC setup and transport failures.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("log io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a log file: {0}")]
    InvalidLog(String),

    #[error("publication unavailable after {0} attempts")]
    Unavailable(u32),
}
