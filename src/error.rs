//! Error taxonomy for the protocol.
//!
//! Configuration errors are reported before any socket opens. Protocol and
//! transport errors are fatal for the current batch: callers propagate them
//! to `main` and abort rather than attempting per-operation recovery.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol invariant violation: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
