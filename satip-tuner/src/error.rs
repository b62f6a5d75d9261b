//! Error types for the tuner client.

use thiserror::Error;

use satip_protocol::{ProtocolError, MAX_PID};

/// Errors returned synchronously to callers of the tuner API.
///
/// Network failures never show up here; they are handled on the worker
/// thread and only become visible through the state accessors.
#[derive(Error, Debug)]
pub enum TunerError {
    /// `set_source` was called without a server.
    #[error("No server given")]
    NoServer,

    /// Component id outside the 13-bit range.
    #[error("Invalid pid {0} (valid range: 0-{max})", max = MAX_PID)]
    InvalidPid(i32),

    /// The tuner has been closed.
    #[error("Tuner is closed")]
    Closed,

    /// The tuner worker is already running.
    #[error("Tuner is already open")]
    AlreadyOpen,

    /// Closed, but the previous worker has not finished its last network
    /// call yet. Retry once it has.
    #[error("Tuner worker is still shutting down")]
    Busy,

    /// Worker thread could not be spawned.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Data path sockets could not be set up.
    #[error("Failed to set up data path: {0}")]
    DataPath(#[source] std::io::Error),

    /// Async runtime of the control client could not be built.
    #[error("Failed to create runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Failures fetching a server description.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Invalid description URL {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status code.
    #[error("Description request failed with status {0}")]
    Status(u16),

    #[error("{0}")]
    Description(#[from] ProtocolError),

    #[error("Failed to create runtime: {0}")]
    Runtime(#[source] std::io::Error),
}
