//! Error types for the emulation task and its configuration

use std::path::PathBuf;

use crate::channel::PortClosed;
use crate::rendezvous::Abandoned;

/// Errors surfaced by the emulation task
///
/// Protocol misuse (starting twice, sending frames before `start`) is not an error value:
/// it panics, because it can only come from a bug in the caller.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("failed to spawn emulation thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    PortClosed(#[from] PortClosed),

    #[error("emulation thread stopped before completing the request")]
    WorkerGone,

    #[error("emulation thread panicked")]
    WorkerPanicked,
}

impl From<Abandoned> for TaskError {
    fn from(_: Abandoned) -> Self {
        Self::WorkerGone
    }
}

/// Errors loading or saving configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
