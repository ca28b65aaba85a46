//! Error types for drvsync.
//!
//! Guard refusals, timeouts and cancellations are ordinary outcomes of the
//! coordination primitives; they only become errors at the [`Subsystem`]
//! entry points, where a caller asked for a value and did not get one.
//! Invariant violations are never represented here: they panic.
//!
//! [`Subsystem`]: crate::subsystem::Subsystem

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the subsystem entry points and task lifecycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The guard refused admission. Recoverable: retry later.
    #[error("resource busy: {role} could not acquire the guard")]
    ResourceBusy { role: String },

    /// A caller-supplied deadline elapsed before the channel was signaled.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The owning task was asked to stop while the caller was waiting.
    #[error("wait cancelled by stop request")]
    Cancelled,

    /// The OS refused to create the task's thread.
    #[error("failed to spawn task {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The task body panicked; any guard it held was released on unwind.
    #[error("task {0} panicked")]
    TaskPanicked(String),

    /// A subsystem could not be built from its configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Whether the caller's retry loop is expected to absorb this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ResourceBusy { .. } | Self::TimedOut(_))
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A value parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result alias defaulting to [`SyncError`].
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
