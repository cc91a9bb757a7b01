//! Error types for replica configuration

use thiserror::Error;

/// Errors raised while loading a [`crate::ReplicaConfig`]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Logs an invariant violation and aborts the caller.
///
/// Used where continuing would corrupt state, such as a batch that fits no
/// execution path.
#[track_caller]
pub(crate) fn fatal(msg: impl std::fmt::Display) -> ! {
    tracing::error!("{}", msg);
    panic!("{}", msg)
}
