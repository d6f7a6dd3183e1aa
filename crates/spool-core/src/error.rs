use thiserror::Error;

use crate::store::StoreMode;

/// Failure to encode or decode a descriptor's durable blob.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload kind mismatch: expected {expected}, found {found}")]
    KindMismatch {
        expected: &'static str,
        found: String,
    },
}

/// Store errors that indicate an integration bug rather than a runtime condition.
///
/// Capacity, validity and duplicate-id rejections are not errors: they come
/// back as `Ok(false)` / `Ok(None)`. Artifact write/delete failures are logged
/// and never reach the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store has been released")]
    Released,

    #[error("{op} is not supported by a {mode} store")]
    Unsupported { op: &'static str, mode: StoreMode },

    #[error("storage directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor has been shut down")]
    ShutDown,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("blocking store call failed: {0}")]
    Join(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
