//! Shard communication and shard-local storage errors.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to, or running on, a shard.
#[derive(Debug, Error)]
pub enum ShardError {
    /// The command never reached the shard (connect refused, unknown route).
    #[error("shard host {host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    /// No reply within the per-call deadline. The command may have run.
    #[error("command to shard host {host} timed out after {after:?}")]
    Timeout { host: String, after: Duration },

    /// The shard replied with something other than what the command expects.
    #[error("unexpected reply from shard host {host}: {detail}")]
    Protocol { host: String, detail: String },

    /// The shard ran the command and rejected it.
    #[error("command failed on shard: {0}")]
    Command(String),

    #[error("shard storage error: {0}")]
    Storage(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] mitosis_catalog::CatalogError),
}

/// Result type alias for shard operations.
pub type ShardResult<T> = Result<T, ShardError>;
