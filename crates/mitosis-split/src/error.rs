//! Split-shard error types.
//!
//! Every surfaced failure carries the phase it happened in and, when a
//! specific shard was involved, that shard's id.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mitosis_catalog::{CatalogError, ShardId};
use mitosis_shard::ShardError;

/// Step of a split run a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPhase {
    Preconditions,
    Partition,
    Commit,
    ResolveShards,
    MarkOrphans,
    ReconcileCollections,
}

impl fmt::Display for SplitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SplitPhase::Preconditions => "preconditions",
            SplitPhase::Partition => "partition",
            SplitPhase::Commit => "commit",
            SplitPhase::ResolveShards => "resolve_shards",
            SplitPhase::MarkOrphans => "mark_orphans",
            SplitPhase::ReconcileCollections => "reconcile_collections",
        };
        f.write_str(name)
    }
}

/// What went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitErrorKind {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("metadata conflict: {0}")]
    MetadataConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("shard not found: {0}")]
    ShardNotFound(String),

    #[error("shard unreachable: {0}")]
    ShardUnreachable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("write concern failed: {0}")]
    WriteConcernFailure(String),

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    #[error("catalog error: {0}")]
    Catalog(String),
}

impl SplitErrorKind {
    /// Stable machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SplitErrorKind::Unauthorized(_) => "Unauthorized",
            SplitErrorKind::UnsupportedConfiguration(_) => "UnsupportedConfiguration",
            SplitErrorKind::MetadataConflict(_) => "MetadataConflict",
            SplitErrorKind::NotFound(_) => "NotFound",
            SplitErrorKind::ShardNotFound(_) => "ShardNotFound",
            SplitErrorKind::ShardUnreachable(_) => "ShardUnreachable",
            SplitErrorKind::Timeout(_) => "Timeout",
            SplitErrorKind::WriteConcernFailure(_) => "WriteConcernFailure",
            SplitErrorKind::CommandFailed(_) => "CommandFailed",
            SplitErrorKind::Cancelled => "Cancelled",
            SplitErrorKind::DeadlineExceeded => "DeadlineExceeded",
            SplitErrorKind::Catalog(_) => "Catalog",
        }
    }
}

impl From<CatalogError> for SplitErrorKind {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Conflict(msg) => SplitErrorKind::MetadataConflict(msg),
            CatalogError::NotFound(msg) => SplitErrorKind::NotFound(msg),
            other => SplitErrorKind::Catalog(other.to_string()),
        }
    }
}

impl From<ShardError> for SplitErrorKind {
    fn from(err: ShardError) -> Self {
        match err {
            ShardError::Unreachable { .. } => SplitErrorKind::ShardUnreachable(err.to_string()),
            ShardError::Timeout { .. } => SplitErrorKind::Timeout(err.to_string()),
            ShardError::Catalog(inner) => inner.into(),
            other => SplitErrorKind::CommandFailed(other.to_string()),
        }
    }
}

/// A failed split run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("split failed in {phase}{}: {kind}", on_shard(.shard))]
pub struct SplitError {
    pub phase: SplitPhase,
    pub shard: Option<ShardId>,
    pub kind: SplitErrorKind,
}

impl SplitError {
    pub fn new(phase: SplitPhase, kind: SplitErrorKind) -> Self {
        Self {
            phase,
            shard: None,
            kind,
        }
    }

    /// Attribute the failure to `shard`.
    pub fn on_shard(mut self, shard: &str) -> Self {
        self.shard = Some(shard.to_string());
        self
    }

    pub fn catalog(phase: SplitPhase, err: CatalogError) -> Self {
        Self::new(phase, err.into())
    }

    pub fn shard(phase: SplitPhase, shard: &str, err: ShardError) -> Self {
        Self::new(phase, err.into()).on_shard(shard)
    }
}

fn on_shard(shard: &Option<ShardId>) -> String {
    match shard {
        Some(id) => format!(" on shard {id}"),
        None => String::new(),
    }
}

/// Result type alias for split operations.
pub type SplitResult<T> = Result<T, SplitError>;
