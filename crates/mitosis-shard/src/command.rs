//! Commands the control plane sends to shards, and their replies.
//!
//! Both sides are plain serde types so a transport can ship them as JSON.

use serde::{Deserialize, Serialize};

use mitosis_catalog::{Namespace, RangeDeletionTask};

/// A command addressed to one shard host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ShardCommand {
    /// Reload the shard's routing cache entry for `nss`.
    FlushRoutingTableCacheUpdates {
        nss: Namespace,
        /// Pull the table from the catalog rather than trusting the local copy.
        sync_from_config: bool,
    },
    /// Names of the physical collections in `db`.
    ListCollections { db: String },
    /// Drop one physical collection.
    Drop { db: String, collection: String },
    /// Insert a batch of tasks into the range deletion collection.
    InsertRangeDeletions { tasks: Vec<RangeDeletionTask> },
}

impl ShardCommand {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ShardCommand::FlushRoutingTableCacheUpdates { .. } => "_flushRoutingTableCacheUpdates",
            ShardCommand::ListCollections { .. } => "listCollections",
            ShardCommand::Drop { .. } => "drop",
            ShardCommand::InsertRangeDeletions { .. } => "insert",
        }
    }
}

/// Reply to a [`ShardCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ShardReply {
    Ok,
    Collections { names: Vec<String> },
    Dropped(DropOutcome),
    Inserted { count: usize },
}

/// Error codes a shard can attach to a command reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NamespaceNotFound,
    IllegalOperation,
    InternalError,
}

/// Command-level failure reported inside an otherwise delivered reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
}

/// Result of a `drop`: the two error channels are reported separately,
/// since a write-concern failure can accompany either outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_concern_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_error: Option<CommandError>,
}

impl DropOutcome {
    pub fn dropped() -> Self {
        Self::default()
    }

    pub fn namespace_not_found(nss: &Namespace) -> Self {
        Self {
            write_concern_error: None,
            command_error: Some(CommandError {
                code: ErrorCode::NamespaceNotFound,
                message: format!("ns not found: {nss}"),
            }),
        }
    }
}
