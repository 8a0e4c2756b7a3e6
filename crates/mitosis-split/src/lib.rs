//! mitosis-split: hands half of a shard's data to a new shard.
//!
//! A split reads what the source shard owns, partitions it, commits the new
//! ownership to the catalog and then, optionally, cleans up after itself:
//!
//! ```text
//! SplitOrchestrator
//!   ├─ partition()            ownership split plan (pure)
//!   ├─ CommitCoordinator      chunk + database ownership in the catalog
//!   ├─ OrphanMarker           routing refresh, range deletion tasks  (removeOrphans)
//!   └─ CollectionReconciler   drop orphaned unsharded collections    (dropOrphanedCollections)
//! ```
//!
//! Shards are reached through [`mitosis_shard::ShardProxy`]; the catalog
//! through [`mitosis_catalog::MetadataClient`].

pub mod batch;
pub mod commit;
pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod orphans;
pub mod partition;
pub mod reconcile;
pub mod uuid_index;

pub use batch::{BatchLimits, RangeDeletionBatches};
pub use commit::{CommitCoordinator, CommitOutcome};
pub use config::SplitConfig;
pub use context::{CancelHandle, OperationContext};
pub use error::{SplitError, SplitErrorKind, SplitPhase, SplitResult};
pub use orchestrator::{
    Caller, ClusterRole, NodeCapabilities, SplitOrchestrator, SplitReport, SplitShardRequest,
    SplitState,
};
pub use orphans::{OrphanMarker, OrphanReport};
pub use partition::{OwnershipSplitPlan, partition};
pub use reconcile::{CollectionReconciler, ReconcileReport};
pub use uuid_index::UuidIndex;
