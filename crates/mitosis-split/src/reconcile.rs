//! Unsharded collection reconciler.
//!
//! An unsharded collection lives on its database's primary shard. Once the
//! primary changes, the copy on the other shard is orphaned. Both shards
//! may hold such copies after a split, so for every database the source
//! owned, collections physically on the source that the catalog does not
//! track as sharded are dropped from whichever shard is no longer primary.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use mitosis_catalog::{CONFIG_DB, Namespace, ShardEntry, ShardId};
use mitosis_shard::{DropOutcome, ErrorCode, ShardProxy};

use crate::error::{SplitError, SplitErrorKind, SplitPhase, SplitResult};
use crate::partition::OwnershipSplitPlan;
use crate::uuid_index::UuidIndex;

const PHASE: SplitPhase = SplitPhase::ReconcileCollections;

/// Collections dropped, per shard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub dropped: BTreeMap<ShardId, Vec<Namespace>>,
}

impl ReconcileReport {
    pub fn total(&self) -> usize {
        self.dropped.values().map(Vec::len).sum()
    }
}

pub struct CollectionReconciler {
    proxy: ShardProxy,
}

impl CollectionReconciler {
    pub fn new(proxy: ShardProxy) -> Self {
        Self { proxy }
    }

    /// Drop orphaned unsharded collections of every database in `plan`.
    pub async fn reconcile(
        &self,
        plan: &OwnershipSplitPlan,
        source: &ShardEntry,
        new_shard: &ShardEntry,
        index: &UuidIndex,
    ) -> SplitResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for db in plan.all_databases() {
            if db.name == CONFIG_DB {
                continue;
            }
            let target = if plan.database_moves(&db.name) {
                source
            } else {
                new_shard
            };

            let names = self
                .proxy
                .list_collections(source, &db.name)
                .await
                .map_err(|e| SplitError::shard(PHASE, &source.id, e))?;

            for name in names {
                let nss = Namespace::new(&db.name, &name);
                if index.contains(&nss) {
                    continue;
                }
                let outcome = self
                    .proxy
                    .drop_collection(target, &db.name, &name)
                    .await
                    .map_err(|e| SplitError::shard(PHASE, &target.id, e))?;
                if check_drop(&outcome, &nss, target)? {
                    debug!(shard = %target.id, %nss, "dropped orphaned unsharded collection");
                    report.dropped.entry(target.id.clone()).or_default().push(nss);
                }
            }
        }

        info!(
            from_shard = %source.id,
            new_shard = %new_shard.id,
            dropped = report.total(),
            "orphaned unsharded collections reconciled"
        );
        Ok(report)
    }
}

/// `Ok(true)` if the drop removed the collection, `Ok(false)` if it was
/// already gone.
fn check_drop(outcome: &DropOutcome, nss: &Namespace, shard: &ShardEntry) -> SplitResult<bool> {
    if let Some(wce) = &outcome.write_concern_error {
        return Err(SplitError::new(
            PHASE,
            SplitErrorKind::WriteConcernFailure(format!("drop {nss}: {wce}")),
        )
        .on_shard(&shard.id));
    }
    match &outcome.command_error {
        None => Ok(true),
        Some(err) if err.code == ErrorCode::NamespaceNotFound => {
            warn!(shard = %shard.id, %nss, "collection already absent, nothing to drop");
            Ok(false)
        }
        Some(err) => Err(SplitError::new(
            PHASE,
            SplitErrorKind::CommandFailed(format!("drop {nss}: {:?}: {}", err.code, err.message)),
        )
        .on_shard(&shard.id)),
    }
}
