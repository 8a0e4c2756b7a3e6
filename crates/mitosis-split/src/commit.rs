//! Ownership commit coordinator: writes the split plan into the catalog.
//!
//! Chunks move in one catalog transaction stamped with a fresh cluster
//! time; each moving database then has its primary rewritten on its own.
//! There is no compensating rollback: a failure after the chunk commit
//! leaves the chunks moved and aborts the run.

use std::sync::Arc;

use tracing::{debug, info};

use mitosis_catalog::{ClusterTimestamp, LogicalClock, MetadataClient};

use crate::error::{SplitError, SplitPhase, SplitResult};
use crate::partition::OwnershipSplitPlan;

/// What the commit changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub timestamp: ClusterTimestamp,
    pub chunks_moved: usize,
    pub databases_moved: usize,
}

pub struct CommitCoordinator {
    catalog: Arc<dyn MetadataClient>,
    clock: Arc<LogicalClock>,
}

impl CommitCoordinator {
    pub fn new(catalog: Arc<dyn MetadataClient>, clock: Arc<LogicalClock>) -> Self {
        Self { catalog, clock }
    }

    /// Hand the plan's moving chunks and databases to `to_shard`.
    pub async fn commit(
        &self,
        plan: &OwnershipSplitPlan,
        from_shard: &str,
        to_shard: &str,
    ) -> SplitResult<CommitOutcome> {
        let timestamp = self.clock.now();

        if !plan.moving_chunks.is_empty() {
            self.catalog
                .commit_chunk_ownership(&plan.moving_chunks, from_shard, to_shard, timestamp)
                .await
                .map_err(|e| SplitError::catalog(SplitPhase::Commit, e))?;
            info!(
                from_shard,
                new_shard = to_shard,
                chunks = plan.moving_chunks.len(),
                %timestamp,
                "committed chunk ownership"
            );
        }

        for db in &plan.moving_databases {
            self.catalog
                .commit_database_primary(&db.name, to_shard)
                .await
                .map_err(|e| SplitError::catalog(SplitPhase::Commit, e))?;
            debug!(db = %db.name, new_shard = to_shard, "moved database primary");
        }

        Ok(CommitOutcome {
            timestamp,
            chunks_moved: plan.moving_chunks.len(),
            databases_moved: plan.moving_databases.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use mitosis_catalog::{CatalogStore, Chunk, ChunkVersion, DatabaseEntry, Namespace};

    use super::*;
    use crate::error::SplitErrorKind;
    use crate::partition::partition;

    fn seed(store: &CatalogStore, n: usize) -> Vec<Chunk> {
        let epoch = Uuid::new_v4();
        let chunks: Vec<Chunk> = (0..n)
            .map(|i| Chunk {
                nss: Namespace::new("test1", "coll1"),
                min: json!({"_id": i * 10}),
                max: json!({"_id": (i + 1) * 10}),
                shard: "rs0".to_string(),
                version: ChunkVersion::new(epoch, 1, i as u32),
                last_modified: ClusterTimestamp::default(),
            })
            .collect();
        for chunk in &chunks {
            store.put_chunk(chunk).unwrap();
        }
        chunks
    }

    fn coordinator(store: &Arc<CatalogStore>) -> CommitCoordinator {
        CommitCoordinator::new(store.clone(), Arc::new(LogicalClock::new()))
    }

    #[tokio::test]
    async fn commits_chunks_and_primaries() {
        let store = Arc::new(CatalogStore::open_in_memory().unwrap());
        let chunks = seed(&store, 4);
        let dbs = vec![DatabaseEntry::new("test1", "rs0"), DatabaseEntry::new("test2", "rs0")];
        for db in &dbs {
            store.put_database(db).unwrap();
        }

        let plan = partition(dbs, chunks);
        let outcome = coordinator(&store)
            .commit(&plan, "rs0", "newShard")
            .await
            .unwrap();

        assert_eq!(outcome.chunks_moved, 2);
        assert_eq!(outcome.databases_moved, 1);
        assert_eq!(store.chunks_owned_by("newShard").unwrap().len(), 2);
        assert_eq!(store.chunks_owned_by("rs0").unwrap().len(), 2);

        let test2 = store.get_database("test2").unwrap().unwrap();
        assert_eq!(test2.primary, "newShard");
        assert_eq!(test2.version.last_mod, 2);
        assert_eq!(store.get_database("test1").unwrap().unwrap().primary, "rs0");
    }

    #[tokio::test]
    async fn stale_plan_is_a_conflict() {
        let store = Arc::new(CatalogStore::open_in_memory().unwrap());
        let chunks = seed(&store, 2);
        let plan = partition(Vec::new(), chunks);

        // Someone else moves the chunk first.
        let mut moved = plan.moving_chunks[0].clone();
        moved.shard = "rs1".to_string();
        store.put_chunk(&moved).unwrap();

        let err = coordinator(&store)
            .commit(&plan, "rs0", "newShard")
            .await
            .unwrap_err();
        assert_eq!(err.phase, SplitPhase::Commit);
        assert!(matches!(err.kind, SplitErrorKind::MetadataConflict(_)));
        assert!(store.chunks_owned_by("newShard").unwrap().is_empty());
    }

    #[tokio::test]
    async fn vanished_database_is_not_found() {
        let store = Arc::new(CatalogStore::open_in_memory().unwrap());
        let plan = partition(
            vec![DatabaseEntry::new("a", "rs0"), DatabaseEntry::new("gone", "rs0")],
            Vec::new(),
        );
        store.put_database(&plan.staying_databases[0]).unwrap();

        let err = coordinator(&store)
            .commit(&plan, "rs0", "newShard")
            .await
            .unwrap_err();
        assert!(matches!(err.kind, SplitErrorKind::NotFound(_)));
    }
}
