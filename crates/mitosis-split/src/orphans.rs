//! Orphan marker: schedules cleanup of ranges a shard no longer owns.
//!
//! After the ownership commit, both shards still hold every document of
//! every chunk the source owned. The marker first makes both shards
//! reload their routing tables, so neither keeps serving a range it lost,
//! then records a delayed range deletion task for each range on the shard
//! that no longer owns it:
//!
//! - moved chunks → tasks on the source shard
//! - staying chunks → tasks on the new shard

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use mitosis_catalog::{Chunk, MetadataClient, Namespace, RangeDeletionTask, ReadConcern, ShardEntry};
use mitosis_shard::ShardProxy;

use crate::batch::{BatchLimits, RangeDeletionBatches};
use crate::error::{SplitError, SplitPhase, SplitResult};
use crate::partition::OwnershipSplitPlan;
use crate::uuid_index::UuidIndex;

const PHASE: SplitPhase = SplitPhase::MarkOrphans;

/// Work done by one marking pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanReport {
    /// Routing cache refreshes issued, counting each shard separately.
    pub refreshes: usize,
    pub tasks_on_source: usize,
    pub tasks_on_new: usize,
    pub batches: usize,
}

pub struct OrphanMarker {
    catalog: Arc<dyn MetadataClient>,
    proxy: ShardProxy,
    limits: BatchLimits,
}

impl OrphanMarker {
    pub fn new(catalog: Arc<dyn MetadataClient>, proxy: ShardProxy, limits: BatchLimits) -> Self {
        Self {
            catalog,
            proxy,
            limits,
        }
    }

    /// Refresh both shards, then write range deletion tasks for `plan`.
    ///
    /// No task is written unless every refresh succeeded.
    pub async fn mark(
        &self,
        plan: &OwnershipSplitPlan,
        source: &ShardEntry,
        new_shard: &ShardEntry,
        index: &UuidIndex,
    ) -> SplitResult<OrphanReport> {
        let mut report = OrphanReport {
            refreshes: self.refresh_routing_caches(plan, source, new_shard).await?,
            ..Default::default()
        };

        let mut uuids = index.clone();
        let moved = self
            .build_tasks(&plan.moving_chunks, &new_shard.id, &mut uuids)
            .await?;
        let stayed = self
            .build_tasks(&plan.staying_chunks, &source.id, &mut uuids)
            .await?;

        let (count, batches) = self.write_tasks(source, &moved).await?;
        report.tasks_on_source = count;
        report.batches += batches;

        let (count, batches) = self.write_tasks(new_shard, &stayed).await?;
        report.tasks_on_new = count;
        report.batches += batches;

        info!(
            from_shard = %source.id,
            new_shard = %new_shard.id,
            refreshes = report.refreshes,
            tasks_on_source = report.tasks_on_source,
            tasks_on_new = report.tasks_on_new,
            "orphaned ranges marked for deletion"
        );
        Ok(report)
    }

    /// Refresh both shards' caches for every chunk the source owned, the
    /// pair concurrently and chunks one after another.
    async fn refresh_routing_caches(
        &self,
        plan: &OwnershipSplitPlan,
        source: &ShardEntry,
        new_shard: &ShardEntry,
    ) -> SplitResult<usize> {
        let mut refreshes = 0;
        for chunk in plan.all_chunks() {
            let (on_source, on_new) = tokio::join!(
                self.proxy.refresh_routing_cache(source, &chunk.nss),
                self.proxy.refresh_routing_cache(new_shard, &chunk.nss),
            );
            on_source.map_err(|e| SplitError::shard(PHASE, &source.id, e))?;
            on_new.map_err(|e| SplitError::shard(PHASE, &new_shard.id, e))?;
            refreshes += 2;
            debug!(nss = %chunk.nss, min = %chunk.min, "routing caches refreshed on both shards");
        }
        Ok(refreshes)
    }

    /// One delayed task per chunk; `owner` is the shard that keeps the range.
    async fn build_tasks(
        &self,
        chunks: &[Chunk],
        owner: &str,
        uuids: &mut UuidIndex,
    ) -> SplitResult<Vec<RangeDeletionTask>> {
        let mut tasks = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let uuid = self.collection_uuid(&chunk.nss, uuids).await?;
            tasks.push(RangeDeletionTask::delayed(
                chunk.nss.clone(),
                uuid,
                owner,
                chunk.range(),
            ));
        }
        Ok(tasks)
    }

    /// UUID from the index, falling back to the catalog for namespaces the
    /// index has not seen. Fallback results are remembered for the run.
    async fn collection_uuid(&self, nss: &Namespace, uuids: &mut UuidIndex) -> SplitResult<Uuid> {
        if let Some(uuid) = uuids.get(nss) {
            return Ok(uuid);
        }
        let coll = self
            .catalog
            .get_collection(nss, ReadConcern::Local)
            .await
            .map_err(|e| SplitError::catalog(PHASE, e))?;
        debug!(%nss, uuid = %coll.uuid, "collection uuid resolved from catalog");
        uuids.insert(coll.nss, coll.uuid);
        Ok(coll.uuid)
    }

    /// Insert `tasks` on `shard` batch by batch. Returns (tasks, batches).
    async fn write_tasks(
        &self,
        shard: &ShardEntry,
        tasks: &[RangeDeletionTask],
    ) -> SplitResult<(usize, usize)> {
        let mut written = 0;
        let mut batches = 0;
        for (i, batch) in RangeDeletionBatches::new(tasks, self.limits).enumerate() {
            written += self
                .proxy
                .insert_range_deletion_tasks(shard, batch.to_vec())
                .await
                .map_err(|e| SplitError::shard(PHASE, &shard.id, e))?;
            batches += 1;
            debug!(shard = %shard.id, batch = i, tasks = batch.len(), "range deletion batch inserted");
        }
        Ok((written, batches))
    }
}
