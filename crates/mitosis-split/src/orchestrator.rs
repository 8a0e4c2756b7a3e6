//! Split-shard orchestrator: drives one split through its state machine.
//!
//! ```text
//! Unstarted → Authorized → Partitioned → Committed
//!           → [OrphansMarked] → [CollectionsReconciled] → Done
//! ```
//!
//! Any error moves the run to `Failed { phase, reason }` and is returned to
//! the caller. Work already committed stays committed; re-running the split
//! with the same flags is the recovery path.

use std::collections::BTreeMap;
use std::sync::Arc;

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use mitosis_catalog::{
    CatalogError, ClusterTimestamp, LogicalClock, MetadataClient, Namespace, ReadConcern,
    ShardEntry, ShardId,
};
use mitosis_shard::{ShardProxy, ShardTransport};

use crate::batch::BatchLimits;
use crate::commit::CommitCoordinator;
use crate::config::SplitConfig;
use crate::context::OperationContext;
use crate::error::{SplitError, SplitErrorKind, SplitPhase, SplitResult};
use crate::orphans::OrphanMarker;
use crate::partition::{OwnershipSplitPlan, partition};
use crate::reconcile::CollectionReconciler;
use crate::uuid_index::UuidIndex;

/// Role this node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRole {
    ConfigServer,
    ShardServer,
    Standalone,
}

/// What this node is and which feature version the cluster runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCapabilities {
    pub role: ClusterRole,
    pub feature_version: Version,
}

/// Identity of whoever asked for the split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    /// Holds the `internal` cluster privilege.
    pub internal: bool,
}

impl Caller {
    pub fn internal() -> Self {
        Self { internal: true }
    }

    pub fn unprivileged() -> Self {
        Self { internal: false }
    }
}

/// The administrative split request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitShardRequest {
    pub from_shard: ShardId,
    pub new_shard: ShardId,
    #[serde(default)]
    pub remove_orphans: bool,
    #[serde(default)]
    pub drop_orphaned_collections: bool,
}

/// Where a split run is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SplitState {
    Unstarted,
    Authorized,
    Partitioned,
    Committed,
    OrphansMarked,
    CollectionsReconciled,
    Done,
    Failed { phase: SplitPhase, reason: String },
}

/// Outcome of a successful split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitReport {
    pub from_shard: ShardId,
    pub new_shard: ShardId,
    /// Nothing was owned that could move; no metadata was written.
    pub no_op: bool,
    pub chunks_moved: usize,
    pub databases_moved: usize,
    pub commit_timestamp: Option<ClusterTimestamp>,
    pub refresh_calls: usize,
    /// Range deletion tasks written, per shard.
    pub range_deletions: BTreeMap<ShardId, usize>,
    /// Orphaned unsharded collections dropped, per shard.
    pub collections_dropped: BTreeMap<ShardId, Vec<Namespace>>,
    pub final_state: SplitState,
}

impl SplitReport {
    fn new(request: &SplitShardRequest) -> Self {
        Self {
            from_shard: request.from_shard.clone(),
            new_shard: request.new_shard.clone(),
            no_op: false,
            chunks_moved: 0,
            databases_moved: 0,
            commit_timestamp: None,
            refresh_calls: 0,
            range_deletions: BTreeMap::new(),
            collections_dropped: BTreeMap::new(),
            final_state: SplitState::Unstarted,
        }
    }
}

/// State of one run, with logged transitions.
struct SplitRun<'a> {
    request: &'a SplitShardRequest,
    state: SplitState,
}

impl<'a> SplitRun<'a> {
    fn new(request: &'a SplitShardRequest) -> Self {
        Self {
            request,
            state: SplitState::Unstarted,
        }
    }

    fn advance(&mut self, next: SplitState) {
        debug!(
            from_shard = %self.request.from_shard,
            new_shard = %self.request.new_shard,
            from = ?self.state,
            to = ?next,
            "split state transition"
        );
        self.state = next;
    }

    fn fail(&mut self, err: SplitError) -> SplitError {
        warn!(
            from_shard = %self.request.from_shard,
            new_shard = %self.request.new_shard,
            phase = %err.phase,
            shard = ?err.shard,
            error = %err.kind,
            "split failed"
        );
        self.state = SplitState::Failed {
            phase: err.phase,
            reason: err.kind.to_string(),
        };
        err
    }
}

/// Sequences partition, commit, orphan marking and reconciliation.
pub struct SplitOrchestrator {
    catalog: Arc<dyn MetadataClient>,
    proxy: ShardProxy,
    clock: Arc<LogicalClock>,
    node: NodeCapabilities,
    config: SplitConfig,
}

impl SplitOrchestrator {
    pub fn new(
        catalog: Arc<dyn MetadataClient>,
        transport: Arc<dyn ShardTransport>,
        clock: Arc<LogicalClock>,
        node: NodeCapabilities,
        config: SplitConfig,
    ) -> Self {
        let proxy = ShardProxy::new(transport, config.proxy_config());
        Self {
            catalog,
            proxy,
            clock,
            node,
            config,
        }
    }

    /// Split `request.from_shard`, handing half its holdings to `request.new_shard`.
    pub async fn split_shard(
        &self,
        ctx: &OperationContext,
        caller: &Caller,
        request: &SplitShardRequest,
    ) -> SplitResult<SplitReport> {
        let mut run = SplitRun::new(request);
        info!(
            from_shard = %request.from_shard,
            new_shard = %request.new_shard,
            remove_orphans = request.remove_orphans,
            drop_orphaned_collections = request.drop_orphaned_collections,
            "split shard requested"
        );
        match self.drive(ctx, caller, &mut run).await {
            Ok(report) => Ok(report),
            Err(err) => Err(run.fail(err)),
        }
    }

    async fn drive(
        &self,
        ctx: &OperationContext,
        caller: &Caller,
        run: &mut SplitRun<'_>,
    ) -> SplitResult<SplitReport> {
        let request = run.request;
        let from = request.from_shard.as_str();
        let to = request.new_shard.as_str();
        let mut report = SplitReport::new(request);

        self.check_preconditions(caller, request)?;
        run.advance(SplitState::Authorized);

        let plan = ctx.run(SplitPhase::Partition, self.load_plan(from)).await?;
        run.advance(SplitState::Partitioned);

        if plan.is_empty() {
            info!(from_shard = from, new_shard = to, "nothing to move, split is a no-op");
            report.no_op = true;
            return Ok(finish(run, report));
        }

        let committer = CommitCoordinator::new(self.catalog.clone(), self.clock.clone());
        let outcome = ctx
            .run(SplitPhase::Commit, committer.commit(&plan, from, to))
            .await?;
        report.chunks_moved = outcome.chunks_moved;
        report.databases_moved = outcome.databases_moved;
        report.commit_timestamp = Some(outcome.timestamp);
        run.advance(SplitState::Committed);

        if !request.remove_orphans && !request.drop_orphaned_collections {
            return Ok(finish(run, report));
        }

        let (source, new_shard, index) = ctx
            .run(SplitPhase::ResolveShards, self.resolve(request, &plan))
            .await?;

        if request.remove_orphans && !plan.moving_chunks.is_empty() {
            let marker = OrphanMarker::new(
                self.catalog.clone(),
                self.proxy.clone(),
                self.batch_limits(),
            );
            let marked = ctx
                .run(
                    SplitPhase::MarkOrphans,
                    marker.mark(&plan, &source, &new_shard, &index),
                )
                .await?;
            report.refresh_calls = marked.refreshes;
            report.range_deletions = BTreeMap::from([
                (source.id.clone(), marked.tasks_on_source),
                (new_shard.id.clone(), marked.tasks_on_new),
            ]);
            run.advance(SplitState::OrphansMarked);
        }

        if request.drop_orphaned_collections && !plan.moving_databases.is_empty() {
            let reconciler = CollectionReconciler::new(self.proxy.clone());
            let reconciled = ctx
                .run(
                    SplitPhase::ReconcileCollections,
                    reconciler.reconcile(&plan, &source, &new_shard, &index),
                )
                .await?;
            report.collections_dropped = reconciled.dropped;
            run.advance(SplitState::CollectionsReconciled);
        }

        Ok(finish(run, report))
    }

    fn check_preconditions(&self, caller: &Caller, request: &SplitShardRequest) -> SplitResult<()> {
        let unsupported = |msg: String| {
            SplitError::new(
                SplitPhase::Preconditions,
                SplitErrorKind::UnsupportedConfiguration(msg),
            )
        };

        if self.node.role != ClusterRole::ConfigServer {
            return Err(SplitError::new(
                SplitPhase::Preconditions,
                SplitErrorKind::Unauthorized(format!(
                    "split shard can only run on a config server, this node is {:?}",
                    self.node.role
                )),
            ));
        }
        if self.node.feature_version != self.config.required_feature_version {
            return Err(unsupported(format!(
                "feature compatibility version is {}, split shard requires {}",
                self.node.feature_version, self.config.required_feature_version
            )));
        }
        if !caller.internal {
            return Err(SplitError::new(
                SplitPhase::Preconditions,
                SplitErrorKind::Unauthorized(
                    "split shard requires the internal cluster privilege".to_string(),
                ),
            ));
        }
        if request.from_shard == request.new_shard {
            return Err(unsupported(format!(
                "source and new shard are both {}",
                request.from_shard
            )));
        }
        Ok(())
    }

    /// Read what the source owns and cut it in half.
    async fn load_plan(&self, from: &str) -> SplitResult<OwnershipSplitPlan> {
        let catalog_err = |e| SplitError::catalog(SplitPhase::Partition, e);
        let databases = self.catalog.databases_owned_by(from).await.map_err(catalog_err)?;
        let chunks = self
            .catalog
            .chunks_owned_by(from, ReadConcern::Local)
            .await
            .map_err(catalog_err)?;
        debug!(
            from_shard = from,
            databases = databases.len(),
            chunks = chunks.len(),
            "loaded source shard holdings"
        );
        Ok(partition(databases, chunks))
    }

    /// Look up both shards' hosts and index the sharded collections of
    /// every database the source owned.
    async fn resolve(
        &self,
        request: &SplitShardRequest,
        plan: &OwnershipSplitPlan,
    ) -> SplitResult<(ShardEntry, ShardEntry, UuidIndex)> {
        let source = self.shard_entry(&request.from_shard).await?;
        let new_shard = self.shard_entry(&request.new_shard).await?;
        let index = UuidIndex::build(self.catalog.as_ref(), plan.all_databases())
            .await
            .map_err(|e| SplitError::catalog(SplitPhase::ResolveShards, e))?;
        Ok((source, new_shard, index))
    }

    async fn shard_entry(&self, id: &str) -> SplitResult<ShardEntry> {
        self.catalog.get_shard(id).await.map_err(|e| match e {
            CatalogError::NotFound(_) => SplitError::new(
                SplitPhase::ResolveShards,
                SplitErrorKind::ShardNotFound(id.to_string()),
            )
            .on_shard(id),
            other => SplitError::catalog(SplitPhase::ResolveShards, other),
        })
    }

    fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_batch_bytes: self.config.max_batch_bytes,
            headroom_bytes: self.config.batch_headroom_bytes,
        }
    }
}

fn finish(run: &mut SplitRun<'_>, mut report: SplitReport) -> SplitReport {
    run.advance(SplitState::Done);
    info!(
        from_shard = %report.from_shard,
        new_shard = %report.new_shard,
        chunks_moved = report.chunks_moved,
        databases_moved = report.databases_moved,
        no_op = report.no_op,
        "split shard completed"
    );
    report.final_state = run.state.clone();
    report
}
