//! Standalone mode: catalog, every configured shard, the split
//! orchestrator and the REST API in one process.
//!
//! In this mode, the daemon:
//! 1. Opens the catalog store under the data directory
//! 2. Registers each configured shard and opens its local store
//! 3. Builds the split orchestrator over the in-process transport
//! 4. Serves the REST API until Ctrl-C, cancelling any in-flight split

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use mitosis_catalog::{CatalogStore, LogicalClock, MetadataClient, ShardEntry};
use mitosis_shard::{LocalTransport, ShardStore};
use mitosis_split::SplitOrchestrator;

use crate::config::MitosisConfig;

/// Every subsystem of a standalone node.
pub struct Node {
    pub catalog: CatalogStore,
    pub transport: Arc<LocalTransport>,
    pub orchestrator: Arc<SplitOrchestrator>,
}

/// Open stores and wire the subsystems together.
pub fn assemble(config: &MitosisConfig) -> anyhow::Result<Node> {
    std::fs::create_dir_all(&config.data_dir)?;

    let catalog_path = config.data_dir.join("catalog.redb");
    let catalog = CatalogStore::open(&catalog_path)?;
    info!(path = ?catalog_path, "catalog store opened");
    let metadata: Arc<dyn MetadataClient> = Arc::new(catalog.clone());

    let transport = Arc::new(LocalTransport::new());
    for shard in &config.shards {
        catalog.put_shard(&ShardEntry {
            id: shard.id.clone(),
            host: shard.host.clone(),
        })?;
        let path = config.data_dir.join(format!("shard-{}.redb", shard.id));
        let store = ShardStore::open(&shard.id, &path, metadata.clone())?;
        transport.register(&shard.host, store);
        info!(shard = %shard.id, host = %shard.host, path = ?path, "shard store opened");
    }

    let orchestrator = SplitOrchestrator::new(
        metadata,
        transport.clone(),
        Arc::new(LogicalClock::new()),
        config.node_capabilities()?,
        config.split_config()?,
    );
    info!(role = ?config.node.role, feature_version = %config.node.feature_version, "split orchestrator initialized");

    Ok(Node {
        catalog,
        transport,
        orchestrator: Arc::new(orchestrator),
    })
}

/// Run the standalone node until Ctrl-C.
pub async fn run_standalone(config: MitosisConfig) -> anyhow::Result<()> {
    info!("Mitosis daemon starting in standalone mode");

    let node = assemble(&config)?;
    if config.api.admin_token.is_none() {
        tracing::warn!("no api.admin_token configured, split shard requests will be rejected");
    }

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start API server ───────────────────────────────────────
    let state = mitosis_api::ApiState::new(
        node.catalog,
        node.transport,
        node.orchestrator,
        config.api.admin_token.clone(),
    )
    .with_shutdown(shutdown_rx);
    let router = mitosis_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        wait_for_ctrl_c().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    info!("Mitosis daemon stopped");
    Ok(())
}

pub async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
