//! mitosis-api: REST API for Mitosis.
//!
//! Exposes the split-shard administrative command and read-only shard
//! diagnostics over axum.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/admin/split-shard` | Split a shard (bearer token required) |
//! | GET | `/api/v1/shards` | List the shard registry |
//! | GET | `/api/v1/shards/{id}/range-deletions` | Range deletion tasks recorded on a shard |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::{Mutex, watch};

use mitosis_catalog::CatalogStore;
use mitosis_shard::LocalTransport;
use mitosis_split::{OperationContext, SplitOrchestrator};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub catalog: CatalogStore,
    pub transport: Arc<LocalTransport>,
    pub orchestrator: Arc<SplitOrchestrator>,
    /// Token granting the internal cluster privilege. `None` grants it to nobody.
    pub admin_token: Option<String>,
    /// Held for the duration of a split; one split per process at a time.
    pub split_lock: Arc<Mutex<()>>,
    /// Flips to `true` on shutdown, cancelling an in-flight split.
    pub shutdown: Option<watch::Receiver<bool>>,
}

impl ApiState {
    pub fn new(
        catalog: CatalogStore,
        transport: Arc<LocalTransport>,
        orchestrator: Arc<SplitOrchestrator>,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            catalog,
            transport,
            orchestrator,
            admin_token,
            split_lock: Arc::new(Mutex::new(())),
            shutdown: None,
        }
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Context for one split request.
    pub fn operation_context(&self) -> OperationContext {
        match &self.shutdown {
            Some(rx) => OperationContext::new().with_cancellation(rx.clone()),
            None => OperationContext::new(),
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/admin/split-shard", post(handlers::split_shard))
        .route("/shards", get(handlers::list_shards))
        .route("/shards/{id}/range-deletions", get(handlers::list_range_deletions))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
