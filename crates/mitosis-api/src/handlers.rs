//! REST API handlers.
//!
//! The split handler maps the bearer token to a [`Caller`] and leaves the
//! privilege decision to the orchestrator, so an unauthenticated request
//! fails the same way an unprivileged internal caller would.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use serde::Serialize;
use tracing::{info, warn};

use mitosis_split::{Caller, SplitError, SplitErrorKind, SplitPhase, SplitShardRequest};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ApiError>,
}

/// Structured error body.
#[derive(Debug, Serialize)]
struct ApiError {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    phase: Option<SplitPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shard: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(code: &str, msg: &str, status: StatusCode) -> impl IntoResponse {
    respond_error(
        ApiError {
            code: code.to_string(),
            message: msg.to_string(),
            phase: None,
            shard: None,
        },
        status,
    )
}

fn split_error_response(err: SplitError) -> impl IntoResponse {
    let status = status_for(&err.kind);
    respond_error(
        ApiError {
            code: err.kind.code().to_string(),
            message: err.kind.to_string(),
            phase: Some(err.phase),
            shard: err.shard,
        },
        status,
    )
}

fn respond_error(error: ApiError, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(error),
        }),
    )
}

/// HTTP status for a split failure.
fn status_for(kind: &SplitErrorKind) -> StatusCode {
    match kind {
        SplitErrorKind::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        SplitErrorKind::UnsupportedConfiguration(_) => StatusCode::BAD_REQUEST,
        SplitErrorKind::MetadataConflict(_) => StatusCode::CONFLICT,
        SplitErrorKind::NotFound(_) | SplitErrorKind::ShardNotFound(_) => StatusCode::NOT_FOUND,
        SplitErrorKind::ShardUnreachable(_) | SplitErrorKind::CommandFailed(_) => {
            StatusCode::BAD_GATEWAY
        }
        SplitErrorKind::Timeout(_) | SplitErrorKind::DeadlineExceeded => {
            StatusCode::GATEWAY_TIMEOUT
        }
        SplitErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        SplitErrorKind::WriteConcernFailure(_) | SplitErrorKind::Catalog(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// `Caller` for the request's `Authorization: Bearer <token>` header.
fn caller_from(headers: &HeaderMap, admin_token: Option<&str>) -> Caller {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match (presented, admin_token) {
        (Some(presented), Some(expected)) if presented == expected => Caller::internal(),
        _ => Caller::unprivileged(),
    }
}

// ── Admin ──────────────────────────────────────────────────────

/// POST /api/v1/admin/split-shard
pub async fn split_shard(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<SplitShardRequest>,
) -> impl IntoResponse {
    let Ok(_running) = state.split_lock.try_lock() else {
        warn!(from_shard = %req.from_shard, "split shard rejected, another split is running");
        return error_response(
            "Busy",
            "another split shard operation is in progress",
            StatusCode::CONFLICT,
        )
        .into_response();
    };

    let caller = caller_from(&headers, state.admin_token.as_deref());
    info!(
        from_shard = %req.from_shard,
        new_shard = %req.new_shard,
        internal = caller.internal,
        "split shard request received"
    );

    match state
        .orchestrator
        .split_shard(&state.operation_context(), &caller, &req)
        .await
    {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => split_error_response(e).into_response(),
    }
}

// ── Shards ─────────────────────────────────────────────────────

/// GET /api/v1/shards
pub async fn list_shards(State(state): State<ApiState>) -> impl IntoResponse {
    match state.catalog.list_shards() {
        Ok(shards) => ApiResponse::ok(shards).into_response(),
        Err(e) => error_response("Catalog", &e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

/// GET /api/v1/shards/{id}/range-deletions
pub async fn list_range_deletions(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let shard = match state.catalog.get_shard(&id) {
        Ok(Some(shard)) => shard,
        Ok(None) => {
            return error_response("ShardNotFound", "shard not found", StatusCode::NOT_FOUND)
                .into_response();
        }
        Err(e) => {
            return error_response("Catalog", &e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };
    let Some(store) = state.transport.shard(&shard.host) else {
        return error_response(
            "ShardUnreachable",
            &format!("no shard bound to host {}", shard.host),
            StatusCode::BAD_GATEWAY,
        )
        .into_response();
    };
    match store.list_range_deletions() {
        Ok(tasks) => ApiResponse::ok(tasks).into_response(),
        Err(e) => error_response("CommandFailed", &e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::HeaderValue;
    use semver::Version;

    use mitosis_catalog::{CatalogStore, DatabaseEntry, LogicalClock, ShardEntry};
    use mitosis_shard::{LocalTransport, ShardStore};
    use mitosis_split::{ClusterRole, NodeCapabilities, SplitConfig, SplitOrchestrator};

    use super::*;

    const TOKEN: &str = "s3cret";

    fn test_state() -> ApiState {
        test_state_with_role(ClusterRole::ConfigServer)
    }

    fn test_state_with_role(role: ClusterRole) -> ApiState {
        let catalog = CatalogStore::open_in_memory().unwrap();
        let shared = Arc::new(catalog.clone());
        let transport = Arc::new(LocalTransport::new());
        for (id, host) in [("rs0", "rs0/a:27018"), ("newShard", "newShard/b:27018")] {
            catalog
                .put_shard(&ShardEntry {
                    id: id.to_string(),
                    host: host.to_string(),
                })
                .unwrap();
            transport.register(host, ShardStore::open_in_memory(id, shared.clone()).unwrap());
        }
        let orchestrator = SplitOrchestrator::new(
            shared,
            transport.clone(),
            Arc::new(LogicalClock::new()),
            NodeCapabilities {
                role,
                feature_version: Version::new(4, 4, 0),
            },
            SplitConfig::default(),
        );
        ApiState::new(catalog, transport, Arc::new(orchestrator), Some(TOKEN.to_string()))
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn request() -> SplitShardRequest {
        SplitShardRequest {
            from_shard: "rs0".to_string(),
            new_shard: "newShard".to_string(),
            remove_orphans: false,
            drop_orphaned_collections: false,
        }
    }

    #[test]
    fn caller_requires_matching_token() {
        assert!(caller_from(&bearer(TOKEN), Some(TOKEN)).internal);
        assert!(!caller_from(&bearer("wrong"), Some(TOKEN)).internal);
        assert!(!caller_from(&HeaderMap::new(), Some(TOKEN)).internal);
        assert!(!caller_from(&bearer(TOKEN), None).internal);
    }

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(
            status_for(&SplitErrorKind::MetadataConflict("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&SplitErrorKind::ShardNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&SplitErrorKind::Timeout("x".into())),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&SplitErrorKind::WriteConcernFailure("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn split_with_token_succeeds() {
        let state = test_state();
        state.catalog.put_database(&DatabaseEntry::new("test1", "rs0")).unwrap();
        state.catalog.put_database(&DatabaseEntry::new("test2", "rs0")).unwrap();

        let resp = split_shard(State(state.clone()), bearer(TOKEN), Json(request())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert_eq!(
            state.catalog.get_database("test2").unwrap().unwrap().primary,
            "newShard"
        );
    }

    #[tokio::test]
    async fn split_without_token_is_unauthorized() {
        let state = test_state();
        let resp = split_shard(State(state), HeaderMap::new(), Json(request())).await;
        assert_eq!(resp.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn split_on_shard_server_is_unauthorized() {
        let state = test_state_with_role(ClusterRole::ShardServer);
        state.catalog.put_database(&DatabaseEntry::new("test1", "rs0")).unwrap();
        state.catalog.put_database(&DatabaseEntry::new("test2", "rs0")).unwrap();

        let resp = split_shard(State(state.clone()), bearer(TOKEN), Json(request())).await;
        assert_eq!(resp.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            state.catalog.get_database("test2").unwrap().unwrap().primary,
            "rs0"
        );
    }

    #[tokio::test]
    async fn concurrent_split_is_busy() {
        let state = test_state();
        let _running = state.split_lock.clone().try_lock_owned().unwrap();

        let resp = split_shard(State(state.clone()), bearer(TOKEN), Json(request())).await;
        assert_eq!(resp.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn range_deletions_of_unknown_shard_is_not_found() {
        let state = test_state();
        let resp = list_range_deletions(State(state), Path("nope".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_shards_returns_registry() {
        let state = test_state();
        let resp = list_shards(State(state)).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }
}
