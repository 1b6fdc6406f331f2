//! Axum routes for Raft protocol RPCs and cluster management.
//!
//! `/raft/*` carries peer traffic and is served on every node's `rpc_addr`.
//! `/cluster/*` is the operator surface and sits behind the auth middleware.

use crate::api::errors::ApiError;
use crate::api::handlers::AppState;
use crate::cluster::types::{ClusterNode, NodeId, Raft, TypeConfig};
use crate::coordinator::ClusterMetricsView;
use axum::extract::State;
use axum::routing::post;
use axum::{Extension, Json, Router};
use openraft::error::{ClientWriteError, InstallSnapshotError, RaftError};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use spacevec_core::rbac::{Access, RequestContext, Resource};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Shared state for the peer RPC handlers.
#[derive(Clone)]
pub struct RaftState {
    pub raft: Arc<Raft>,
}

/// Peer RPC routes: vote, append entries, install snapshot.
///
/// Responses carry the openraft `Result` so the caller can tell a remote
/// Raft error from a transport failure.
pub fn raft_router(state: RaftState) -> Router {
    Router::new()
        .route("/raft/vote", post(handle_vote))
        .route("/raft/append", post(handle_append))
        .route("/raft/snapshot", post(handle_snapshot))
        .with_state(state)
}

async fn handle_vote(
    State(state): State<RaftState>,
    Json(req): Json<VoteRequest<NodeId>>,
) -> Json<Result<VoteResponse<NodeId>, RaftError<NodeId>>> {
    Json(state.raft.vote(req).await)
}

async fn handle_append(
    State(state): State<RaftState>,
    Json(req): Json<AppendEntriesRequest<TypeConfig>>,
) -> Json<Result<AppendEntriesResponse<NodeId>, RaftError<NodeId>>> {
    Json(state.raft.append_entries(req).await)
}

async fn handle_snapshot(
    State(state): State<RaftState>,
    Json(req): Json<InstallSnapshotRequest<TypeConfig>>,
) -> Json<Result<InstallSnapshotResponse<NodeId>, RaftError<NodeId, InstallSnapshotError>>> {
    Json(state.raft.install_snapshot(req).await)
}

// ── Management ─────────────────────────────────────────────────────────

fn cluster_raft(state: &AppState) -> Result<&Arc<Raft>, ApiError> {
    state
        .coordinator
        .raft()
        .ok_or_else(|| ApiError::BadRequest("node is not running in cluster mode".into()))
}

fn authorize_system(
    state: &AppState,
    ctx: &RequestContext,
    access: Access,
) -> Result<(), ApiError> {
    state
        .engine
        .authority()
        .authorize_global(ctx, Resource::System, access)?;
    Ok(())
}

/// Map a membership error, redirecting to the leader when one is known.
fn membership_error(e: RaftError<NodeId, ClientWriteError<NodeId, ClusterNode>>) -> ApiError {
    if let Some(fwd) = e.forward_to_leader() {
        return ApiError::from(spacevec_core::Error::NotLeader {
            leader_id: fwd.leader_id,
            leader_addr: fwd.leader_node.as_ref().map(|n| n.api_addr.clone()),
        });
    }
    ApiError::BadRequest(e.to_string())
}

/// `POST /cluster/init`: single-voter membership of this node.
pub async fn init_cluster(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize_system(&state, &ctx, Access::Write)?;
    let raft = cluster_raft(&state)?;
    let (id, this) = state
        .coordinator
        .member()
        .ok_or_else(|| ApiError::BadRequest("node is not running in cluster mode".into()))?;

    let mut members = BTreeMap::new();
    members.insert(id, this);
    raft.initialize(members)
        .await
        .map_err(|e| ApiError::Conflict(e.to_string()))?;
    tracing::info!(node_id = id, "Cluster initialized");
    Ok(Json(serde_json::json!({ "message": "Cluster initialized" })))
}

/// `POST /cluster/add-learner` with `[id, api_addr, rpc_addr]`.
///
/// Returns once the learner has caught up with the leader's log.
pub async fn add_learner(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json((node_id, api_addr, rpc_addr)): Json<(NodeId, String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize_system(&state, &ctx, Access::Write)?;
    let raft = Arc::clone(cluster_raft(&state)?);
    let node = ClusterNode::new(api_addr, rpc_addr);
    let resp = tokio::spawn(async move { raft.add_learner(node_id, node, true).await })
        .await
        .map_err(|e| ApiError::Internal(format!("task failed: {e}")))?
        .map_err(membership_error)?;
    tracing::info!(node_id, log_id = %resp.log_id, "Learner added");
    Ok(Json(serde_json::json!({
        "message": "Learner added",
        "log_id": resp.log_id.to_string(),
    })))
}

/// `POST /cluster/change-membership` with `[ids]`: the new voter set.
pub async fn change_membership(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(voters): Json<BTreeSet<NodeId>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize_system(&state, &ctx, Access::Write)?;
    let raft = Arc::clone(cluster_raft(&state)?);
    let resp = tokio::spawn(async move { raft.change_membership(voters, false).await })
        .await
        .map_err(|e| ApiError::Internal(format!("task failed: {e}")))?
        .map_err(membership_error)?;
    tracing::info!(log_id = %resp.log_id, "Membership changed");
    Ok(Json(serde_json::json!({
        "message": "Membership changed",
        "log_id": resp.log_id.to_string(),
    })))
}

/// `GET /cluster/metrics`: this node's view, possibly stale.
pub async fn cluster_metrics(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Result<ClusterMetricsView, String>>, ApiError> {
    authorize_system(&state, &ctx, Access::Read)?;
    Ok(Json(Ok(state.coordinator.metrics())))
}
