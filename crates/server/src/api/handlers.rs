//! HTTP request handlers and shared application state.
//!
//! Every handler authorizes first, then either reads from the engine or
//! proposes a [`Command`] through the [`Coordinator`]. Reads that touch many
//! vectors and all snapshot work run on the blocking pool.

use crate::api::audit::{audit_result, AuditContext};
use crate::api::errors::ApiError;
use crate::api::metrics;
use crate::api::models::*;
use crate::coordinator::Coordinator;
use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use metrics_exporter_prometheus::PrometheusHandle;
use spacevec_core::config;
use spacevec_core::rbac::{generate_token, Access, RequestContext, Resource, Token};
use spacevec_core::record::VectorRecord;
use spacevec_core::schema::{CreateSpace, SpaceUpdate};
use spacevec_core::snapshot::{SnapshotInfo, SnapshotManager, SnapshotScope};
use spacevec_core::storage::{NewVersion, SpaceInfo, VersionMeta};
use spacevec_core::{Command, Engine, Outcome};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state passed to every handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub coordinator: Arc<Coordinator>,
    pub snapshots: Arc<SnapshotManager>,
    pub data_dir: PathBuf,
    pub prometheus_handle: PrometheusHandle,
    pub start_time: Instant,
}

type Audit = Option<Extension<AuditContext>>;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Authorize `access` on `resource`, optionally against a named space.
fn authorize(
    state: &AppState,
    ctx: &RequestContext,
    resource: Resource,
    access: Access,
    space: Option<&str>,
) -> Result<(), ApiError> {
    let space_id = space.and_then(|name| state.engine.registry().space_id(name));
    state
        .engine
        .authority()
        .authorize(ctx, resource, access, space_id)?;
    Ok(())
}

/// Authorize an operation that is not confined to one space.
fn authorize_global(
    state: &AppState,
    ctx: &RequestContext,
    resource: Resource,
    access: Access,
) -> Result<(), ApiError> {
    state
        .engine
        .authority()
        .authorize_global(ctx, resource, access)?;
    Ok(())
}

/// Authorize `access` on snapshots of `scope`. The system scope, and spaces
/// that do not exist, need a token that is not bound to a space.
fn authorize_scope(
    engine: &Engine,
    ctx: &RequestContext,
    access: Access,
    scope: &SnapshotScope,
) -> spacevec_core::Result<()> {
    let authority = engine.authority();
    let space_id = match scope {
        SnapshotScope::System => None,
        SnapshotScope::Space(name) => engine.registry().space_id(name),
    };
    match space_id {
        Some(id) => authority.authorize(ctx, Resource::Snapshot, access, Some(id)),
        None => authority.authorize_global(ctx, Resource::Snapshot, access),
    }?;
    Ok(())
}

/// Run a core call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> spacevec_core::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("task failed: {e}")))?
        .map_err(ApiError::from)
}

async fn propose(state: &AppState, cmd: Command) -> Result<Outcome, ApiError> {
    Ok(state.coordinator.propose(cmd).await?)
}

fn unexpected(outcome: Outcome) -> ApiError {
    ApiError::Internal(format!("unexpected command outcome: {outcome:?}"))
}

fn space_outcome(outcome: Outcome) -> Result<SpaceInfo, ApiError> {
    match outcome {
        Outcome::Space(info) => Ok(info),
        other => Err(unexpected(other)),
    }
}

fn version_outcome(outcome: Outcome) -> Result<VersionMeta, ApiError> {
    match outcome {
        Outcome::Version(meta) => Ok(meta),
        other => Err(unexpected(other)),
    }
}

fn written_outcome(outcome: Outcome) -> Result<u32, ApiError> {
    match outcome {
        Outcome::Written { version } => Ok(version),
        other => Err(unexpected(other)),
    }
}

fn token_outcome(outcome: Outcome) -> Result<Token, ApiError> {
    match outcome {
        Outcome::Token(token) => Ok(token),
        other => Err(unexpected(other)),
    }
}

fn audited<T>(
    audit: &Audit,
    action: &str,
    resource: &str,
    result: Result<T, ApiError>,
) -> Result<T, ApiError> {
    let ctx = audit.as_ref().map(|Extension(ctx)| ctx);
    let shown = result.as_ref().map(|_| ()).map_err(|e| format!("{e:?}"));
    audit_result(ctx, action, resource, &shown);
    result
}

fn message(text: impl Into<String>) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: text.into(),
    })
}

// ── Health and metrics ─────────────────────────────────────────────────

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let spaces = state.engine.list_spaces();
    let spaces_count = spaces.len();
    let total_vectors: usize = spaces.iter().map(|s| s.vector_count).sum();
    let wal_size = std::fs::metadata(state.data_dir.join(config::WAL_FILE))
        .map(|m| m.len())
        .unwrap_or(0);
    let disk_available = disk_available_bytes(&state.data_dir);

    let mut warnings = Vec::new();
    let low_disk = disk_available < 100 * 1024 * 1024;
    if low_disk {
        warnings.push(format!(
            "Low disk space: {} MB available",
            disk_available / (1024 * 1024)
        ));
    }
    if wal_size > 1024 * 1024 * 1024 {
        warnings.push(format!(
            "Large WAL: {} MB (checkpoint pending)",
            wal_size / (1024 * 1024)
        ));
    }

    let status_code = if low_disk {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status_code,
        Json(HealthResponse {
            status: if low_disk { "degraded" } else { "ok" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
            spaces_count,
            total_vectors,
            leader: state.coordinator.is_leader(),
            wal_size_bytes: wal_size,
            disk_available_bytes: disk_available,
            warnings,
        }),
    )
}

/// Available disk space for the data directory.
#[allow(clippy::unnecessary_cast)]
fn disk_available_bytes(data_dir: &std::path::Path) -> u64 {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;
        if let Ok(path) = CString::new(data_dir.as_os_str().as_bytes()) {
            unsafe {
                let mut stat: libc::statvfs = std::mem::zeroed();
                if libc::statvfs(path.as_ptr(), &mut stat) == 0 {
                    // f_bavail/f_frsize are u32 on macOS, u64 on Linux
                    return stat.f_bavail as u64 * stat.f_frsize as u64;
                }
            }
        }
    }
    u64::MAX
}

/// `GET /metrics`
pub async fn metrics_endpoint(State(state): State<AppState>) -> String {
    metrics::update_space_metrics(&state.engine);
    state.prometheus_handle.render()
}

// ── Spaces ─────────────────────────────────────────────────────────────

/// `POST /api/space`
pub async fn create_space(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    Json(req): Json<CreateSpace>,
) -> Result<Json<SpaceResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Space, Access::Write, None)?;
    let name = req.name.clone();
    let result = async {
        let config = req.into_config()?;
        let outcome = propose(&state, Command::CreateSpace { config, at: now() }).await?;
        space_outcome(outcome)
    }
    .await;
    let info = audited(&audit, "create_space", &name, result)?;
    metrics::record_write_operation(&name, "create_space");
    Ok(Json(info))
}

/// `GET /api/spaces`
pub async fn list_spaces(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<SpaceResponse>>, ApiError> {
    authorize(&state, &ctx, Resource::Space, Access::Read, None)?;
    Ok(Json(state.engine.list_spaces()))
}

/// `GET /api/space/:space`
pub async fn get_space(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(space): Path<String>,
) -> Result<Json<SpaceResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Space, Access::Read, Some(&space))?;
    Ok(Json(state.engine.get_space(&space)?))
}

/// `POST /api/space/:space`
pub async fn update_space(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    Path(space): Path<String>,
    Json(update): Json<SpaceUpdate>,
) -> Result<Json<SpaceResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Space, Access::Write, Some(&space))?;
    let cmd = Command::UpdateSpace {
        name: space.clone(),
        update,
        at: now(),
    };
    let result = propose(&state, cmd).await.and_then(space_outcome);
    let info = audited(&audit, "update_space", &space, result)?;
    metrics::record_write_operation(&space, "update_space");
    Ok(Json(info))
}

/// `DELETE /api/space/:space`
pub async fn delete_space(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    Path(space): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Space, Access::Write, Some(&space))?;
    let cmd = Command::DeleteSpace {
        name: space.clone(),
    };
    let result = propose(&state, cmd).await;
    audited(&audit, "delete_space", &space, result)?;
    metrics::record_write_operation(&space, "delete_space");
    Ok(message(format!("Space '{space}' deleted")))
}

// ── Versions ───────────────────────────────────────────────────────────

/// `POST /api/space/:space/version`
pub async fn create_version(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    Path(space): Path<String>,
    Json(version): Json<NewVersion>,
) -> Result<Json<VersionResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Version, Access::Write, Some(&space))?;
    let cmd = Command::CreateVersion {
        space: space.clone(),
        version,
        at: now(),
    };
    let result = propose(&state, cmd).await.and_then(version_outcome);
    let meta = audited(&audit, "create_version", &space, result)?;
    metrics::record_write_operation(&space, "create_version");
    Ok(Json(meta))
}

/// `GET /api/space/:space/version`
pub async fn get_default_version(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(space): Path<String>,
) -> Result<Json<VersionResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Version, Access::Read, Some(&space))?;
    Ok(Json(state.engine.get_version(&space, config::HEAD_VERSION)?))
}

/// `GET /api/space/:space/version/:v`
pub async fn get_version(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((space, version)): Path<(String, u32)>,
) -> Result<Json<VersionResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Version, Access::Read, Some(&space))?;
    Ok(Json(state.engine.get_version(&space, version)?))
}

/// `GET /api/space/:space/versions`
pub async fn list_versions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(space): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<PageResponse<VersionMeta>>, ApiError> {
    authorize(&state, &ctx, Resource::Version, Access::Read, Some(&space))?;
    let page = state.engine.list_versions(&space, page.start, page.limit)?;
    Ok(Json(PageResponse {
        total_count: page.total_count,
        values: page.values,
    }))
}

/// `DELETE /api/space/:space/version/:v`
pub async fn delete_version(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    Path((space, version)): Path<(String, u32)>,
) -> Result<Json<MessageResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Version, Access::Write, Some(&space))?;
    let cmd = Command::DeleteVersion {
        space: space.clone(),
        version,
    };
    let result = propose(&state, cmd).await;
    audited(&audit, "delete_version", &space, result)?;
    metrics::record_write_operation(&space, "delete_version");
    Ok(message(format!("Version {version} of '{space}' deleted")))
}

// ── Vectors ────────────────────────────────────────────────────────────

/// `POST /api/space/:space/vector`
pub async fn create_vectors(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    Path(space): Path<String>,
    Json(req): Json<UpsertRequest>,
) -> Result<Json<UpsertResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Vector, Access::Write, Some(&space))?;
    let count = req.vectors.len();
    let result = async {
        let records = req
            .vectors
            .into_iter()
            .map(VectorRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let cmd = Command::UpsertVectors {
            space: space.clone(),
            version: req.version.unwrap_or(config::HEAD_VERSION),
            index: req.index,
            records,
            at: now(),
        };
        written_outcome(propose(&state, cmd).await?)
    }
    .await;
    let version = audited(&audit, "create_vectors", &space, result)?;
    metrics::record_write_operation(&space, "upsert_vectors");
    tracing::debug!(space = %space, version, count, "Vectors upserted");
    Ok(Json(UpsertResponse { version, count }))
}

/// `DELETE /api/space/:space/version/:v/vector/:id`
pub async fn delete_vector(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    Path((space, version, id)): Path<(String, u32, u64)>,
    Query(q): Query<IndexQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Vector, Access::Write, Some(&space))?;
    let cmd = Command::DeleteVector {
        space: space.clone(),
        version,
        index: q.index,
        id,
        at: now(),
    };
    let result = propose(&state, cmd).await;
    audited(&audit, "delete_vector", &space, result)?;
    metrics::record_write_operation(&space, "delete_vector");
    Ok(message(format!("Vector {id} deleted")))
}

/// `GET /api/space/:space/version/:v/vectors`
pub async fn get_vectors(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((space, version)): Path<(String, u32)>,
    Query(q): Query<VectorsQuery>,
) -> Result<Json<VectorsResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Vector, Access::Read, Some(&space))?;
    let engine = Arc::clone(&state.engine);
    let page = blocking(move || {
        engine.get_vectors(
            &space,
            version,
            q.index.as_deref(),
            q.start,
            q.limit,
            q.filter.as_deref(),
        )
    })
    .await?;
    Ok(Json(VectorsResponse {
        total_count: page.total_count,
        vectors: page.vectors.into_iter().map(VectorOut::from).collect(),
    }))
}

async fn run_search(
    state: AppState,
    ctx: RequestContext,
    space: String,
    version: u32,
    req: SearchRequest,
) -> Result<Json<SearchResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Vector, Access::Read, Some(&space))?;
    metrics::record_search_operation(&space, "vector");
    let engine = Arc::clone(&state.engine);
    let hits = blocking(move || {
        engine.search(
            &space,
            version,
            req.index.as_deref(),
            &req.vector,
            req.top_k,
            req.filter.as_deref(),
        )
    })
    .await?;
    Ok(Json(hits))
}

/// `POST /api/space/:space/search`
pub async fn search(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(space): Path<String>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    run_search(state, ctx, space, config::HEAD_VERSION, req).await
}

/// `POST /api/space/:space/version/:v/search`
pub async fn search_version(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((space, version)): Path<(String, u32)>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    run_search(state, ctx, space, version, req).await
}

async fn run_rerank(
    state: AppState,
    ctx: RequestContext,
    space: String,
    version: u32,
    req: RerankRequest,
) -> Result<Json<RerankResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Vector, Access::Read, Some(&space))?;
    metrics::record_search_operation(&space, "rerank");
    let engine = Arc::clone(&state.engine);
    let hits = blocking(move || {
        engine.rerank(
            &space,
            version,
            req.index.as_deref(),
            &req.vector,
            &req.tokens,
            req.top_k,
        )
    })
    .await?;
    Ok(Json(hits))
}

/// `POST /api/space/:space/rerank`
pub async fn rerank(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(space): Path<String>,
    Json(req): Json<RerankRequest>,
) -> Result<Json<RerankResponse>, ApiError> {
    run_rerank(state, ctx, space, config::HEAD_VERSION, req).await
}

/// `POST /api/space/:space/version/:v/rerank`
pub async fn rerank_version(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((space, version)): Path<(String, u32)>,
    Json(req): Json<RerankRequest>,
) -> Result<Json<RerankResponse>, ApiError> {
    run_rerank(state, ctx, space, version, req).await
}

// ── Key-value ──────────────────────────────────────────────────────────

/// `POST /api/space/:space/key/:key`
pub async fn put_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    Path((space, key)): Path<(String, String)>,
    Json(value): Json<serde_json::Value>,
) -> Result<Json<MessageResponse>, ApiError> {
    authorize(&state, &ctx, Resource::KeyValue, Access::Write, Some(&space))?;
    let cmd = Command::PutKey {
        space: space.clone(),
        key: key.clone(),
        value: value.to_string(),
        at: now(),
    };
    let result = propose(&state, cmd).await;
    audited(&audit, "put_key", &space, result)?;
    metrics::record_write_operation(&space, "put_key");
    Ok(message(format!("Key '{key}' stored")))
}

/// `GET /api/space/:space/key/:key`
pub async fn get_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((space, key)): Path<(String, String)>,
) -> Result<Json<KeyResponse>, ApiError> {
    authorize(&state, &ctx, Resource::KeyValue, Access::Read, Some(&space))?;
    let text = state.engine.get_key(&space, &key)?;
    let value = serde_json::from_str(&text)
        .map_err(|e| ApiError::Internal(format!("stored value is not JSON: {e}")))?;
    Ok(Json(KeyResponse { key, value }))
}

/// `DELETE /api/space/:space/key/:key`
pub async fn delete_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    Path((space, key)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, ApiError> {
    authorize(&state, &ctx, Resource::KeyValue, Access::Write, Some(&space))?;
    let cmd = Command::DeleteKey {
        space: space.clone(),
        key: key.clone(),
    };
    let result = propose(&state, cmd).await;
    audited(&audit, "delete_key", &space, result)?;
    metrics::record_write_operation(&space, "delete_key");
    Ok(message(format!("Key '{key}' deleted")))
}

/// `GET /api/space/:space/keys`
pub async fn list_keys(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(space): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<PageResponse<String>>, ApiError> {
    authorize(&state, &ctx, Resource::KeyValue, Access::Read, Some(&space))?;
    let page = state.engine.list_keys(&space, page.start, page.limit)?;
    Ok(Json(PageResponse {
        total_count: page.total_count,
        values: page.values,
    }))
}

// ── Snapshots ──────────────────────────────────────────────────────────
//
// Artifacts live on the node that wrote them. In cluster mode every snapshot
// route is served by the leader, so followers redirect before touching disk.

/// `POST /api/snapshot`
pub async fn create_snapshot(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    body: Option<Json<SnapshotRequest>>,
) -> Result<Json<SnapshotResponse>, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let scope = match req.spacename {
        Some(name) => SnapshotScope::Space(name),
        None => SnapshotScope::System,
    };
    authorize_scope(&state.engine, &ctx, Access::Write, &scope)?;
    state.coordinator.ensure_leader()?;
    let label = scope.to_string();
    let engine = Arc::clone(&state.engine);
    let manager = Arc::clone(&state.snapshots);
    let result = blocking(move || manager.create(engine.as_ref(), scope)).await;
    metrics::record_snapshot_operation("create", result.is_ok());
    let info = audited(&audit, "create_snapshot", &label, result)?;
    Ok(Json(info))
}

/// `GET /api/snapshots`
///
/// A token bound to a space sees only that space's snapshots.
pub async fn list_snapshots(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<SnapshotInfo>>, ApiError> {
    authorize(&state, &ctx, Resource::Snapshot, Access::Read, None)?;
    state.coordinator.ensure_leader()?;
    let manager = Arc::clone(&state.snapshots);
    let mut all = blocking(move || manager.list()).await?;
    all.retain(|info| authorize_scope(&state.engine, &ctx, Access::Read, &info.scope).is_ok());
    Ok(Json(all))
}

/// Authorize `access` on a stored snapshot, reading its scope from the header.
async fn authorize_stored(
    state: &AppState,
    ctx: &RequestContext,
    access: Access,
    id: &str,
) -> Result<(), ApiError> {
    authorize(state, ctx, Resource::Snapshot, access, None)?;
    state.coordinator.ensure_leader()?;
    let manager = Arc::clone(&state.snapshots);
    let target = id.to_string();
    let scope = blocking(move || manager.scope_of(&target)).await?;
    authorize_scope(&state.engine, ctx, access, &scope)?;
    Ok(())
}

/// `DELETE /api/snapshot/:id/delete`
pub async fn delete_snapshot(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    authorize_stored(&state, &ctx, Access::Write, &id).await?;
    let manager = Arc::clone(&state.snapshots);
    let target = id.clone();
    let result = blocking(move || manager.delete(&target)).await;
    metrics::record_snapshot_operation("delete", result.is_ok());
    audited(&audit, "delete_snapshot", &id, result)?;
    Ok(message(format!("Snapshot '{id}' deleted")))
}

/// `GET /api/snapshot/:id/download`
///
/// Streams the artifact. A client that disconnects only stops the stream.
pub async fn download_snapshot(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authorize_stored(&state, &ctx, Access::Read, &id).await?;
    let path = state.snapshots.path_for(&id)?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| ApiError::from(spacevec_core::Error::from(e)))?;
    let size = file
        .metadata()
        .await
        .map(|m| m.len())
        .map_err(|e| ApiError::from(spacevec_core::Error::from(e)))?;
    let file_name = spacevec_core::snapshot::file_name_for(&id);

    metrics::record_snapshot_operation("download", true);
    let body = Body::from_stream(tokio_util::io::ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        body,
    )
        .into_response())
}

/// `POST /api/snapshot/:id/restore`
pub async fn restore_snapshot(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Snapshot, Access::Write, None)?;
    state.coordinator.ensure_leader()?;
    let manager = Arc::clone(&state.snapshots);
    let target = id.clone();
    let result = async {
        let image = blocking(move || manager.load(&target)).await?;
        authorize_scope(&state.engine, &ctx, Access::Write, &image.scope)?;
        propose(&state, Command::Restore { image }).await?;
        Ok::<_, ApiError>(())
    }
    .await;
    metrics::record_snapshot_operation("restore", result.is_ok());
    audited(&audit, "restore_snapshot", &id, result)?;
    Ok(message(format!("Snapshot '{id}' restored")))
}

/// `POST /api/snapshots/restore`
///
/// Accepts the artifact as the first part of a multipart form or as the raw
/// request body. The artifact is stored locally and then restored.
pub async fn upload_restore_snapshot(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    request: Request,
) -> Result<Json<SnapshotResponse>, ApiError> {
    authorize(&state, &ctx, Resource::Snapshot, Access::Write, None)?;
    state.coordinator.ensure_leader()?;

    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let raw = if is_multipart {
        let mut form = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?;
        let field = form
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
            .ok_or_else(|| ApiError::BadRequest("multipart body has no file part".into()))?;
        field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?
    } else {
        axum::body::to_bytes(request.into_body(), config::MAX_SNAPSHOT_UPLOAD_BYTES)
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?
    };
    if raw.is_empty() {
        return Err(ApiError::BadRequest("empty snapshot upload".into()));
    }

    let manager = Arc::clone(&state.snapshots);
    let engine = Arc::clone(&state.engine);
    let caller = ctx.clone();
    let result = async {
        let (info, image) = blocking(move || {
            manager.upload(&raw, |scope| {
                authorize_scope(&engine, &caller, Access::Write, scope)
            })
        })
        .await?;
        propose(&state, Command::Restore { image }).await?;
        Ok::<_, ApiError>(info)
    }
    .await;
    metrics::record_snapshot_operation("upload_restore", result.is_ok());
    let info = audited(&audit, "upload_restore_snapshot", "upload", result)?;
    Ok(Json(info))
}

// ── Tokens ─────────────────────────────────────────────────────────────

/// `POST /api/security/tokens`
pub async fn create_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    state.engine.authority().authorize_token_creation(&ctx)?;
    let cmd = Command::CreateToken {
        token: generate_token(),
        spec: req.into(),
        at: now(),
    };
    let result = propose(&state, cmd).await.and_then(token_outcome);
    let token = audited(&audit, "create_token", "token", result)?;
    Ok(Json(TokenResponse {
        result: true,
        token,
    }))
}

/// `GET /api/security/tokens`
///
/// The listing carries every token secret, so it needs admin.
pub async fn list_tokens(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<Token>>, ApiError> {
    authorize_global(&state, &ctx, Resource::Security, Access::Admin)?;
    Ok(Json(state.engine.authority().list()))
}

/// `PUT /api/security/tokens/:token`
pub async fn update_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    Path(token): Path<String>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    authorize_global(&state, &ctx, Resource::Security, Access::Write)?;
    let cmd = Command::UpdateToken {
        token,
        spec: req.into(),
        at: now(),
    };
    let result = propose(&state, cmd).await.and_then(token_outcome);
    let token = audited(&audit, "update_token", "token", result)?;
    Ok(Json(TokenResponse {
        result: true,
        token,
    }))
}

/// `DELETE /api/security/tokens/:token`
pub async fn delete_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    audit: Audit,
    Path(token): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    authorize_global(&state, &ctx, Resource::Security, Access::Write)?;
    let result = propose(&state, Command::DeleteToken { token }).await;
    audited(&audit, "delete_token", "token", result)?;
    Ok(message("Token deleted"))
}
