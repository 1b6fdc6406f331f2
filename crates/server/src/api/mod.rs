//! REST API layer built on [Axum](https://docs.rs/axum).
//!
//! Route table lives in [`create_router`]. Every `/api/*` and `/cluster/*`
//! route passes through [`auth_middleware`], which turns the bearer token
//! into a [`RequestContext`] for the handler's authorization check.

pub mod audit;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;

use crate::cluster::api as cluster_api;
use axum::error_handling::HandleErrorLayer;
use axum::extract::{DefaultBodyLimit, MatchedPath};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{middleware, Router};
use handlers::AppState;
use spacevec_core::config;
use spacevec_core::rbac::RequestContext;
use std::time::{Duration, Instant};
use tower::buffer::BufferLayer;
use tower::limit::{ConcurrencyLimitLayer, RateLimitLayer};
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// Extract the bearer token into a [`RequestContext`] and an
/// [`audit::AuditContext`]. Authorization itself happens in each handler.
async fn auth_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let audit_ctx = audit::AuditContext::from_request(token.as_deref(), &req);
    req.extensions_mut().insert(audit_ctx);
    req.extensions_mut().insert(RequestContext::new(token));
    next.run(req).await
}

/// Tag each request with a UUID, exposed as `x-request-id`.
async fn request_id_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("request", request_id = %request_id);
    async move {
        let mut response = next.run(req).await;
        if let Ok(value) = axum::http::HeaderValue::from_str(&request_id) {
            response
                .headers_mut()
                .insert(axum::http::HeaderName::from_static("x-request-id"), value);
        }
        response
    }
    .instrument(span)
    .await
}

async fn security_headers_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        axum::http::HeaderName::from_static("x-content-type-options"),
        axum::http::HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        axum::http::HeaderName::from_static("x-frame-options"),
        axum::http::HeaderValue::from_static("DENY"),
    );
    headers.insert(
        axum::http::HeaderName::from_static("referrer-policy"),
        axum::http::HeaderValue::from_static("no-referrer"),
    );
    response
}

/// Per-request counter and latency, labelled by route template.
async fn metrics_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();
    let response = next.run(req).await;
    metrics::record_request(&method, &path, response.status().as_u16(), start.elapsed());
    response
}

/// Build the full HTTP router. Peer RPC routes are merged separately via
/// [`cluster_api::raft_router`].
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        // Spaces
        .route("/api/space", post(handlers::create_space))
        .route("/api/spaces", get(handlers::list_spaces))
        .route(
            "/api/space/:space",
            get(handlers::get_space)
                .post(handlers::update_space)
                .delete(handlers::delete_space),
        )
        // Versions
        .route(
            "/api/space/:space/version",
            get(handlers::get_default_version).post(handlers::create_version),
        )
        .route("/api/space/:space/versions", get(handlers::list_versions))
        .route(
            "/api/space/:space/version/:v",
            get(handlers::get_version).delete(handlers::delete_version),
        )
        // Vectors
        .route("/api/space/:space/vector", post(handlers::create_vectors))
        .route(
            "/api/space/:space/version/:v/vector/:id",
            delete(handlers::delete_vector),
        )
        .route(
            "/api/space/:space/version/:v/vectors",
            get(handlers::get_vectors),
        )
        .route("/api/space/:space/search", post(handlers::search))
        .route(
            "/api/space/:space/version/:v/search",
            post(handlers::search_version),
        )
        .route("/api/space/:space/rerank", post(handlers::rerank))
        .route(
            "/api/space/:space/version/:v/rerank",
            post(handlers::rerank_version),
        )
        // Key-value
        .route(
            "/api/space/:space/key/:key",
            get(handlers::get_key)
                .post(handlers::put_key)
                .delete(handlers::delete_key),
        )
        .route("/api/space/:space/keys", get(handlers::list_keys))
        // Snapshots
        .route("/api/snapshot", post(handlers::create_snapshot))
        .route("/api/snapshots", get(handlers::list_snapshots))
        .route(
            "/api/snapshot/:id/delete",
            delete(handlers::delete_snapshot),
        )
        .route(
            "/api/snapshot/:id/download",
            get(handlers::download_snapshot),
        )
        .route("/snapshot/:id/download", get(handlers::download_snapshot))
        .route(
            "/api/snapshot/:id/restore",
            post(handlers::restore_snapshot),
        )
        .route(
            "/api/snapshots/restore",
            post(handlers::upload_restore_snapshot)
                .layer(DefaultBodyLimit::max(config::MAX_SNAPSHOT_UPLOAD_BYTES)),
        )
        // Tokens
        .route(
            "/api/security/tokens",
            get(handlers::list_tokens).post(handlers::create_token),
        )
        .route(
            "/api/security/tokens/:token",
            put(handlers::update_token).delete(handlers::delete_token),
        )
        // Cluster management
        .route("/cluster/init", post(cluster_api::init_cluster))
        .route("/cluster/add-learner", post(cluster_api::add_learner))
        .route(
            "/cluster/change-membership",
            post(cluster_api::change_membership),
        )
        .route("/cluster/metrics", get(cluster_api::cluster_metrics))
        .route_layer(middleware::from_fn(auth_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_endpoint))
        .merge(protected)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(config::MAX_REQUEST_BODY_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|err: tower::BoxError| async move {
                    if err.is::<tower::timeout::error::Elapsed>() {
                        StatusCode::REQUEST_TIMEOUT
                    } else {
                        StatusCode::TOO_MANY_REQUESTS
                    }
                }))
                .layer(BufferLayer::new(1024))
                .layer(ConcurrencyLimitLayer::new(config::MAX_CONCURRENT_REQUESTS))
                .layer(RateLimitLayer::new(
                    config::RATE_LIMIT_RPS,
                    Duration::from_secs(1),
                ))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config::REQUEST_TIMEOUT_SECS,
                ))),
        )
        .with_state(state)
}
