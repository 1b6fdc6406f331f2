//! Structured audit logging for mutating and security-sensitive operations.
//!
//! The auth middleware inserts an [`AuditContext`] into request extensions.
//! Events are emitted with `target: "audit"` so they can be routed
//! separately, e.g. `RUST_LOG=audit=info`.

/// Who issued a request, for audit lines.
#[derive(Clone, Debug)]
pub struct AuditContext {
    /// Masked bearer token (first 8 chars + "...") or "anonymous".
    pub actor: String,
    /// Client IP from `X-Forwarded-For` / `X-Real-IP`, or "-".
    pub client_ip: String,
}

impl AuditContext {
    pub fn from_request(token: Option<&str>, req: &axum::http::Request<axum::body::Body>) -> Self {
        Self {
            actor: token.map(mask_key).unwrap_or_else(|| "anonymous".to_string()),
            client_ip: extract_client_ip(req),
        }
    }
}

/// Mask a token for logging: first 8 chars + "...".
pub fn mask_key(token: &str) -> String {
    match token.get(..8) {
        Some(prefix) if token.len() > 8 => format!("{prefix}..."),
        _ => "***".to_string(),
    }
}

/// Client IP from request headers (X-Forwarded-For → X-Real-IP → "-").
pub fn extract_client_ip(req: &axum::http::Request<axum::body::Body>) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or("-").trim().to_string())
        .or_else(|| {
            req.headers()
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "-".to_string())
}

/// Emit one audit line.
pub fn audit_event(ctx: &AuditContext, action: &str, resource: &str, detail: &str, outcome: &str) {
    tracing::info!(
        target: "audit",
        actor = %ctx.actor,
        client_ip = %ctx.client_ip,
        action = %action,
        resource = %resource,
        detail = %detail,
        outcome = %outcome,
        "audit"
    );
}

/// Audit the result of a handler, if the request carried a context.
pub fn audit_result<T, E: std::fmt::Display>(
    ctx: Option<&AuditContext>,
    action: &str,
    resource: &str,
    result: &Result<T, E>,
) {
    if let Some(ctx) = ctx {
        match result {
            Ok(_) => audit_event(ctx, action, resource, "", "success"),
            Err(e) => audit_event(ctx, action, resource, &e.to_string(), "failure"),
        }
    }
}
