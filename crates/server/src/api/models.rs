//! Request and response data transfer objects for the REST API.
//!
//! Metadata values travel as plain JSON scalars and are converted to and from
//! the core's tagged [`MetadataValue`] here.

use serde::{Deserialize, Serialize};
use spacevec_core::config;
use spacevec_core::rbac::{Scopes, Token, TokenSpec};
use spacevec_core::record::{MetadataValue, VectorRecord};
use spacevec_core::search::types::{RerankHit, SearchHit};
use spacevec_core::snapshot::SnapshotInfo;
use spacevec_core::storage::{SpaceInfo, VersionMeta};
use spacevec_core::Error;
use std::collections::HashMap;

/// Convert JSON metadata to core values. Arrays, objects and null are rejected.
pub fn json_to_metadata(
    map: HashMap<String, serde_json::Value>,
) -> Result<HashMap<String, MetadataValue>, Error> {
    map.into_iter()
        .map(|(k, v)| {
            let mv = match v {
                serde_json::Value::Bool(b) => MetadataValue::Boolean(b),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => MetadataValue::Integer(i),
                    None => MetadataValue::Float(n.as_f64().unwrap_or(0.0)),
                },
                serde_json::Value::String(s) => MetadataValue::String(s),
                other => {
                    return Err(Error::Validation(format!(
                        "metadata '{k}' must be a boolean, number or string, got {other}"
                    )))
                }
            };
            Ok((k, mv))
        })
        .collect()
}

/// Convert core metadata to JSON for responses.
pub fn metadata_to_json(
    map: &HashMap<String, MetadataValue>,
) -> HashMap<String, serde_json::Value> {
    map.iter()
        .map(|(k, v)| {
            let jv = match v {
                MetadataValue::Boolean(b) => serde_json::Value::Bool(*b),
                MetadataValue::Integer(i) => serde_json::json!(*i),
                MetadataValue::Float(f) => serde_json::json!(*f),
                MetadataValue::String(s) => serde_json::Value::String(s.clone()),
            };
            (k.clone(), jv)
        })
        .collect()
}

fn default_top_k() -> usize {
    config::DEFAULT_TOP_K
}

fn default_limit() -> usize {
    config::DEFAULT_PAGE_LIMIT
}

// ── Vectors ────────────────────────────────────────────────────────────

/// One vector in an upsert payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIn {
    pub id: u64,
    pub data: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub doc: Option<String>,
    #[serde(default)]
    pub doc_tokens: Option<Vec<String>>,
}

impl TryFrom<VectorIn> for VectorRecord {
    type Error = Error;

    fn try_from(v: VectorIn) -> Result<Self, Self::Error> {
        Ok(VectorRecord {
            id: v.id,
            data: v.data,
            metadata: json_to_metadata(v.metadata)?,
            doc: v.doc,
            doc_tokens: v.doc_tokens,
        })
    }
}

/// A stored vector as returned by `get_vectors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorOut {
    pub id: u64,
    pub data: Vec<f32>,
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_tokens: Option<Vec<String>>,
}

impl From<VectorRecord> for VectorOut {
    fn from(r: VectorRecord) -> Self {
        Self {
            id: r.id,
            metadata: metadata_to_json(&r.metadata),
            data: r.data,
            doc: r.doc,
            doc_tokens: r.doc_tokens,
        }
    }
}

/// Request body for `POST /api/space/:space/vector`.
#[derive(Debug, Deserialize)]
pub struct UpsertRequest {
    pub vectors: Vec<VectorIn>,
    /// Target version; omitted or `0` means the default version.
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub index: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpsertResponse {
    pub version: u32,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VectorsResponse {
    pub total_count: usize,
    pub vectors: Vec<VectorOut>,
}

/// Query string of `GET .../vectors`.
#[derive(Debug, Deserialize)]
pub struct VectorsQuery {
    #[serde(default)]
    pub start: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
}

/// Query string of `DELETE .../vector/:id`.
#[derive(Debug, Default, Deserialize)]
pub struct IndexQuery {
    #[serde(default)]
    pub index: Option<String>,
}

// ── Search ─────────────────────────────────────────────────────────────

/// Request body for `search`.
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
}

/// Request body for `rerank`.
#[derive(Debug, Deserialize)]
pub struct RerankRequest {
    pub vector: Vec<f32>,
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub index: Option<String>,
}

pub type SearchResponse = Vec<SearchHit>;
pub type RerankResponse = Vec<RerankHit>;

// ── Spaces, versions, keys ─────────────────────────────────────────────

pub type SpaceResponse = SpaceInfo;
pub type VersionResponse = VersionMeta;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub start: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PageResponse<T> {
    pub total_count: usize,
    pub values: Vec<T>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyResponse {
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

// ── Tokens ─────────────────────────────────────────────────────────────

/// Request body of `create_token` and `update_token`: flat scope ordinals.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub user_id: u64,
    #[serde(default)]
    pub space_id: u64,
    #[serde(default)]
    pub system: u8,
    #[serde(default)]
    pub space: u8,
    #[serde(default)]
    pub version: u8,
    #[serde(default)]
    pub vector: u8,
    #[serde(default)]
    pub snapshot: u8,
    #[serde(default)]
    pub security: u8,
    #[serde(default)]
    pub keyvalue: u8,
    #[serde(default)]
    pub expire_time_utc: i64,
}

impl From<TokenRequest> for TokenSpec {
    fn from(r: TokenRequest) -> Self {
        TokenSpec {
            user_id: r.user_id,
            space_id: r.space_id,
            expire_time_utc: r.expire_time_utc,
            scopes: Scopes {
                system: r.system,
                space: r.space,
                version: r.version,
                vector: r.vector,
                snapshot: r.snapshot,
                security: r.security,
                keyvalue: r.keyvalue,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub result: bool,
    pub token: Token,
}

// ── Snapshots ──────────────────────────────────────────────────────────

/// Request body for `POST /api/snapshot`. No `spacename` means the whole system.
#[derive(Debug, Default, Deserialize)]
pub struct SnapshotRequest {
    #[serde(default)]
    pub spacename: Option<String>,
}

pub type SnapshotResponse = SnapshotInfo;

// ── Health ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub spaces_count: usize,
    pub total_vectors: usize,
    pub leader: bool,
    pub wal_size_bytes: u64,
    pub disk_available_bytes: u64,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_to_metadata_scalars() {
        let map: HashMap<String, serde_json::Value> = serde_json::from_value(serde_json::json!({
            "b": true, "i": 3, "f": 1.5, "s": "x"
        }))
        .unwrap();
        let out = json_to_metadata(map).unwrap();
        assert_eq!(out["b"], MetadataValue::Boolean(true));
        assert_eq!(out["i"], MetadataValue::Integer(3));
        assert_eq!(out["f"], MetadataValue::Float(1.5));
        assert_eq!(out["s"], MetadataValue::String("x".into()));
    }

    #[test]
    fn test_json_to_metadata_rejects_nested() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), serde_json::json!([1, 2]));
        assert!(json_to_metadata(map).is_err());
    }

    #[test]
    fn test_token_request_flattens_scopes() {
        let req: TokenRequest = serde_json::from_value(serde_json::json!({
            "user_id": 7, "system": 1, "space": 2, "version": 1, "vector": 2, "snapshot": 0
        }))
        .unwrap();
        let spec = TokenSpec::from(req);
        assert_eq!(spec.user_id, 7);
        assert_eq!(spec.space_id, 0);
        assert_eq!(spec.scopes.space, 2);
        assert_eq!(spec.scopes.security, 0);
    }

    #[test]
    fn test_search_request_defaults() {
        let req: SearchRequest =
            serde_json::from_value(serde_json::json!({"vector": [0.1, 0.2]})).unwrap();
        assert_eq!(req.top_k, config::DEFAULT_TOP_K);
        assert!(req.filter.is_none());
    }
}
