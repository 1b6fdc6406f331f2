//! Space and index configuration: wire payloads, validation, and partial updates.
//!
//! [`SpaceConfig`] is the validated, persisted form. [`CreateSpace`] is the
//! flat request payload clients send; [`SpaceUpdate`] is the partial-merge
//! payload for `update_space`. Persisted types avoid `#[serde(flatten)]` and
//! untyped JSON so that they stay bincode-compatible.

use crate::config;
use crate::error::{Error, Result};
use crate::hnsw::{DistanceMetric, HnswConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// User-facing HNSW parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParams {
    #[serde(alias = "M")]
    pub m: usize,
    #[serde(default = "default_ef_construct")]
    pub ef_construct: usize,
}

fn default_ef_construct() -> usize {
    config::HNSW_DEFAULT_EF_CONSTRUCTION
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: config::HNSW_DEFAULT_M,
            ef_construct: config::HNSW_DEFAULT_EF_CONSTRUCTION,
        }
    }
}

/// `{"type": "int8"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarQuantization {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuantizationConfig {
    #[serde(default)]
    pub scalar: Option<ScalarQuantization>,
}

/// Sparse vector settings. Accepted and stored, never indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseConfig {
    pub metric: String,
}

/// Configuration of one dense index (the primary one or a named sub-index).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub dimension: usize,
    pub metric: DistanceMetric,
    #[serde(default)]
    pub hnsw_config: HnswParams,
    #[serde(default)]
    pub quantization_config: Option<QuantizationConfig>,
}

impl IndexConfig {
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            metric,
            hnsw_config: HnswParams::default(),
            quantization_config: None,
        }
    }

    /// Whether vectors are stored as int8 codes for graph traversal.
    pub fn quantized(&self) -> bool {
        self.quantization_config
            .as_ref()
            .and_then(|q| q.scalar.as_ref())
            .is_some()
    }

    /// Graph parameters derived from this config.
    pub fn hnsw(&self) -> HnswConfig {
        HnswConfig::new(
            self.metric,
            self.hnsw_config.m,
            self.hnsw_config.ef_construct,
            self.quantized(),
        )
    }

    /// `true` when switching from `self` to `other` keeps stored vectors valid.
    pub fn same_shape(&self, other: &IndexConfig) -> bool {
        self.dimension == other.dimension && self.metric == other.metric
    }

    pub fn validate(&self, what: &str) -> Result<()> {
        if self.dimension == 0 || self.dimension > config::MAX_DIMENSION {
            return Err(Error::validation(format!(
                "{what}: dimension must be in 1..={}, got {}",
                config::MAX_DIMENSION,
                self.dimension
            )));
        }
        if !config::HNSW_M_RANGE.contains(&self.hnsw_config.m) {
            return Err(Error::validation(format!(
                "{what}: hnsw m must be in {:?}, got {}",
                config::HNSW_M_RANGE,
                self.hnsw_config.m
            )));
        }
        if !config::HNSW_EF_CONSTRUCT_RANGE.contains(&self.hnsw_config.ef_construct) {
            return Err(Error::validation(format!(
                "{what}: hnsw ef_construct must be in {:?}, got {}",
                config::HNSW_EF_CONSTRUCT_RANGE,
                self.hnsw_config.ef_construct
            )));
        }
        if let Some(scalar) = self
            .quantization_config
            .as_ref()
            .and_then(|q| q.scalar.as_ref())
        {
            if !scalar.kind.eq_ignore_ascii_case("int8") {
                return Err(Error::validation(format!(
                    "{what}: unsupported quantization type '{}' (expected int8)",
                    scalar.kind
                )));
            }
        }
        Ok(())
    }
}

/// Validated definition of a space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceConfig {
    pub name: String,
    pub dense: IndexConfig,
    pub sparse: Option<SparseConfig>,
    pub indexes: BTreeMap<String, IndexConfig>,
    pub description: Option<String>,
}

impl SpaceConfig {
    /// Config of the addressed index; `None` selects the primary index.
    pub fn index(&self, name: Option<&str>) -> Result<&IndexConfig> {
        match name {
            None => Ok(&self.dense),
            Some(n) => self
                .indexes
                .get(n)
                .ok_or_else(|| Error::not_found(format!("index '{n}' in space '{}'", self.name))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name, "space name")?;
        self.dense.validate("dense")?;
        for (name, cfg) in &self.indexes {
            validate_name(name, "index name")?;
            cfg.validate(&format!("index '{name}'"))?;
        }
        Ok(())
    }
}

/// Names of spaces and named indexes: 1..=128 chars of `[A-Za-z0-9_-]`.
pub fn validate_name(name: &str, what: &str) -> Result<()> {
    if name.is_empty() || name.len() > config::MAX_SPACE_NAME_LEN {
        return Err(Error::validation(format!(
            "{what} must be 1..={} characters",
            config::MAX_SPACE_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::validation(format!(
            "{what} '{name}' may only contain letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

// ── Wire payloads ──────────────────────────────────────────────────────

/// Dense settings as sent by clients. Every field is optional in updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DenseUpdate {
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default)]
    pub metric: Option<DistanceMetric>,
    #[serde(default)]
    pub hnsw_config: Option<HnswParams>,
    #[serde(default)]
    pub quantization_config: Option<QuantizationConfig>,
}

/// `create_space` payload.
///
/// Dense settings may be given at the top level or under `dense`; top-level
/// fields win when both are present.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CreateSpace {
    pub name: String,
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default)]
    pub metric: Option<DistanceMetric>,
    #[serde(default)]
    pub hnsw_config: Option<HnswParams>,
    #[serde(default)]
    pub quantization_config: Option<QuantizationConfig>,
    #[serde(default)]
    pub dense: Option<DenseUpdate>,
    #[serde(default)]
    pub sparse: Option<SparseConfig>,
    #[serde(default)]
    pub indexes: Option<BTreeMap<String, IndexConfig>>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateSpace {
    /// Resolve into a validated [`SpaceConfig`].
    pub fn into_config(self) -> Result<SpaceConfig> {
        let dense = self.dense.unwrap_or_default();
        let dimension = self
            .dimension
            .or(dense.dimension)
            .ok_or_else(|| Error::validation("dimension is required"))?;
        let metric = self
            .metric
            .or(dense.metric)
            .ok_or_else(|| Error::validation("metric is required"))?;
        let cfg = SpaceConfig {
            name: self.name,
            dense: IndexConfig {
                dimension,
                metric,
                hnsw_config: self.hnsw_config.or(dense.hnsw_config).unwrap_or_default(),
                quantization_config: self.quantization_config.or(dense.quantization_config),
            },
            sparse: self.sparse,
            indexes: self.indexes.unwrap_or_default(),
            description: self.description,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// `update_space` payload: a partial merge onto the current config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpaceUpdate {
    #[serde(default)]
    pub dense: Option<DenseUpdate>,
    #[serde(default)]
    pub indexes: Option<BTreeMap<String, IndexConfig>>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Result of merging a [`SpaceUpdate`]: the new config and the indexes whose
/// settings changed (`None` = primary).
#[derive(Debug, Clone, PartialEq)]
pub struct MergedConfig {
    pub config: SpaceConfig,
    pub changed: Vec<Option<String>>,
}

impl SpaceUpdate {
    /// Merge onto `current`.
    ///
    /// `populated(index)` reports whether any version holds vectors in that
    /// index. Changing the dimension or metric of a populated index fails.
    pub fn merge(
        &self,
        current: &SpaceConfig,
        populated: impl Fn(Option<&str>) -> bool,
    ) -> Result<MergedConfig> {
        let mut next = current.clone();
        let mut changed = Vec::new();

        if let Some(d) = &self.dense {
            let mut dense = current.dense.clone();
            if let Some(v) = d.dimension {
                dense.dimension = v;
            }
            if let Some(v) = d.metric {
                dense.metric = v;
            }
            if let Some(v) = d.hnsw_config {
                dense.hnsw_config = v;
            }
            if let Some(v) = &d.quantization_config {
                dense.quantization_config = Some(v.clone());
            }
            if dense != current.dense {
                if !dense.same_shape(&current.dense) && populated(None) {
                    return Err(Error::validation(
                        "cannot change dimension or metric of a populated index",
                    ));
                }
                next.dense = dense;
                changed.push(None);
            }
        }

        if let Some(indexes) = &self.indexes {
            for (name, cfg) in indexes {
                match current.indexes.get(name) {
                    Some(old) if old == cfg => continue,
                    Some(old) if !old.same_shape(cfg) && populated(Some(name)) => {
                        return Err(Error::validation(format!(
                            "cannot change dimension or metric of populated index '{name}'"
                        )));
                    }
                    _ => {}
                }
                next.indexes.insert(name.clone(), cfg.clone());
                changed.push(Some(name.clone()));
            }
        }

        if let Some(desc) = &self.description {
            next.description = Some(desc.clone());
        }

        next.validate()?;
        Ok(MergedConfig {
            config: next,
            changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn create(json: &str) -> Result<SpaceConfig> {
        serde_json::from_str::<CreateSpace>(json)
            .map_err(|e| Error::validation(e.to_string()))?
            .into_config()
    }

    // ── Create payload ─────────────────────────────────────────────────

    #[test]
    fn test_create_flat_payload() {
        let cfg = create(
            r#"{"name":"spacename","dimension":4,"metric":"L2","hnsw_config":{"M":8,"ef_construct":100}}"#,
        )
        .unwrap();
        assert_eq!(cfg.dense.dimension, 4);
        assert_eq!(cfg.dense.metric, DistanceMetric::L2);
        assert_eq!(cfg.dense.hnsw_config.m, 8);
        assert!(!cfg.dense.quantized());
    }

    #[test]
    fn test_create_dense_block_and_extras() {
        let cfg = create(
            r#"{"name":"s2","dense":{"dimension":8,"metric":"cosine"},
                "quantization_config":{"scalar":{"type":"int8"}},
                "sparse":{"metric":"Cosine"},
                "indexes":{"img":{"dimension":2,"metric":"ip"}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.dense.metric, DistanceMetric::Cosine);
        assert!(cfg.dense.quantized());
        assert_eq!(cfg.indexes["img"].metric, DistanceMetric::Dot);
        assert_eq!(cfg.indexes["img"].hnsw_config, HnswParams::default());
        assert!(cfg.sparse.is_some());
    }

    #[test]
    fn test_create_validation_failures() {
        let bad = [
            r#"{"name":"bad name","dimension":4,"metric":"L2"}"#,
            r#"{"name":"","dimension":4,"metric":"L2"}"#,
            r#"{"name":"x","dimension":0,"metric":"L2"}"#,
            r#"{"name":"x","dimension":4097,"metric":"L2"}"#,
            r#"{"name":"x","dimension":4,"metric":"L2","hnsw_config":{"m":1}}"#,
            r#"{"name":"x","dimension":4,"metric":"L2","hnsw_config":{"m":16,"ef_construct":0}}"#,
            r#"{"name":"x","dimension":4,"metric":"L2","quantization_config":{"scalar":{"type":"float16"}}}"#,
            r#"{"name":"x","metric":"L2"}"#,
            r#"{"name":"x","dimension":4,"metric":"hamming"}"#,
        ];
        for json in bad {
            let err = create(json).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{json}");
        }
    }

    #[test]
    fn test_name_length_limit() {
        assert!(validate_name(&"a".repeat(128), "n").is_ok());
        assert!(validate_name(&"a".repeat(129), "n").is_err());
    }

    // ── Update merge ───────────────────────────────────────────────────

    fn base() -> SpaceConfig {
        create(r#"{"name":"s","dimension":4,"metric":"L2"}"#).unwrap()
    }

    #[test]
    fn test_update_hnsw_marks_primary_changed() {
        let upd = SpaceUpdate {
            dense: Some(DenseUpdate {
                hnsw_config: Some(HnswParams {
                    m: 32,
                    ef_construct: 64,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = upd.merge(&base(), |_| true).unwrap();
        assert_eq!(merged.config.dense.hnsw_config.m, 32);
        assert_eq!(merged.changed, vec![None]);
    }

    #[test]
    fn test_update_dimension_rejected_when_populated() {
        let upd = SpaceUpdate {
            dense: Some(DenseUpdate {
                dimension: Some(8),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = upd.merge(&base(), |_| true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let ok = upd.merge(&base(), |_| false).unwrap();
        assert_eq!(ok.config.dense.dimension, 8);
    }

    #[test]
    fn test_update_adds_index_and_description() {
        let mut indexes = BTreeMap::new();
        indexes.insert("txt".to_string(), IndexConfig::new(3, DistanceMetric::Cosine));
        let upd = SpaceUpdate {
            indexes: Some(indexes),
            description: Some("docs".into()),
            ..Default::default()
        };
        let merged = upd.merge(&base(), |_| false).unwrap();
        assert!(merged.config.indexes.contains_key("txt"));
        assert_eq!(merged.config.description.as_deref(), Some("docs"));
        assert_eq!(merged.changed, vec![Some("txt".to_string())]);
    }

    #[test]
    fn test_noop_update_changes_nothing() {
        let upd = SpaceUpdate {
            dense: Some(DenseUpdate {
                dimension: Some(4),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = upd.merge(&base(), |_| true).unwrap();
        assert!(merged.changed.is_empty());
        assert_eq!(merged.config, base());
    }

    #[test]
    fn test_config_bincode_compatible() {
        let cfg = create(
            r#"{"name":"b","dimension":2,"metric":"dot","quantization_config":{"scalar":{"type":"int8"}}}"#,
        )
        .unwrap();
        let bytes = bincode::serialize(&cfg).unwrap();
        let back: SpaceConfig = bincode::deserialize(&bytes).unwrap();
        assert_eq!(cfg, back);
    }
}
