//! Versions: numbered vector sets of a space.
//!
//! A version owns one [`VectorIndex`] for the primary dense index and one per
//! named sub-index. Version data sits behind an `Arc` in the space state; the
//! head is mutated through `Arc::make_mut`, so readers and snapshots holding an
//! older `Arc` keep an unchanged copy.

use crate::error::{Error, Result};
use crate::schema::SpaceConfig;
use crate::storage::index::VectorIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Descriptive metadata of a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMeta {
    pub id: u32,
    pub name: String,
    pub description: Option<String>,
    pub tag: Option<String>,
    pub is_default: bool,
    pub created_time_utc: i64,
    pub updated_time_utc: i64,
}

/// Indexes of one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionData {
    pub primary: VectorIndex,
    pub named: BTreeMap<String, VectorIndex>,
}

impl VersionData {
    /// Empty indexes for every index the space defines.
    pub fn new(config: &SpaceConfig) -> Self {
        Self {
            primary: VectorIndex::new(config.dense.clone()),
            named: config
                .indexes
                .iter()
                .map(|(name, cfg)| (name.clone(), VectorIndex::new(cfg.clone())))
                .collect(),
        }
    }

    pub fn index(&self, name: Option<&str>) -> Result<&VectorIndex> {
        match name {
            None => Ok(&self.primary),
            Some(n) => self
                .named
                .get(n)
                .ok_or_else(|| Error::not_found(format!("index '{n}'"))),
        }
    }

    pub fn index_mut(&mut self, name: Option<&str>) -> Result<&mut VectorIndex> {
        match name {
            None => Ok(&mut self.primary),
            Some(n) => self
                .named
                .get_mut(n)
                .ok_or_else(|| Error::not_found(format!("index '{n}'"))),
        }
    }

    /// Total records across all indexes.
    pub fn vector_count(&self) -> usize {
        self.primary.len() + self.named.values().map(VectorIndex::len).sum::<usize>()
    }

    /// Bring the indexes listed in `changed` in line with `config`.
    ///
    /// Populated indexes are rebuilt (their shape is unchanged); empty or new
    /// indexes are recreated.
    pub fn apply_config(&mut self, config: &SpaceConfig, changed: &[Option<String>]) {
        for target in changed {
            let Ok(cfg) = config.index(target.as_deref()) else {
                continue;
            };
            let cfg = cfg.clone();
            match target {
                None => refit(&mut self.primary, cfg),
                Some(name) => match self.named.get_mut(name) {
                    Some(idx) => refit(idx, cfg),
                    None => {
                        self.named.insert(name.clone(), VectorIndex::new(cfg));
                    }
                },
            }
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        self.primary.validate().map_err(|e| format!("primary: {e}"))?;
        for (name, idx) in &self.named {
            idx.validate().map_err(|e| format!("index '{name}': {e}"))?;
        }
        Ok(())
    }
}

fn refit(idx: &mut VectorIndex, cfg: crate::schema::IndexConfig) {
    if idx.is_empty() {
        *idx = VectorIndex::new(cfg);
    } else {
        idx.rebuild(cfg);
    }
}

/// A version: metadata plus shared data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub meta: VersionMeta,
    pub data: Arc<VersionData>,
}
