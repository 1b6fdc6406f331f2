//! A space: configuration, versions, and key-value entries.
//!
//! [`SpaceState`] is plain data and doubles as the snapshot image of a space.
//! [`Space`] wraps it with the locks used by the engine:
//!
//! - `data`: readers clone what they need under a brief read lock; a write
//!   batch takes the write lock only to publish its result.
//! - `writer`: serializes write batches.
//! - `write_gate`: writers hold it shared; a restore holds it exclusive.
//! - `restoring`: held for the duration of a restore so that a second restore
//!   of the same space fails fast.

use crate::config;
use crate::error::{Error, Result};
use crate::record::VectorRecord;
use crate::schema::{SpaceConfig, SpaceUpdate};
use crate::storage::version::{Version, VersionData, VersionMeta};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Public description of a space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceInfo {
    pub space_id: u64,
    pub name: String,
    pub config: SpaceConfig,
    pub default_version: u32,
    pub version_count: usize,
    pub vector_count: usize,
    pub created_time_utc: i64,
    pub updated_time_utc: i64,
}

/// Arguments of `create_version`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVersion {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// Everything stored for one space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceState {
    pub space_id: u64,
    pub config: SpaceConfig,
    pub created_time_utc: i64,
    pub updated_time_utc: i64,
    pub default_version: u32,
    pub next_version: u32,
    pub versions: BTreeMap<u32, Version>,
    /// Key → JSON text.
    pub kv: BTreeMap<String, String>,
}

impl SpaceState {
    /// New space with version 1 as its head.
    pub fn new(space_id: u64, config: SpaceConfig, at: i64) -> Self {
        let initial = config::INITIAL_VERSION;
        let mut versions = BTreeMap::new();
        versions.insert(
            initial,
            Version {
                meta: VersionMeta {
                    id: initial,
                    name: format!("v{initial}"),
                    description: None,
                    tag: None,
                    is_default: true,
                    created_time_utc: at,
                    updated_time_utc: at,
                },
                data: Arc::new(VersionData::new(&config)),
            },
        );
        Self {
            space_id,
            config,
            created_time_utc: at,
            updated_time_utc: at,
            default_version: initial,
            next_version: initial + 1,
            versions,
            kv: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn info(&self) -> SpaceInfo {
        SpaceInfo {
            space_id: self.space_id,
            name: self.config.name.clone(),
            config: self.config.clone(),
            default_version: self.default_version,
            version_count: self.versions.len(),
            vector_count: self
                .versions
                .get(&self.default_version)
                .map_or(0, |v| v.data.vector_count()),
            created_time_utc: self.created_time_utc,
            updated_time_utc: self.updated_time_utc,
        }
    }

    // ── Versions ───────────────────────────────────────────────────────

    /// Resolve a requested version; `0` is the head.
    pub fn resolve_version(&self, version: u32) -> Result<u32> {
        if version == config::HEAD_VERSION {
            return Ok(self.default_version);
        }
        if self.versions.contains_key(&version) {
            Ok(version)
        } else {
            Err(Error::not_found(format!(
                "version {version} of space '{}'",
                self.name()
            )))
        }
    }

    pub fn version(&self, version: u32) -> Result<&Version> {
        let id = self.resolve_version(version)?;
        self.versions
            .get(&id)
            .ok_or_else(|| Error::not_found(format!("version {id}")))
    }

    /// Shared handle to a version's data, for lock-free reads.
    pub fn version_data(&self, version: u32) -> Result<Arc<VersionData>> {
        Ok(Arc::clone(&self.version(version)?.data))
    }

    fn head_mut(&mut self, version: u32) -> Result<&mut Version> {
        let id = self.resolve_version(version)?;
        if id != self.default_version {
            return Err(Error::Conflict(format!(
                "version {id} of space '{}' is sealed; only the default version {} accepts writes",
                self.name(),
                self.default_version
            )));
        }
        self.versions
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("version {id}")))
    }

    pub fn create_version(&mut self, req: NewVersion, at: i64) -> Result<VersionMeta> {
        let id = self.next_version;
        let head = self
            .versions
            .get(&self.default_version)
            .ok_or_else(|| Error::not_found("default version"))?;
        let data = Arc::clone(&head.data);
        let meta = VersionMeta {
            id,
            name: req.name.unwrap_or_else(|| format!("v{id}")),
            description: req.description,
            tag: req.tag,
            is_default: req.is_default,
            created_time_utc: at,
            updated_time_utc: at,
        };
        if req.is_default {
            if let Some(prev) = self.versions.get_mut(&self.default_version) {
                prev.meta.is_default = false;
                prev.meta.updated_time_utc = at;
            }
            self.default_version = id;
        }
        self.versions.insert(
            id,
            Version {
                meta: meta.clone(),
                data,
            },
        );
        self.next_version += 1;
        self.updated_time_utc = at;
        Ok(meta)
    }

    pub fn delete_version(&mut self, version: u32) -> Result<()> {
        let id = self.resolve_version(version)?;
        if id == self.default_version {
            return Err(Error::Conflict(format!(
                "version {id} is the default version of space '{}'",
                self.name()
            )));
        }
        self.versions.remove(&id);
        Ok(())
    }

    /// Versions in ascending id order, offset-paginated. Returns `(total, page)`.
    pub fn list_versions(&self, start: usize, limit: usize) -> (usize, Vec<VersionMeta>) {
        (
            self.versions.len(),
            self.versions
                .values()
                .skip(start)
                .take(limit)
                .map(|v| v.meta.clone())
                .collect(),
        )
    }

    // ── Vectors ────────────────────────────────────────────────────────

    /// Validate, then apply a batch to the head. Returns the effective version.
    pub fn upsert_vectors(
        &mut self,
        version: u32,
        index: Option<&str>,
        records: Vec<VectorRecord>,
        at: i64,
    ) -> Result<u32> {
        if records.len() > config::MAX_BATCH_SIZE {
            return Err(Error::validation(format!(
                "batch of {} vectors exceeds maximum of {}",
                records.len(),
                config::MAX_BATCH_SIZE
            )));
        }
        let head = self.head_mut(version)?;
        head.data.index(index)?.check_batch(&records)?;
        let id = head.meta.id;
        Arc::make_mut(&mut head.data).index_mut(index)?.upsert(records);
        head.meta.updated_time_utc = at;
        self.updated_time_utc = at;
        Ok(id)
    }

    pub fn delete_vector(
        &mut self,
        version: u32,
        index: Option<&str>,
        id: u64,
        at: i64,
    ) -> Result<u32> {
        let head = self.head_mut(version)?;
        if head.data.index(index)?.get(id).is_none() {
            return Err(Error::not_found(format!("vector {id}")));
        }
        let vid = head.meta.id;
        Arc::make_mut(&mut head.data).index_mut(index)?.delete(id);
        head.meta.updated_time_utc = at;
        self.updated_time_utc = at;
        Ok(vid)
    }

    /// Whether any version holds vectors in the given index.
    pub fn populated(&self, index: Option<&str>) -> bool {
        self.versions
            .values()
            .any(|v| v.data.index(index).is_ok_and(|i| !i.is_empty()))
    }

    /// Merge a partial config update and refit affected indexes in every version.
    pub fn update(&mut self, update: &SpaceUpdate, at: i64) -> Result<()> {
        let merged = update.merge(&self.config, |index| self.populated(index))?;
        if !merged.changed.is_empty() {
            for version in self.versions.values_mut() {
                Arc::make_mut(&mut version.data).apply_config(&merged.config, &merged.changed);
            }
            tracing::info!(
                space = %self.config.name,
                changed = merged.changed.len(),
                "Indexes refitted after config update"
            );
        }
        self.config = merged.config;
        self.updated_time_utc = at;
        Ok(())
    }

    // ── Key-value ──────────────────────────────────────────────────────

    pub fn put_key(&mut self, key: String, value: String, at: i64) -> Result<()> {
        validate_key(&key)?;
        self.kv.insert(key, value);
        self.updated_time_utc = at;
        Ok(())
    }

    pub fn get_key(&self, key: &str) -> Result<&str> {
        self.kv
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::not_found(format!("key '{key}'")))
    }

    pub fn delete_key(&mut self, key: &str) -> Result<()> {
        self.kv
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("key '{key}'")))
    }

    /// Keys in ascending order, offset-paginated. Returns `(total, page)`.
    pub fn list_keys(&self, start: usize, limit: usize) -> (usize, Vec<String>) {
        (
            self.kv.len(),
            self.kv.keys().skip(start).take(limit).cloned().collect(),
        )
    }

    /// Structural checks on a decoded image.
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.config.validate().map_err(|e| e.to_string())?;
        if !self.versions.contains_key(&self.default_version) {
            return Err(format!(
                "space '{}': default version {} missing",
                self.name(),
                self.default_version
            ));
        }
        for (id, v) in &self.versions {
            if *id >= self.next_version || v.meta.id != *id {
                return Err(format!("space '{}': bad version id {id}", self.name()));
            }
            if v.data.primary.config.dimension != self.config.dense.dimension {
                return Err(format!(
                    "space '{}' version {id}: primary dimension mismatch",
                    self.name()
                ));
            }
            v.data
                .validate()
                .map_err(|e| format!("space '{}' version {id}: {e}", self.name()))?;
        }
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > config::MAX_KEY_LEN {
        return Err(Error::validation(format!(
            "key must be 1..={} bytes",
            config::MAX_KEY_LEN
        )));
    }
    Ok(())
}

/// A live space with its locks.
#[derive(Debug)]
pub struct Space {
    pub data: RwLock<SpaceState>,
    pub writer: Mutex<()>,
    pub write_gate: RwLock<()>,
    pub restoring: Mutex<()>,
}

impl Space {
    pub fn new(state: SpaceState) -> Self {
        Self {
            data: RwLock::new(state),
            writer: Mutex::new(()),
            write_gate: RwLock::new(()),
            restoring: Mutex::new(()),
        }
    }

    /// Consistent copy of the state. Version data is shared, not copied.
    pub fn capture(&self) -> SpaceState {
        self.data.read().clone()
    }

    pub fn space_id(&self) -> u64 {
        self.data.read().space_id
    }
}
