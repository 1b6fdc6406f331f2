//! Point-in-time snapshots of one space or the whole system.
//!
//! A snapshot is a [`SystemImage`] written as an artifact
//! (`[header][image]["SVS1"][CRC32]`, see [`crate::storage::persistence`]) to
//! `snapshot-<id>.snap`, where `<id>` is the UTC creation time formatted as
//! `YYYYMMDDHHMMSSmmm`. The engine is reached only through [`StateSource`].

use crate::config;
use crate::error::{Error, Result};
use crate::storage::persistence::{decode_artifact, encode_artifact, read_header, write_atomic};
use crate::storage::space::SpaceState;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// What a snapshot covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotScope {
    System,
    Space(String),
}

impl fmt::Display for SnapshotScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotScope::System => f.write_str("system"),
            SnapshotScope::Space(name) => write!(f, "space:{name}"),
        }
    }
}

/// Leading part of every artifact, readable without decoding the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub format_version: u32,
    pub scope: SnapshotScope,
    pub created_time_utc: i64,
}

/// Serialized state of the spaces in a scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemImage {
    pub scope: SnapshotScope,
    pub next_space_id: u64,
    pub spaces: Vec<SpaceState>,
}

impl SystemImage {
    /// Structural checks run before an image may replace live state.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Error::validation(format!("invalid snapshot image: {msg}"));
        if let SnapshotScope::Space(name) = &self.scope {
            if self.spaces.len() != 1 || self.spaces[0].name() != name {
                return Err(invalid(format!("space image must hold exactly space '{name}'")));
            }
        }
        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for space in &self.spaces {
            if !names.insert(space.name()) {
                return Err(invalid(format!("duplicate space '{}'", space.name())));
            }
            if !ids.insert(space.space_id) {
                return Err(invalid(format!("duplicate space id {}", space.space_id)));
            }
            space.validate().map_err(invalid)?;
        }
        Ok(())
    }
}

/// Access to live engine state.
pub trait StateSource {
    /// Consistent copy of the spaces in `scope`.
    fn capture(&self, scope: &SnapshotScope) -> Result<SystemImage>;
    /// Replace the live state of `image.scope` with `image`.
    fn replace(&self, image: SystemImage) -> Result<()>;
}

/// Lifecycle of one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotState {
    Requested,
    Capturing,
    Available,
    Deleted,
}

/// One entry of `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: String,
    pub file_name: String,
    /// RFC 3339 creation time.
    pub date: String,
    pub size: u64,
    pub scope: SnapshotScope,
    pub state: SnapshotState,
}

/// `snapshot-<id>.snap`
pub fn file_name_for(id: &str) -> String {
    format!(
        "{}{id}.{}",
        config::SNAPSHOT_FILE_PREFIX,
        config::SNAPSHOT_FILE_EXT
    )
}

/// Recover the id from a file name: `split('-')[1].split('.')[0]`.
pub fn id_from_file_name(file_name: &str) -> Option<String> {
    let id = file_name.split('-').nth(1)?.split('.').next()?;
    valid_id(id).then(|| id.to_string())
}

fn valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 32 && id.bytes().all(|b| b.is_ascii_digit())
}

/// Encode an image with its header.
pub fn encode(image: &SystemImage, created_time_utc: i64) -> Result<Vec<u8>> {
    let header = SnapshotHeader {
        format_version: config::SNAPSHOT_FORMAT_VERSION,
        scope: image.scope.clone(),
        created_time_utc,
    };
    Ok(encode_artifact(&header, image)?)
}

/// Verify and decode an artifact, then validate the image.
pub fn decode(raw: &[u8]) -> Result<(SnapshotHeader, SystemImage)> {
    let (header, image): (SnapshotHeader, SystemImage) =
        decode_artifact(raw).map_err(|e| Error::validation(format!("invalid snapshot: {e}")))?;
    if header.format_version != config::SNAPSHOT_FORMAT_VERSION {
        return Err(Error::validation(format!(
            "unsupported snapshot format version {}",
            header.format_version
        )));
    }
    if header.scope != image.scope {
        return Err(Error::validation("snapshot header and image scope differ"));
    }
    image.validate()?;
    Ok((header, image))
}

fn format_date(secs: i64) -> String {
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|d| d.to_rfc3339())
        .unwrap_or_default()
}

/// Creates, lists, loads, and deletes snapshot artifacts in one directory.
#[derive(Debug)]
pub struct SnapshotManager {
    dir: PathBuf,
    states: Mutex<BTreeMap<String, (SnapshotScope, SnapshotState)>>,
}

impl SnapshotManager {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            states: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve a fresh id, bumping past any id already in use.
    fn reserve_id(&self, scope: &SnapshotScope) -> String {
        let mut states = self.states.lock();
        let mut id = Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
        while states.contains_key(&id) || self.dir.join(file_name_for(&id)).exists() {
            id = match id.parse::<u64>() {
                Ok(n) => (n + 1).to_string(),
                Err(_) => format!("{id}0"),
            };
        }
        states.insert(id.clone(), (scope.clone(), SnapshotState::Requested));
        id
    }

    fn set_state(&self, id: &str, state: SnapshotState) {
        if let Some(entry) = self.states.lock().get_mut(id) {
            entry.1 = state;
        }
    }

    fn forget(&self, id: &str) {
        self.states.lock().remove(id);
    }

    /// Capture `scope` from `source` and write it as a new artifact.
    pub fn create(&self, source: &dyn StateSource, scope: SnapshotScope) -> Result<SnapshotInfo> {
        let id = self.reserve_id(&scope);
        self.set_state(&id, SnapshotState::Capturing);
        let result = source.capture(&scope).and_then(|image| {
            let raw = encode(&image, Utc::now().timestamp())?;
            write_atomic(&self.dir.join(file_name_for(&id)), &raw)?;
            Ok(())
        });
        match result {
            Ok(()) => {
                self.set_state(&id, SnapshotState::Available);
                tracing::info!(snapshot = %id, scope = %scope, "Snapshot created");
                self.info(&id)
            }
            Err(e) => {
                self.forget(&id);
                tracing::warn!(snapshot = %id, error = %e, "Snapshot capture failed");
                Err(e)
            }
        }
    }

    fn info(&self, id: &str) -> Result<SnapshotInfo> {
        let file_name = file_name_for(id);
        let path = self.dir.join(&file_name);
        let header: SnapshotHeader = read_header(&path)
            .map_err(|e| Error::Io(format!("{file_name}: {e}")))?;
        let size = fs::metadata(&path)?.len();
        Ok(SnapshotInfo {
            id: id.to_string(),
            file_name,
            date: format_date(header.created_time_utc),
            size,
            scope: header.scope,
            state: SnapshotState::Available,
        })
    }

    /// Snapshots on disk plus those still being captured, ordered by id.
    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let mut out: BTreeMap<String, SnapshotInfo> = BTreeMap::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let suffix = format!(".{}", config::SNAPSHOT_FILE_EXT);
            if !name.starts_with(config::SNAPSHOT_FILE_PREFIX) || !name.ends_with(&suffix) {
                continue;
            }
            let Some(id) = id_from_file_name(&name) else {
                continue;
            };
            match self.info(&id) {
                Ok(info) => {
                    out.insert(id, info);
                }
                Err(e) => tracing::warn!(file = %name, error = %e, "Skipping unreadable snapshot"),
            }
        }
        for (id, (scope, state)) in self.states.lock().iter() {
            if matches!(state, SnapshotState::Requested | SnapshotState::Capturing) {
                out.entry(id.clone()).or_insert_with(|| SnapshotInfo {
                    id: id.clone(),
                    file_name: file_name_for(id),
                    date: String::new(),
                    size: 0,
                    scope: scope.clone(),
                    state: *state,
                });
            }
        }
        Ok(out.into_values().collect())
    }

    /// Path of an available snapshot.
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        if !valid_id(id) {
            return Err(Error::validation(format!("invalid snapshot id '{id}'")));
        }
        if matches!(
            self.states.lock().get(id),
            Some((_, SnapshotState::Requested | SnapshotState::Capturing))
        ) {
            return Err(Error::Conflict(format!("snapshot {id} is still being captured")));
        }
        let path = self.dir.join(file_name_for(id));
        if !path.is_file() {
            return Err(Error::not_found(format!("snapshot {id}")));
        }
        Ok(path)
    }

    /// Scope of a stored snapshot, read from its header.
    pub fn scope_of(&self, id: &str) -> Result<SnapshotScope> {
        let path = self.path_for(id)?;
        let header: SnapshotHeader = read_header(&path)
            .map_err(|e| Error::validation(format!("snapshot {id}: {e}")))?;
        Ok(header.scope)
    }

    /// Read and validate a stored snapshot.
    pub fn load(&self, id: &str) -> Result<SystemImage> {
        let raw = fs::read(self.path_for(id)?)?;
        Ok(decode(&raw)?.1)
    }

    /// Replace live state with a stored snapshot.
    pub fn restore(&self, id: &str, source: &dyn StateSource) -> Result<()> {
        let image = self.load(id)?;
        let scope = image.scope.clone();
        source.replace(image)?;
        tracing::info!(snapshot = %id, scope = %scope, "Snapshot restored");
        Ok(())
    }

    /// Validate uploaded bytes and store them as a new snapshot.
    ///
    /// `admit` sees the decoded scope first; its error stops the upload
    /// before anything is written.
    pub fn upload(
        &self,
        raw: &[u8],
        admit: impl FnOnce(&SnapshotScope) -> Result<()>,
    ) -> Result<(SnapshotInfo, SystemImage)> {
        let (header, image) = decode(raw)?;
        admit(&header.scope)?;
        let id = self.reserve_id(&header.scope);
        if let Err(e) = write_atomic(&self.dir.join(file_name_for(&id)), raw) {
            self.forget(&id);
            return Err(e.into());
        }
        self.set_state(&id, SnapshotState::Available);
        tracing::info!(snapshot = %id, scope = %header.scope, "Snapshot uploaded");
        Ok((self.info(&id)?, image))
    }

    /// Remove an artifact. Live state is untouched.
    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        fs::remove_file(path)?;
        self.set_state(id, SnapshotState::Deleted);
        tracing::info!(snapshot = %id, "Snapshot deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::hnsw::DistanceMetric;
    use crate::schema::{IndexConfig, SpaceConfig};
    use parking_lot::RwLock;
    use tempfile::TempDir;

    fn space(id: u64, name: &str) -> SpaceState {
        let cfg = SpaceConfig {
            name: name.into(),
            dense: IndexConfig::new(2, DistanceMetric::L2),
            sparse: None,
            indexes: BTreeMap::new(),
            description: None,
        };
        SpaceState::new(id, cfg, 1_700_000_000)
    }

    struct Fake {
        spaces: RwLock<Vec<SpaceState>>,
    }

    impl StateSource for Fake {
        fn capture(&self, scope: &SnapshotScope) -> Result<SystemImage> {
            let spaces = self.spaces.read().clone();
            let spaces = match scope {
                SnapshotScope::System => spaces,
                SnapshotScope::Space(n) => spaces.into_iter().filter(|s| s.name() == n).collect(),
            };
            Ok(SystemImage {
                scope: scope.clone(),
                next_space_id: 10,
                spaces,
            })
        }

        fn replace(&self, image: SystemImage) -> Result<()> {
            *self.spaces.write() = image.spaces;
            Ok(())
        }
    }

    fn fake() -> Fake {
        Fake {
            spaces: RwLock::new(vec![space(1, "a"), space(2, "b")]),
        }
    }

    // ── File names ─────────────────────────────────────────────────────

    #[test]
    fn test_id_from_file_name() {
        assert_eq!(
            id_from_file_name("snapshot-20240101120000123.snap").as_deref(),
            Some("20240101120000123")
        );
        assert_eq!(id_from_file_name("snapshot-../x.snap"), None);
        assert_eq!(id_from_file_name("other"), None);
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    #[test]
    fn test_create_list_load_delete() {
        let dir = TempDir::new().unwrap();
        let mgr = SnapshotManager::new(dir.path()).unwrap();
        let src = fake();
        let info = mgr.create(&src, SnapshotScope::System).unwrap();
        assert_eq!(info.state, SnapshotState::Available);
        assert_eq!(info.file_name, file_name_for(&info.id));
        assert!(info.size > 0);

        let listed = mgr.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].scope, SnapshotScope::System);

        let image = mgr.load(&info.id).unwrap();
        assert_eq!(image.spaces.len(), 2);

        mgr.delete(&info.id).unwrap();
        assert!(mgr.list().unwrap().is_empty());
        assert_eq!(mgr.load(&info.id).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_ids_are_unique() {
        let dir = TempDir::new().unwrap();
        let mgr = SnapshotManager::new(dir.path()).unwrap();
        let src = fake();
        let a = mgr.create(&src, SnapshotScope::System).unwrap();
        let b = mgr.create(&src, SnapshotScope::System).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_space_scope_restore() {
        let dir = TempDir::new().unwrap();
        let mgr = SnapshotManager::new(dir.path()).unwrap();
        let src = fake();
        let info = mgr.create(&src, SnapshotScope::Space("b".into())).unwrap();
        mgr.restore(&info.id, &src).unwrap();
        let names: Vec<String> = src.spaces.read().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["b"]);
    }

    #[test]
    fn test_corrupt_artifact_rejected() {
        let dir = TempDir::new().unwrap();
        let mgr = SnapshotManager::new(dir.path()).unwrap();
        let src = fake();
        let info = mgr.create(&src, SnapshotScope::System).unwrap();
        let path = mgr.path_for(&info.id).unwrap();
        let mut raw = fs::read(&path).unwrap();
        raw[3] ^= 0xFF;
        fs::write(&path, &raw).unwrap();
        let err = mgr.restore(&info.id, &src).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(src.spaces.read().len(), 2);
    }

    #[test]
    fn test_upload_stores_copy() {
        let dir = TempDir::new().unwrap();
        let mgr = SnapshotManager::new(dir.path()).unwrap();
        let image = fake().capture(&SnapshotScope::System).unwrap();
        let raw = encode(&image, 1_700_000_000).unwrap();
        let (info, decoded) = mgr.upload(&raw, |_| Ok(())).unwrap();
        assert_eq!(decoded.spaces.len(), 2);
        assert_eq!(fs::read(mgr.path_for(&info.id).unwrap()).unwrap(), raw);
        assert_eq!(mgr.scope_of(&info.id).unwrap(), SnapshotScope::System);
        assert!(mgr.upload(b"junk", |_| Ok(())).is_err());
        assert_eq!(mgr.list().unwrap().len(), 1);
    }

    #[test]
    fn test_refused_upload_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mgr = SnapshotManager::new(dir.path()).unwrap();
        let image = fake().capture(&SnapshotScope::System).unwrap();
        let raw = encode(&image, 1_700_000_000).unwrap();
        let err = mgr
            .upload(&raw, |scope| {
                assert_eq!(scope, &SnapshotScope::System);
                Err(Error::PermissionDenied("system scope".into()))
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(mgr.list().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_ids() {
        let dir = TempDir::new().unwrap();
        let mgr = SnapshotManager::new(dir.path()).unwrap();
        assert_eq!(mgr.path_for("../etc").unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(mgr.path_for("123").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_image_validation() {
        let image = SystemImage {
            scope: SnapshotScope::System,
            next_space_id: 3,
            spaces: vec![space(1, "a"), space(1, "b")],
        };
        assert_eq!(image.validate().unwrap_err().kind(), ErrorKind::Validation);
        let image = SystemImage {
            scope: SnapshotScope::Space("a".into()),
            next_space_id: 3,
            spaces: vec![space(2, "b")],
        };
        assert!(image.validate().is_err());
    }
}
