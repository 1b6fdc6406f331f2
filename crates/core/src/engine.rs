//! The engine: space registry plus token authority, driven by [`Command`]s.
//!
//! Writes go through [`Engine::apply`]. Reads clone the `Arc` of the version
//! they need under a brief read lock and run without holding any lock.
//!
//! A write batch is built on a copy of the space state and swapped in at the
//! end, so reads of that space never wait for a batch. Commands hold the
//! `cut` lock shared; whole-engine captures hold it exclusive and therefore
//! see every command either fully applied or not at all.

use crate::command::{Command, Outcome};
use crate::config;
use crate::error::{Error, Result};
use crate::rbac::{Authority, Token};
use crate::schema::SpaceConfig;
use crate::search::filter::FilterExpr;
use crate::search::types::{RerankHit, SearchHit};
use crate::snapshot::{self, SnapshotScope, StateSource, SystemImage};
use crate::storage::index::VectorPage;
use crate::storage::persistence::write_atomic;
use crate::storage::registry::Registry;
use crate::storage::space::{Space, SpaceInfo, SpaceState};
use crate::storage::version::{VersionData, VersionMeta};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Full engine state: spaces and tokens.
///
/// Used for checkpoints and Raft snapshots. Backups made by the snapshot
/// manager hold only the [`SystemImage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineImage {
    pub system: SystemImage,
    pub tokens: Vec<Token>,
    /// Whether the token bootstrap window has closed.
    pub bootstrapped: bool,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub total_count: usize,
    pub values: Vec<T>,
}

#[derive(Debug)]
pub struct Engine {
    registry: Registry,
    authority: Authority,
    cut: RwLock<()>,
}

fn check_top_k(top_k: usize) -> Result<()> {
    if top_k == 0 || top_k > config::MAX_K {
        return Err(Error::validation(format!(
            "top_k must be 1..={}, got {top_k}",
            config::MAX_K
        )));
    }
    Ok(())
}

fn check_limit(limit: usize) -> Result<()> {
    if limit > config::MAX_PAGE_LIMIT {
        return Err(Error::validation(format!(
            "limit must be at most {}",
            config::MAX_PAGE_LIMIT
        )));
    }
    Ok(())
}

/// Check that `value` is JSON text.
pub fn validate_json(value: &str) -> Result<()> {
    serde_json::from_str::<serde_json::Value>(value)
        .map(|_| ())
        .map_err(|e| Error::validation(format!("value is not valid JSON: {e}")))
}

impl Engine {
    pub fn new(authority: Authority) -> Self {
        Self {
            registry: Registry::new(),
            authority,
            cut: RwLock::new(()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Run `f` against a copy of a space's state as one write batch, then
    /// publish the copy. An error discards the copy.
    fn write<T>(&self, name: &str, f: impl FnOnce(&mut SpaceState) -> Result<T>) -> Result<T> {
        let space: Arc<Space> = self.registry.get(name)?;
        let _gate = space.write_gate.read();
        let _writer = space.writer.lock();
        let mut next = space.capture();
        let out = f(&mut next)?;
        *space.data.write() = next;
        Ok(out)
    }

    /// Apply one command. Validation failures leave state unchanged.
    pub fn apply(&self, cmd: Command) -> Result<Outcome> {
        let name = cmd.name();
        let result = {
            let _cut = self.cut.read();
            self.apply_inner(cmd)
        };
        match &result {
            Ok(_) => tracing::debug!(command = name, "Command applied"),
            Err(e) => tracing::debug!(command = name, error = %e, "Command rejected"),
        }
        result
    }

    fn apply_inner(&self, cmd: Command) -> Result<Outcome> {
        match cmd {
            Command::CreateSpace { config, at } => {
                let info = self.registry.create(config, at)?;
                tracing::info!(space = %info.name, space_id = info.space_id, "Space created");
                Ok(Outcome::Space(info))
            }
            Command::UpdateSpace { name, update, at } => {
                let info = self.write(&name, |s| {
                    s.update(&update, at)?;
                    Ok(s.info())
                })?;
                tracing::info!(space = %name, "Space updated");
                Ok(Outcome::Space(info))
            }
            Command::DeleteSpace { name } => {
                self.registry.delete(&name)?;
                tracing::info!(space = %name, "Space deleted");
                Ok(Outcome::Done)
            }
            Command::CreateVersion { space, version, at } => {
                let meta = self.write(&space, |s| s.create_version(version, at))?;
                tracing::info!(space = %space, version = meta.id, is_default = meta.is_default, "Version created");
                Ok(Outcome::Version(meta))
            }
            Command::DeleteVersion { space, version } => {
                self.write(&space, |s| s.delete_version(version))?;
                tracing::info!(space = %space, version, "Version deleted");
                Ok(Outcome::Done)
            }
            Command::UpsertVectors {
                space,
                version,
                index,
                records,
                at,
            } => {
                let version =
                    self.write(&space, |s| s.upsert_vectors(version, index.as_deref(), records, at))?;
                Ok(Outcome::Written { version })
            }
            Command::DeleteVector {
                space,
                version,
                index,
                id,
                at,
            } => {
                let version =
                    self.write(&space, |s| s.delete_vector(version, index.as_deref(), id, at))?;
                Ok(Outcome::Written { version })
            }
            Command::PutKey {
                space,
                key,
                value,
                at,
            } => {
                validate_json(&value)?;
                self.write(&space, |s| s.put_key(key, value, at))?;
                Ok(Outcome::Done)
            }
            Command::DeleteKey { space, key } => {
                self.write(&space, |s| s.delete_key(&key))?;
                Ok(Outcome::Done)
            }
            Command::CreateToken { token, spec, at } => {
                Ok(Outcome::Token(self.authority.create(token, spec, at)?))
            }
            Command::UpdateToken { token, spec, at } => {
                Ok(Outcome::Token(self.authority.update(&token, spec, at)?))
            }
            Command::DeleteToken { token } => {
                self.authority.delete(&token)?;
                Ok(Outcome::Done)
            }
            Command::Restore { image } => {
                self.replace(image)?;
                Ok(Outcome::Done)
            }
        }
    }

    // ── Reads ──────────────────────────────────────────────────────────

    pub fn get_space(&self, name: &str) -> Result<SpaceInfo> {
        Ok(self.registry.get(name)?.data.read().info())
    }

    pub fn list_spaces(&self) -> Vec<SpaceInfo> {
        self.registry.list()
    }

    pub fn space_config(&self, name: &str) -> Result<SpaceConfig> {
        Ok(self.registry.get(name)?.data.read().config.clone())
    }

    fn version_data(&self, space: &str, version: u32) -> Result<Arc<VersionData>> {
        self.registry.get(space)?.data.read().version_data(version)
    }

    pub fn get_version(&self, space: &str, version: u32) -> Result<VersionMeta> {
        Ok(self.registry.get(space)?.data.read().version(version)?.meta.clone())
    }

    pub fn list_versions(&self, space: &str, start: usize, limit: usize) -> Result<Page<VersionMeta>> {
        check_limit(limit)?;
        let (total_count, values) = self.registry.get(space)?.data.read().list_versions(start, limit);
        Ok(Page {
            total_count,
            values,
        })
    }

    /// Records of one version in ascending id order.
    pub fn get_vectors(
        &self,
        space: &str,
        version: u32,
        index: Option<&str>,
        start: usize,
        limit: usize,
        filter: Option<&str>,
    ) -> Result<VectorPage> {
        check_limit(limit)?;
        let filter = filter.map(FilterExpr::parse).transpose()?;
        let data = self.version_data(space, version)?;
        Ok(data.index(index)?.page(start, limit, filter.as_ref()))
    }

    pub fn search(
        &self,
        space: &str,
        version: u32,
        index: Option<&str>,
        query: &[f32],
        top_k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        check_top_k(top_k)?;
        let filter = filter.map(FilterExpr::parse).transpose()?;
        let data = self.version_data(space, version)?;
        data.index(index)?.search(query, top_k, filter.as_ref())
    }

    pub fn rerank(
        &self,
        space: &str,
        version: u32,
        index: Option<&str>,
        query: &[f32],
        tokens: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankHit>> {
        check_top_k(top_k)?;
        let data = self.version_data(space, version)?;
        data.index(index)?.rerank(query, tokens, top_k)
    }

    /// JSON text stored under `key`.
    pub fn get_key(&self, space: &str, key: &str) -> Result<String> {
        Ok(self.registry.get(space)?.data.read().get_key(key)?.to_string())
    }

    pub fn list_keys(&self, space: &str, start: usize, limit: usize) -> Result<Page<String>> {
        check_limit(limit)?;
        let (total_count, values) = self.registry.get(space)?.data.read().list_keys(start, limit);
        Ok(Page {
            total_count,
            values,
        })
    }

    // ── Images ─────────────────────────────────────────────────────────

    pub fn image(&self) -> EngineImage {
        let _cut = self.cut.write();
        EngineImage {
            system: SystemImage {
                scope: SnapshotScope::System,
                next_space_id: self.registry.next_space_id(),
                spaces: self.registry.capture_all(),
            },
            tokens: self.authority.list(),
            bootstrapped: self.authority.bootstrapped(),
        }
    }

    /// Replace spaces and tokens with `image`.
    pub fn install(&self, image: EngineImage) -> Result<()> {
        let _cut = self.cut.write();
        self.replace(image.system)?;
        self.authority.replace(image.tokens, image.bootstrapped);
        Ok(())
    }

    /// Write the full engine state to `path`.
    pub fn save_checkpoint(&self, path: &Path) -> Result<()> {
        let image = self.image();
        let raw = crate::storage::persistence::encode_artifact(
            &checkpoint_header(),
            &image,
        )?;
        write_atomic(path, &raw)?;
        tracing::info!(
            path = %path.display(),
            spaces = image.system.spaces.len(),
            bytes = raw.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Load a checkpoint written by [`save_checkpoint`](Engine::save_checkpoint).
    /// Returns `false` when no checkpoint exists.
    pub fn load_checkpoint(&self, path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let raw = fs::read(path)?;
        let image = decode_engine_image(&raw)?;
        let spaces = image.system.spaces.len();
        self.install(image)?;
        tracing::info!(path = %path.display(), spaces, "Checkpoint loaded");
        Ok(true)
    }
}

fn checkpoint_header() -> snapshot::SnapshotHeader {
    snapshot::SnapshotHeader {
        format_version: config::SNAPSHOT_FORMAT_VERSION,
        scope: SnapshotScope::System,
        created_time_utc: chrono::Utc::now().timestamp(),
    }
}

/// Encode a full engine image (checkpoint and Raft snapshot format).
pub fn encode_engine_image(image: &EngineImage) -> Result<Vec<u8>> {
    Ok(crate::storage::persistence::encode_artifact(
        &checkpoint_header(),
        image,
    )?)
}

/// Verify and decode a full engine image.
pub fn decode_engine_image(raw: &[u8]) -> Result<EngineImage> {
    let (header, image): (snapshot::SnapshotHeader, EngineImage) =
        crate::storage::persistence::decode_artifact(raw)
            .map_err(|e| Error::Io(format!("invalid engine image: {e}")))?;
    if header.format_version != config::SNAPSHOT_FORMAT_VERSION {
        return Err(Error::Io(format!(
            "unsupported engine image format version {}",
            header.format_version
        )));
    }
    image.system.validate()?;
    Ok(image)
}

impl StateSource for Engine {
    fn capture(&self, scope: &SnapshotScope) -> Result<SystemImage> {
        let _cut = self.cut.write();
        let spaces = match scope {
            SnapshotScope::System => self.registry.capture_all(),
            SnapshotScope::Space(name) => vec![self.registry.get(name)?.capture()],
        };
        Ok(SystemImage {
            scope: scope.clone(),
            next_space_id: self.registry.next_space_id(),
            spaces,
        })
    }

    fn replace(&self, image: SystemImage) -> Result<()> {
        image.validate()?;
        let count = image.spaces.len();
        match image.scope {
            SnapshotScope::System => {
                self.registry.restore_all(image.spaces, image.next_space_id)?;
            }
            SnapshotScope::Space(ref name) => {
                let name = name.clone();
                let state = image
                    .spaces
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::validation(format!("image for space '{name}' is empty")))?;
                self.registry.restore_space(state)?;
            }
        }
        tracing::info!(spaces = count, "State replaced from image");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::hnsw::DistanceMetric;
    use crate::rbac::{generate_token, Scopes, TokenSpec};
    use crate::record::VectorRecord;
    use crate::schema::{CreateSpace, DenseUpdate, HnswParams, SpaceUpdate};
    use crate::snapshot::SnapshotManager;
    use crate::storage::space::NewVersion;
    use tempfile::TempDir;

    fn engine() -> Engine {
        Engine::new(Authority::new(false, None))
    }

    fn create(engine: &Engine, name: &str, dimension: usize, metric: DistanceMetric) {
        let config = CreateSpace {
            name: name.into(),
            dimension: Some(dimension),
            metric: Some(metric),
            ..Default::default()
        }
        .into_config()
        .unwrap();
        engine.apply(Command::CreateSpace { config, at: 1 }).unwrap();
    }

    fn upsert(engine: &Engine, space: &str, version: u32, records: Vec<VectorRecord>) -> Result<Outcome> {
        engine.apply(Command::UpsertVectors {
            space: space.into(),
            version,
            index: None,
            records,
            at: 2,
        })
    }

    fn sample() -> Vec<VectorRecord> {
        vec![
            VectorRecord::new(1, vec![0.1, 0.2, 0.3, 0.4]),
            VectorRecord::new(2, vec![0.5, 0.6, 0.7, 0.8]),
            VectorRecord::new(3, vec![0.2, 0.3, 0.4, 0.5]),
            VectorRecord::new(4, vec![0.9, 0.8, 0.7, 0.6]),
            VectorRecord::new(5, vec![0.2, 0.3, 0.4, 0.3]),
        ]
    }

    const QUERY: [f32; 4] = [0.2, 0.3, 0.4, 0.3];

    // ── End to end ─────────────────────────────────────────────────────

    #[test]
    fn test_search_end_to_end() {
        let e = engine();
        create(&e, "space1", 4, DistanceMetric::L2);
        assert_eq!(upsert(&e, "space1", 0, sample()).unwrap(), Outcome::Written { version: 1 });
        let hits = e.search("space1", 0, None, &QUERY, 3, None).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, 5);
        assert_eq!(hits[0].distance, 0.0);
        let mut rest: Vec<u64> = hits[1..].iter().map(|h| h.id).collect();
        rest.sort_unstable();
        assert_eq!(rest, vec![1, 3]);
    }

    #[test]
    fn test_mismatched_vector_rejected() {
        let e = engine();
        create(&e, "s", 4, DistanceMetric::L2);
        let err = upsert(&e, "s", 0, vec![VectorRecord::new(1, vec![1.0, 2.0])]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_upsert_same_id_twice() {
        let e = engine();
        create(&e, "s", 4, DistanceMetric::L2);
        upsert(&e, "s", 0, vec![VectorRecord::new(1, vec![0.0; 4])]).unwrap();
        upsert(&e, "s", 0, vec![VectorRecord::new(1, vec![1.0; 4])]).unwrap();
        let page = e.get_vectors("s", 0, None, 0, 10, None).unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.vectors[0].data, vec![1.0; 4]);
    }

    #[test]
    fn test_sealed_version_is_stable() {
        let e = engine();
        create(&e, "s", 4, DistanceMetric::L2);
        upsert(&e, "s", 0, sample()).unwrap();
        e.apply(Command::CreateVersion {
            space: "s".into(),
            version: NewVersion {
                is_default: true,
                ..Default::default()
            },
            at: 3,
        })
        .unwrap();
        let before = e.get_vectors("s", 1, None, 1, 3, None).unwrap();
        upsert(&e, "s", 0, vec![VectorRecord::new(9, vec![0.0; 4])]).unwrap();
        let err = upsert(&e, "s", 1, vec![VectorRecord::new(10, vec![0.0; 4])]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let after = e.get_vectors("s", 1, None, 1, 3, None).unwrap();
        assert_eq!(before, after);
        assert_eq!(e.get_vectors("s", 0, None, 0, 100, None).unwrap().total_count, 6);
    }

    #[test]
    fn test_rerank_deterministic() {
        let e = engine();
        create(&e, "s", 4, DistanceMetric::L2);
        let records = sample()
            .into_iter()
            .map(|r| {
                let id = r.id;
                r.with_tokens(if id % 2 == 0 { vec!["apple"] } else { vec!["pear"] })
            })
            .collect();
        upsert(&e, "s", 0, records).unwrap();
        let tokens = vec!["apple".to_string()];
        let a = e.rerank("s", 0, None, &QUERY, &tokens, 3).unwrap();
        let b = e.rerank("s", 0, None, &QUERY, &tokens, 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_search_validation() {
        let e = engine();
        create(&e, "s", 4, DistanceMetric::L2);
        let err = e.search("s", 0, None, &QUERY, 0, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = e.search("s", 0, None, &[1.0], 3, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = e.search("s", 0, None, &QUERY, 3, Some("a ==")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = e.search("nope", 0, None, &QUERY, 3, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_reads_proceed_during_write_batch() {
        let e = engine();
        create(&e, "space1", 4, DistanceMetric::L2);
        upsert(&e, "space1", 0, sample()).unwrap();
        let seen = e
            .write("space1", |state| {
                state.upsert_vectors(0, None, vec![VectorRecord::new(9, vec![1.0; 4])], 3)?;
                Ok(std::thread::scope(|scope| {
                    scope
                        .spawn(|| {
                            let hits = e.search("space1", 0, None, &QUERY, 1, None).unwrap();
                            (hits[0].id, e.get_space("space1").unwrap().vector_count)
                        })
                        .join()
                        .unwrap()
                }))
            })
            .unwrap();
        // The reader saw the state before the batch.
        assert_eq!(seen, (5, 5));
        assert_eq!(e.get_space("space1").unwrap().vector_count, 6);
    }

    #[test]
    fn test_failed_batch_leaves_state_unchanged() {
        let e = engine();
        create(&e, "s", 4, DistanceMetric::L2);
        let err = e
            .write("s", |state| {
                state.put_key("k".into(), "1".into(), 2)?;
                Err::<(), _>(Error::validation("abort"))
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(e.get_key("s", "k").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_capture_sees_whole_commands() {
        let e = Arc::new(engine());
        create(&e, "a", 2, DistanceMetric::L2);
        create(&e, "b", 2, DistanceMetric::L2);
        let writer = {
            let e = Arc::clone(&e);
            std::thread::spawn(move || {
                for i in 1..=200u64 {
                    for space in ["a", "b"] {
                        upsert(&e, space, 0, vec![VectorRecord::new(i, vec![i as f32, 0.0])]).unwrap();
                    }
                }
            })
        };
        // Commands alternate a, b, so any prefix has a one ahead of b at most.
        loop {
            let done = writer.is_finished();
            let image = e.capture(&SnapshotScope::System).unwrap();
            let counts: Vec<usize> = image
                .spaces
                .iter()
                .map(|s| s.versions[&s.default_version].data.vector_count())
                .collect();
            assert!(
                counts[0] == counts[1] || counts[0] == counts[1] + 1,
                "torn capture: {counts:?}"
            );
            if done {
                break;
            }
        }
        writer.join().unwrap();
    }

    // ── Spaces ─────────────────────────────────────────────────────────

    #[test]
    fn test_update_populated_space() {
        let e = engine();
        create(&e, "s", 4, DistanceMetric::L2);
        upsert(&e, "s", 0, sample()).unwrap();
        let rebuild = SpaceUpdate {
            dense: Some(DenseUpdate {
                hnsw_config: Some(HnswParams {
                    m: 4,
                    ef_construct: 32,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        e.apply(Command::UpdateSpace {
            name: "s".into(),
            update: rebuild,
            at: 5,
        })
        .unwrap();
        let hits = e.search("s", 0, None, &QUERY, 1, None).unwrap();
        assert_eq!(hits[0].id, 5);

        let reshape = SpaceUpdate {
            dense: Some(DenseUpdate {
                metric: Some(DistanceMetric::Cosine),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = e
            .apply(Command::UpdateSpace {
                name: "s".into(),
                update: reshape,
                at: 6,
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_keys_require_json() {
        let e = engine();
        create(&e, "s", 4, DistanceMetric::L2);
        let put = |value: &str| {
            e.apply(Command::PutKey {
                space: "s".into(),
                key: "k".into(),
                value: value.into(),
                at: 1,
            })
        };
        assert_eq!(put("not json").unwrap_err().kind(), ErrorKind::Validation);
        put(r#"{"text":"hello"}"#).unwrap();
        assert_eq!(e.get_key("s", "k").unwrap(), r#"{"text":"hello"}"#);
        assert_eq!(e.list_keys("s", 0, 10).unwrap().values, vec!["k"]);
    }

    // ── Snapshots and checkpoints ──────────────────────────────────────

    #[test]
    fn test_snapshot_roundtrip_reproduces_search() {
        let dir = TempDir::new().unwrap();
        let mgr = SnapshotManager::new(dir.path()).unwrap();
        let e = engine();
        create(&e, "space1", 4, DistanceMetric::L2);
        upsert(&e, "space1", 0, sample()).unwrap();
        let expected = e.search("space1", 0, None, &QUERY, 3, None).unwrap();

        let info = mgr
            .create(&e, SnapshotScope::Space("space1".into()))
            .unwrap();
        upsert(&e, "space1", 0, vec![VectorRecord::new(6, QUERY.to_vec())]).unwrap();
        e.apply(Command::DeleteVector {
            space: "space1".into(),
            version: 0,
            index: None,
            id: 5,
            at: 9,
        })
        .unwrap();
        assert_ne!(e.search("space1", 0, None, &QUERY, 3, None).unwrap(), expected);

        mgr.restore(&info.id, &e).unwrap();
        assert_eq!(e.search("space1", 0, None, &QUERY, 3, None).unwrap(), expected);
    }

    #[test]
    fn test_system_restore_removes_absent_spaces() {
        let e = engine();
        create(&e, "a", 2, DistanceMetric::Dot);
        let image = e.capture(&SnapshotScope::System).unwrap();
        create(&e, "b", 2, DistanceMetric::Dot);
        e.apply(Command::Restore { image }).unwrap();
        let names: Vec<String> = e.list_spaces().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a"]);
        // Id 2 belonged to the removed space.
        create(&e, "c", 2, DistanceMetric::Dot);
        assert_eq!(e.get_space("c").unwrap().space_id, 3);
    }

    #[test]
    fn test_checkpoint_includes_tokens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(config::CHECKPOINT_FILE);
        let e = engine();
        create(&e, "s", 4, DistanceMetric::L2);
        upsert(&e, "s", 0, sample()).unwrap();
        let token = generate_token();
        e.apply(Command::CreateToken {
            token: token.clone(),
            spec: TokenSpec {
                scopes: Scopes::ADMIN,
                ..Default::default()
            },
            at: 1,
        })
        .unwrap();
        e.save_checkpoint(&path).unwrap();

        let fresh = engine();
        assert!(fresh.load_checkpoint(&path).unwrap());
        assert_eq!(fresh.get_space("s").unwrap().vector_count, 5);
        assert_eq!(fresh.authority().list()[0].token, token);
        assert!(!engine().load_checkpoint(&dir.path().join("missing")).unwrap());
    }

    #[test]
    fn test_image_carries_closed_bootstrap_window() {
        let e = Engine::new(Authority::new(true, None));
        let token = generate_token();
        e.apply(Command::CreateToken {
            token: token.clone(),
            spec: TokenSpec::default(),
            at: 1,
        })
        .unwrap();
        e.apply(Command::DeleteToken { token }).unwrap();

        let image = decode_engine_image(&encode_engine_image(&e.image()).unwrap()).unwrap();
        assert!(image.tokens.is_empty());
        assert!(image.bootstrapped);

        let replica = Engine::new(Authority::new(true, None));
        replica.install(image).unwrap();
        let err = replica
            .authority()
            .authorize_token_creation(&crate::rbac::RequestContext::anonymous())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }

    #[test]
    fn test_engine_image_encoding() {
        let e = engine();
        create(&e, "s", 4, DistanceMetric::L2);
        let raw = encode_engine_image(&e.image()).unwrap();
        let back = decode_engine_image(&raw).unwrap();
        assert_eq!(back.system.spaces.len(), 1);
        assert!(decode_engine_image(&raw[..raw.len() - 1]).is_err());
    }
}
