//! Catalog of live spaces, keyed by name.
//!
//! Space ids are assigned from a counter that only moves forward, so a name
//! that is deleted and recreated gets a new id. Commands are applied in log
//! order, which keeps the counter identical on every replica.

use crate::error::{Error, Result};
use crate::schema::SpaceConfig;
use crate::storage::space::{Space, SpaceInfo, SpaceState};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe map of space name → [`Space`].
#[derive(Debug)]
pub struct Registry {
    spaces: RwLock<BTreeMap<String, Arc<Space>>>,
    next_space_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            spaces: RwLock::new(BTreeMap::new()),
            next_space_id: AtomicU64::new(1),
        }
    }

    pub fn next_space_id(&self) -> u64 {
        self.next_space_id.load(Ordering::SeqCst)
    }

    /// Create a space. Fails with `AlreadyExists` if the name is taken.
    pub fn create(&self, config: SpaceConfig, at: i64) -> Result<SpaceInfo> {
        config.validate()?;
        let mut spaces = self.spaces.write();
        if spaces.contains_key(&config.name) {
            return Err(Error::AlreadyExists(format!("space '{}'", config.name)));
        }
        let space_id = self.next_space_id.fetch_add(1, Ordering::SeqCst);
        let name = config.name.clone();
        let state = SpaceState::new(space_id, config, at);
        let info = state.info();
        spaces.insert(name, Arc::new(Space::new(state)));
        Ok(info)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Space>> {
        self.spaces
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("space '{name}'")))
    }

    /// Resolve a space name to its id, if it exists.
    pub fn space_id(&self, name: &str) -> Option<u64> {
        self.spaces.read().get(name).map(|s| s.space_id())
    }

    /// All spaces, ordered by space id.
    pub fn list(&self) -> Vec<SpaceInfo> {
        let handles: Vec<Arc<Space>> = self.spaces.read().values().cloned().collect();
        let mut infos: Vec<SpaceInfo> = handles.iter().map(|s| s.data.read().info()).collect();
        infos.sort_by_key(|i| i.space_id);
        infos
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.spaces
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("space '{name}'")))
    }

    /// Consistent per-space copies of every space, ordered by space id.
    pub fn capture_all(&self) -> Vec<SpaceState> {
        let handles: Vec<Arc<Space>> = self.spaces.read().values().cloned().collect();
        let mut states: Vec<SpaceState> = handles.iter().map(|s| s.capture()).collect();
        states.sort_by_key(|s| s.space_id);
        states
    }

    /// Replace one space with `state`, creating it if absent.
    ///
    /// Fails with `Conflict` if a restore of the same space is already running.
    pub fn restore_space(&self, state: SpaceState) -> Result<()> {
        let existing = self.spaces.read().get(state.name()).cloned();
        match existing {
            Some(space) => {
                let _restoring = space.restoring.try_lock().ok_or_else(|| {
                    Error::Conflict(format!("restore of space '{}' in progress", state.name()))
                })?;
                let _gate = space.write_gate.write();
                let mut data = space.data.write();
                let mut state = state;
                // The live space keeps its identity.
                state.space_id = data.space_id;
                *data = state;
                Ok(())
            }
            None => {
                let mut spaces = self.spaces.write();
                let mut state = state;
                let id_taken = spaces.values().any(|s| s.space_id() == state.space_id);
                if id_taken || state.space_id == 0 {
                    state.space_id = self.next_space_id.fetch_add(1, Ordering::SeqCst);
                } else {
                    self.next_space_id
                        .fetch_max(state.space_id + 1, Ordering::SeqCst);
                }
                spaces.insert(state.name().to_string(), Arc::new(Space::new(state)));
                Ok(())
            }
        }
    }

    /// Replace the whole space set. Spaces missing from `states` are removed.
    ///
    /// The id counter never moves back, so ids of removed spaces are not reused.
    pub fn restore_all(&self, states: Vec<SpaceState>, next_space_id: u64) -> Result<()> {
        let mut spaces = self.spaces.write();
        let held: Vec<Arc<Space>> = spaces.values().cloned().collect();

        let mut restoring = Vec::with_capacity(held.len());
        for space in &held {
            match space.restoring.try_lock() {
                Some(guard) => restoring.push(guard),
                None => {
                    return Err(Error::Conflict(
                        "a space restore is in progress".to_string(),
                    ))
                }
            }
        }
        let _gates: Vec<_> = held.iter().map(|s| s.write_gate.write()).collect();

        let mut next: BTreeMap<String, Arc<Space>> = BTreeMap::new();
        let mut max_id = 0;
        for state in states {
            max_id = max_id.max(state.space_id);
            let name = state.name().to_string();
            match spaces.get(&name) {
                Some(space) => {
                    *space.data.write() = state;
                    next.insert(name, Arc::clone(space));
                }
                None => {
                    next.insert(name, Arc::new(Space::new(state)));
                }
            }
        }
        *spaces = next;
        self.next_space_id
            .fetch_max(next_space_id.max(max_id + 1), Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::hnsw::DistanceMetric;
    use crate::schema::IndexConfig;

    fn cfg(name: &str) -> SpaceConfig {
        SpaceConfig {
            name: name.into(),
            dense: IndexConfig::new(2, DistanceMetric::Cosine),
            sparse: None,
            indexes: BTreeMap::new(),
            description: None,
        }
    }

    #[test]
    fn test_create_and_duplicate() {
        let reg = Registry::new();
        let info = reg.create(cfg("a"), 1).unwrap();
        assert_eq!(info.space_id, 1);
        let err = reg.create(cfg("a"), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_invalid_name_rejected() {
        let reg = Registry::new();
        let err = reg.create(cfg("bad name"), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(reg.list().is_empty());
    }

    #[test]
    fn test_list_ordered_by_id() {
        let reg = Registry::new();
        reg.create(cfg("zeta"), 1).unwrap();
        reg.create(cfg("alpha"), 1).unwrap();
        let names: Vec<String> = reg.list().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_recreate_gets_new_id() {
        let reg = Registry::new();
        reg.create(cfg("a"), 1).unwrap();
        reg.delete("a").unwrap();
        assert_eq!(reg.get("a").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(reg.create(cfg("a"), 2).unwrap().space_id, 2);
        assert_eq!(reg.delete("nope").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_restore_space_keeps_identity() {
        let reg = Registry::new();
        reg.create(cfg("a"), 1).unwrap();
        let mut image = SpaceState::new(42, cfg("a"), 5);
        image.kv.insert("k".into(), "1".into());
        reg.restore_space(image).unwrap();
        let space = reg.get("a").unwrap();
        let data = space.data.read();
        assert_eq!(data.space_id, 1);
        assert_eq!(data.kv.len(), 1);
    }

    #[test]
    fn test_restore_space_conflict_while_restoring() {
        let reg = Registry::new();
        reg.create(cfg("a"), 1).unwrap();
        let space = reg.get("a").unwrap();
        let _busy = space.restoring.lock();
        let err = reg
            .restore_space(SpaceState::new(1, cfg("a"), 1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_restore_all_replaces_set() {
        let reg = Registry::new();
        reg.create(cfg("a"), 1).unwrap();
        reg.create(cfg("b"), 1).unwrap();
        let states = vec![SpaceState::new(1, cfg("a"), 1), SpaceState::new(7, cfg("c"), 1)];
        reg.restore_all(states, 3).unwrap();
        let names: Vec<String> = reg.list().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(reg.next_space_id(), 8);
    }
}
