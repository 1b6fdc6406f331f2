//! In-memory Raft log store and the state machine over the engine.
//!
//! `LogStore` keeps log entries and votes in memory. `StateMachineStore`
//! applies committed [`Command`](spacevec_core::Command)s to the shared
//! [`Engine`]; its snapshots are full engine images, the same format as a
//! local checkpoint.
//!
//! The applied log id, the membership and the engine move together under one
//! lock, so a snapshot labelled with index N holds exactly entries `..=N`.

use crate::cluster::types::{ClusterNode, CommandResponse, NodeId, TypeConfig};
use openraft::storage::{LogFlushed, LogState, RaftLogStorage, RaftStateMachine, Snapshot};
use openraft::{
    Entry, EntryPayload, LogId, RaftLogReader, RaftSnapshotBuilder, SnapshotMeta, StorageError,
    StorageIOError, StoredMembership, Vote,
};
use spacevec_core::engine::{decode_engine_image, encode_engine_image};
use spacevec_core::{Engine, Outcome};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::Cursor;
use std::ops::RangeBounds;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

// ---- Log Store ----

/// In-memory Raft log storage backed by a `BTreeMap`.
#[derive(Debug, Clone, Default)]
pub struct LogStore {
    inner: Arc<Mutex<LogStoreInner>>,
}

#[derive(Debug, Default)]
struct LogStoreInner {
    last_purged_log_id: Option<LogId<NodeId>>,
    log: BTreeMap<u64, Entry<TypeConfig>>,
    committed: Option<LogId<NodeId>>,
    vote: Option<Vote<NodeId>>,
}

impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let inner = self.inner.lock().await;
        Ok(inner.log.range(range).map(|(_, v)| v.clone()).collect())
    }
}

impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let inner = self.inner.lock().await;
        let last = inner
            .log
            .iter()
            .next_back()
            .map(|(_, e)| e.log_id)
            .or(inner.last_purged_log_id);
        Ok(LogState {
            last_purged_log_id: inner.last_purged_log_id,
            last_log_id: last,
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        self.inner.lock().await.vote = Some(*vote);
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        Ok(self.inner.lock().await.vote)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>>,
    {
        let mut inner = self.inner.lock().await;
        for entry in entries {
            inner.log.insert(entry.log_id.index, entry);
        }
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let mut inner = self.inner.lock().await;
        inner.log.split_off(&log_id.index);
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let mut inner = self.inner.lock().await;
        inner.last_purged_log_id = Some(log_id);
        inner.log = inner.log.split_off(&(log_id.index + 1));
        Ok(())
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId<NodeId>>,
    ) -> Result<(), StorageError<NodeId>> {
        self.inner.lock().await.committed = committed;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<NodeId>>, StorageError<NodeId>> {
        Ok(self.inner.lock().await.committed)
    }
}

// ---- State Machine Store ----

/// Raft state machine that applies committed commands to the engine.
#[derive(Debug)]
pub struct StateMachineStore {
    pub engine: Arc<Engine>,
    applied: Mutex<AppliedState>,
    snapshot_idx: AtomicU64,
    current_snapshot: RwLock<Option<StoredSnapshot>>,
}

#[derive(Debug, Default)]
struct AppliedState {
    last_applied_log: Option<LogId<NodeId>>,
    last_membership: StoredMembership<NodeId, ClusterNode>,
}

#[derive(Debug)]
struct StoredSnapshot {
    meta: SnapshotMeta<NodeId, ClusterNode>,
    data: Vec<u8>,
}

impl StateMachineStore {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            applied: Mutex::new(AppliedState::default()),
            snapshot_idx: AtomicU64::new(0),
            current_snapshot: RwLock::new(None),
        }
    }
}

impl RaftSnapshotBuilder<TypeConfig> for Arc<StateMachineStore> {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let (last_applied, last_membership, image) = {
            let applied = self.applied.lock().await;
            (
                applied.last_applied_log,
                applied.last_membership.clone(),
                self.engine.image(),
            )
        };
        let data =
            encode_engine_image(&image).map_err(|e| StorageIOError::read_state_machine(&e))?;

        let idx = self.snapshot_idx.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot_id = match last_applied {
            Some(last) => format!("{}-{}-{}", last.leader_id, last.index, idx),
            None => format!("--{idx}"),
        };

        let meta = SnapshotMeta {
            last_log_id: last_applied,
            last_membership,
            snapshot_id,
        };
        tracing::info!(snapshot_id = %meta.snapshot_id, bytes = data.len(), "Raft snapshot built");

        *self.current_snapshot.write().await = Some(StoredSnapshot {
            meta: meta.clone(),
            data: data.clone(),
        });

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for Arc<StateMachineStore> {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, ClusterNode>), StorageError<NodeId>>
    {
        let applied = self.applied.lock().await;
        Ok((applied.last_applied_log, applied.last_membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<CommandResponse>, StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
    {
        let mut responses = Vec::new();
        let mut applied = self.applied.lock().await;
        for entry in entries {
            let resp = match entry.payload {
                EntryPayload::Blank => CommandResponse(Ok(Outcome::Done)),
                EntryPayload::Normal(cmd) => CommandResponse(self.engine.apply(cmd)),
                EntryPayload::Membership(mem) => {
                    applied.last_membership = StoredMembership::new(Some(entry.log_id), mem);
                    CommandResponse(Ok(Outcome::Done))
                }
            };
            applied.last_applied_log = Some(entry.log_id);
            responses.push(resp);
        }
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, ClusterNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        let data = snapshot.into_inner();
        let image = decode_engine_image(&data)
            .map_err(|e| StorageIOError::read_snapshot(Some(meta.signature()), &e))?;
        {
            let mut applied = self.applied.lock().await;
            self.engine
                .install(image)
                .map_err(|e| StorageIOError::write_snapshot(Some(meta.signature()), &e))?;
            applied.last_applied_log = meta.last_log_id;
            applied.last_membership = meta.last_membership.clone();
        }
        tracing::info!(snapshot_id = %meta.snapshot_id, "Raft snapshot installed");

        *self.current_snapshot.write().await = Some(StoredSnapshot {
            meta: meta.clone(),
            data,
        });
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        let current = self.current_snapshot.read().await;
        Ok(current.as_ref().map(|s| Snapshot {
            meta: s.meta.clone(),
            snapshot: Box::new(Cursor::new(s.data.clone())),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spacevec_core::rbac::Authority;
    use spacevec_core::schema::CreateSpace;
    use openraft::CommittedLeaderId;
    use spacevec_core::Command;

    fn command(name: &str) -> Command {
        let config = CreateSpace {
            name: name.into(),
            dimension: Some(2),
            metric: Some(spacevec_core::hnsw::DistanceMetric::L2),
            ..Default::default()
        }
        .into_config()
        .unwrap();
        Command::CreateSpace { config, at: 1 }
    }

    #[tokio::test]
    async fn test_snapshot_build_and_install() {
        let engine = Arc::new(Engine::new(Authority::new(false, None)));
        engine.apply(command("a")).unwrap();
        let mut sm = Arc::new(StateMachineStore::new(engine));
        let snap = sm.build_snapshot().await.unwrap();

        let other = Arc::new(Engine::new(Authority::new(false, None)));
        let mut target = Arc::new(StateMachineStore::new(other.clone()));
        target
            .install_snapshot(&snap.meta, snap.snapshot)
            .await
            .unwrap();
        assert_eq!(other.list_spaces().len(), 1);
        assert!(target.get_current_snapshot().await.unwrap().is_some());
    }

    fn entry(index: u64) -> Entry<TypeConfig> {
        Entry {
            log_id: LogId::new(CommittedLeaderId::new(1, 1), index),
            payload: EntryPayload::Normal(command(&format!("s{index}"))),
        }
    }

    #[tokio::test]
    async fn test_apply_records_log_id_after_command() {
        let engine = Arc::new(Engine::new(Authority::new(false, None)));
        let mut sm = Arc::new(StateMachineStore::new(Arc::clone(&engine)));
        let responses = sm.apply(vec![entry(1), entry(2)]).await.unwrap();
        assert!(responses.iter().all(|r| r.0.is_ok()));
        let (last, _) = sm.applied_state().await.unwrap();
        assert_eq!(last.map(|l| l.index), Some(2));
        assert_eq!(engine.list_spaces().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_snapshot_matches_its_log_id() {
        let engine = Arc::new(Engine::new(Authority::new(false, None)));
        let sm = Arc::new(StateMachineStore::new(engine));

        let mut applier = Arc::clone(&sm);
        let writes = tokio::spawn(async move {
            for i in 1..=100 {
                applier.apply(vec![entry(i)]).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        // Each entry creates one space, so a snapshot at index N holds N spaces.
        let mut builder = Arc::clone(&sm);
        loop {
            let done = writes.is_finished();
            let snap = builder.build_snapshot().await.unwrap();
            let image = decode_engine_image(snap.snapshot.get_ref()).unwrap();
            let index = snap.meta.last_log_id.map(|l| l.index).unwrap_or(0);
            assert_eq!(image.system.spaces.len() as u64, index);

            let replica = Arc::new(Engine::new(Authority::new(false, None)));
            let mut target = Arc::new(StateMachineStore::new(Arc::clone(&replica)));
            target.install_snapshot(&snap.meta, snap.snapshot).await.unwrap();
            let (installed, _) = target.applied_state().await.unwrap();
            assert_eq!(installed, snap.meta.last_log_id);
            assert_eq!(replica.list_spaces().len() as u64, index);
            if done {
                break;
            }
        }
        writes.await.unwrap();
    }

    #[tokio::test]
    async fn test_install_rejects_garbage() {
        let engine = Arc::new(Engine::new(Authority::new(false, None)));
        let mut sm = Arc::new(StateMachineStore::new(engine));
        let meta = SnapshotMeta::default();
        let err = sm
            .install_snapshot(&meta, Box::new(Cursor::new(b"junk".to_vec())))
            .await;
        assert!(err.is_err());
    }
}
