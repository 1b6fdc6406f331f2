//! Ordering of mutating commands.
//!
//! In standalone mode a command is appended to the local WAL and then applied
//! to the engine, one at a time. In cluster mode it is proposed through the
//! Raft leader and applied by the state machine on every node.
//!
//! Both paths run the apply on a task that outlives the caller, so a dropped
//! request never interrupts a command halfway.

use crate::cluster::types::{ClusterNode, NodeId, Raft};
use serde::{Deserialize, Serialize};
use spacevec_core::storage::SyncWriteAheadLog;
use spacevec_core::{Command, Engine, Error, Outcome, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Routes commands to the WAL or to Raft.
pub enum Coordinator {
    Standalone(Standalone),
    Cluster(Cluster),
}

/// Single node: WAL append, then apply.
pub struct Standalone {
    engine: Arc<Engine>,
    wal: Arc<SyncWriteAheadLog>,
    checkpoint_path: PathBuf,
    order: Arc<Mutex<()>>,
}

/// Raft member.
pub struct Cluster {
    node_id: NodeId,
    node: ClusterNode,
    raft: Arc<Raft>,
}

impl Coordinator {
    pub fn standalone(
        engine: Arc<Engine>,
        wal: Arc<SyncWriteAheadLog>,
        checkpoint_path: PathBuf,
    ) -> Self {
        Coordinator::Standalone(Standalone {
            engine,
            wal,
            checkpoint_path,
            order: Arc::new(Mutex::new(())),
        })
    }

    pub fn cluster(node_id: NodeId, node: ClusterNode, raft: Arc<Raft>) -> Self {
        Coordinator::Cluster(Cluster { node_id, node, raft })
    }

    pub fn raft(&self) -> Option<&Arc<Raft>> {
        match self {
            Coordinator::Standalone(_) => None,
            Coordinator::Cluster(c) => Some(&c.raft),
        }
    }

    /// This node's id and addresses in cluster mode.
    pub fn member(&self) -> Option<(NodeId, ClusterNode)> {
        match self {
            Coordinator::Standalone(_) => None,
            Coordinator::Cluster(c) => Some((c.node_id, c.node.clone())),
        }
    }

    /// Order and apply one command.
    ///
    /// A follower returns [`Error::NotLeader`] with the leader's API address
    /// when one is known.
    pub async fn propose(&self, cmd: Command) -> Result<Outcome> {
        match self {
            Coordinator::Standalone(s) => s.propose(cmd).await,
            Coordinator::Cluster(c) => c.propose(cmd).await,
        }
    }

    /// Write a checkpoint and truncate the WAL. Returns `false` in cluster
    /// mode, where the Raft log is the source of truth.
    pub async fn checkpoint(&self) -> Result<bool> {
        match self {
            Coordinator::Standalone(s) => s.checkpoint().await.map(|_| true),
            Coordinator::Cluster(_) => Ok(false),
        }
    }

    pub fn metrics(&self) -> ClusterMetricsView {
        match self {
            Coordinator::Standalone(_) => ClusterMetricsView::standalone(),
            Coordinator::Cluster(c) => {
                let metrics = c.raft.metrics().borrow().clone();
                ClusterMetricsView::from_raft(&metrics)
            }
        }
    }

    /// `Ok` when this node may serve leader-only work, otherwise
    /// [`Error::NotLeader`] naming the leader this node knows of.
    pub fn ensure_leader(&self) -> Result<()> {
        match self {
            Coordinator::Standalone(_) => Ok(()),
            Coordinator::Cluster(c) => {
                let metrics = c.raft.metrics().borrow().clone();
                match metrics.current_leader {
                    Some(leader) if leader == c.node_id => Ok(()),
                    leader_id => Err(Error::NotLeader {
                        leader_id,
                        leader_addr: leader_id.and_then(|id| {
                            metrics
                                .membership_config
                                .membership()
                                .get_node(&id)
                                .map(|n| n.api_addr.clone())
                        }),
                    }),
                }
            }
        }
    }

    pub fn is_leader(&self) -> bool {
        match self {
            Coordinator::Standalone(_) => true,
            Coordinator::Cluster(c) => {
                let leader = c.raft.metrics().borrow().current_leader;
                leader == Some(c.node_id)
            }
        }
    }
}

impl Standalone {
    async fn propose(&self, cmd: Command) -> Result<Outcome> {
        let order = Arc::clone(&self.order).lock_owned().await;
        let engine = Arc::clone(&self.engine);
        let wal = Arc::clone(&self.wal);
        tokio::task::spawn_blocking(move || {
            let _order = order;
            wal.append(&cmd).map_err(|e| {
                tracing::error!(error = %e, "WAL append failed");
                Error::from(e)
            })?;
            engine.apply(cmd)
        })
        .await
        .map_err(|e| Error::Io(format!("write task failed: {e}")))?
    }

    async fn checkpoint(&self) -> Result<()> {
        let order = Arc::clone(&self.order).lock_owned().await;
        let engine = Arc::clone(&self.engine);
        let wal = Arc::clone(&self.wal);
        let path = self.checkpoint_path.clone();
        tokio::task::spawn_blocking(move || {
            let _order = order;
            let _gate = wal.freeze();
            engine.save_checkpoint(&path)?;
            wal.truncate()?;
            tracing::info!("WAL truncated after checkpoint");
            Ok::<(), Error>(())
        })
        .await
        .map_err(|e| Error::Io(format!("checkpoint task failed: {e}")))?
    }
}

impl Cluster {
    async fn propose(&self, cmd: Command) -> Result<Outcome> {
        let raft = Arc::clone(&self.raft);
        let write = tokio::spawn(async move { raft.client_write(cmd).await });
        let result = write
            .await
            .map_err(|e| Error::Io(format!("write task failed: {e}")))?;
        match result {
            Ok(resp) => resp.data.0,
            Err(e) => {
                if let Some(fwd) = e.forward_to_leader() {
                    return Err(Error::NotLeader {
                        leader_id: fwd.leader_id,
                        leader_addr: fwd.leader_node.as_ref().map(|n| n.api_addr.clone()),
                    });
                }
                tracing::error!(error = %e, "Raft write failed");
                Err(Error::Io(format!("replication failed: {e}")))
            }
        }
    }
}

// ── Metrics view ───────────────────────────────────────────────────────

/// Cluster membership as reported by `/cluster/metrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MembershipView {
    pub voters: Vec<NodeId>,
    pub learners: Vec<NodeId>,
    pub nodes: BTreeMap<NodeId, ClusterNode>,
}

/// Replication progress of one follower.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationView {
    pub matched: Option<u64>,
    pub lag: u64,
}

/// Node state, possibly stale on followers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetricsView {
    pub id: NodeId,
    pub state: String,
    pub current_term: u64,
    pub current_leader: Option<NodeId>,
    pub last_log_index: Option<u64>,
    pub last_applied: Option<u64>,
    pub membership: MembershipView,
    pub replication: BTreeMap<NodeId, ReplicationView>,
}

impl ClusterMetricsView {
    fn standalone() -> Self {
        Self {
            id: 0,
            state: "Leader".into(),
            current_term: 0,
            current_leader: Some(0),
            last_log_index: None,
            last_applied: None,
            membership: MembershipView::default(),
            replication: BTreeMap::new(),
        }
    }

    fn from_raft(m: &openraft::RaftMetrics<NodeId, ClusterNode>) -> Self {
        let membership = m.membership_config.membership();
        let last_log_index = m.last_log_index;
        let replication = m
            .replication
            .as_ref()
            .map(|r| {
                r.iter()
                    .map(|(id, log_id)| {
                        let matched = log_id.as_ref().map(|l| l.index);
                        let lag = last_log_index
                            .unwrap_or(0)
                            .saturating_sub(matched.unwrap_or(0));
                        (*id, ReplicationView { matched, lag })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: m.id,
            state: format!("{:?}", m.state),
            current_term: m.current_term,
            current_leader: m.current_leader,
            last_log_index,
            last_applied: m.last_applied.map(|l| l.index),
            membership: MembershipView {
                voters: membership.voter_ids().collect(),
                learners: membership.learner_ids().collect(),
                nodes: membership
                    .nodes()
                    .map(|(id, node)| (*id, node.clone()))
                    .collect(),
            },
            replication,
        }
    }
}
