//! Raft type configuration and node description.

use serde::{Deserialize, Serialize};
use spacevec_core::{Command, Error, Outcome};
use std::fmt;
use std::io::Cursor;

/// Unique identifier for a node in the Raft cluster.
pub type NodeId = u64;

/// The openraft `Raft` instance parameterized with our [`TypeConfig`].
pub type Raft = openraft::Raft<TypeConfig>;

openraft::declare_raft_types!(
    pub TypeConfig:
        D = Command,
        R = CommandResponse,
        Node = ClusterNode,
);

/// Addresses of a cluster member.
///
/// `api_addr` serves clients and is where writes are redirected; `rpc_addr`
/// carries Raft traffic between peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub api_addr: String,
    pub rpc_addr: String,
}

impl ClusterNode {
    pub fn new(api_addr: impl Into<String>, rpc_addr: impl Into<String>) -> Self {
        Self {
            api_addr: api_addr.into(),
            rpc_addr: rpc_addr.into(),
        }
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{api: {}, rpc: {}}}", self.api_addr, self.rpc_addr)
    }
}

/// Result of applying a replicated [`Command`] to the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse(pub Result<Outcome, Error>);
