//! HTTP-based Raft RPC network transport.
//!
//! Implements openraft's `RaftNetworkFactory` and `RaftNetwork` traits using
//! a reqwest client. Peers are reached on their `rpc_addr`.

use crate::cluster::types::{ClusterNode, NodeId, TypeConfig};
use openraft::error::{InstallSnapshotError, NetworkError, RPCError, RaftError, RemoteError, Unreachable};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Raft RPC error with the default infallible application error.
pub type RPCErr<E = openraft::error::Infallible> =
    RPCError<NodeId, ClusterNode, RaftError<NodeId, E>>;

/// Factory that creates HTTP connections to Raft peers.
#[derive(Default)]
pub struct NetworkFactory {
    client: reqwest::Client,
}

impl NetworkFactory {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

/// An HTTP connection to a single peer.
pub struct NetworkConnection {
    target: NodeId,
    target_addr: String,
    client: reqwest::Client,
}

impl RaftNetworkFactory<TypeConfig> for NetworkFactory {
    type Network = NetworkConnection;

    async fn new_client(&mut self, target: NodeId, node: &ClusterNode) -> Self::Network {
        NetworkConnection {
            target,
            target_addr: node.rpc_addr.clone(),
            client: self.client.clone(),
        }
    }
}

impl NetworkConnection {
    /// POST `req` to `/raft/{path}` and decode the peer's `Result`.
    async fn send<Req, Resp, E>(&self, path: &str, req: &Req) -> Result<Resp, RPCErr<E>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
        E: std::error::Error + DeserializeOwned,
    {
        let url = format!("http://{}/raft/{}", self.target_addr, path);
        let resp = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| RPCError::Unreachable(Unreachable::new(&e)))?;

        let result: Result<Resp, RaftError<NodeId, E>> = resp
            .json()
            .await
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))?;

        result.map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
    }
}

impl RaftNetwork<TypeConfig> for NetworkConnection {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCErr> {
        self.send("append", &rpc).await
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<InstallSnapshotResponse<NodeId>, RPCErr<InstallSnapshotError>> {
        self.send("snapshot", &rpc).await
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCErr> {
        self.send("vote", &rpc).await
    }
}
