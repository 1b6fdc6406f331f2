//! Replicated state-machine commands.
//!
//! Every mutation of engine state is a [`Command`]. In standalone mode commands
//! are appended to the WAL and applied; in cluster mode they are Raft log
//! entries applied on every replica. Commands carry their own timestamps and
//! token strings so that replaying them is deterministic.

use crate::rbac::{Token, TokenSpec};
use crate::record::VectorRecord;
use crate::schema::{SpaceConfig, SpaceUpdate};
use crate::snapshot::SystemImage;
use crate::storage::space::{NewVersion, SpaceInfo};
use crate::storage::version::VersionMeta;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    CreateSpace {
        config: SpaceConfig,
        at: i64,
    },
    UpdateSpace {
        name: String,
        update: SpaceUpdate,
        at: i64,
    },
    DeleteSpace {
        name: String,
    },
    CreateVersion {
        space: String,
        version: NewVersion,
        at: i64,
    },
    DeleteVersion {
        space: String,
        version: u32,
    },
    UpsertVectors {
        space: String,
        version: u32,
        index: Option<String>,
        records: Vec<VectorRecord>,
        at: i64,
    },
    DeleteVector {
        space: String,
        version: u32,
        index: Option<String>,
        id: u64,
        at: i64,
    },
    PutKey {
        space: String,
        key: String,
        /// JSON text.
        value: String,
        at: i64,
    },
    DeleteKey {
        space: String,
        key: String,
    },
    CreateToken {
        token: String,
        spec: TokenSpec,
        at: i64,
    },
    UpdateToken {
        token: String,
        spec: TokenSpec,
        at: i64,
    },
    DeleteToken {
        token: String,
    },
    Restore {
        image: SystemImage,
    },
}

impl Command {
    /// Short name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateSpace { .. } => "create_space",
            Command::UpdateSpace { .. } => "update_space",
            Command::DeleteSpace { .. } => "delete_space",
            Command::CreateVersion { .. } => "create_version",
            Command::DeleteVersion { .. } => "delete_version",
            Command::UpsertVectors { .. } => "upsert_vectors",
            Command::DeleteVector { .. } => "delete_vector",
            Command::PutKey { .. } => "put_key",
            Command::DeleteKey { .. } => "delete_key",
            Command::CreateToken { .. } => "create_token",
            Command::UpdateToken { .. } => "update_token",
            Command::DeleteToken { .. } => "delete_token",
            Command::Restore { .. } => "restore",
        }
    }

    /// Target space, if the command addresses one.
    pub fn space(&self) -> Option<&str> {
        match self {
            Command::CreateSpace { config, .. } => Some(&config.name),
            Command::UpdateSpace { name, .. } | Command::DeleteSpace { name } => Some(name),
            Command::CreateVersion { space, .. }
            | Command::DeleteVersion { space, .. }
            | Command::UpsertVectors { space, .. }
            | Command::DeleteVector { space, .. }
            | Command::PutKey { space, .. }
            | Command::DeleteKey { space, .. } => Some(space),
            Command::CreateToken { .. }
            | Command::UpdateToken { .. }
            | Command::DeleteToken { .. }
            | Command::Restore { .. } => None,
        }
    }
}

/// Result of applying a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Space(SpaceInfo),
    Version(VersionMeta),
    /// Vectors written to this version.
    Written { version: u32 },
    Token(Token),
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::DistanceMetric;
    use crate::schema::IndexConfig;
    use std::collections::BTreeMap;

    #[test]
    fn test_command_survives_bincode() {
        let cmd = Command::UpsertVectors {
            space: "s".into(),
            version: 0,
            index: Some("aux".into()),
            records: vec![VectorRecord::new(1, vec![0.5, 1.0]).with_tokens(["a", "b"])],
            at: 9,
        };
        let bytes = bincode::serialize(&cmd).unwrap();
        let back: Command = bincode::deserialize(&bytes).unwrap();
        match back {
            Command::UpsertVectors { records, index, .. } => {
                assert_eq!(index.as_deref(), Some("aux"));
                assert_eq!(records[0].tokens(), ["a", "b"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_create_space_bincode_keeps_metric() {
        let cmd = Command::CreateSpace {
            config: SpaceConfig {
                name: "s".into(),
                dense: IndexConfig::new(3, DistanceMetric::Dot),
                sparse: None,
                indexes: BTreeMap::new(),
                description: Some("d".into()),
            },
            at: 1,
        };
        let back: Command = bincode::deserialize(&bincode::serialize(&cmd).unwrap()).unwrap();
        let Command::CreateSpace { config, .. } = back else {
            panic!("wrong variant");
        };
        assert_eq!(config.dense.metric, DistanceMetric::Dot);
        assert_eq!(Command::DeleteSpace { name: "x".into() }.name(), "delete_space");
    }

    #[test]
    fn test_space_target() {
        let cmd = Command::PutKey {
            space: "s".into(),
            key: "k".into(),
            value: "1".into(),
            at: 0,
        };
        assert_eq!(cmd.space(), Some("s"));
        assert_eq!(Command::DeleteToken { token: "t".into() }.space(), None);
    }
}
