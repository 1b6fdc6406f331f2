//! Error types for spacevec-core.
//!
//! Every fallible engine operation returns [`Result<T>`]. Errors are `Clone` and
//! serializable so that the outcome of a replicated command can be carried back
//! to the node that proposed it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum Error {
    /// The named resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A resource with the same identity already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The request failed validation. Nothing was mutated.
    #[error("validation error: {0}")]
    Validation(String),

    /// The caller is authenticated but lacks the required scope.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The caller presented no token, an unknown token, or an expired token.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// This node cannot accept writes. The current leader, if known, is attached.
    #[error("not leader (leader id: {leader_id:?}, leader addr: {leader_addr:?})")]
    NotLeader {
        /// Node id of the current leader.
        leader_id: Option<u64>,
        /// Public API address of the current leader.
        leader_addr: Option<String>,
    },

    /// The operation conflicts with the current state (sealed version, restore in progress).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage or serialization failure.
    #[error("io error: {0}")]
    Io(String),
}

/// Stable classification of an [`Error`], used by transports to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Validation,
    PermissionDenied,
    Unauthenticated,
    NotLeader,
    Conflict,
    Io,
}

impl Error {
    /// Returns the stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::Validation(_) => ErrorKind::Validation,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Error::NotLeader { .. } => ErrorKind::NotLeader,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Io(format!("encoding failed: {e}"))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::validation("x").kind(), ErrorKind::Validation);
        let nl = Error::NotLeader {
            leader_id: Some(2),
            leader_addr: Some("127.0.0.1:21002".into()),
        };
        assert_eq!(nl.kind(), ErrorKind::NotLeader);
    }

    #[test]
    fn test_display_includes_message() {
        let e = Error::Conflict("version 3 is sealed".into());
        assert_eq!(e.to_string(), "conflict: version 3 is sealed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad crc");
        let e: Error = io.into();
        assert_eq!(e.kind(), ErrorKind::Io);
        assert!(e.to_string().contains("bad crc"));
    }

    #[test]
    fn test_error_survives_serialization() {
        let e = Error::PermissionDenied("space scope 0 < 2".into());
        let bytes = bincode::serialize(&e).unwrap();
        let back: Error = bincode::deserialize(&bytes).unwrap();
        assert_eq!(e, back);
    }
}
