//! Storage layer: spaces, versions, per-index data, write-ahead log, and artifacts.
//!
//! Everything lives in memory. Durability comes from the `SyncWriteAheadLog`
//! (CRC32 + fsync) plus checkpoint and snapshot artifacts written atomically.

/// One dense index: records, HNSW graph, BM25 postings.
pub mod index;
/// Artifact encoding and atomic file writes.
pub mod persistence;
/// Space catalog.
pub mod registry;
/// Space state and locks.
pub mod space;
/// Versions of a space's vector set.
pub mod version;
/// Write-Ahead Log with CRC32 checksums.
pub mod wal;

pub use index::{VectorIndex, VectorPage};
pub use registry::Registry;
pub use space::{NewVersion, Space, SpaceInfo, SpaceState};
pub use version::{Version, VersionData, VersionMeta};
pub use wal::{ReplayStats, SyncWriteAheadLog};
