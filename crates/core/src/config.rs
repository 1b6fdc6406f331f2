//! Global configuration constants for spacevec.
//!
//! All tuning parameters, input validation limits, and server defaults are defined here.
//! These are compile-time constants; runtime configuration is handled via CLI arguments
//! and environment variables in the server's `main.rs`.

/// BM25 Okapi term frequency saturation parameter.
///
/// Controls how quickly term frequency saturates. Higher values allow TF to grow more.
/// Standard value is 1.2 (range: 1.0–2.0).
pub const BM25_K1: f32 = 1.2;

/// BM25 Okapi document length normalization parameter.
///
/// 0.0 = no normalization, 1.0 = full normalization. Standard value is 0.75.
pub const BM25_B: f32 = 0.75;

/// Default number of bidirectional links per HNSW node.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
///
/// The effective value is always at least `top_k`.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 64;

/// Maximum number of layers in the HNSW graph.
pub const HNSW_DEFAULT_MAX_LAYERS: usize = 16;

/// Seed mixed into the per-node level RNG so that every replica draws the same levels.
pub const HNSW_LEVEL_SEED: u64 = 0x5eed_5bac_e7ec_0001;

/// Allowed range for the HNSW `m` parameter.
pub const HNSW_M_RANGE: std::ops::RangeInclusive<usize> = 2..=128;

/// Allowed range for the HNSW `ef_construct` parameter.
pub const HNSW_EF_CONSTRUCT_RANGE: std::ops::RangeInclusive<usize> = 1..=4096;

/// Candidate pool multiplier for rerank: the vector stage fetches `top_k * RERANK_OVERFETCH`.
pub const RERANK_OVERFETCH: usize = 4;

/// Weight of the normalized vector score in the rerank combined score.
///
/// The lexical score gets `1 - RERANK_VECTOR_WEIGHT`.
pub const RERANK_VECTOR_WEIGHT: f32 = 0.5;

/// Maximum allowed embedding dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Maximum number of results (`top_k`) per search request.
pub const MAX_K: usize = 10_000;

/// Default `top_k` for search requests that omit it.
pub const DEFAULT_TOP_K: usize = 10;

/// Maximum length of a space or index name in characters.
pub const MAX_SPACE_NAME_LEN: usize = 128;

/// Maximum length of a key in the key-value store.
pub const MAX_KEY_LEN: usize = 512;

/// Maximum number of vectors per upsert batch.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Maximum number of metadata keys per vector.
pub const MAX_METADATA_KEYS: usize = 64;

/// Maximum document text length in bytes.
pub const MAX_DOC_LEN: usize = 1_000_000;

/// Maximum number of records per page for list endpoints.
pub const MAX_PAGE_LIMIT: usize = 10_000;

/// Default page size for list endpoints.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Version alias that always resolves to the space's default version.
pub const HEAD_VERSION: u32 = 0;

/// Identifier of the version created together with a space.
pub const INITIAL_VERSION: u32 = 1;

/// Snapshot artifact format version.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Snapshot artifact file name prefix.
pub const SNAPSHOT_FILE_PREFIX: &str = "snapshot-";

/// Snapshot artifact file extension.
pub const SNAPSHOT_FILE_EXT: &str = "snap";

/// File name of the checkpoint image inside the data directory.
pub const CHECKPOINT_FILE: &str = "state.svi";

/// File name of the write-ahead log inside the data directory.
pub const WAL_FILE: &str = "wal.bin";

/// Default HTTP server port.
pub const DEFAULT_PORT: u16 = 21001;

/// Default directory for WAL and checkpoint files.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Default directory for snapshot artifacts.
pub const DEFAULT_SNAPSHOT_DIR: &str = "./snapshots";

/// Default interval (in seconds) between automatic checkpoints. 0 = disabled.
pub const DEFAULT_CHECKPOINT_INTERVAL_SECS: u64 = 300;

/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Per-request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Global rate limit in requests per second.
pub const RATE_LIMIT_RPS: u64 = 1_000;

/// Maximum HTTP request body size in bytes (32 MB).
pub const MAX_REQUEST_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Maximum snapshot upload size in bytes (1 GB).
pub const MAX_SNAPSHOT_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// Maximum number of concurrent in-flight requests.
pub const MAX_CONCURRENT_REQUESTS: usize = 512;
