//! Synchronous Write-Ahead Log (WAL) for crash recovery in standalone mode.
//!
//! Every command is appended to the WAL before being applied in memory.
//! Each entry is framed as `[u32 length BE][u32 CRC32 BE][bincode payload]`
//! and durably flushed with `fsync`. The log is generic over the entry type.

use crate::config;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Diagnostic statistics from a WAL replay.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    /// Number of entries successfully deserialized.
    pub success: usize,
    /// Number of entries skipped due to deserialization errors (CRC was valid).
    pub skipped: usize,
    /// Number of CRC mismatches encountered (replay stopped).
    pub crc_errors: usize,
    /// Whether replay was terminated by a truncated entry.
    pub truncated: bool,
}

/// Append-only write-ahead log with CRC32 integrity checks.
///
/// Thread-safe via `parking_lot::Mutex`. Each [`append`](SyncWriteAheadLog::append)
/// call serializes, writes, flushes, and fsyncs the entry before returning.
pub struct SyncWriteAheadLog {
    writer: Mutex<BufWriter<File>>,
    /// freeze() takes exclusive, append() takes shared.
    write_gate: RwLock<()>,
    path: PathBuf,
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

impl SyncWriteAheadLog {
    /// Open or create `wal.bin` inside `data_dir`.
    pub fn open(data_dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(config::WAL_FILE);
        let file = open_append(&path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            write_gate: RwLock::new(()),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and fsync.
    pub fn append<T: Serialize>(&self, entry: &T) -> io::Result<()> {
        let framed = serialize_and_frame(entry)?;

        let _gate = self.write_gate.read();
        let mut w = self.writer.lock();
        w.write_all(&framed)?;
        w.flush()?;
        w.get_mut().sync_all()?;
        Ok(())
    }

    /// Read all entries sequentially, verifying CRC32 checksums.
    ///
    /// Replay stops at the first CRC mismatch or truncated frame.
    pub fn replay<T: DeserializeOwned>(&self) -> io::Result<(Vec<T>, ReplayStats)> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut stats = ReplayStats::default();
        let mut header_buf = [0u8; 8];

        loop {
            match reader.read_exact(&mut header_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len =
                u32::from_be_bytes([header_buf[0], header_buf[1], header_buf[2], header_buf[3]])
                    as usize;
            let stored_crc =
                u32::from_be_bytes([header_buf[4], header_buf[5], header_buf[6], header_buf[7]]);
            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::warn!(path = ?self.path, "WAL truncated mid-entry, stopping replay");
                    stats.truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
            if crc32fast::hash(&data) != stored_crc {
                tracing::warn!(path = ?self.path, "WAL entry CRC mismatch, stopping replay");
                stats.crc_errors += 1;
                break;
            }
            match bincode::deserialize::<T>(&data) {
                Ok(entry) => {
                    entries.push(entry);
                    stats.success += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WAL entry deserialization failed, skipping");
                    stats.skipped += 1;
                }
            }
        }

        Ok((entries, stats))
    }

    /// Block all appends while the returned guard is held.
    pub fn freeze(&self) -> RwLockWriteGuard<'_, ()> {
        self.write_gate.write()
    }

    /// Truncate the WAL file, fsync, and reopen in append mode.
    pub fn truncate(&self) -> io::Result<()> {
        let mut writer = self.writer.lock();
        let truncated = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        truncated.sync_all()?;
        *writer = BufWriter::new(open_append(&self.path)?);
        Ok(())
    }
}

/// `[u32 len BE][u32 crc32 BE][bincode payload]`
fn serialize_and_frame<T: Serialize>(entry: &T) -> io::Result<Vec<u8>> {
    let bytes = bincode::serialize(entry).map_err(|e| io::Error::other(e.to_string()))?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "WAL entry exceeds 4 GiB"))?;
    let crc = crc32fast::hash(&bytes);

    let mut framed = Vec::with_capacity(8 + bytes.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&crc.to_be_bytes());
    framed.extend_from_slice(&bytes);
    Ok(framed)
}
