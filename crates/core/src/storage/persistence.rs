//! Artifact encoding for snapshots and checkpoints.
//!
//! Layout: `[bincode header][bincode body][magic "SVS1"][u32 CRC32 BE]`. The CRC
//! covers everything before the magic. The header is decodable on its own, so
//! listings can read it without loading the body. Writes go through a temp file
//! and an atomic rename, with 0600 permissions on unix.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Magic bytes placed before the CRC32 footer.
pub const ARTIFACT_MAGIC: &[u8; 4] = b"SVS1";

const FOOTER_LEN: usize = 8;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Serialize `header` then `body` and append the magic + CRC footer.
pub fn encode_artifact<H: Serialize, B: Serialize>(header: &H, body: &B) -> io::Result<Vec<u8>> {
    let mut out = bincode::serialize(header).map_err(|e| io::Error::other(e.to_string()))?;
    bincode::serialize_into(&mut out, body).map_err(|e| io::Error::other(e.to_string()))?;
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(ARTIFACT_MAGIC);
    out.extend_from_slice(&crc.to_be_bytes());
    Ok(out)
}

/// Verify the footer and decode header and body.
pub fn decode_artifact<H: DeserializeOwned, B: DeserializeOwned>(
    raw: &[u8],
) -> io::Result<(H, B)> {
    if raw.len() < FOOTER_LEN || &raw[raw.len() - 8..raw.len() - 4] != ARTIFACT_MAGIC {
        return Err(invalid("not a spacevec artifact (missing SVS1 footer)"));
    }
    let payload = &raw[..raw.len() - FOOTER_LEN];
    let stored_crc = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != stored_crc {
        return Err(invalid(format!(
            "artifact CRC32 mismatch: expected {stored_crc:#010x}, got {computed_crc:#010x}"
        )));
    }
    let mut cursor = io::Cursor::new(payload);
    let header: H =
        bincode::deserialize_from(&mut cursor).map_err(|e| invalid(format!("header: {e}")))?;
    let body: B =
        bincode::deserialize_from(&mut cursor).map_err(|e| invalid(format!("body: {e}")))?;
    if cursor.position() as usize != payload.len() {
        return Err(invalid("trailing bytes after artifact body"));
    }
    Ok((header, body))
}

/// Decode only the header of an artifact file.
pub fn read_header<H: DeserializeOwned>(path: &Path) -> io::Result<H> {
    let file = File::open(path)?;
    bincode::deserialize_from(io::BufReader::new(file)).map_err(|e| invalid(e.to_string()))
}

/// Atomically write `bytes` to `path` (temp file, fsync, rename).
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o700));
        }
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    {
        let mut file = File::create(tmp_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
