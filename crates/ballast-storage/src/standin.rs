//! Standin records and standin paths.
//!
//! A standin is the small file history tracks in place of a big file. It
//! lives under [`STANDIN_DIR`] at the big file's path and holds the content
//! hash as 40 lowercase hex characters followed by a newline. The standin's
//! own executable bit carries the big file's executable bit.

use crate::{ContentHash, Result, StorageError};
use std::fs;
use std::path::Path;

/// Directory, relative to the working-copy root, that holds standins.
pub const STANDIN_DIR: &str = ".bfs";

/// Encodes the standin record for `hash`.
pub fn encode_standin(hash: &ContentHash) -> Vec<u8> {
    let mut out = hash.to_hex().into_bytes();
    out.push(b'\n');
    out
}

/// Decodes a standin record.
///
/// The first 40 bytes are the record; anything after them is ignored.
pub fn decode_standin(name: &str, data: &[u8]) -> Result<ContentHash> {
    if data.len() < ContentHash::HEX_LEN {
        return Err(StorageError::MalformedStandin {
            path: name.to_string(),
            detail: format!("{} bytes, expected at least 40", data.len()),
        });
    }
    let hex = std::str::from_utf8(&data[..ContentHash::HEX_LEN]).map_err(|_| {
        StorageError::MalformedStandin {
            path: name.to_string(),
            detail: "not ASCII hex".to_string(),
        }
    })?;
    ContentHash::from_hex(hex).map_err(|e| StorageError::MalformedStandin {
        path: name.to_string(),
        detail: e.to_string(),
    })
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// Returns the standin path for a big file.
pub fn to_standin_path(path: &str) -> String {
    format!("{}/{}", STANDIN_DIR, normalize(path))
}

/// Returns true if `path` lies in the standin directory.
pub fn is_standin_path(path: &str) -> bool {
    from_standin_path(path).is_some()
}

/// Returns the big-file path for a standin path, or `None` if `path` is not
/// a standin.
pub fn from_standin_path(path: &str) -> Option<String> {
    let normalized = normalize(path);
    normalized
        .strip_prefix(STANDIN_DIR)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}

/// Reads and decodes the standin at `path`.
pub fn read_standin(path: &Path) -> Result<ContentHash> {
    let data = fs::read(path)?;
    decode_standin(&path.display().to_string(), &data)
}

/// Writes a standin, creating parent directories as needed.
pub fn write_standin(path: &Path, hash: &ContentHash, executable: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, encode_standin(hash))?;
    set_mode(path, if executable { 0o755 } else { 0o644 })?;
    Ok(())
}

/// Returns true if the owner execute bit is set.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)?.permissions().mode();
    Ok(mode & 0o100 != 0)
}

/// Always false where files carry no execute bit.
#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> Result<bool> {
    fs::metadata(path)?;
    Ok(false)
}

/// Gives a working file the mode a checkout produces: `0755` for
/// executables, `0644` otherwise.
#[cfg(unix)]
pub fn set_executable(path: &Path, executable: bool) -> Result<()> {
    set_mode(path, if executable { 0o755 } else { 0o644 })
}

/// Gives a working file the mode a checkout produces.
#[cfg(not(unix))]
pub fn set_executable(path: &Path, _executable: bool) -> Result<()> {
    fs::metadata(path)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
