//! File I/O Layer.
//!
//! Synchronous, durable operations on single files (spec §4.1). Every
//! other component in this crate is forbidden from touching the
//! filesystem directly; they all go through here, the way the teacher's
//! `writer.rs` is the sole owner of vault filesystem mutation.

use crate::error::IoError;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tracing::{instrument, warn};

/// Maximum number of retry attempts after the initial try (spec §4.1, P10).
const MAX_RETRIES: u32 = 3;

/// Backoff schedule in milliseconds: 100, 200, 400 (spec §4.1, P10).
const BACKOFF_MS: [u64; MAX_RETRIES as usize] = [100, 200, 400];

/// Whether an I/O error should be retried, classified from its `ErrorKind`
/// and (on Unix) raw OS error code. This table is a plain function value,
/// not a type hierarchy, per spec §9's re-architecture note, so a host
/// platform can swap in a different classification by passing its own
/// closure to [`write_file_with_retry_using`].
pub fn is_cloud_sync_conflict(err: &std::io::Error, attempt: u32) -> bool {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::WouldBlock => true,
        ErrorKind::PermissionDenied if attempt == 0 => true,
        _ => matches!(err.raw_os_error(), Some(16) | Some(26) | Some(11)), // EBUSY, ETXTBSY, EAGAIN
    }
}

/// Reads a file's raw bytes.
#[instrument]
pub fn read_file(path: &Path) -> Result<Vec<u8>, IoError> {
    fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IoError::FileNotFound(path.to_path_buf())
        } else {
            IoError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })
}

/// Computes the lowercase-hex SHA-256 digest of a file's current bytes.
#[instrument]
pub fn hash_file(path: &Path) -> Result<String, IoError> {
    let mut file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IoError::FileNotFound(path.to_path_buf())
        } else {
            IoError::HashFailed {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| IoError::HashFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex_lower(&hasher.finalize()))
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// SHA-256 of an in-memory byte slice, used by the Link Updater to hash
/// rendered content before it is staged.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_lower(&hasher.finalize())
}

/// Writes bytes directly to `path`, no atomicity guarantee.
#[instrument(skip(bytes))]
pub fn write_file(path: &Path, bytes: &[u8]) -> Result<(), IoError> {
    fs::write(path, bytes).map_err(|e| IoError::WriteError {
        path: path.to_path_buf(),
        attempts: 1,
        source: e,
    })
}

/// Writes bytes to a staging temp file in `path`'s directory, then
/// atomically renames it onto `path`, retrying transient cloud-sync
/// conflicts with exponential backoff (spec §4.1).
#[instrument(skip(bytes))]
pub fn write_file_with_retry(path: &Path, bytes: &[u8]) -> Result<(), IoError> {
    write_file_with_retry_using(path, bytes, is_cloud_sync_conflict, sleep_ms)
}

fn sleep_ms(ms: u64) {
    std::thread::sleep(Duration::from_millis(ms));
}

/// Same as [`write_file_with_retry`] but with the retry classifier and
/// sleep function injected, so tests can exercise the retry path without
/// real wall-clock delay.
pub fn write_file_with_retry_using(
    path: &Path,
    bytes: &[u8],
    is_retryable: impl Fn(&std::io::Error, u32) -> bool,
    sleep: impl Fn(u64),
) -> Result<(), IoError> {
    let parent = path
        .parent()
        .ok_or_else(|| IoError::InvalidPath(path.to_path_buf()))?;

    let mut attempt: u32 = 0;
    loop {
        match atomic_write_once(parent, path, bytes) {
            Ok(()) => return Ok(()),
            Err(e) => {
                if attempt < MAX_RETRIES && is_retryable(&e, attempt) {
                    let delay = BACKOFF_MS[attempt as usize];
                    warn!(
                        path = %path.display(),
                        attempt,
                        delay_ms = delay,
                        "retrying write after cloud-sync conflict"
                    );
                    sleep(delay);
                    attempt += 1;
                    continue;
                }
                return Err(IoError::WriteError {
                    path: path.to_path_buf(),
                    attempts: attempt + 1,
                    source: e,
                });
            }
        }
    }
}

fn atomic_write_once(parent: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut temp_file = NamedTempFile::new_in(parent)?;
    temp_file.write_all(bytes)?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Writes bytes to a distinctively-named staging sibling of `path`, never
/// visible as a real vault file (spec §3 "Staged file", I4).
///
/// The returned path looks like `{dir}/.mcp-tmp-{timestamp}-{basename}`
/// (or with a `label` inserted before the basename, e.g. `backup`).
#[instrument(skip(bytes))]
pub fn write_staging_file(
    dir: &Path,
    basename: &str,
    label: Option<&str>,
    bytes: &[u8],
) -> Result<PathBuf, IoError> {
    let timestamp = monotonic_timestamp();
    let name = match label {
        Some(l) => format!(".mcp-tmp-{timestamp}-{l}-{basename}"),
        None => format!(".mcp-tmp-{timestamp}-{basename}"),
    };
    let staged_path = dir.join(name);
    write_file_with_retry(&staged_path, bytes)?;
    Ok(staged_path)
}

fn monotonic_timestamp() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Single filesystem rename, assumed atomic within a directory.
#[instrument]
pub fn rename_file(from: &Path, to: &Path) -> Result<(), IoError> {
    fs::rename(from, to).map_err(|e| IoError::RenameFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source: e,
    })
}

/// Deletes a file; silently succeeds if it is already absent.
#[instrument]
pub fn delete_file(path: &Path) -> Result<(), IoError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(IoError::DeleteFailed(path.to_path_buf(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    #[test]
    fn hash_is_deterministic_for_unchanged_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.md");
        fs::write(&path, b"hello world").unwrap();
        let h1 = hash_file(&path).unwrap();
        let h2 = hash_file(&path).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn hash_bytes_matches_hash_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.md");
        fs::write(&path, b"identical content").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"identical content"));
    }

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("note.md");
        write_file_with_retry(&path, b"version one").unwrap();
        write_file_with_retry(&path, b"version two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"version two");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".mcp-tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn delete_missing_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.md");
        assert!(delete_file(&path).is_ok());
    }

    #[test]
    fn retry_bounded_at_three_attempts_then_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.md");
        let calls = AtomicU32::new(0);

        let result = write_file_with_retry_using(
            &path.join("no-such-subdir").join("y.md"),
            b"data",
            |_e, _attempt| true, // always classify as retryable
            |_ms| {
                calls.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert!(result.is_err());
        // 3 retries sleep between the 4 attempts (1 initial + 3 retries).
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn staging_filename_has_distinctive_prefix() {
        let dir = tempdir().unwrap();
        let staged = write_staging_file(dir.path(), "note.md", None, b"draft").unwrap();
        assert!(staged
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(".mcp-tmp-"));
        let backup = write_staging_file(dir.path(), "note.md", Some("backup"), b"orig").unwrap();
        assert_ne!(staged, backup);
    }
}
