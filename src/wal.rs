//! WAL Manager.
//!
//! Durably persists transaction metadata outside the vault so a crashed
//! transaction can be rolled back on restart (spec §4.4). Mirrors the
//! write-synced-JSON-then-rename pattern used by the reference WAL
//! implementations in this corpus, generalized to the rename-specific
//! `WalEntry` schema.

use crate::error::WalError;
use crate::manifest::WalEntry;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Manages the on-disk lifecycle of WAL entries in a single directory.
#[derive(Debug, Clone)]
pub struct WalManager {
    wal_dir: PathBuf,
}

impl WalManager {
    pub fn new(wal_dir: PathBuf) -> Self {
        Self { wal_dir }
    }

    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    fn file_name(created_at: chrono::DateTime<Utc>, correlation_id: Uuid) -> String {
        format!(
            "{}-rename-{correlation_id}.wal.json",
            created_at.format("%Y%m%dT%H%M%S")
        )
    }

    /// Validates the entry's correlation id and schema version, seeds the
    /// WAL directory's explanatory README on first use, then writes
    /// pretty-printed JSON to
    /// `{wal_dir}/{yyyymmddThhmmss}-rename-{correlationId}.wal.json`.
    #[instrument(skip(self, entry))]
    pub fn write_wal(&self, entry: &WalEntry) -> Result<PathBuf, WalError> {
        if entry.correlation_id.get_version_num() != 4 {
            return Err(WalError::InvalidCorrelationId(entry.correlation_id));
        }
        if entry.schema_version != WalEntry::SCHEMA_VERSION {
            return Err(WalError::SchemaMismatch {
                path: self.wal_dir.clone(),
                found: entry.schema_version,
            });
        }

        crate::config::ensure_wal_dir(&self.wal_dir)?;
        let path = self
            .wal_dir
            .join(Self::file_name(entry.created_at, entry.correlation_id));

        self.write_json_atomic(&path, entry)
            .map_err(|source| WalError::WriteFailed {
                correlation_id: entry.correlation_id,
                source,
            })?;

        debug!(path = %path.display(), "wrote WAL entry");
        Ok(path)
    }

    fn write_json_atomic(&self, path: &Path, entry: &WalEntry) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let parent = path
            .parent()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent"))?;
        let mut temp_file = NamedTempFile::new_in(parent)?;
        use std::io::Write;
        temp_file.write_all(json.as_bytes())?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Parses a WAL file from disk; rejects malformed JSON or a
    /// mismatched schema version.
    #[instrument(skip(self))]
    pub fn read_wal(&self, path: &Path) -> Result<WalEntry, WalError> {
        let content = fs::read_to_string(path)?;
        let entry: WalEntry = serde_json::from_str(&content)
            .map_err(|e| WalError::Corrupt(path.to_path_buf(), e))?;
        if entry.schema_version != WalEntry::SCHEMA_VERSION {
            return Err(WalError::SchemaMismatch {
                path: path.to_path_buf(),
                found: entry.schema_version,
            });
        }
        Ok(entry)
    }

    /// Read/merge/rewrite atomically via a temp-file-then-rename, using
    /// `patch` to mutate the in-memory entry before it is rewritten.
    #[instrument(skip(self, patch))]
    pub fn update_wal(
        &self,
        path: &Path,
        patch: impl FnOnce(&mut WalEntry),
    ) -> Result<(), WalError> {
        let mut entry = self.read_wal(path)?;
        patch(&mut entry);
        entry.updated_at = Utc::now();
        self.write_json_atomic(path, &entry)
            .map_err(|source| WalError::WriteFailed {
                correlation_id: entry.correlation_id,
                source,
            })
    }

    /// Unlinks a WAL file; idempotent if it is already absent.
    #[instrument(skip(self))]
    pub fn delete_wal(&self, path: &Path) -> Result<(), WalError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists every WAL file whose modification age is at least `min_age`.
    /// Corrupt or malformed entries are logged and skipped, never
    /// returned (spec §4.4).
    #[instrument(skip(self))]
    pub fn scan_pending_wals(&self, min_age: Duration) -> Result<Vec<PathBuf>, WalError> {
        if !self.wal_dir.exists() {
            return Ok(Vec::new());
        }

        let now = SystemTime::now();
        let mut pending = Vec::new();

        for entry in fs::read_dir(&self.wal_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_none_or(|n| !n.ends_with(".wal.json"))
            {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), "could not stat WAL file: {e}");
                    continue;
                }
            };
            let modified = match metadata.modified() {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), "could not read mtime: {e}");
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < min_age {
                continue;
            }

            match self.read_wal(&path) {
                Ok(_) => pending.push(path),
                Err(e) => {
                    warn!(path = %path.display(), "skipping unreadable WAL entry: {e}");
                }
            }
        }

        pending.sort();
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::OperationManifest;
    use tempfile::tempdir;

    fn sample_manifest() -> OperationManifest {
        OperationManifest {
            correlation_id: Uuid::new_v4(),
            old_path: PathBuf::from("/vault/foo.md"),
            new_path: PathBuf::from("/vault/bar.md"),
            primary_file_hash: "deadbeef".repeat(8),
            affected_files: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let mgr = WalManager::new(dir.path().to_path_buf());
        let entry = WalEntry::new(sample_manifest());
        let path = mgr.write_wal(&entry).unwrap();

        let read_back = mgr.read_wal(&path).unwrap();
        assert_eq!(read_back.correlation_id, entry.correlation_id);
        assert_eq!(read_back.schema_version, 1);
    }

    #[test]
    fn filename_is_lexicographically_sortable_by_time() {
        let dir = tempdir().unwrap();
        let mgr = WalManager::new(dir.path().to_path_buf());
        let entry = WalEntry::new(sample_manifest());
        let path = mgr.write_wal(&entry).unwrap();
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.contains("-rename-"));
        assert!(name.ends_with(".wal.json"));
    }

    #[test]
    fn corrupt_wal_is_rejected() {
        let dir = tempdir().unwrap();
        let mgr = WalManager::new(dir.path().to_path_buf());
        let path = dir.path().join("broken.wal.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(mgr.read_wal(&path), Err(WalError::Corrupt(_, _))));
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let mgr = WalManager::new(dir.path().to_path_buf());
        let mut entry = WalEntry::new(sample_manifest());
        entry.schema_version = 2;
        let path = dir.path().join("bad_schema.wal.json");
        fs::write(&path, serde_json::to_string(&entry).unwrap()).unwrap();
        assert!(matches!(
            mgr.read_wal(&path),
            Err(WalError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn scan_respects_age_floor() {
        let dir = tempdir().unwrap();
        let mgr = WalManager::new(dir.path().to_path_buf());
        let entry = WalEntry::new(sample_manifest());
        mgr.write_wal(&entry).unwrap();

        // Freshly written, well under any reasonable floor.
        let pending = mgr.scan_pending_wals(Duration::from_secs(60)).unwrap();
        assert!(pending.is_empty());

        let pending_now = mgr.scan_pending_wals(Duration::from_secs(0)).unwrap();
        assert_eq!(pending_now.len(), 1);
    }

    #[test]
    fn corrupt_entries_are_skipped_during_scan_not_returned() {
        let dir = tempdir().unwrap();
        let mgr = WalManager::new(dir.path().to_path_buf());
        fs::write(dir.path().join("x.wal.json"), "not json").unwrap();
        let pending = mgr.scan_pending_wals(Duration::from_secs(0)).unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let mgr = WalManager::new(dir.path().to_path_buf());
        let path = dir.path().join("missing.wal.json");
        assert!(mgr.delete_wal(&path).is_ok());
        assert!(mgr.delete_wal(&path).is_ok());
    }

    #[test]
    fn update_wal_merges_patch() {
        let dir = tempdir().unwrap();
        let mgr = WalManager::new(dir.path().to_path_buf());
        let entry = WalEntry::new(sample_manifest());
        let path = mgr.write_wal(&entry).unwrap();

        mgr.update_wal(&path, |e| {
            e.phase = crate::manifest::WalPhase::Committed;
        })
        .unwrap();

        let read_back = mgr.read_wal(&path).unwrap();
        assert_eq!(read_back.phase, crate::manifest::WalPhase::Committed);
    }
}
