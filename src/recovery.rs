//! Boot Recovery.
//!
//! Runs once at process startup, before any new rename is accepted: scans
//! the WAL directory for entries left behind by a transaction that never
//! reached Cleanup, and rolls each one back through the Transaction
//! Manager (spec §4.6). Never blocks or fails startup: a WAL entry it
//! cannot parse or cannot fully roll back is logged and left in place for
//! the next boot (or a human) to retry.

use crate::transaction::TransactionManager;
use tracing::{error, info, instrument, warn};

/// Outcome of recovering a single WAL entry, returned for the caller to
/// aggregate into a summary log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    RolledBack,
    Skipped,
    Failed,
}

/// Scans `manager`'s WAL directory for entries at least as old as its
/// configured staleness floor and rolls each one back in path order.
///
/// Returns the number of entries successfully rolled back. This never
/// returns an error: a corrupt WAL file or a failed rollback is logged
/// and counted, not propagated, so a single bad entry can never keep the
/// server from starting (spec §4.6, P6).
#[instrument(skip(manager))]
pub fn recover_pending_transactions(manager: &TransactionManager) -> usize {
    let pending = match manager
        .wal_manager()
        .scan_pending_wals(manager.config().staleness_floor)
    {
        Ok(paths) => paths,
        Err(e) => {
            warn!("boot recovery: failed to scan WAL directory: {e}");
            return 0;
        }
    };

    if pending.is_empty() {
        info!("boot recovery: no pending WAL entries");
        return 0;
    }

    info!(count = pending.len(), "boot recovery: found pending WAL entries");

    let mut rolled_back = 0;
    for wal_path in &pending {
        match manager.rollback_from_wal(wal_path) {
            Ok(()) => {
                info!(path = %wal_path.display(), "boot recovery: rolled back stale transaction");
                rolled_back += 1;
            }
            Err(e) => {
                error!(
                    path = %wal_path.display(),
                    error_code = e.error_code(),
                    "boot recovery: could not fully roll back; WAL entry preserved for manual recovery"
                );
            }
        }
    }

    rolled_back
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use crate::manifest::{OperationManifest, WalEntry};
    use std::fs;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn manifest_for(old_path: std::path::PathBuf, new_path: std::path::PathBuf) -> OperationManifest {
        OperationManifest {
            correlation_id: Uuid::new_v4(),
            old_path,
            new_path,
            primary_file_hash: "0".repeat(64),
            affected_files: Vec::new(),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn young_wal_is_left_alone() {
        let dir = tempdir().unwrap();
        let vault = dir.path();
        let wal_dir = vault.join(".wal");
        let cfg = VaultConfig::with_wal_dir(vault.to_path_buf(), wal_dir.clone());
        let manager = TransactionManager::new(cfg);

        let old_path = vault.join("foo.md");
        fs::write(&old_path, "hi").unwrap();
        let entry = WalEntry::new(manifest_for(old_path, vault.join("bar.md")));
        manager.wal_manager().write_wal(&entry).unwrap();

        let rolled_back = recover_pending_transactions(&manager);
        assert_eq!(rolled_back, 0);
        assert!(fs::read_dir(&wal_dir).unwrap().count() >= 1);
    }

    #[test]
    fn prepare_phase_entry_is_rolled_back_once_stale() {
        let dir = tempdir().unwrap();
        let vault = dir.path();
        let wal_dir = vault.join(".wal");
        let cfg = VaultConfig::with_wal_dir(vault.to_path_buf(), wal_dir.clone())
            .with_staleness_floor(Duration::from_millis(0));
        let manager = TransactionManager::new(cfg);

        let old_path = vault.join("foo.md");
        fs::write(&old_path, "hi").unwrap();
        let entry = WalEntry::new(manifest_for(old_path, vault.join("bar.md")));
        manager.wal_manager().write_wal(&entry).unwrap();

        thread::sleep(Duration::from_millis(5));
        let rolled_back = recover_pending_transactions(&manager);
        assert_eq!(rolled_back, 1);
        assert!(fs::read_dir(&wal_dir).unwrap().count() == 0);
    }
}
