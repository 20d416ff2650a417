//! Transaction Manager.
//!
//! The central orchestrator of the five-phase rename protocol (spec §4.5):
//! Plan, Prepare, Validate, Commit, Cleanup, with a Rollback path reachable
//! from Prepare, Validate, or Commit. Every transaction is serialized
//! through a single `parking_lot::Mutex`, the same primitive the teacher
//! uses to guard its own shared in-memory state, so two renames can never
//! interleave their WAL writes or staging files.

use crate::error::{PartialRollback, Phase, TransactionError};
use crate::io;
use crate::link_updater;
use crate::manifest::{AffectedFile, OperationManifest, StagedFile, StagedKind, WalEntry, WalPhase};
use crate::scanner;
use crate::utils::{self, file_stem_string};
use crate::wal::WalManager;
use crate::config::VaultConfig;

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A request to rename one note and, optionally, rewrite every reference
/// to it across the vault.
#[derive(Debug, Clone)]
pub struct RenameRequest {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    pub update_links: bool,
    /// Reserved: a dry run that reports the plan without committing it.
    /// Not yet implemented; `execute` rejects it explicitly rather than
    /// silently performing a real rename (see `DESIGN.md`).
    pub dry_run: bool,
}

/// Wall-clock duration spent in each phase, returned alongside a
/// successful rename for observability (spec §4.5 "Timing diagnostics").
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimings {
    pub plan: Duration,
    pub prepare: Duration,
    pub validate: Duration,
    pub commit: Duration,
    pub cleanup: Duration,
}

/// The successful outcome of a completed rename transaction.
#[derive(Debug, Clone)]
pub struct RenameSuccess {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    pub correlation_id: Uuid,
    pub affected_files: usize,
    pub phase_timings: PhaseTimings,
    pub message: String,
}

/// The transaction's position in the state machine (spec §4.5). Exposed
/// for logging and tests; callers only ever see the terminal
/// [`RenameSuccess`] or [`TransactionError`] from `execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Init,
    Planned,
    Prepared,
    Validated,
    Committed,
    Cleaned,
    Aborted,
    RolledBack,
    RollbackFailed,
}

/// Orchestrates the full rename protocol against one vault.
pub struct TransactionManager {
    config: VaultConfig,
    wal: WalManager,
    /// Serializes all transactions through this manager; one rename at a
    /// time, matching the teacher's own guarding of shared mutable state.
    lock: Mutex<()>,
}

impl TransactionManager {
    pub fn new(config: VaultConfig) -> Self {
        let wal = WalManager::new(config.wal_dir.clone());
        Self {
            config,
            wal,
            lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn wal_manager(&self) -> &WalManager {
        &self.wal
    }

    /// Runs the full five-phase protocol for `request`, rolling back and
    /// returning an error if any phase after Prepare fails.
    #[instrument(skip(self, request))]
    pub fn execute(&self, request: RenameRequest) -> Result<RenameSuccess, TransactionError> {
        let correlation_id = Uuid::new_v4();

        if request.dry_run {
            return Err(TransactionError::Generic {
                correlation_id,
                reason: "dry_run is reserved and not yet implemented".to_string(),
            });
        }

        let _guard = self.lock.lock();
        let mut timings = PhaseTimings::default();

        let t0 = Instant::now();
        let manifest = self.plan(correlation_id, &request)?;
        timings.plan = t0.elapsed();
        info!(%correlation_id, phase = %Phase::Plan, affected = manifest.affected_files.len(), "planned rename");

        let t1 = Instant::now();
        let (wal_path, mut entry) = match self.prepare(correlation_id, &manifest, &request) {
            Ok(v) => v,
            Err(e) => {
                // Nothing has touched the vault yet; nothing to roll back.
                return Err(e);
            }
        };
        timings.prepare = t1.elapsed();
        info!(%correlation_id, phase = %Phase::Prepare, "staged backup and render files");

        let t2 = Instant::now();
        if let Err(e) = self.validate(correlation_id, &manifest) {
            self.rollback(correlation_id, &wal_path, &entry, Phase::Validate)?;
            return Err(e);
        }
        timings.validate = t2.elapsed();
        info!(%correlation_id, phase = %Phase::Validate, "validated unchanged content");

        let t3 = Instant::now();
        if let Err(e) = self.commit(correlation_id, &manifest, &mut entry, &wal_path) {
            self.rollback(correlation_id, &wal_path, &entry, Phase::Commit)?;
            return Err(e);
        }
        timings.commit = t3.elapsed();
        info!(%correlation_id, phase = %Phase::Commit, "committed rename and link updates");

        let t4 = Instant::now();
        self.cleanup(correlation_id, &entry, &wal_path);
        timings.cleanup = t4.elapsed();
        info!(%correlation_id, phase = %Phase::Cleanup, "cleaned up staging files and WAL entry");

        Ok(RenameSuccess {
            old_path: manifest.old_path.clone(),
            new_path: manifest.new_path.clone(),
            correlation_id,
            affected_files: manifest.affected_files.len(),
            phase_timings: timings,
            message: format!(
                "renamed '{}' to '{}' ({} file(s) updated)",
                manifest.old_path.display(),
                manifest.new_path.display(),
                manifest.affected_files.len()
            ),
        })
    }

    /// Resolves both endpoints, confirms preconditions, hashes the primary
    /// file, and scans the vault for references to it (spec §4.5 Plan).
    #[instrument(skip(self, request))]
    fn plan(
        &self,
        correlation_id: Uuid,
        request: &RenameRequest,
    ) -> Result<OperationManifest, TransactionError> {
        let old_path = utils::normalize_note_path(&request.old_path).map_err(|_| {
            TransactionError::InvalidPath {
                correlation_id,
                path: request.old_path.clone(),
                reason: "old path is not an absolute, traversal-free path".to_string(),
            }
        })?;
        let new_path = utils::normalize_note_path(&request.new_path).map_err(|_| {
            TransactionError::InvalidPath {
                correlation_id,
                path: request.new_path.clone(),
                reason: "new path is not an absolute, traversal-free path".to_string(),
            }
        })?;

        if old_path == new_path {
            return Err(TransactionError::InvalidPath {
                correlation_id,
                path: old_path,
                reason: "old path and new path are the same".to_string(),
            });
        }
        if !old_path.is_file() {
            return Err(TransactionError::FileNotFound {
                correlation_id,
                path: old_path,
            });
        }
        if new_path.exists() {
            return Err(TransactionError::FileExists {
                correlation_id,
                path: new_path,
            });
        }

        let metadata = std::fs::metadata(&old_path).map_err(|_| TransactionError::PermissionDenied {
            correlation_id,
            path: old_path.clone(),
        })?;
        if metadata.len() > crate::config::MAX_FILE_SIZE {
            return Err(TransactionError::PlanFailed {
                correlation_id,
                reason: format!(
                    "'{}' exceeds the maximum file size this engine will manage",
                    old_path.display()
                ),
            });
        }

        let primary_file_hash = io::hash_file(&old_path).map_err(|e| TransactionError::PlanFailed {
            correlation_id,
            reason: e.to_string(),
        })?;

        let affected_files = if request.update_links {
            let found = scanner::scan_references_for_path(&self.config.vault_root, &old_path)
                .map_err(|e| TransactionError::LinkScanFailed {
                    correlation_id,
                    reason: e.to_string(),
                })?;

            let mut affected = Vec::with_capacity(found.len());
            for file_refs in found {
                let hash_at_plan =
                    io::hash_file(&file_refs.path).map_err(|e| TransactionError::PlanFailed {
                        correlation_id,
                        reason: e.to_string(),
                    })?;
                affected.push(AffectedFile {
                    path: file_refs.path,
                    hash_at_plan,
                    references: file_refs.references,
                });
            }
            affected
        } else {
            Vec::new()
        };

        Ok(OperationManifest {
            correlation_id,
            old_path,
            new_path,
            primary_file_hash,
            affected_files,
            created_at: chrono::Utc::now(),
        })
    }

    /// Writes the WAL entry, then stages a backup and a rendered copy of
    /// every affected file so Commit only ever has to rename, never write
    /// fresh content (spec §9, Open Question resolution).
    #[instrument(skip(self, manifest, request))]
    fn prepare(
        &self,
        correlation_id: Uuid,
        manifest: &OperationManifest,
        request: &RenameRequest,
    ) -> Result<(PathBuf, WalEntry), TransactionError> {
        let mut entry = WalEntry::new(manifest.clone());
        let wal_path = self.wal.write_wal(&entry).map_err(|e| TransactionError::WalWriteFailed {
            correlation_id,
            reason: e.to_string(),
        })?;

        if !request.update_links || manifest.affected_files.is_empty() {
            return Ok((wal_path, entry));
        }

        let old_name = file_stem_string(&manifest.old_path);
        let new_name = file_stem_string(&manifest.new_path);
        let paths: Vec<PathBuf> = manifest
            .affected_files
            .iter()
            .map(|f| f.path.clone())
            .collect();

        let rendered = link_updater::render_link_updates(&paths, &old_name, &new_name).map_err(|e| {
            TransactionError::LinkRenderFailed {
                correlation_id,
                path: manifest.old_path.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut staged = Vec::with_capacity(rendered.len() * 2);
        for (path, new_content) in &rendered {
            let original = io::read_file(path).map_err(|e| TransactionError::PrepareFailed {
                correlation_id,
                reason: e.to_string(),
            })?;
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let basename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let backup_path =
                io::write_staging_file(dir, &basename, Some("backup"), &original).map_err(|e| {
                    TransactionError::PrepareFailed {
                        correlation_id,
                        reason: e.to_string(),
                    }
                })?;
            staged.push(StagedFile {
                original_path: path.clone(),
                staged_path: backup_path,
                hash_at_stage: io::hash_bytes(&original),
                kind: StagedKind::Backup,
            });

            let render_path =
                io::write_staging_file(dir, &basename, None, new_content.as_bytes()).map_err(|e| {
                    TransactionError::PrepareFailed {
                        correlation_id,
                        reason: e.to_string(),
                    }
                })?;
            staged.push(StagedFile {
                original_path: path.clone(),
                staged_path: render_path,
                hash_at_stage: io::hash_bytes(new_content.as_bytes()),
                kind: StagedKind::Render,
            });
        }

        entry.staged_files = staged;
        self.wal
            .update_wal(&wal_path, |e| e.staged_files = entry.staged_files.clone())
            .map_err(|e| TransactionError::WalWriteFailed {
                correlation_id,
                reason: e.to_string(),
            })?;

        Ok((wal_path, entry))
    }

    /// Re-hashes the primary file and every affected file and confirms
    /// none of them changed since Plan (spec §4.5 Validate, P4).
    #[instrument(skip(self, manifest))]
    fn validate(&self, correlation_id: Uuid, manifest: &OperationManifest) -> Result<(), TransactionError> {
        let current_hash =
            io::hash_file(&manifest.old_path).map_err(|e| TransactionError::ValidateFailed {
                correlation_id,
                reason: e.to_string(),
            })?;
        if current_hash != manifest.primary_file_hash {
            return Err(TransactionError::StaleContent {
                correlation_id,
                path: manifest.old_path.clone(),
            });
        }

        for affected in &manifest.affected_files {
            let current = io::hash_file(&affected.path).map_err(|e| TransactionError::ValidateFailed {
                correlation_id,
                reason: e.to_string(),
            })?;
            if current != affected.hash_at_plan {
                return Err(TransactionError::StaleContent {
                    correlation_id,
                    path: affected.path.clone(),
                });
            }
        }

        Ok(())
    }

    /// Renames the primary file, renames every staged render onto its
    /// final path, marks the WAL committed, and removes the backup
    /// staging files now that they are no longer needed to roll back the
    /// content rewrite (spec §4.5 Commit).
    #[instrument(skip(self, manifest, entry))]
    fn commit(
        &self,
        correlation_id: Uuid,
        manifest: &OperationManifest,
        entry: &mut WalEntry,
        wal_path: &Path,
    ) -> Result<(), TransactionError> {
        entry.phase = WalPhase::Commit;
        self.wal
            .update_wal(wal_path, |e| e.phase = WalPhase::Commit)
            .map_err(|e| TransactionError::WalWriteFailed {
                correlation_id,
                reason: e.to_string(),
            })?;

        io::rename_file(&manifest.old_path, &manifest.new_path).map_err(|e| {
            TransactionError::CommitFailed {
                correlation_id,
                reason: e.to_string(),
            }
        })?;

        for staged in entry.staged_files.iter().filter(|s| s.kind == StagedKind::Render) {
            io::rename_file(&staged.staged_path, &staged.original_path).map_err(|e| {
                TransactionError::CommitFailed {
                    correlation_id,
                    reason: e.to_string(),
                }
            })?;
        }

        for staged in entry.staged_files.iter().filter(|s| s.kind == StagedKind::Backup) {
            if let Err(e) = io::delete_file(&staged.staged_path) {
                warn!(%correlation_id, path = %staged.staged_path.display(), "failed to remove backup staging file: {e}");
            }
        }

        entry.phase = WalPhase::Committed;
        self.wal
            .update_wal(wal_path, |e| e.phase = WalPhase::Committed)
            .map_err(|e| TransactionError::WalWriteFailed {
                correlation_id,
                reason: e.to_string(),
            })?;

        Ok(())
    }

    /// Deletes any leftover staging files and the WAL entry itself. Never
    /// fails the transaction: a leftover staging file or WAL entry is
    /// inert once Commit has succeeded (spec §4.5 Cleanup).
    #[instrument(skip(self, entry))]
    fn cleanup(&self, correlation_id: Uuid, entry: &WalEntry, wal_path: &Path) {
        for staged in &entry.staged_files {
            if let Err(e) = io::delete_file(&staged.staged_path) {
                warn!(%correlation_id, path = %staged.staged_path.display(), "cleanup: failed to remove staging file: {e}");
            }
        }
        if let Err(e) = self.wal.delete_wal(wal_path) {
            warn!(%correlation_id, "cleanup: failed to remove WAL entry: {e}");
        }
    }

    /// Restores every affected file from its backup staging copy and, if
    /// the primary rename already happened, renames the target back onto
    /// the source path. Returns `RollbackFailed` (preserving the WAL) if
    /// any restoration fails partway, per spec §4.5 Rollback.
    #[instrument(skip(self, manifest, entry))]
    fn rollback(
        &self,
        correlation_id: Uuid,
        wal_path: &Path,
        entry: &WalEntry,
        failed_phase: Phase,
    ) -> Result<(), TransactionError> {
        let manifest = &entry.manifest;
        let mut rolled_back = Vec::new();
        let mut failed = Vec::new();

        for staged in entry.staged_files.iter().filter(|s| s.kind == StagedKind::Backup) {
            match io::read_file(&staged.staged_path) {
                Ok(bytes) => match io::write_file_with_retry(&staged.original_path, &bytes) {
                    Ok(()) => rolled_back.push(staged.original_path.clone()),
                    Err(e) => {
                        warn!(%correlation_id, path = %staged.original_path.display(), "rollback write failed: {e}");
                        failed.push(staged.original_path.clone());
                    }
                },
                Err(e) => {
                    warn!(%correlation_id, path = %staged.staged_path.display(), "rollback backup unreadable: {e}");
                    failed.push(staged.original_path.clone());
                }
            }
        }

        // Gated on observed filesystem state, not the recorded phase: the
        // WAL's phase reflects the last durable write, but the primary
        // rename itself may have landed (or not) independently of whether
        // that write made it to disk before a crash.
        if manifest.new_path.exists() && !manifest.old_path.exists() {
            if let Err(e) = io::rename_file(&manifest.new_path, &manifest.old_path) {
                warn!(%correlation_id, "rollback: failed to rename primary file back: {e}");
                failed.push(manifest.new_path.clone());
            } else {
                rolled_back.push(manifest.old_path.clone());
            }
        }

        for staged in &entry.staged_files {
            let _ = io::delete_file(&staged.staged_path);
        }

        if failed.is_empty() {
            if let Err(e) = self.wal.delete_wal(wal_path) {
                warn!(%correlation_id, "failed to remove WAL entry after successful rollback: {e}");
            }
            info!(%correlation_id, phase = %failed_phase, "rolled back transaction");
            Ok(())
        } else {
            Err(TransactionError::RollbackFailed {
                correlation_id,
                reason: format!("rollback failed after {failed_phase} phase error"),
                partial_rollback: PartialRollback {
                    rolled_back,
                    failed,
                    wal_path: wal_path.to_path_buf(),
                },
            })
        }
    }

    /// Rolls back a WAL entry discovered on disk, e.g. by Boot Recovery.
    /// Interprets the entry's recorded phase to decide how much work needs
    /// undoing: a `Prepare`-phase entry never touched the primary file, a
    /// `Commit`-phase entry may have renamed it, and a `Committed` entry
    /// succeeded fully and only needs its staging litter swept up.
    #[instrument(skip(self))]
    pub fn rollback_from_wal(&self, wal_path: &Path) -> Result<(), TransactionError> {
        let entry = self.wal.read_wal(wal_path).map_err(|e| TransactionError::WalCorrupt {
            correlation_id: Uuid::nil(),
            path: wal_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let correlation_id = entry.correlation_id;

        match entry.phase {
            WalPhase::Committed => {
                for staged in &entry.staged_files {
                    let _ = io::delete_file(&staged.staged_path);
                }
                self.wal.delete_wal(wal_path).map_err(|e| TransactionError::WalWriteFailed {
                    correlation_id,
                    reason: e.to_string(),
                })?;
                info!(%correlation_id, "boot recovery: already-committed WAL entry cleaned up");
                Ok(())
            }
            WalPhase::Prepare => self.rollback(correlation_id, wal_path, &entry, Phase::Prepare),
            WalPhase::Commit => self.rollback(correlation_id, wal_path, &entry, Phase::Commit),
        }
    }
}
