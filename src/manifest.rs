//! Operation manifest and WAL entry data model (spec §3).

use crate::reference::Reference;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// One affected file's state as recorded at Plan time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedFile {
    pub path: PathBuf,
    pub hash_at_plan: String,
    pub references: Vec<Reference>,
}

/// Produced by the Plan phase; immutable once Plan completes (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationManifest {
    pub correlation_id: Uuid,
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    pub primary_file_hash: String,
    /// Ordered sequence, stable-sorted by path (spec §3).
    pub affected_files: Vec<AffectedFile>,
    pub created_at: DateTime<Utc>,
}

/// Which half of the backup/render staging pair a [`StagedFile`] is (spec
/// §9, Open Question resolution: both a backup of the pre-transaction
/// bytes and a render of the post-transaction bytes are staged before any
/// destructive commit-time rename, so Commit never has to write fresh
/// content, only rename a staged file onto its final path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagedKind {
    Backup,
    Render,
}

/// A staged file recorded in the WAL so Commit/Rollback can find it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedFile {
    pub original_path: PathBuf,
    pub staged_path: PathBuf,
    pub hash_at_stage: String,
    pub kind: StagedKind,
}

/// The rename operation's endpoints, duplicated from the manifest for
/// convenience when reading a WAL entry back on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameOp {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalPhase {
    Prepare,
    Commit,
    Committed,
}

/// Schema of a persisted WAL entry (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub schema_version: u32,
    pub correlation_id: Uuid,
    pub operation_type: String,
    pub phase: WalPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub manifest: OperationManifest,
    /// Backup + rendered staging files recorded per affected file, so a
    /// rollback mid-commit can restore pre-transaction bytes even for
    /// files already renamed (spec §9, Open Question resolution).
    pub staged_files: Vec<StagedFile>,
    pub rename_op: RenameOp,
}

impl WalEntry {
    pub const SCHEMA_VERSION: u32 = 1;

    pub fn new(manifest: OperationManifest) -> Self {
        let now = Utc::now();
        let rename_op = RenameOp {
            from: manifest.old_path.clone(),
            to: manifest.new_path.clone(),
        };
        Self {
            schema_version: Self::SCHEMA_VERSION,
            correlation_id: manifest.correlation_id,
            operation_type: "rename".to_string(),
            phase: WalPhase::Prepare,
            created_at: now,
            updated_at: now,
            manifest,
            staged_files: Vec::new(),
            rename_op,
        }
    }
}
