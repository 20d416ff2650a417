//! Unified error taxonomy.
//!
//! Three layer-local error enums (`IoError`, `WalError`, `LinkError`) are
//! wrapped by the top-level `TransactionError`, which is the only error
//! type that ever crosses the boundary back to a tool caller. No inner
//! layer error leaks past the Transaction Manager.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the File I/O layer.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("file not found: {0:?}")]
    FileNotFound(PathBuf),

    #[error("failed to read '{path:?}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to hash '{path:?}': {source}")]
    HashFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write '{path:?}' after {attempts} attempt(s): {source}")]
    WriteError {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to rename '{from:?}' to '{to:?}': {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to delete '{0:?}': {1}")]
    DeleteFailed(PathBuf, #[source] std::io::Error),

    #[error("path '{0:?}' is invalid (traversal segment or unresolvable)")]
    InvalidPath(PathBuf),
}

/// Errors raised by the WAL Manager.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("failed to write WAL entry for {correlation_id}: {source}")]
    WriteFailed {
        correlation_id: Uuid,
        #[source]
        source: std::io::Error,
    },

    #[error("WAL file '{0:?}' is corrupt: {1}")]
    Corrupt(PathBuf, #[source] serde_json::Error),

    #[error("WAL schema version mismatch in '{path:?}': expected 1, found {found}")]
    SchemaMismatch { path: PathBuf, found: u32 },

    #[error("WAL correlation id is not a valid UUID v4: {0}")]
    InvalidCorrelationId(Uuid),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by the Link Scanner and Link Updater.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("vault scan failed: {0}")]
    ScanFailed(String),

    #[error("failed to render link updates for '{0:?}': {1}")]
    RenderFailed(PathBuf, #[source] std::io::Error),
}

/// The phase of the five-phase protocol an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Plan,
    Prepare,
    Validate,
    Commit,
    Cleanup,
    Rollback,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Plan => "plan",
            Phase::Prepare => "prepare",
            Phase::Validate => "validate",
            Phase::Commit => "commit",
            Phase::Cleanup => "cleanup",
            Phase::Rollback => "rollback",
        };
        write!(f, "{s}")
    }
}

/// Detail describing a partially-completed rollback, surfaced to the caller
/// so a human can finish recovery manually.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PartialRollback {
    pub rolled_back: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    pub wal_path: PathBuf,
}

/// The stable error surface returned by `TransactionManager::execute`.
///
/// This is the only error type a caller outside this crate should ever
/// observe; it wraps the phase, the correlation id, and (when relevant) a
/// recovery hint and partial-rollback report.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("[{correlation_id}] file not found: {path:?}")]
    FileNotFound {
        correlation_id: Uuid,
        path: PathBuf,
    },

    #[error("[{correlation_id}] target already exists: {path:?}")]
    FileExists {
        correlation_id: Uuid,
        path: PathBuf,
    },

    #[error("[{correlation_id}] permission denied: {path:?}")]
    PermissionDenied {
        correlation_id: Uuid,
        path: PathBuf,
    },

    #[error("[{correlation_id}] plan failed: {reason}")]
    PlanFailed {
        correlation_id: Uuid,
        reason: String,
    },

    #[error("[{correlation_id}] invalid path: {path:?} ({reason})")]
    InvalidPath {
        correlation_id: Uuid,
        path: PathBuf,
        reason: String,
    },

    #[error("[{correlation_id}] prepare failed: {reason}")]
    PrepareFailed {
        correlation_id: Uuid,
        reason: String,
    },

    #[error("[{correlation_id}] validate failed: {reason}")]
    ValidateFailed {
        correlation_id: Uuid,
        reason: String,
    },

    #[error("[{correlation_id}] content changed concurrently at {path:?}; retry the rename")]
    StaleContent {
        correlation_id: Uuid,
        path: PathBuf,
    },

    #[error("[{correlation_id}] commit failed: {reason}")]
    CommitFailed {
        correlation_id: Uuid,
        reason: String,
    },

    #[error("[{correlation_id}] rollback failed after commit error: {reason}")]
    RollbackFailed {
        correlation_id: Uuid,
        reason: String,
        partial_rollback: PartialRollback,
    },

    #[error("[{correlation_id}] transaction failed: {reason}")]
    Generic {
        correlation_id: Uuid,
        reason: String,
    },

    #[error("[{correlation_id}] link scan failed: {reason}")]
    LinkScanFailed {
        correlation_id: Uuid,
        reason: String,
    },

    #[error("[{correlation_id}] link render failed at {path:?}: {reason}")]
    LinkRenderFailed {
        correlation_id: Uuid,
        path: PathBuf,
        reason: String,
    },

    #[error("[{correlation_id}] WAL write failed: {reason}")]
    WalWriteFailed {
        correlation_id: Uuid,
        reason: String,
    },

    #[error("[{correlation_id}] WAL corrupt at {path:?}: {reason}")]
    WalCorrupt {
        correlation_id: Uuid,
        path: PathBuf,
        reason: String,
    },

    #[error("[{correlation_id}] WAL schema mismatch at {path:?}: {reason}")]
    WalSchemaMismatch {
        correlation_id: Uuid,
        path: PathBuf,
        reason: String,
    },

    #[error("[{correlation_id}] write error at {path:?}: {reason}")]
    WriteError {
        correlation_id: Uuid,
        path: PathBuf,
        reason: String,
    },
}

impl TransactionError {
    pub fn correlation_id(&self) -> Uuid {
        match self {
            TransactionError::FileNotFound { correlation_id, .. }
            | TransactionError::FileExists { correlation_id, .. }
            | TransactionError::PermissionDenied { correlation_id, .. }
            | TransactionError::PlanFailed { correlation_id, .. }
            | TransactionError::InvalidPath { correlation_id, .. }
            | TransactionError::PrepareFailed { correlation_id, .. }
            | TransactionError::ValidateFailed { correlation_id, .. }
            | TransactionError::StaleContent { correlation_id, .. }
            | TransactionError::CommitFailed { correlation_id, .. }
            | TransactionError::RollbackFailed { correlation_id, .. }
            | TransactionError::LinkScanFailed { correlation_id, .. }
            | TransactionError::LinkRenderFailed { correlation_id, .. }
            | TransactionError::WalWriteFailed { correlation_id, .. }
            | TransactionError::WalCorrupt { correlation_id, .. }
            | TransactionError::WalSchemaMismatch { correlation_id, .. }
            | TransactionError::WriteError { correlation_id, .. }
            | TransactionError::Generic { correlation_id, .. } => *correlation_id,
        }
    }

    /// Stable machine-readable error code, part of the external surface (spec §6).
    pub fn error_code(&self) -> &'static str {
        match self {
            TransactionError::FileNotFound { .. } => "FILE_NOT_FOUND",
            TransactionError::FileExists { .. } => "FILE_EXISTS",
            TransactionError::PermissionDenied { .. } => "PERMISSION_DENIED",
            TransactionError::PlanFailed { .. } => "TRANSACTION_PLAN_FAILED",
            TransactionError::InvalidPath { .. } => "INVALID_PATH",
            TransactionError::PrepareFailed { .. } => "TRANSACTION_PREPARE_FAILED",
            TransactionError::ValidateFailed { .. } => "TRANSACTION_VALIDATE_FAILED",
            TransactionError::StaleContent { .. } => "TRANSACTION_STALE_CONTENT",
            TransactionError::CommitFailed { .. } => "TRANSACTION_COMMIT_FAILED",
            TransactionError::RollbackFailed { .. } => "TRANSACTION_ROLLBACK_FAILED",
            TransactionError::LinkScanFailed { .. } => "LINK_SCAN_FAILED",
            TransactionError::LinkRenderFailed { .. } => "LINK_RENDER_FAILED",
            TransactionError::WalWriteFailed { .. } => "WAL_WRITE_FAILED",
            TransactionError::WalCorrupt { .. } => "WAL_CORRUPT",
            TransactionError::WalSchemaMismatch { .. } => "WAL_SCHEMA_MISMATCH",
            TransactionError::WriteError { .. } => "WRITE_ERROR",
            TransactionError::Generic { .. } => "TRANSACTION_FAILED",
        }
    }

    /// A short, user-facing hint on how to recover, when one exists.
    pub fn recovery_hint(&self) -> Option<String> {
        match self {
            TransactionError::StaleContent { path, .. } => Some(format!(
                "'{}' changed since the rename was planned; retry the rename",
                path.display()
            )),
            TransactionError::RollbackFailed {
                partial_rollback, ..
            } => Some(format!(
                "rollback left {} file(s) unrestored; inspect the preserved WAL at {:?} and restore manually",
                partial_rollback.failed.len(),
                partial_rollback.wal_path
            )),
            _ => None,
        }
    }

    pub fn partial_rollback(&self) -> Option<&PartialRollback> {
        match self {
            TransactionError::RollbackFailed {
                partial_rollback, ..
            } => Some(partial_rollback),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransactionError>;
