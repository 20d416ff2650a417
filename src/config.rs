//! Vault and WAL directory configuration.
//!
//! `VaultConfig` is constructed once per process and passed explicitly
//! into every component's constructor, with no process-wide global state
//! (spec §9, "Global mutable vault configuration" re-architecture note).
//! The WAL directory lives outside the vault in a user config dir so the
//! WAL itself is never subject to the same cloud-sync races as the vault
//! it is protecting (spec §4.4).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default staleness floor below which Boot Recovery never reclaims a WAL
/// file, because it may belong to an active transaction (spec §3, I6).
pub const DEFAULT_STALENESS_FLOOR: Duration = Duration::from_secs(60);

/// Maximum file size this crate will read into memory for hashing or
/// rewriting (1 MiB), mirroring the teacher's own `MAX_FILE_SIZE` guard.
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Explicit collaborator configuration shared by every component of the
/// transaction engine.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub vault_root: PathBuf,
    pub wal_dir: PathBuf,
    pub staleness_floor: Duration,
}

impl VaultConfig {
    /// Resolves a `VaultConfig` for `vault_root`, using the user's
    /// standard config directory (`~/.config/mcp-lifeos/wal` on Linux,
    /// the platform equivalent elsewhere) for the WAL directory. Falls
    /// back to a directory inside the vault itself if no home directory
    /// can be resolved, so the engine remains usable in sandboxes and
    /// tests.
    pub fn resolve(vault_root: PathBuf) -> Self {
        let wal_dir = directories::ProjectDirs::from("dev", "lifeos", "mcp-lifeos")
            .map(|dirs| dirs.config_dir().join("wal"))
            .unwrap_or_else(|| vault_root.join(".mcp-lifeos").join("wal"));

        Self {
            vault_root,
            wal_dir,
            staleness_floor: DEFAULT_STALENESS_FLOOR,
        }
    }

    /// Builds a `VaultConfig` pointing at an explicit WAL directory,
    /// bypassing OS config-dir resolution entirely. Used by tests so WAL
    /// state from one test run never leaks into another.
    pub fn with_wal_dir(vault_root: PathBuf, wal_dir: PathBuf) -> Self {
        Self {
            vault_root,
            wal_dir,
            staleness_floor: DEFAULT_STALENESS_FLOOR,
        }
    }

    /// Overrides the staleness floor, mainly so tests can reclaim a WAL
    /// entry without sleeping for a full minute.
    pub fn with_staleness_floor(mut self, floor: Duration) -> Self {
        self.staleness_floor = floor;
        self
    }
}

/// Settings persisted by the demo CLI only (not consumed by the engine
/// itself) so repeated invocations remember the last vault opened.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct AppSettings {
    pub last_vault: Option<PathBuf>,
}

fn settings_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "lifeos", "mcp-lifeos")
        .map(|dirs| dirs.config_dir().join("settings.json"))
}

impl AppSettings {
    pub fn load() -> Self {
        let Some(path) = settings_path() else {
            return Self::default();
        };
        let Ok(content) = fs::read_to_string(&path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = settings_path() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
    }
}

/// Ensures the WAL directory exists and is seeded with the explanatory
/// README (spec §4.4 "README auto-generation"). Idempotent.
pub fn ensure_wal_dir(wal_dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(wal_dir)?;
    let readme_path = wal_dir.join("README");
    if !readme_path.exists() {
        fs::write(readme_path, WAL_README)?;
    }
    Ok(())
}

const WAL_README: &str = "\
This directory holds write-ahead log (WAL) entries for the rename \
transaction engine. Each `*.wal.json` file describes a rename that was \
in progress when the server last started or crashed.

On startup the server scans this directory and rolls back any entry \
older than 60 seconds, restoring the vault to its pre-transaction state. \
If a `*.wal.json` file is still present and the server has been running \
for a while, its rollback could not complete automatically: open the \
file to see which paths were involved (`renameOp`, `stagedFiles`), \
compare them against the current vault state, and restore the affected \
files by hand before deleting the WAL entry.
";

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ensure_wal_dir_seeds_readme_once() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        ensure_wal_dir(&wal_dir).unwrap();
        let readme = wal_dir.join("README");
        assert!(readme.exists());
        let original = fs::read_to_string(&readme).unwrap();

        ensure_wal_dir(&wal_dir).unwrap();
        assert_eq!(fs::read_to_string(&readme).unwrap(), original);
    }

    #[test]
    fn with_wal_dir_uses_explicit_path() {
        let cfg = VaultConfig::with_wal_dir(PathBuf::from("/vault"), PathBuf::from("/wal"));
        assert_eq!(cfg.wal_dir, PathBuf::from("/wal"));
        assert_eq!(cfg.staleness_floor, DEFAULT_STALENESS_FLOOR);
    }
}
