//! Link Scanner.
//!
//! Vault-wide wikilink discovery, grouped by the containing note (spec
//! §4.2). Walks the vault with `walkdir`, the same crate the teacher's
//! `indexer.rs` uses for its full vault scan.

use crate::error::LinkError;
use crate::reference::{extract_references, Reference};
use crate::utils::{file_stem_string, is_markdown_file};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{instrument, warn};
use walkdir::WalkDir;

/// All references found inside one note.
#[derive(Debug, Clone)]
pub struct FileReferences {
    pub path: PathBuf,
    pub references: Vec<Reference>,
}

/// Directory names never descended into while scanning (matches the
/// vault-level exclusions the external indexer/template subsystem is
/// responsible for declaring; hardcoded here since this crate has no
/// dependency on that subsystem).
const EXCLUDED_DIRS: &[&str] = &[".git", ".mcp-lifeos", ".obsidian", "templates"];

fn is_excluded(path: &Path, vault_root: &Path) -> bool {
    path.strip_prefix(vault_root)
        .ok()
        .into_iter()
        .flat_map(|rel| rel.components())
        .any(|c| {
            c.as_os_str()
                .to_str()
                .is_some_and(|s| EXCLUDED_DIRS.contains(&s))
        })
}

/// Scans every `.md` file in the vault for references whose target note
/// name (case-sensitive) equals `target_name`, the filename stem of the
/// note being renamed.
///
/// Results are sorted deterministically by note path so the Operation
/// Manifest built from them is stable across runs (spec §4.2, §3 "stable
/// sort by path").
#[instrument(skip(vault_root))]
pub fn scan_references(
    vault_root: &Path,
    target_name: &str,
) -> Result<Vec<FileReferences>, LinkError> {
    if !vault_root.is_dir() {
        return Err(LinkError::ScanFailed(format!(
            "vault root '{}' is not a directory",
            vault_root.display()
        )));
    }

    let mut by_path: HashMap<PathBuf, Vec<Reference>> = HashMap::new();

    for entry in WalkDir::new(vault_root)
        .into_iter()
        .filter_entry(|e| !is_excluded(e.path(), vault_root) || e.path() == vault_root)
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("directory traversal error: {e}");
                continue;
            }
        };

        if !is_markdown_file(entry.path()) {
            continue;
        }

        let content = match std::fs::read_to_string(entry.path()) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %entry.path().display(), "skipping unreadable file: {e}");
                continue;
            }
        };

        let matches: Vec<Reference> = extract_references(entry.path(), &content)
            .into_iter()
            .filter(|r| r.target == target_name)
            .collect();

        if !matches.is_empty() {
            by_path
                .entry(entry.path().to_path_buf())
                .or_default()
                .extend(matches);
        }
    }

    let mut result: Vec<FileReferences> = by_path
        .into_iter()
        .map(|(path, references)| FileReferences { path, references })
        .collect();
    result.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(result)
}

/// Convenience wrapper used by Plan: scans for references to the stem of
/// `old_path`.
pub fn scan_references_for_path(
    vault_root: &Path,
    old_path: &Path,
) -> Result<Vec<FileReferences>, LinkError> {
    scan_references(vault_root, &file_stem_string(old_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn finds_references_grouped_and_sorted() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("foo.md"), "hello").unwrap();
        fs::write(root.join("c.md"), "[[foo#heading]] [[foo#^xyz]]").unwrap();
        fs::write(root.join("a.md"), "see [[foo]]").unwrap();
        fs::write(root.join("b.md"), "![[foo]] and [[foo|Foo]]").unwrap();

        let result = scan_references(root, "foo").unwrap();
        let paths: Vec<_> = result.iter().map(|f| f.path.clone()).collect();
        assert_eq!(
            paths,
            vec![root.join("a.md"), root.join("b.md"), root.join("c.md")]
        );
        assert_eq!(result[1].references.len(), 2);
        assert_eq!(result[2].references.len(), 2);
    }

    #[test]
    fn skips_excluded_directories() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("templates")).unwrap();
        fs::write(root.join("templates/t.md"), "[[foo]]").unwrap();
        fs::write(root.join("real.md"), "[[foo]]").unwrap();

        let result = scan_references(root, "foo").unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].path, root.join("real.md"));
    }

    #[test]
    fn unreadable_file_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("good.md"), "[[foo]]").unwrap();
        // A directory named with a .md suffix trips the read and is skipped.
        fs::create_dir(root.join("bad.md")).unwrap();

        let result = scan_references(root, "foo").unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn non_directory_root_is_scan_failed() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("not_a_dir.md");
        fs::write(&file, "x").unwrap();
        assert!(scan_references(&file, "foo").is_err());
    }
}
