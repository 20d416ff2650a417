//! Link Updater.
//!
//! Rewrites wikilinks from an old target name to a new one across a set
//! of affected files, in the three modes spec §4.3 calls for. Grounded in
//! the teacher's `writer.rs::replace_wikilink_in_file`, generalized to all
//! five reference kinds and split into the render/commit pair the
//! teacher's own doc comment on `rename_path` already gestures at
//! ("Prepare Phase" / "Transaction Phase").

use crate::error::{IoError, LinkError};
use crate::io;
use crate::reference::{extract_references, Reference};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Aggregate result of a link-update pass.
#[derive(Debug, Clone, Default)]
pub struct LinkUpdateMetrics {
    pub files_updated: usize,
    pub references_updated: usize,
}

/// Rewrites every reference to `old_name` in `content` to point at
/// `new_name`, preserving brackets, alias text, heading anchor,
/// block-ref anchor, and embed prefix. Returns `None` if nothing changed.
///
/// Rewrites are applied to the byte-offset-sorted reference list in
/// reverse order so earlier offsets remain valid as the string is
/// rebuilt (spec §4.3 "Tie-breaks").
fn rewrite_content(content: &str, old_name: &str, new_name: &str) -> Option<String> {
    let mut refs: Vec<Reference> = extract_references(Path::new(""), content)
        .into_iter()
        .filter(|r| r.target == old_name)
        .collect();

    if refs.is_empty() {
        return None;
    }

    // Ascending by offset, then walk in reverse so earlier offsets stay valid.
    refs.sort_by_key(|r| r.byte_offset);

    let mut out = content.to_string();
    for r in refs.iter().rev() {
        let replacement = build_replacement(&r.matched_text, old_name, new_name);
        let start = r.byte_offset;
        let end = start + r.matched_text.len();
        out.replace_range(start..end, &replacement);
    }
    Some(out)
}

/// Rebuilds one matched reference's text with the target portion swapped,
/// leaving every other byte (brackets, `!`, `#anchor`, `|alias`) intact.
fn build_replacement(matched_text: &str, old_name: &str, new_name: &str) -> String {
    // matched_text looks like (optional !)[[old_name(#anchor)?(|alias)?]]
    let embed_prefix = if matched_text.starts_with('!') { "!" } else { "" };
    let inner = matched_text
        .trim_start_matches('!')
        .trim_start_matches("[[")
        .trim_end_matches("]]");

    // inner is old_name(#anchor)?(|alias)?
    let (before_alias, alias_part) = match inner.split_once('|') {
        Some((a, b)) => (a, Some(b)),
        None => (inner, None),
    };
    let (_target, anchor_part) = match before_alias.split_once('#') {
        Some((a, b)) => (a, Some(b)),
        None => (before_alias, None),
    };
    debug_assert_eq!(_target, old_name);

    let mut rebuilt = format!("{embed_prefix}[[{new_name}");
    if let Some(anchor) = anchor_part {
        rebuilt.push('#');
        rebuilt.push_str(anchor);
    }
    if let Some(alias) = alias_part {
        rebuilt.push('|');
        rebuilt.push_str(alias);
    }
    rebuilt.push_str("]]");
    rebuilt
}

/// DIRECT mode (legacy, non-transactional): read, rewrite, write each
/// affected file in deterministic path order. Any per-file write error
/// aborts with partial metrics; state consistency is not guaranteed
/// (spec §4.3).
#[instrument(skip(paths))]
pub fn apply_link_updates_direct(
    paths: &[PathBuf],
    old_name: &str,
    new_name: &str,
) -> Result<LinkUpdateMetrics, (LinkUpdateMetrics, IoError)> {
    let mut sorted = paths.to_vec();
    sorted.sort();

    let mut metrics = LinkUpdateMetrics::default();
    for path in &sorted {
        let content = match io::read_file(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => return Err((metrics, e)),
        };
        if let Some(new_content) = rewrite_content(&content, old_name, new_name) {
            let refs_in_file = count_old_refs(&content, old_name);
            if let Err(e) = io::write_file_with_retry(path, new_content.as_bytes()) {
                return Err((metrics, e));
            }
            metrics.files_updated += 1;
            metrics.references_updated += refs_in_file;
        }
    }
    Ok(metrics)
}

fn count_old_refs(content: &str, old_name: &str) -> usize {
    extract_references(Path::new(""), content)
        .into_iter()
        .filter(|r| r.target == old_name)
        .count()
}

/// RENDER mode (phase 1 of two-phase): read and rewrite each affected
/// file, returning the planned new content without writing anything.
/// A read error on any affected file fails the whole render with no
/// side effects (spec §4.3).
#[instrument(skip(paths))]
pub fn render_link_updates(
    paths: &[PathBuf],
    old_name: &str,
    new_name: &str,
) -> Result<HashMap<PathBuf, String>, LinkError> {
    let mut sorted = paths.to_vec();
    sorted.sort();

    let mut rendered = HashMap::new();
    for path in &sorted {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LinkError::RenderFailed(path.clone(), e))?;
        if let Some(new_content) = rewrite_content(&content, old_name, new_name) {
            rendered.insert(path.clone(), new_content);
        }
    }
    Ok(rendered)
}

/// COMMIT mode (phase 2 of two-phase): atomically writes each entry of a
/// `{path -> new content}` map, typically produced by
/// [`render_link_updates`]. An atomic write error on any file aborts;
/// the caller is responsible for rollback via the WAL (spec §4.3).
#[instrument(skip(rendered))]
pub fn commit_link_updates(
    rendered: &HashMap<PathBuf, String>,
) -> Result<LinkUpdateMetrics, (LinkUpdateMetrics, IoError)> {
    let mut paths: Vec<&PathBuf> = rendered.keys().collect();
    paths.sort();

    let mut metrics = LinkUpdateMetrics::default();
    for path in paths {
        let content = &rendered[path];
        if let Err(e) = io::write_file_with_retry(path, content.as_bytes()) {
            return Err((metrics, e));
        }
        metrics.files_updated += 1;
        metrics.references_updated += 1;
    }
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_all_five_reference_kinds() {
        let content = "[[foo]] [[foo|Alias]] [[foo#Heading]] [[foo#^block1]] ![[foo]]";
        let new_content = rewrite_content(content, "foo", "bar").unwrap();
        assert_eq!(
            new_content,
            "[[bar]] [[bar|Alias]] [[bar#Heading]] [[bar#^block1]] ![[bar]]"
        );
    }

    #[test]
    fn leaves_unrelated_links_untouched() {
        let content = "[[foo]] and [[other]]";
        let new_content = rewrite_content(content, "foo", "bar").unwrap();
        assert_eq!(new_content, "[[bar]] and [[other]]");
    }

    #[test]
    fn returns_none_when_no_matching_target() {
        assert!(rewrite_content("[[other]]", "foo", "bar").is_none());
    }

    #[test]
    fn render_mode_performs_no_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "[[foo]]").unwrap();

        let rendered = render_link_updates(&[path.clone()], "foo", "bar").unwrap();
        assert_eq!(rendered.get(&path).unwrap(), "[[bar]]");
        // Original file on disk is untouched.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[[foo]]");
    }

    #[test]
    fn commit_mode_writes_rendered_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "[[foo]]").unwrap();

        let mut rendered = HashMap::new();
        rendered.insert(path.clone(), "[[bar]]".to_string());
        let metrics = commit_link_updates(&rendered).unwrap();
        assert_eq!(metrics.files_updated, 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[[bar]]");
    }
}
