//! Wikilink reference model and extraction.
//!
//! A `Reference` is a located occurrence of `[[target]]`, `[[target|alias]]`,
//! `[[target#heading]]`, `[[target#^blockref]]`, or `![[target]]` inside a
//! note's raw bytes (spec §3 "Wikilink reference"). References are
//! discovered lexically: inside fenced code blocks or inline code they are
//! still counted, matching the teacher's own lexical (not syntactic)
//! treatment of wikilinks in `wikilink.rs`.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;

/// The kind of reference, derived from which optional wikilink modifier is
/// present. Embeds take priority over heading/blockref/alias distinctions
/// because the leading `!` changes how the host renders the link
/// regardless of any anchor or alias also present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Basic,
    Alias,
    Heading,
    Blockref,
    Embed,
}

/// A single located wikilink reference inside a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// The note the reference was found in.
    pub source_path: PathBuf,
    /// The target note name (stem, no `.md`) the link resolves to.
    pub target: String,
    pub kind: ReferenceKind,
    /// Byte offset of the first character of the match (`[` or `!`) within
    /// the source file's raw bytes.
    pub byte_offset: usize,
    /// The exact text matched, including brackets, alias, anchor, and any
    /// leading `!`.
    pub matched_text: String,
}

/// Wikilink regex recognizing all five reference kinds.
/// Captures: 1: optional leading `!` (embed), 2: target, 3: optional anchor
/// (`heading` or `^blockref`), 4: optional alias.
/// Format: `![[target#anchor|alias]]`
pub static WIKILINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(!)?\[\[([^\[\]\|#]+)(?:#([^\[\]\|]+))?(?:\|([^\[\]]+))?\]\]").unwrap()
});

fn classify(embed: bool, anchor: Option<&str>, alias: Option<&str>) -> ReferenceKind {
    if embed {
        ReferenceKind::Embed
    } else if let Some(a) = anchor {
        if a.starts_with('^') {
            ReferenceKind::Blockref
        } else {
            ReferenceKind::Heading
        }
    } else if alias.is_some() {
        ReferenceKind::Alias
    } else {
        ReferenceKind::Basic
    }
}

/// Extracts every wikilink reference from a note's raw content.
pub fn extract_references(source_path: &std::path::Path, content: &str) -> Vec<Reference> {
    WIKILINK_RE
        .captures_iter(content)
        .map(|cap: Captures| {
            let full = cap.get(0).unwrap();
            let embed = cap.get(1).is_some();
            let target = cap.get(2).unwrap().as_str().trim().to_string();
            let anchor = cap.get(3).map(|m| m.as_str());
            let alias = cap.get(4).map(|m| m.as_str());
            Reference {
                source_path: source_path.to_path_buf(),
                target,
                kind: classify(embed, anchor, alias),
                byte_offset: full.start(),
                matched_text: full.as_str().to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn refs(content: &str) -> Vec<Reference> {
        extract_references(Path::new("/vault/note.md"), content)
    }

    #[test]
    fn recognizes_all_five_kinds() {
        let content = "[[foo]] [[foo|Alias]] [[foo#Heading]] [[foo#^block1]] ![[foo]]";
        let found = refs(content);
        assert_eq!(found.len(), 5);
        assert_eq!(found[0].kind, ReferenceKind::Basic);
        assert_eq!(found[1].kind, ReferenceKind::Alias);
        assert_eq!(found[2].kind, ReferenceKind::Heading);
        assert_eq!(found[3].kind, ReferenceKind::Blockref);
        assert_eq!(found[4].kind, ReferenceKind::Embed);
        for r in &found {
            assert_eq!(r.target, "foo");
        }
    }

    #[test]
    fn matched_text_includes_modifiers() {
        let found = refs("see [[foo#^xyz]] there");
        assert_eq!(found[0].matched_text, "[[foo#^xyz]]");
        assert_eq!(found[0].byte_offset, 4);
    }

    #[test]
    fn self_reference_is_reported() {
        let found = extract_references(Path::new("/vault/foo.md"), "links to [[foo]]");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].target, "foo");
    }

    #[test]
    fn lexical_match_inside_code_block_is_still_counted() {
        let content = "```\n[[foo]]\n```";
        assert_eq!(refs(content).len(), 1);
    }
}
