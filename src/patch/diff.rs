//! Line diffs between two versions of a file.
//!
//! Used to record what an edit changed (for the next attempt's prompt) and
//! to write human-readable unified diffs to the per-package diff log.

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

/// Lines of unchanged context kept around each change.
const CONTEXT_RADIUS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOperation {
    Add,
    Delete,
    Keep,
}

impl std::fmt::Display for DiffOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiffOperation::Add => "add",
            DiffOperation::Delete => "delete",
            DiffOperation::Keep => "keep",
        };
        write!(f, "{}", s)
    }
}

/// One annotated line of a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub operation: DiffOperation,
    /// 1-based; old-file numbering for deletions, new-file numbering otherwise.
    pub line_number: usize,
    pub content: String,
}

/// Changed lines plus surrounding context between `old` and `new`.
pub fn line_diff(old: &str, new: &str) -> Vec<DiffEntry> {
    let diff = TextDiff::from_lines(old, new);
    let mut entries = Vec::new();

    for group in diff.grouped_ops(CONTEXT_RADIUS) {
        for op in &group {
            for change in diff.iter_changes(op) {
                let (operation, index) = match change.tag() {
                    ChangeTag::Delete => (DiffOperation::Delete, change.old_index()),
                    ChangeTag::Insert => (DiffOperation::Add, change.new_index()),
                    ChangeTag::Equal => (DiffOperation::Keep, change.new_index()),
                };
                entries.push(DiffEntry {
                    operation,
                    line_number: index.map(|i| i + 1).unwrap_or(0),
                    content: change
                        .value()
                        .trim_end_matches('\n')
                        .trim_end_matches('\r')
                        .to_string(),
                });
            }
        }
    }

    entries
}

/// Unified diff text with `from`/`to` headers. Empty when nothing changed.
pub fn unified_diff(old: &str, new: &str, from: &str, to: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(CONTEXT_RADIUS)
        .header(from, to)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_diff_numbers_follow_each_side() {
        let old = "a\nb\nc\n";
        let new = "a\nB\nc\nd\n";
        let entries = line_diff(old, new);

        assert!(entries.contains(&DiffEntry {
            operation: DiffOperation::Delete,
            line_number: 2,
            content: "b".to_string(),
        }));
        assert!(entries.contains(&DiffEntry {
            operation: DiffOperation::Add,
            line_number: 2,
            content: "B".to_string(),
        }));
        assert!(entries.contains(&DiffEntry {
            operation: DiffOperation::Add,
            line_number: 4,
            content: "d".to_string(),
        }));
        assert!(entries
            .iter()
            .any(|e| e.operation == DiffOperation::Keep && e.content == "a"));
    }

    #[test]
    fn test_line_diff_identical_is_empty() {
        assert!(line_diff("same\n", "same\n").is_empty());
    }

    #[test]
    fn test_far_context_not_recorded() {
        let old: String = (1..=20).map(|i| format!("l{}\n", i)).collect();
        let new = old.replace("l10\n", "ten\n");
        let entries = line_diff(&old, &new);
        assert!(!entries.iter().any(|e| e.content == "l1"));
        assert!(entries.iter().any(|e| e.content == "l7"));
    }

    #[test]
    fn test_unified_diff_has_headers() {
        let text = unified_diff("x\n", "y\n", "f (old)", "f (new)");
        assert!(text.starts_with("--- f (old)\n+++ f (new)\n"));
        assert!(text.contains("-x"));
        assert!(text.contains("+y"));
        assert!(unified_diff("x\n", "x\n", "a", "b").is_empty());
    }
}
