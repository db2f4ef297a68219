//! Strict unified-diff engine.
//!
//! Parses model-proposed unified diffs (single or multi-file, `diff --git`
//! or bare `---`/`+++` blocks) and applies them to a working tree without any
//! fuzzy matching: every context and removed line must match the target file
//! exactly, apart from its line terminator.
//!
//! Multi-file patches are applied file by file. When file K fails, files
//! 1..K-1 stay written; callers get the list of already-applied changes in
//! [`PatchFailure::applied`].

mod applier;
pub mod diff;
mod parser;

pub use applier::{
    apply_hunks, apply_to_tree, resolve_within, AppliedChange, ChangeKind, PatchFailure,
};
pub use diff::{line_diff, unified_diff, DiffEntry, DiffOperation};
pub use parser::parse;

/// One line of a hunk body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    /// `+` line, inserted verbatim.
    Add(String),
    /// `-` line, must match the target and is dropped.
    Remove(String),
    /// ` ` line, must match the target and is kept.
    Context(String),
    /// Line without a recognised prefix. Copies the target line unchecked.
    Passthrough(String),
}

impl HunkLine {
    /// Whether the line consumes a line of the original file.
    pub fn consumes_original(&self) -> bool {
        !matches!(self, HunkLine::Add(_))
    }
}

/// A contiguous edit region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// 1-based start line in the original file.
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
}

/// All hunks targeting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub is_new: bool,
    pub is_delete: bool,
    pub hunks: Vec<Hunk>,
}

impl FileChange {
    /// Path the change is applied to, relative to the tree root.
    pub fn target_path(&self) -> Option<&str> {
        if self.is_delete {
            self.old_path.as_deref()
        } else {
            self.new_path.as_deref()
        }
    }

    pub fn kind(&self) -> ChangeKind {
        if self.is_new {
            ChangeKind::Added
        } else if self.is_delete {
            ChangeKind::Deleted
        } else {
            ChangeKind::Modified
        }
    }
}
