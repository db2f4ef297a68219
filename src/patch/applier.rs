//! Strict hunk application against a working tree.

use std::fs;
use std::path::{Component, Path, PathBuf};

use super::{FileChange, Hunk, HunkLine};
use crate::error::PatchError;

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Single-letter status as printed by `git diff --name-status`.
    pub fn letter(&self) -> char {
        match self {
            ChangeKind::Added => 'A',
            ChangeKind::Modified => 'M',
            ChangeKind::Deleted => 'D',
        }
    }
}

/// A file change that was written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub kind: ChangeKind,
    /// Path relative to the tree root, as named in the patch.
    pub path: String,
    pub before: String,
    pub after: String,
}

/// A patch that stopped part-way. Files in `applied` were written before the
/// failing block and are not rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFailure {
    pub error: PatchError,
    pub applied: Vec<AppliedChange>,
}

impl std::fmt::Display for PatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for PatchFailure {}

/// Applies hunks to `original` (lines including their terminators).
///
/// Returns the patched lines and `true`, or the untouched original and
/// `false` on the first context or removal mismatch. Each hunk's effective
/// start is its declared start shifted by the net line delta of the hunks
/// applied before it.
pub fn apply_hunks(original: &[String], hunks: &[Hunk]) -> (Vec<String>, bool) {
    let mut lines = original.to_vec();
    let mut offset: isize = 0;

    for hunk in hunks {
        // A zero-length old range names the line *after which* to insert.
        let declared = if hunk.old_len == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        let start = declared as isize + offset;
        if start < 0 || start as usize > lines.len() {
            return (original.to_vec(), false);
        }
        let start = start as usize;

        let mut cursor = start;
        let mut replacement = Vec::with_capacity(hunk.lines.len());
        for line in &hunk.lines {
            match line {
                HunkLine::Add(text) => replacement.push(format!("{}\n", text)),
                HunkLine::Context(text) => match lines.get(cursor) {
                    Some(current) if strip_terminator(current) == text => {
                        replacement.push(current.clone());
                        cursor += 1;
                    }
                    _ => return (original.to_vec(), false),
                },
                HunkLine::Remove(text) => match lines.get(cursor) {
                    Some(current) if strip_terminator(current) == text => cursor += 1,
                    _ => return (original.to_vec(), false),
                },
                HunkLine::Passthrough(_) => match lines.get(cursor) {
                    Some(current) => {
                        replacement.push(current.clone());
                        cursor += 1;
                    }
                    None => return (original.to_vec(), false),
                },
            }
        }

        offset += replacement.len() as isize - (cursor - start) as isize;
        lines.splice(start..cursor, replacement);
    }

    (lines, true)
}

/// Applies parsed file changes under `root`, one file at a time.
pub fn apply_to_tree(
    root: &Path,
    changes: &[FileChange],
) -> Result<Vec<AppliedChange>, PatchFailure> {
    let mut applied = Vec::new();

    for change in changes {
        match apply_file(root, change) {
            Ok(done) => applied.push(done),
            Err(error) => return Err(PatchFailure { error, applied }),
        }
    }

    Ok(applied)
}

fn apply_file(root: &Path, change: &FileChange) -> Result<AppliedChange, PatchError> {
    let target = change.target_path().ok_or(PatchError::InvalidFileBlock)?;
    let path = resolve_within(root, target)
        .ok_or_else(|| PatchError::PathEscapes(target.to_string()))?;

    let before = if change.is_new {
        String::new()
    } else {
        if !path.is_file() {
            return Err(PatchError::TargetNotFound(target.to_string()));
        }
        fs::read_to_string(&path).map_err(|e| io_error(&path, e))?
    };

    if change.is_delete {
        fs::remove_file(&path).map_err(|e| io_error(&path, e))?;
        return Ok(AppliedChange {
            kind: ChangeKind::Deleted,
            path: target.to_string(),
            before,
            after: String::new(),
        });
    }

    let original: Vec<String> = before.split_inclusive('\n').map(str::to_string).collect();
    let (patched, ok) = apply_hunks(&original, &change.hunks);
    if !ok {
        return Err(PatchError::HunkFailed(target.to_string()));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let after = patched.concat();
    fs::write(&path, &after).map_err(|e| io_error(&path, e))?;

    Ok(AppliedChange {
        kind: change.kind(),
        path: target.to_string(),
        before,
        after,
    })
}

/// Resolves `candidate` against `root`, returning `None` when the result
/// would land outside `root` (or on `root` itself).
///
/// The check is lexical first, then follows symlinks on whatever part of the
/// path already exists, so a link inside the tree cannot lead writes out of it.
pub fn resolve_within(root: &Path, candidate: &str) -> Option<PathBuf> {
    if candidate.trim().is_empty() || candidate.contains('\0') {
        return None;
    }
    let root = normalize(root);
    let joined = normalize(&root.join(candidate));
    if joined == root || !joined.starts_with(&root) {
        return None;
    }
    if !stays_within_on_disk(&root, &joined) {
        return None;
    }
    Some(joined)
}

/// Canonicalizes the deepest existing ancestor of `path` (the path itself
/// included) and checks it is still under the canonical `root`. Dangling
/// links fail. A root that does not exist yet has nothing to follow.
fn stays_within_on_disk(root: &Path, path: &Path) -> bool {
    let Ok(real_root) = fs::canonicalize(root) else {
        return true;
    };
    let Some(existing) = path
        .ancestors()
        .find(|p| fs::symlink_metadata(p).is_ok())
    else {
        return true;
    };
    match fs::canonicalize(existing) {
        Ok(real) => real.starts_with(&real_root),
        Err(_) => false,
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn strip_terminator(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}

fn io_error(path: &Path, err: std::io::Error) -> PatchError {
    PatchError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::parse;

    fn lines(text: &str) -> Vec<String> {
        text.split_inclusive('\n').map(str::to_string).collect()
    }

    fn hunk(old_start: usize, old_len: usize, body: Vec<HunkLine>) -> Hunk {
        Hunk {
            old_start,
            old_len,
            new_start: old_start,
            new_len: 0,
            lines: body,
        }
    }

    fn ctx(s: &str) -> HunkLine {
        HunkLine::Context(s.to_string())
    }
    fn del(s: &str) -> HunkLine {
        HunkLine::Remove(s.to_string())
    }
    fn add(s: &str) -> HunkLine {
        HunkLine::Add(s.to_string())
    }

    #[test]
    fn test_offset_propagates_negative_delta() {
        let original = lines("a\nb\nc\nd\ne\nf\ng\n");
        let hunks = vec![
            // lines 1-3 become two lines
            hunk(1, 3, vec![del("a"), del("b"), ctx("c"), add("x")]),
            // declared against the original numbering: line 6 is "f"
            hunk(6, 1, vec![del("f"), add("F")]),
        ];
        let (patched, ok) = apply_hunks(&original, &hunks);
        assert!(ok);
        assert_eq!(patched.concat(), "c\nx\nd\ne\nF\ng\n");
    }

    #[test]
    fn test_offset_propagates_positive_delta() {
        let original = lines("one\ntwo\nthree\nfour\n");
        let hunks = vec![
            hunk(1, 1, vec![ctx("one"), add("one-b"), add("one-c")]),
            hunk(3, 1, vec![del("three"), add("THREE")]),
        ];
        let (patched, ok) = apply_hunks(&original, &hunks);
        assert!(ok);
        assert_eq!(patched.concat(), "one\none-b\none-c\ntwo\nTHREE\nfour\n");
    }

    #[test]
    fn test_context_mismatch_returns_original() {
        let original = lines("alpha\nbeta\ngamma\n");
        let hunks = vec![hunk(2, 2, vec![ctx("BETA"), del("gamma"), add("delta")])];
        let (patched, ok) = apply_hunks(&original, &hunks);
        assert!(!ok);
        assert_eq!(patched, original);
    }

    #[test]
    fn test_second_hunk_mismatch_discards_first() {
        let original = lines("a\nb\nc\n");
        let hunks = vec![
            hunk(1, 1, vec![del("a"), add("A")]),
            hunk(3, 1, vec![del("zzz"), add("C")]),
        ];
        let (patched, ok) = apply_hunks(&original, &hunks);
        assert!(!ok);
        assert_eq!(patched, original);
    }

    #[test]
    fn test_crlf_terminators_ignored_in_match() {
        let original = lines("key=1\r\nother=2\r\n");
        let hunks = vec![hunk(1, 1, vec![del("key=1"), add("key=2")])];
        let (patched, ok) = apply_hunks(&original, &hunks);
        assert!(ok);
        assert_eq!(patched.concat(), "key=2\nother=2\r\n");
    }

    #[test]
    fn test_zero_length_range_inserts_after_line() {
        let original = lines("a\nb\n");
        let hunks = vec![hunk(1, 0, vec![add("inserted")])];
        let (patched, ok) = apply_hunks(&original, &hunks);
        assert!(ok);
        assert_eq!(patched.concat(), "a\ninserted\nb\n");
    }

    #[test]
    fn test_hunk_past_end_fails() {
        let original = lines("a\n");
        let hunks = vec![hunk(5, 1, vec![del("x")])];
        assert!(!apply_hunks(&original, &hunks).1);
    }

    #[test]
    fn test_resolve_within_rejects_escape() {
        let root = Path::new("/work/pkg");
        assert_eq!(
            resolve_within(root, "src/a.c"),
            Some(PathBuf::from("/work/pkg/src/a.c"))
        );
        assert!(resolve_within(root, "../other/a.c").is_none());
        assert!(resolve_within(root, "src/../../x").is_none());
        assert!(resolve_within(root, "/etc/passwd").is_none());
        assert!(resolve_within(root, ".").is_none());
        assert_eq!(
            resolve_within(root, "/work/pkg/foo.spec"),
            Some(PathBuf::from("/work/pkg/foo.spec"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_tree_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("pkg");
        let outside = dir.path().join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("nowhere"), root.join("dangling")).unwrap();

        assert!(resolve_within(&root, "link/evil.txt").is_none());
        assert!(resolve_within(&root, "dangling").is_none());

        let patch = "--- /dev/null\n+++ b/link/evil.txt\n@@ -0,0 +1 @@\n+pwned\n";
        let changes = parse(patch).unwrap();
        let failure = apply_to_tree(&root, &changes).unwrap_err();
        assert_eq!(
            failure.error,
            PatchError::PathEscapes("link/evil.txt".to_string())
        );
        assert!(failure.applied.is_empty());
        assert!(!outside.join("evil.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_tree_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("pkg");
        fs::create_dir_all(root.join("src")).unwrap();
        std::os::unix::fs::symlink(root.join("src"), root.join("alias")).unwrap();

        assert_eq!(
            resolve_within(&root, "alias/a.c"),
            Some(root.join("alias/a.c"))
        );
    }

    #[test]
    fn test_apply_to_tree_add_modify_delete() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), "one\ntwo\n").unwrap();
        fs::write(dir.path().join("gone.txt"), "bye\n").unwrap();

        let patch = "diff --git a/keep.txt b/keep.txt\n--- a/keep.txt\n+++ b/keep.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+2\ndiff --git a/sub/new.txt b/sub/new.txt\n--- /dev/null\n+++ b/sub/new.txt\n@@ -0,0 +1 @@\n+fresh\n--- a/gone.txt\n+++ /dev/null\n@@ -1 +0,0 @@\n-bye\n";
        let changes = parse(patch).unwrap();
        let applied = apply_to_tree(dir.path(), &changes).unwrap();

        let summary: Vec<(char, &str)> = applied
            .iter()
            .map(|c| (c.kind.letter(), c.path.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![('M', "keep.txt"), ('A', "sub/new.txt"), ('D', "gone.txt")]
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("keep.txt")).unwrap(),
            "one\n2\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("sub/new.txt")).unwrap(),
            "fresh\n"
        );
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[test]
    fn test_failure_keeps_earlier_files_written() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("first.txt"), "a\n").unwrap();
        fs::write(dir.path().join("second.txt"), "b\n").unwrap();

        let patch = "--- a/first.txt\n+++ b/first.txt\n@@ -1 +1 @@\n-a\n+A\n--- a/second.txt\n+++ b/second.txt\n@@ -1 +1 @@\n-nope\n+B\n";
        let changes = parse(patch).unwrap();
        let failure = apply_to_tree(dir.path(), &changes).unwrap_err();

        assert_eq!(failure.error, PatchError::HunkFailed("second.txt".to_string()));
        assert_eq!(failure.applied.len(), 1);
        assert_eq!(fs::read_to_string(dir.path().join("first.txt")).unwrap(), "A\n");
        assert_eq!(fs::read_to_string(dir.path().join("second.txt")).unwrap(), "b\n");
    }

    #[test]
    fn test_escaping_path_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let patch = "--- /dev/null\n+++ b/../outside.txt\n@@ -0,0 +1 @@\n+x\n";
        let changes = parse(patch).unwrap();
        let failure = apply_to_tree(dir.path(), &changes).unwrap_err();
        assert_eq!(
            failure.error,
            PatchError::PathEscapes("../outside.txt".to_string())
        );
        assert!(failure.applied.is_empty());
    }

    #[test]
    fn test_missing_target_reported() {
        let dir = tempfile::tempdir().unwrap();
        let patch = "--- a/absent.c\n+++ b/absent.c\n@@ -1 +1 @@\n-x\n+y\n";
        let failure = apply_to_tree(dir.path(), &parse(patch).unwrap()).unwrap_err();
        assert_eq!(
            failure.error,
            PatchError::TargetNotFound("absent.c".to_string())
        );
    }
}
