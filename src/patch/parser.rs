//! Unified-diff text parser.

use regex::Regex;
use std::sync::OnceLock;

use super::{FileChange, Hunk, HunkLine};
use crate::error::PatchError;

const DEV_NULL: &str = "/dev/null";

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@\s*-(\d+)(?:,(\d+))?\s+\+(\d+)(?:,(\d+))?\s*@@.*$")
            .expect("hunk header pattern is valid")
    })
}

/// Parses unified-diff text into per-file changes.
///
/// Fails closed on a `---` line not immediately followed by `+++`, and on a
/// malformed `@@` header. Text outside file blocks is ignored.
pub fn parse(text: &str) -> Result<Vec<FileChange>, PatchError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut files = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("diff --git ") {
            let (next, change) = read_file_block(&lines, i + 1)?;
            i = next;
            if let Some(change) = change {
                files.push(change);
            }
        } else if line.starts_with("--- ") {
            let (next, change) = read_file_block(&lines, i)?;
            i = next;
            if let Some(change) = change {
                files.push(change);
            }
        } else {
            i += 1;
        }
    }

    Ok(files)
}

/// Reads one `--- / +++ / @@...` block starting at or after `start`.
fn read_file_block(
    lines: &[&str],
    mut start: usize,
) -> Result<(usize, Option<FileChange>), PatchError> {
    // Skip git extended headers (index, mode lines) up to the `---` line.
    while start < lines.len() && !lines[start].starts_with("--- ") {
        if lines[start].starts_with("diff --git ") {
            return Ok((start, None));
        }
        start += 1;
    }
    if start >= lines.len() {
        return Ok((start, None));
    }

    let old_tok = header_path(&lines[start][4..]);
    start += 1;

    if start >= lines.len() || !lines[start].starts_with("+++ ") {
        return Err(PatchError::MissingNewHeader { line: start + 1 });
    }
    let new_tok = header_path(&lines[start][4..]);
    start += 1;

    let (old_path, is_new) = if old_tok == DEV_NULL {
        (None, true)
    } else {
        (Some(strip_prefix(old_tok, "a/")), false)
    };
    let (new_path, is_delete) = if new_tok == DEV_NULL {
        (None, true)
    } else {
        (Some(strip_prefix(new_tok, "b/")), false)
    };

    let mut hunks = Vec::new();
    while start < lines.len() && lines[start].starts_with("@@") {
        let header = lines[start];
        start += 1;
        let mut hunk = parse_hunk_header(header)?;

        while start < lines.len() && !ends_hunk_body(lines, start) {
            let raw = lines[start];
            start += 1;
            if let Some(line) = classify_body_line(raw) {
                hunk.lines.push(line);
            }
        }
        trim_trailing_blank_lines(&mut hunk);
        hunks.push(hunk);
    }

    Ok((
        start,
        Some(FileChange {
            old_path,
            new_path,
            is_new,
            is_delete,
            hunks,
        }),
    ))
}

/// Parses an `@@ -a[,b] +c[,d] @@` header. Omitted lengths default to 1.
pub(crate) fn parse_hunk_header(header: &str) -> Result<Hunk, PatchError> {
    let caps = hunk_header_re()
        .captures(header.trim_end_matches('\r'))
        .ok_or_else(|| PatchError::BadHunkHeader(header.to_string()))?;

    let number = |idx: usize, default: usize| -> Result<usize, PatchError> {
        match caps.get(idx) {
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|_| PatchError::BadHunkHeader(header.to_string())),
            None => Ok(default),
        }
    };

    Ok(Hunk {
        old_start: number(1, 0)?,
        old_len: number(2, 1)?,
        new_start: number(3, 0)?,
        new_len: number(4, 1)?,
        lines: Vec::new(),
    })
}

/// A hunk body stops at the next hunk, the next git block, or a new file
/// header (a `--- ` line immediately followed by `+++ `).
fn ends_hunk_body(lines: &[&str], idx: usize) -> bool {
    let line = lines[idx];
    if line.starts_with("@@") || line.starts_with("diff --git") {
        return true;
    }
    line.starts_with("--- ")
        && lines
            .get(idx + 1)
            .map(|next| next.starts_with("+++ "))
            .unwrap_or(false)
}

fn classify_body_line(raw: &str) -> Option<HunkLine> {
    if let Some(rest) = raw.strip_prefix('+') {
        Some(HunkLine::Add(rest.to_string()))
    } else if let Some(rest) = raw.strip_prefix('-') {
        Some(HunkLine::Remove(rest.to_string()))
    } else if let Some(rest) = raw.strip_prefix(' ') {
        Some(HunkLine::Context(rest.to_string()))
    } else if raw.starts_with('\\') {
        // "\ No newline at end of file"
        None
    } else {
        Some(HunkLine::Passthrough(raw.to_string()))
    }
}

/// Drops blank separator lines that trail a hunk once its declared original
/// length is already covered.
fn trim_trailing_blank_lines(hunk: &mut Hunk) {
    loop {
        let consumed = hunk
            .lines
            .iter()
            .filter(|l| l.consumes_original())
            .count();
        match hunk.lines.last() {
            Some(HunkLine::Passthrough(text)) if text.is_empty() && consumed > hunk.old_len => {
                hunk.lines.pop();
            }
            _ => break,
        }
    }
}

fn header_path(raw: &str) -> &str {
    let raw = raw.trim();
    match raw.find('\t') {
        Some(tab) => raw[..tab].trim_end(),
        None => raw,
    }
}

fn strip_prefix(path: &str, prefix: &str) -> String {
    path.strip_prefix(prefix).unwrap_or(path).to_string()
}
