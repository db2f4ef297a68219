//! Text classifiers for tool results.
//!
//! Tools report outcomes as free text. These two functions are the only
//! places that turn that text into control flow. A failure log that happens
//! to contain "success" would be misread; the heuristic is kept as-is.

const SUCCESS_TOKENS: [&str; 5] = ["success", "succeeded", "successfully", "passed", "ok"];

/// Whether a verify-build result reports a successful build.
///
/// Looks at the text after the last `": "` (the whole text when there is
/// none) and matches it case-insensitively against the success tokens.
pub fn parse_build_result(text: &str) -> bool {
    let tail = match text.rfind(": ") {
        Some(idx) => &text[idx + 2..],
        None => text,
    };
    let tail = tail.to_lowercase();
    SUCCESS_TOKENS.iter().any(|token| tail.contains(token))
}

/// Whether a publish result reports a successful upload.
pub fn is_upload_success(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("success") || lower.contains("successful")
}

/// Whether an edit result may be cached.
pub fn is_cacheable_edit(text: &str) -> bool {
    !text.to_lowercase().contains("error")
}
