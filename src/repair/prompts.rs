//! Prompt construction for repair attempts.

use std::fmt::Write as _;
use tera::{Context, Tera};

use crate::state::ModificationRecord;

/// Characters of each diff line shown in the modification history.
pub const HISTORY_LINE_PREVIEW: usize = 200;

/// Built-in system prompt. Rendered with `package_name`, `result_file` and
/// `temp_dir`.
pub const DEFAULT_SYSTEM_TEMPLATE: &str = r#"You are an expert RPM packaging engineer. Your job is to make the package `{{ package_name }}` build successfully on the Open Build Service.

The package has been copied to the working directory {{ temp_dir }}. All modifications must be done there. Tool paths are relative to that directory.

WORKFLOW:
1. Inspect the package with `get_structure_of_files` and `get_file_content` (spec file, patches, sources).
2. If sources must change, call `extract_archive`, edit files under `extracted/`, then `compress_archive` before uploading.
3. Edit files with `apply_patch` (strict unified diff, exact context lines) or `modify_file` (whole-file replacement).
4. Call `upload_file_to_obs` to publish your changes.
5. Call `check_build_result` to wait for the build. It is rejected unless an upload succeeded first.
6. If the build failed, read `log_failed.txt`, fix the cause and repeat from step 3.

RULES:
- Keep changes minimal and targeted at the build failure.
- Do not call the same tool with the same arguments over and over; repeated calls are blocked.
- When you are done, summarize the root cause and your changes. The summary is saved to {{ result_file }}.
"#;

/// Renders a system prompt template for one package.
pub fn render_system_prompt(
    template: &str,
    package_name: &str,
    result_file: &str,
    temp_dir: &str,
) -> Result<String, tera::Error> {
    let mut context = Context::new();
    context.insert("package_name", package_name);
    context.insert("result_file", result_file);
    context.insert("temp_dir", temp_dir);
    Tera::one_off(template, &context, false)
}

/// Builds the user prompt for `attempt` (1-based).
///
/// From the second attempt on, every recorded modification is listed line by
/// line, followed by a request for a new plan.
pub fn build_user_prompt(
    package_name: &str,
    package_path: &str,
    attempt: u32,
    history: &[ModificationRecord],
) -> String {
    let mut prompt = format!(
        "Please analyze and repair package {} in: {}. All modifications must be done in the temporary directory. ",
        package_name, package_path
    );

    if attempt > 1 {
        if !history.is_empty() {
            prompt.push_str("\n\nPrevious modifications:\n");
            for record in history {
                let _ = writeln!(prompt, "File: {}", record.file_path);
                prompt.push_str("Changes:\n");
                for entry in &record.diff_entries {
                    let _ = writeln!(
                        prompt,
                        "- Line {} ({}): {}",
                        entry.line_number,
                        entry.operation,
                        crate::tools::preview(&entry.content, HISTORY_LINE_PREVIEW)
                    );
                }
                prompt.push('\n');
            }
        }
        let _ = write!(
            prompt,
            "After {} attempts, build still failed. Analyze previous modifications and failures, then provide new repair plan.",
            attempt - 1
        );
    }

    prompt
}

/// Corrective message appended after a failed attempt.
pub fn attempt_failed_message(attempt: u32) -> String {
    format!(
        "Build failed after attempt {}. Continue analyzing and repairing, then retry.",
        attempt
    )
}

/// Nudge injected when a call hits the repeat bound.
pub fn repeat_blocked_message(tool: &str) -> String {
    format!(
        "Do not call {} again in this attempt. Continue with code changes or other tools.",
        tool
    )
}

/// Tool result returned when the build is verified before any upload.
pub fn ordering_violation_message(verify_tool: &str, publish_tool: &str) -> String {
    format!(
        "ERROR: Cannot call {} before uploading. You must call {} first.",
        verify_tool, publish_tool
    )
}
