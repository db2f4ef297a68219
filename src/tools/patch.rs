//! Unified-diff patch tool.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::file::append_diff_log;
use super::{parse_params, ExecutionContext, Tool, ToolError, ToolKind, ToolOutput};
use crate::error::PatchError;
use crate::patch::{self, line_diff, unified_diff, AppliedChange};
use crate::state::ModificationRecord;

#[derive(Debug, Deserialize)]
struct ApplyPatchParams {
    patch_text: String,
}

/// Applies a (multi-file) unified diff to the workspace with strict matching.
pub struct ApplyPatchTool;

impl ApplyPatchTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ApplyPatchTool {
    fn default() -> Self {
        Self::new()
    }
}

fn record(ctx: &ExecutionContext, change: &AppliedChange) -> ModificationRecord {
    let diff = unified_diff(
        &change.before,
        &change.after,
        &format!("{} (old)", change.path),
        &format!("{} (new)", change.path),
    );
    append_diff_log(ctx, &change.path, &diff);
    ModificationRecord::new(change.path.clone(), line_diff(&change.before, &change.after))
}

fn summary(applied: &[AppliedChange]) -> String {
    applied
        .iter()
        .map(|c| format!("{} {}", c.kind.letter(), c.path))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> &str {
        "apply_patch"
    }

    fn description(&self) -> &str {
        "Apply a git-style unified diff (multi-file; supports new and deleted files) to the package workspace. \
         Matching is strict: context (' ') and removed ('-') lines must match the target file exactly. \
         Hunk headers must be '@@ -<start>[,<len>] +<start>[,<len>] @@'. Paths are relative to the workspace root."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "patch_text": {
                    "type": "string",
                    "description": "Full patch text including ---/+++ headers and @@ hunks"
                }
            },
            "required": ["patch_text"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Edit
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let params: ApplyPatchParams = parse_params(args)?;

        if !ctx.workspace_root.is_dir() {
            return Ok(ToolOutput::err(format!(
                "Error: repo_root not found: {}",
                ctx.workspace_root.display()
            )));
        }

        let changes = match patch::parse(&params.patch_text) {
            Ok(changes) => changes,
            Err(e) => return Ok(ToolOutput::err(format!("Error: {}", e))),
        };
        if changes.is_empty() {
            let head: Vec<&str> = params.patch_text.lines().take(8).collect();
            return Ok(ToolOutput::err(format!(
                "Error: {}.\nHead:\n{}",
                PatchError::NoFileBlocks,
                head.join("\n")
            )));
        }

        let root = ctx.workspace_root.clone();
        let outcome = tokio::task::spawn_blocking(move || patch::apply_to_tree(&root, &changes))
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        match outcome {
            Ok(applied) => {
                let modifications = applied.iter().map(|c| record(ctx, c)).collect();
                tracing::debug!(package = %ctx.package_name, files = applied.len(), "Patch applied");
                Ok(ToolOutput::ok(format!("Success: applied patch\n{}", summary(&applied)))
                    .with_modifications(modifications))
            }
            Err(failure) => {
                let modifications = failure.applied.iter().map(|c| record(ctx, c)).collect();
                let mut text = format!("Error: {}", failure.error);
                if !failure.applied.is_empty() {
                    text.push_str("\nAlready applied before the failure:\n");
                    text.push_str(&summary(&failure.applied));
                }
                Ok(ToolOutput::err(text).with_modifications(modifications))
            }
        }
    }
}
