//! Workspace file tools.
//!
//! - `GetFileContentTool`: read a file
//! - `ListStructureTool`: tree listing of the workspace
//! - `ModifyFileTool`: replace a file's full content, logging the diff

use async_trait::async_trait;
use chrono::Local;
use serde::Deserialize;
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use walkdir::WalkDir;

use super::{parse_params, preview, ExecutionContext, Tool, ToolError, ToolKind, ToolOutput};
use crate::patch::{line_diff, unified_diff};
use crate::state::ModificationRecord;

/// Maximum file size that can be read (1MB).
const MAX_FILE_SIZE: u64 = 1_048_576;

/// Depth limit for structure listings.
const MAX_TREE_DEPTH: usize = 6;

/// Entry limit for structure listings.
const MAX_TREE_ENTRIES: usize = 500;

/// Appends a unified diff to the package's diff log.
pub(crate) fn append_diff_log(ctx: &ExecutionContext, file: &str, diff: &str) {
    if diff.is_empty() {
        return;
    }
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = ctx.diff_log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&ctx.diff_log_path)?;
        writeln!(log)?;
        writeln!(log, "{}", "=".repeat(80))?;
        writeln!(log, "Timestamp: {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(log, "File: {}", file)?;
        writeln!(log, "Diff lines: {}", diff.lines().count())?;
        writeln!(log)?;
        log.write_all(diff.as_bytes())?;
        if !diff.ends_with('\n') {
            writeln!(log)?;
        }
        Ok(())
    })();

    if let Err(e) = result {
        tracing::warn!(
            package = %ctx.package_name,
            log = %ctx.diff_log_path.display(),
            error = %e,
            "Failed to append to diff log"
        );
    }
}

// ============================================================================
// GetFileContentTool
// ============================================================================

#[derive(Debug, Deserialize)]
struct GetFileContentParams {
    file_path: String,
}

/// Reads a UTF-8 file from the workspace.
pub struct GetFileContentTool;

impl GetFileContentTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GetFileContentTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for GetFileContentTool {
    fn name(&self) -> &str {
        "get_file_content"
    }

    fn description(&self) -> &str {
        "Read the full content of a file in the package workspace. Paths are relative to the workspace root."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to read"
                }
            },
            "required": ["file_path"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Inspect
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let params: GetFileContentParams = parse_params(args)?;
        let path = ctx.resolve(&params.file_path)?;

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            _ => {
                return Ok(ToolOutput::err(format!(
                    "Error: File not found - {}",
                    params.file_path
                )))
            }
        };
        if metadata.len() > MAX_FILE_SIZE {
            return Ok(ToolOutput::err(format!(
                "Error: File too large ({} bytes, max {})",
                metadata.len(),
                MAX_FILE_SIZE
            )));
        }

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(ToolOutput::ok(content)),
            Err(e) => Ok(ToolOutput::err(format!("Error reading file: {}", e))),
        }
    }
}

// ============================================================================
// ListStructureTool
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ListStructureParams {
    #[serde(default)]
    package_path: Option<String>,
}

/// Lists the workspace as an indented tree with file sizes.
pub struct ListStructureTool;

impl ListStructureTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ListStructureTool {
    fn default() -> Self {
        Self::new()
    }
}

fn render_tree(root: &Path) -> Result<String, walkdir::Error> {
    let mut out = format!("{}/\n", root.file_name().and_then(|n| n.to_str()).unwrap_or("."));
    let mut shown = 0;

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(MAX_TREE_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry?;
        if shown == MAX_TREE_ENTRIES {
            out.push_str("... (listing truncated)\n");
            break;
        }
        shown += 1;

        let indent = "  ".repeat(entry.depth());
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            out.push_str(&format!("{}{}/\n", indent, name));
        } else {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            out.push_str(&format!("{}{} ({} bytes)\n", indent, name, size));
        }
    }

    Ok(out)
}

#[async_trait]
impl Tool for ListStructureTool {
    fn name(&self) -> &str {
        "get_structure_of_files"
    }

    fn description(&self) -> &str {
        "Show the directory tree of the package workspace (or a sub-directory) with file sizes."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "package_path": {
                    "type": "string",
                    "description": "Directory to list (default: workspace root)"
                }
            }
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Inspect
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let params: ListStructureParams = if args.is_null() {
            ListStructureParams::default()
        } else {
            parse_params(args)?
        };
        let dir = ctx.resolve_dir(params.package_path.as_deref())?;
        if !dir.is_dir() {
            return Ok(ToolOutput::err(format!(
                "Error: '{}' is not a directory",
                ctx.display_path(&dir)
            )));
        }

        let tree = tokio::task::spawn_blocking(move || render_tree(&dir))
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
            .map_err(|e| ToolError::FilesystemError(e.to_string()))?;
        Ok(ToolOutput::ok(tree))
    }
}

// ============================================================================
// ModifyFileTool
// ============================================================================

#[derive(Debug, Deserialize)]
struct ModifyFileParams {
    file_path: String,
    new_content: String,
}

/// Replaces the whole content of an existing file.
pub struct ModifyFileTool;

impl ModifyFileTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ModifyFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ModifyFileTool {
    fn name(&self) -> &str {
        "modify_file"
    }

    fn description(&self) -> &str {
        "Replace the entire content of an existing file in the package workspace with new_content."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to modify"
                },
                "new_content": {
                    "type": "string",
                    "description": "Complete new file content"
                }
            },
            "required": ["file_path", "new_content"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Edit
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let params: ModifyFileParams = parse_params(args)?;
        let path = ctx.resolve(&params.file_path)?;

        if !path.is_file() {
            return Ok(ToolOutput::err(format!(
                "Error: File does not exist - {}",
                params.file_path
            )));
        }

        let old_content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => return Ok(ToolOutput::err(format!("Modify file failed: {}", e))),
        };

        let rel = ctx.display_path(&path);
        let diff = unified_diff(
            &old_content,
            &params.new_content,
            &format!("{} (old)", rel),
            &format!("{} (new)", rel),
        );
        if let Err(e) = write_logged(ctx, &path, &params.new_content, &rel, &diff).await {
            return Ok(ToolOutput::err(format!("Modify file failed: {}", e)));
        }

        let entries = line_diff(&old_content, &params.new_content);
        let modifications = if entries.is_empty() {
            Vec::new()
        } else {
            vec![ModificationRecord::new(rel.clone(), entries)]
        };

        Ok(ToolOutput::ok(format!(
            "Success: Replaced content of {}\nPreview: {}...",
            params.file_path,
            preview(&params.new_content, 100)
        ))
        .with_modifications(modifications))
    }
}

/// Writes `content` to `path`; the diff is logged only once the write landed.
async fn write_logged(
    ctx: &ExecutionContext,
    path: &Path,
    content: &str,
    rel: &str,
    diff: &str,
) -> std::io::Result<()> {
    tokio::fs::write(path, content).await?;
    append_diff_log(ctx, rel, diff);
    Ok(())
}
