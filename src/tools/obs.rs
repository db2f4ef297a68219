//! Build service tools: publish the workspace, then ask whether it builds.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{parse_params, ExecutionContext, Tool, ToolError, ToolKind, ToolOutput};
use crate::obs::{BuildOracle, BuildService, FAILED_LOG_FILE};

#[derive(Debug, Default, Deserialize)]
struct UploadParams {
    #[serde(default)]
    package_path: Option<String>,
}

/// Top-level files to publish, sorted. Directories and the saved failure
/// log stay local.
async fn collect_uploads(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if path.file_name().and_then(|n| n.to_str()) == Some(FAILED_LOG_FILE) {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

fn has_spec_file(files: &[PathBuf]) -> bool {
    files
        .iter()
        .any(|p| p.extension().and_then(|e| e.to_str()) == Some("spec"))
}

/// Uploads the package's top-level source files to the build service.
pub struct UploadTool {
    service: Arc<dyn BuildService>,
}

impl UploadTool {
    pub fn new(service: Arc<dyn BuildService>) -> Self {
        Self { service }
    }

    async fn upload_all(&self, package: &str, files: &[PathBuf]) -> Vec<String> {
        let mut failures = Vec::new();
        for path in files {
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let body = match tokio::fs::read(path).await {
                Ok(body) => body,
                Err(e) => {
                    failures.push(format!("{}: {}", name, e));
                    continue;
                }
            };
            match self.service.upload_file(package, &name, body).await {
                Ok(()) => tracing::debug!(package = package, file = %name, "Uploaded"),
                Err(e) => {
                    tracing::warn!(package = package, file = %name, error = %e, "Upload failed");
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }
        failures
    }
}

#[async_trait]
impl Tool for UploadTool {
    fn name(&self) -> &str {
        "upload_file_to_obs"
    }

    fn description(&self) -> &str {
        "Upload the package's files (spec file, patches, archives) to the build service. \
         Must be called after modifications and before check_build_result. \
         Compress any 'extracted' directory first; directories are not uploaded."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "package_path": {
                    "type": "string",
                    "description": "Package directory containing the .spec file (default: workspace root)"
                }
            }
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Publish
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let params: UploadParams = if args.is_null() {
            UploadParams::default()
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

        let files = collect_uploads(&dir)
            .await
            .map_err(|e| ToolError::FilesystemError(e.to_string()))?;
        if !has_spec_file(&files) {
            return Ok(ToolOutput::err(format!(
                "Error: No .spec file in '{}'",
                ctx.display_path(&dir)
            )));
        }

        let failures = self.upload_all(&ctx.package_name, &files).await;
        if failures.is_empty() {
            Ok(ToolOutput::ok(format!(
                "Upload successful. Result: Success: File {} uploaded to OBS {} successfully.",
                dir.display(),
                ctx.package_name
            )))
        } else {
            Ok(ToolOutput::err(format!(
                "Upload failed: {}",
                failures.join("; ")
            )))
        }
    }
}

/// Polls the build service until the package's build settles.
pub struct CheckBuildTool {
    oracle: BuildOracle,
}

impl CheckBuildTool {
    pub fn new(oracle: BuildOracle) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl Tool for CheckBuildTool {
    fn name(&self) -> &str {
        "check_build_result"
    }

    fn description(&self) -> &str {
        "Wait for the package build on the build service and report the result. \
         On failure the build log is saved to log_failed.txt in the workspace. \
         Only valid after a successful upload_file_to_obs."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::VerifyBuild
    }

    async fn execute(&self, _args: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let status = self
            .oracle
            .check(&ctx.package_name, &ctx.workspace_root)
            .await;
        Ok(ToolOutput::ok(format!("Build result: {}", status)))
    }
}
