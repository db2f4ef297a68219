//! Tool definitions and registry for the repair loop.
//!
//! This module defines the `Tool` trait, the typed [`ToolOutput`] every tool
//! returns, and the [`ToolRegistry`] that dispatches model-requested calls
//! by name. The registry is the loop's [`ToolChannel`].

pub mod archive;
pub mod file;
pub mod obs;
pub mod patch;

pub use archive::{CompressArchiveTool, ExtractArchiveTool};
pub use file::{GetFileContentTool, ListStructureTool, ModifyFileTool};
pub use obs::{CheckBuildTool, UploadTool};
pub use patch::ApplyPatchTool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::llm::ToolDefinition;
use crate::obs::BuildOracle;
use crate::patch::resolve_within;
use crate::state::ModificationRecord;

/// Errors that can occur during tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Invalid parameters provided to the tool.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Tool execution failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// No tool with this name is registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// File system error.
    #[error("Filesystem error: {0}")]
    FilesystemError(String),

    /// Path resolves outside the package workspace.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Role a tool plays in the repair loop's ordering rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Read-only inspection of the workspace.
    Inspect,
    /// Mutates files; successful results are cacheable.
    Edit,
    /// Unpacks or repacks source archives.
    Archive,
    /// Publishes the workspace to the build service.
    Publish,
    /// Asks the build service whether the package builds.
    VerifyBuild,
}

/// Whether a tool call did what was asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    Ok,
    Err,
}

/// Result of a tool execution. `payload` is the text fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub status: OutcomeKind,
    pub payload: String,
    /// Edits performed by this call, for the package's modification log.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifications: Vec<ModificationRecord>,
}

impl ToolOutput {
    pub fn ok(payload: impl Into<String>) -> Self {
        Self {
            status: OutcomeKind::Ok,
            payload: payload.into(),
            modifications: Vec::new(),
        }
    }

    pub fn err(payload: impl Into<String>) -> Self {
        Self {
            status: OutcomeKind::Err,
            payload: payload.into(),
            modifications: Vec::new(),
        }
    }

    pub fn with_modifications(mut self, modifications: Vec<ModificationRecord>) -> Self {
        self.modifications = modifications;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == OutcomeKind::Ok
    }
}

/// Per-package context handed to every tool call.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub package_name: String,
    /// Package working copy; all tool paths must resolve inside it.
    pub workspace_root: PathBuf,
    /// Append-only log of unified diffs written by edit tools.
    pub diff_log_path: PathBuf,
}

impl ExecutionContext {
    pub fn new(
        package_name: impl Into<String>,
        workspace_root: impl Into<PathBuf>,
        diff_log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            workspace_root: workspace_root.into(),
            diff_log_path: diff_log_path.into(),
        }
    }

    /// Resolves a file path (relative, or absolute under the workspace).
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(ToolError::InvalidParameters(
                "Path cannot be empty".to_string(),
            ));
        }
        resolve_within(&self.workspace_root, path).ok_or_else(|| {
            ToolError::PermissionDenied(format!("'{}' is outside the package workspace", path))
        })
    }

    /// Resolves an optional directory path, defaulting to the workspace root.
    pub fn resolve_dir(&self, path: Option<&str>) -> Result<PathBuf, ToolError> {
        match path.map(str::trim) {
            None | Some("") | Some(".") => Ok(self.workspace_root.clone()),
            Some(p) if Path::new(p) == self.workspace_root => Ok(self.workspace_root.clone()),
            Some(p) => self.resolve(p),
        }
    }

    /// Path relative to the workspace, for messages and logs.
    pub fn display_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.workspace_root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }
}

/// Trait for tools that can be executed by the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the unique name of the tool.
    fn name(&self) -> &str;

    /// Returns a description of what the tool does.
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    fn kind(&self) -> ToolKind;

    /// Execute the tool with the given arguments and context.
    ///
    /// Expected failures (missing file, hunk mismatch) come back as
    /// `Ok(ToolOutput::err(..))`; `Err` is reserved for bad arguments and
    /// unexpected I/O errors.
    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError>;
}

/// Dispatches tool calls by name.
#[async_trait]
pub trait ToolChannel: Send + Sync {
    /// Schemas advertised to the model.
    fn definitions(&self) -> Vec<ToolDefinition>;

    fn kind_of(&self, name: &str) -> Option<ToolKind>;

    /// Name of the first tool of `kind`, if any.
    fn tool_name_for(&self, kind: ToolKind) -> Option<String>;

    async fn call(
        &self,
        name: &str,
        args: Value,
        ctx: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError>;
}

/// Registry for managing available tools.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// The full repair catalog, verifying builds through `oracle`.
    pub fn with_repair_tools(oracle: BuildOracle) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GetFileContentTool::new()));
        registry.register(Arc::new(ListStructureTool::new()));
        registry.register(Arc::new(ModifyFileTool::new()));
        registry.register(Arc::new(ApplyPatchTool::new()));
        registry.register(Arc::new(ExtractArchiveTool::new()));
        registry.register(Arc::new(CompressArchiveTool::new()));
        registry.register(Arc::new(UploadTool::new(oracle.service().clone())));
        registry.register(Arc::new(CheckBuildTool::new(oracle)));
        registry
    }

    /// Register a new tool in the registry.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool names.
    pub fn list_tools(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolChannel for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| {
                ToolDefinition::function(tool.name(), tool.description(), tool.parameters_schema())
            })
            .collect()
    }

    fn kind_of(&self, name: &str) -> Option<ToolKind> {
        self.tools.get(name).map(|t| t.kind())
    }

    fn tool_name_for(&self, kind: ToolKind) -> Option<String> {
        self.tools
            .values()
            .find(|t| t.kind() == kind)
            .map(|t| t.name().to_string())
    }

    async fn call(
        &self,
        name: &str,
        args: Value,
        ctx: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(args, ctx).await
    }
}

/// Deserializes tool arguments into a params struct.
pub(crate) fn parse_params<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidParameters(e.to_string()))
}

/// Truncates to at most `max_chars` characters.
pub(crate) fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
