//! Error types for pkg-mender operations.
//!
//! Defines error types for the major subsystems:
//! - LLM API interactions
//! - Unified-diff parsing and application
//! - Configuration loading
//! - Build service (OBS) requests
//! - Package workspace preparation
//! - The repair run as a whole

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL for provider '{0}'")]
    MissingApiBase(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("LLM returned no choices")]
    EmptyResponse,
}

/// Errors raised while parsing or applying a unified diff.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("No file blocks detected in patch")]
    NoFileBlocks,

    #[error("Bad patch: expected '+++' after '---' at line {line}")]
    MissingNewHeader { line: usize },

    #[error("Bad hunk header: {0}")]
    BadHunkHeader(String),

    #[error("invalid file block (both paths /dev/null?)")]
    InvalidFileBlock,

    #[error("path escapes repo_root: {0}")]
    PathEscapes(String),

    #[error("target not found for patch: {0}")]
    TargetNotFound(String),

    #[error("Hunk failed for {0}. Ensure exact context lines and correct ranges.")]
    HunkFailed(String),

    #[error("IO error on {path}: {message}")]
    Io { path: String, message: String },
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur when talking to the build service.
#[derive(Debug, Error)]
pub enum ObsError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Build service returned {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Missing 'code' attribute in status response")]
    MissingStatusCode,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while preparing a package workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Base directory not found: {0}")]
    BaseDirNotFound(String),

    #[error("Original package path not found: {0}")]
    PackageNotFound(String),

    #[error("Invalid package name: '{0}'")]
    InvalidPackageName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Errors that halt processing beyond the current tool call.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("Channel unavailable after {attempts} attempts: {message}")]
    ChannelUnavailable { attempts: u32, message: String },

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Build service error: {0}")]
    Obs(#[from] ObsError),

    #[error("Prompt rendering error: {0}")]
    Template(#[from] tera::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
