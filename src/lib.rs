//! pkg-mender: LLM-driven repair of packages that fail to build.
//!
//! The library drives a model through a bounded "propose edits, run tools,
//! verify" loop against a package working copy, with a strict unified-diff
//! engine for applying the model's edits and an Open Build Service client as
//! the build oracle.

pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod obs;
pub mod patch;
pub mod repair;
pub mod state;
pub mod tools;

// Re-export commonly used types
pub use config::RepairConfig;
pub use error::{ConfigError, LlmError, ObsError, PatchError, RepairError, WorkspaceError};
pub use repair::{Orchestrator, RepairDriver, RunSummary};
pub use state::{PackageState, StateRegistry};
