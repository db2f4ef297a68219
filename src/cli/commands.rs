//! CLI command definitions for pkg-mender.
//!
//! `run` drives the repair loop over the configured package directory;
//! `apply-patch` and `check-build` expose the patch engine and the build
//! oracle on their own for debugging a package by hand.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::{RepairConfig, DEFAULT_CONFIG_PATH};
use crate::obs::{BuildOracle, ObsClient, PollSettings};
use crate::patch;
use crate::repair::{RepairDriver, RunSummary};

/// LLM-driven repair of packages that fail to build on the Open Build Service.
#[derive(Parser)]
#[command(name = "pkg-mender")]
#[command(about = "Repair failing OBS packages with an LLM tool-calling loop")]
#[command(version)]
#[command(
    long_about = "pkg-mender copies each package into a working directory, lets an LLM inspect and patch it through a fixed tool catalog, uploads the result to the Open Build Service and retries until the build succeeds or the attempt budget is spent.\n\nExample usage:\n  pkg-mender run --config config/info.yaml --package zlib"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Repair packages under the configured base directory.
    Run(RunArgs),

    /// Apply a unified diff to a directory with strict matching.
    #[command(name = "apply-patch")]
    ApplyPatch(ApplyPatchArgs),

    /// Poll the build service for one package and print the result.
    #[command(name = "check-build")]
    CheckBuild(CheckBuildArgs),
}

/// Arguments for `pkg-mender run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "PKG_MENDER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Only process these packages (repeatable). Defaults to every package.
    #[arg(short, long = "package")]
    pub packages: Vec<String>,

    /// Override the attempt budget from the configuration.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Output the run summary as JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `pkg-mender apply-patch`.
#[derive(Parser, Debug)]
pub struct ApplyPatchArgs {
    /// Directory the patch paths are relative to.
    #[arg(short, long)]
    pub root: PathBuf,

    /// Patch file to apply.
    #[arg(short, long)]
    pub patch: PathBuf,
}

/// Arguments for `pkg-mender check-build`.
#[derive(Parser, Debug)]
pub struct CheckBuildArgs {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "PKG_MENDER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Package name on the build service.
    #[arg(short, long)]
    pub package: String,

    /// Directory the failure log is written to.
    #[arg(short, long, default_value = ".")]
    pub workspace: PathBuf,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_repair_command(args).await,
        Commands::ApplyPatch(args) => run_apply_patch_command(args).await,
        Commands::CheckBuild(args) => run_check_build_command(args).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn load_config(path: &Path) -> anyhow::Result<RepairConfig> {
    RepairConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn run_repair_command(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(max_attempts) = args.max_attempts {
        anyhow::ensure!(max_attempts > 0, "--max-attempts must be at least 1");
        config.limits.max_build_attempts = max_attempts;
    }

    info!(
        base_dir = %config.paths.base_dir.display(),
        provider = ?config.llm.provider,
        model = %config.llm.resolved_model(),
        max_attempts = config.limits.max_build_attempts,
        "Starting pkg-mender"
    );

    let driver = RepairDriver::establish(config)
        .await
        .context("Failed to establish LLM and build service channels")?;

    let summary = if args.packages.is_empty() {
        driver.process_all().await?
    } else {
        driver.process(&args.packages).await
    };

    if args.json {
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| anyhow::anyhow!("Failed to serialize run summary: {}", e))?;
        println!("{}", json);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Run {}", summary.run_id);
    for outcome in &summary.packages {
        let status = if outcome.succeeded { "OK  " } else { "FAIL" };
        match (&outcome.report, &outcome.error) {
            (Some(report), _) => println!(
                "  [{}] {} (attempts: {}, result: {})",
                status,
                outcome.package,
                report.attempts,
                report.result_file.display()
            ),
            (None, Some(error)) => println!("  [{}] {} ({})", status, outcome.package, error),
            (None, None) => println!("  [{}] {}", status, outcome.package),
        }
    }
    println!(
        "{} packages, {} succeeded, {} failed",
        summary.total(),
        summary.succeeded(),
        summary.failed()
    );
}

async fn run_apply_patch_command(args: ApplyPatchArgs) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(&args.patch)
        .await
        .with_context(|| format!("Failed to read patch {}", args.patch.display()))?;
    anyhow::ensure!(
        args.root.is_dir(),
        "repo_root not found: {}",
        args.root.display()
    );

    let changes = patch::parse(&text)?;
    anyhow::ensure!(!changes.is_empty(), crate::error::PatchError::NoFileBlocks);

    let root = args.root.clone();
    let outcome = tokio::task::spawn_blocking(move || patch::apply_to_tree(&root, &changes)).await?;
    match outcome {
        Ok(applied) => {
            for change in &applied {
                println!("{} {}", change.kind.letter(), change.path);
            }
            Ok(())
        }
        Err(failure) => {
            for change in &failure.applied {
                println!("{} {}", change.kind.letter(), change.path);
            }
            Err(failure.error.into())
        }
    }
}

async fn run_check_build_command(args: CheckBuildArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let client = ObsClient::new(config.obs.clone())?;
    let oracle = BuildOracle::new(Arc::new(client), PollSettings::from(&config.obs));

    info!(package = %args.package, "Checking build status");
    let status = oracle.check(&args.package, &args.workspace).await;
    println!("{}", status);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_packages() {
        let cli = Cli::try_parse_from([
            "pkg-mender",
            "--log-level",
            "debug",
            "run",
            "--package",
            "zlib",
            "-p",
            "curl",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.packages, vec!["zlib", "curl"]);
                assert!(args.json);
                assert_eq!(args.max_attempts, None);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_apply_patch() {
        let cli = Cli::try_parse_from([
            "pkg-mender",
            "apply-patch",
            "--root",
            "/tmp/zlib",
            "--patch",
            "fix.diff",
        ])
        .unwrap();
        match cli.command {
            Commands::ApplyPatch(args) => {
                assert_eq!(args.root, PathBuf::from("/tmp/zlib"));
                assert_eq!(args.patch, PathBuf::from("fix.diff"));
            }
            _ => panic!("expected apply-patch"),
        }
    }

    #[tokio::test]
    async fn test_apply_patch_command_applies() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("pkg");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.txt"), "one\ntwo\n").unwrap();
        let patch_file = dir.path().join("fix.diff");
        std::fs::write(&patch_file, "--- a/a.txt\n+++ b/a.txt\n@@ -2 +2 @@\n-two\n+three\n").unwrap();

        run_apply_patch_command(ApplyPatchArgs {
            root: root.clone(),
            patch: patch_file,
        })
        .await
        .unwrap();

        assert_eq!(std::fs::read_to_string(root.join("a.txt")).unwrap(), "one\nthree\n");
    }

    #[tokio::test]
    async fn test_apply_patch_command_rejects_prose() {
        let dir = tempfile::tempdir().unwrap();
        let patch_file = dir.path().join("fix.diff");
        std::fs::write(&patch_file, "please bump the version\n").unwrap();

        let err = run_apply_patch_command(ApplyPatchArgs {
            root: dir.path().to_path_buf(),
            patch: patch_file,
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<crate::error::PatchError>(),
            Some(crate::error::PatchError::NoFileBlocks)
        ));
    }
}
