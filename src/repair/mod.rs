//! Package repair driver.
//!
//! [`RepairDriver`] wires the LLM provider, the tool registry and the build
//! service together, then walks the package directory one package at a time.
//! A package that fails fatally is logged and counted as failed; the run
//! continues with the next one.

pub mod classify;
pub mod orchestrator;
pub mod prompts;
pub mod workspace;

pub use classify::{is_upload_success, parse_build_result};
pub use orchestrator::{
    LoopOutcome, Orchestrator, OrchestratorSettings, PackageReport, StopReason, FALLBACK_CALL_ID,
};
pub use workspace::{init_package_environment, list_packages, PackageWorkspace};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LimitsConfig, RepairConfig};
use crate::error::RepairError;
use crate::llm::{LlmProvider, OpenAiCompatProvider};
use crate::obs::{BuildOracle, BuildService, ObsClient, PollSettings};
use crate::state::StateRegistry;
use crate::tools::ToolRegistry;

/// Outcome of one package within a run.
#[derive(Debug, Clone, Serialize)]
pub struct PackageOutcome {
    pub package: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PackageReport>,
    /// Set when processing aborted before the loop could finish.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub packages: Vec<PackageOutcome>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.packages.len()
    }

    pub fn succeeded(&self) -> usize {
        self.packages.iter().filter(|p| p.succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }
}

/// Runs the repair loop over the configured package directory.
pub struct RepairDriver {
    config: RepairConfig,
    orchestrator: Orchestrator,
}

impl RepairDriver {
    /// Builds the real LLM client and build service client from `config`,
    /// then connects.
    pub async fn establish(config: RepairConfig) -> Result<Self, RepairError> {
        let llm = OpenAiCompatProvider::from_config(&config.llm)?;
        tracing::info!(
            base_url = %llm.base_url(),
            model = %llm.default_model(),
            api_key = %llm.api_key_masked(),
            "LLM provider configured"
        );
        let service = ObsClient::new(config.obs.clone())?;
        Self::connect(config, Arc::new(llm), Arc::new(service)).await
    }

    /// Checks that the build service answers (with bounded retry) and builds
    /// the orchestrator.
    pub async fn connect(
        config: RepairConfig,
        llm: Arc<dyn LlmProvider>,
        service: Arc<dyn BuildService>,
    ) -> Result<Self, RepairError> {
        probe_with_retry(service.as_ref(), &config.limits).await?;

        let oracle = BuildOracle::new(service, PollSettings::from(&config.obs));
        let tools = Arc::new(ToolRegistry::with_repair_tools(oracle));
        let states = Arc::new(StateRegistry::new(config.limits.max_repeat));
        let mut orchestrator =
            Orchestrator::new(llm, tools, states, OrchestratorSettings::from(&config));

        if let Some(path) = &config.prompt_template {
            let template = tokio::fs::read_to_string(path).await?;
            tracing::info!(path = %path.display(), "Using custom system prompt template");
            orchestrator = orchestrator.with_system_template(template);
        }

        Ok(Self {
            config,
            orchestrator,
        })
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    /// Processes every package under `base_dir`.
    pub async fn process_all(&self) -> Result<RunSummary, RepairError> {
        let packages = list_packages(&self.config.paths.base_dir)?;
        Ok(self.process(&packages).await)
    }

    /// Processes the named packages sequentially.
    pub async fn process(&self, packages: &[String]) -> RunSummary {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        tracing::info!(run_id = %run_id, packages = packages.len(), "Starting repair run");

        let mut outcomes = Vec::with_capacity(packages.len());
        for (idx, package) in packages.iter().enumerate() {
            tracing::info!(
                run_id = %run_id,
                package = %package,
                "=== [{}/{}] {} ===",
                idx + 1,
                packages.len(),
                package
            );
            let outcome = match self.process_one(package).await {
                Ok(report) => PackageOutcome {
                    package: package.clone(),
                    succeeded: report.succeeded,
                    report: Some(report),
                    error: None,
                },
                Err(e) => {
                    tracing::error!(package = %package, error = %e, "Fatal error while processing package");
                    PackageOutcome {
                        package: package.clone(),
                        succeeded: false,
                        report: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            packages: outcomes,
        };
        tracing::info!(
            run_id = %summary.run_id,
            total = summary.total(),
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "Repair run finished"
        );
        summary
    }

    async fn process_one(&self, package: &str) -> Result<PackageReport, RepairError> {
        let paths = self.config.paths.clone();
        let name = package.to_string();
        let workspace =
            tokio::task::spawn_blocking(move || init_package_environment(&paths, &name))
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))??;
        self.orchestrator.process_package(&workspace).await
    }
}

async fn probe_with_retry(service: &dyn BuildService, limits: &LimitsConfig) -> Result<(), RepairError> {
    let attempts = limits.max_connect_retries + 1;
    let delay = Duration::from_secs(limits.connect_retry_delay_secs);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match service.probe().await {
            Ok(()) => {
                tracing::info!(attempt = attempt, "Build service reachable");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(attempt = attempt, max_attempts = attempts, error = %e, "Build service probe failed");
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(delay * attempt).await;
                }
            }
        }
    }

    Err(RepairError::ChannelUnavailable {
        attempts,
        message: last_error,
    })
}
