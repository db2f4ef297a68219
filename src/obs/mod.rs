//! Build service access.
//!
//! [`BuildService`] is the narrow seam over the Open Build Service API;
//! [`BuildOracle`] polls it until a package's build settles and turns the
//! outcome into the human-readable status the model sees.

mod client;

pub use client::{parse_status_code, ObsClient};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ObsConfig;
use crate::error::ObsError;

/// File the failure log is written to inside the package workspace.
pub const FAILED_LOG_FILE: &str = "log_failed.txt";

/// Operations the repair loop needs from a build service.
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Checks that the service is reachable with the configured credentials.
    async fn probe(&self) -> Result<(), ObsError>;

    /// Uploads one source file of `package`.
    async fn upload_file(&self, package: &str, file_name: &str, body: Vec<u8>) -> Result<(), ObsError>;

    /// Returns the raw `code` of the package's current build status.
    async fn fetch_status_code(&self, package: &str) -> Result<String, ObsError>;

    /// Returns the package's build log.
    async fn fetch_build_log(&self, package: &str) -> Result<Vec<u8>, ObsError>;
}

/// Classified build status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    InProgress,
    Broken,
    Unresolvable,
    Succeeded,
    Failed(String),
}

impl BuildStatus {
    pub fn from_code(code: &str) -> Self {
        match code {
            "building" | "scheduled" | "blocked" | "dispatching" | "finished" | "signing" => {
                BuildStatus::InProgress
            }
            "broken" => BuildStatus::Broken,
            "unresolvable" => BuildStatus::Unresolvable,
            "succeeded" => BuildStatus::Succeeded,
            other => BuildStatus::Failed(other.to_string()),
        }
    }
}

/// Poll timing for [`BuildOracle`].
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
    pub retry_delay: Duration,
}

impl From<&ObsConfig> for PollSettings {
    fn from(config: &ObsConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_wait: config.max_wait(),
            retry_delay: config.retry_delay(),
        }
    }
}

/// Polls a [`BuildService`] for a package's build outcome.
#[derive(Clone)]
pub struct BuildOracle {
    service: Arc<dyn BuildService>,
    settings: PollSettings,
}

impl BuildOracle {
    pub fn new(service: Arc<dyn BuildService>, settings: PollSettings) -> Self {
        Self { service, settings }
    }

    pub fn service(&self) -> &Arc<dyn BuildService> {
        &self.service
    }

    /// Waits for the build of `package` to settle and describes the result.
    ///
    /// Request errors are retried after `retry_delay`; a build that is still
    /// in progress after `max_wait` is reported as a timeout failure. For
    /// generic failures the build log is saved into `workspace`.
    pub async fn check(&self, package: &str, workspace: &Path) -> String {
        let mut elapsed = Duration::ZERO;

        while elapsed < self.settings.max_wait {
            match self.service.fetch_status_code(package).await {
                Ok(code) => {
                    tracing::debug!(package = package, code = %code, "Build status polled");
                    match BuildStatus::from_code(&code) {
                        BuildStatus::InProgress => {
                            tokio::time::sleep(self.settings.interval).await;
                            elapsed += self.settings.interval;
                        }
                        BuildStatus::Broken => {
                            return format!(
                                "Build broken! The sources either contain no build description (e.g. specfile), automatic source processing failed or a merge conflict does exist. \n broken: can not parse name from {}.spec",
                                package
                            );
                        }
                        BuildStatus::Unresolvable => {
                            return "Build unresolvable! The build can not begin, because required packages are either missing or not explicitly defined.".to_string();
                        }
                        BuildStatus::Succeeded => {
                            return "Build succeeded! The build has been successfully completed."
                                .to_string();
                        }
                        BuildStatus::Failed(_) => {
                            return match self.save_failure_log(package, workspace).await {
                                Some(path) => format!(
                                    "Build failed! The failed log has been updated to: {}",
                                    path.display()
                                ),
                                None => "Build failed! The failed log has been updated.".to_string(),
                            };
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        package = package,
                        error = %e,
                        retry_in = ?self.settings.retry_delay,
                        "Check build status failed, will retry"
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                    elapsed += self.settings.retry_delay;
                }
            }
        }

        format!(
            "Build timeout! The build has not been completed within {} seconds. Default build failed.",
            self.settings.max_wait.as_secs()
        )
    }

    async fn save_failure_log(&self, package: &str, workspace: &Path) -> Option<PathBuf> {
        let log = match self.service.fetch_build_log(package).await {
            Ok(log) => log,
            Err(e) => {
                tracing::warn!(package = package, error = %e, "Failed to fetch build log");
                return None;
            }
        };
        let path = workspace.join(FAILED_LOG_FILE);
        match tokio::fs::write(&path, log).await {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to save build log");
                None
            }
        }
    }
}
