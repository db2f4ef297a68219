//! Run configuration for the repair driver.
//!
//! Configuration is read from a YAML file (by default `config/info.yaml`);
//! credentials and endpoints can be overridden from the environment so that
//! secrets never need to live in the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/info.yaml";

/// Top-level configuration for a repair run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Filesystem layout.
    pub paths: PathsConfig,
    /// LLM endpoint settings.
    pub llm: LlmConfig,
    /// Build service settings.
    pub obs: ObsConfig,
    /// Attempt, round and timeout budgets.
    pub limits: LimitsConfig,
    /// Optional system prompt template; the built-in one is used otherwise.
    pub prompt_template: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding one sub-directory per source package.
    pub base_dir: PathBuf,
    /// Where `<pkg>_result.txt` files are written.
    pub result_dir: PathBuf,
    /// Where `<pkg>_diff.log` modification logs are appended.
    pub log_dir: PathBuf,
    /// Root of the per-package working copies.
    pub temp_work_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("data/packages"),
            result_dir: PathBuf::from("data/results"),
            log_dir: PathBuf::from("data/case_study"),
            temp_work_dir: PathBuf::from("data/temp"),
        }
    }
}

/// Supported LLM providers. All of them speak the OpenAI chat completions API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    #[default]
    Openai,
    Qwen,
    Claude,
    Deepseek,
    Custom,
}

impl LlmProviderKind {
    /// Model used when the configuration does not name one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Openai | Self::Custom => "gpt-5",
            Self::Qwen => "qwen3-max",
            Self::Claude => "claude-sonnet-4-5-20250929",
            Self::Deepseek => "deepseek-v3",
        }
    }

    /// Well-known API base for the provider, if any.
    pub fn default_api_base(&self) -> Option<&'static str> {
        match self {
            Self::Openai => Some("https://api.openai.com/v1"),
            Self::Qwen => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
            Self::Claude => Some("https://api.anthropic.com/v1"),
            Self::Deepseek => Some("https://api.deepseek.com/v1"),
            Self::Custom => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    /// Model identifier; falls back to the provider default when empty.
    pub model: Option<String>,
    pub api_base: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: Option<f64>,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::default(),
            model: None,
            api_base: None,
            api_key: None,
            temperature: None,
            request_timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    /// The model to request, resolving the provider default.
    pub fn resolved_model(&self) -> String {
        self.model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    /// The API base to call, resolving the provider default.
    pub fn resolved_api_base(&self) -> Option<String> {
        self.api_base
            .clone()
            .filter(|b| !b.trim().is_empty())
            .or_else(|| self.provider.default_api_base().map(str::to_string))
    }
}

/// Open Build Service account and target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObsConfig {
    pub api_url: String,
    pub user_name: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub target_project: String,
    pub repository_name: String,
    pub architecture_name: String,
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
    pub retry_delay_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.opensuse.org".to_string(),
            user_name: String::new(),
            password: String::new(),
            target_project: String::new(),
            repository_name: String::new(),
            architecture_name: "x86_64".to_string(),
            poll_interval_secs: 30,
            max_wait_secs: 180,
            retry_delay_secs: 10,
            request_timeout_secs: 600,
        }
    }
}

impl ObsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Budgets for the attempt/round loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_build_attempts: u32,
    pub max_tool_rounds: u32,
    pub max_repeat: usize,
    pub tool_timeout_secs: u64,
    pub max_connect_retries: u32,
    pub connect_retry_delay_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_build_attempts: 3,
            max_tool_rounds: 20,
            max_repeat: 3,
            tool_timeout_secs: 600,
            max_connect_retries: 2,
            connect_retry_delay_secs: 3,
        }
    }
}

impl LimitsConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl RepairConfig {
    /// Loads configuration from a YAML file and applies environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `API_KEY`: LLM API key
    /// - `API_BASE_URL`: LLM API base URL
    /// - `LLM_MODEL`: model identifier
    /// - `OBS_USER`: build service user name
    /// - `OBS_PASSWORD`: build service password
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, or if the
    /// resulting configuration fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_yaml(&raw)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from YAML text without touching the environment.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Applies environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("API_KEY") {
            self.llm.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("API_BASE_URL") {
            self.llm.api_base = Some(val);
        }
        if let Ok(val) = std::env::var("LLM_MODEL") {
            self.llm.model = Some(val);
        }
        if let Ok(val) = std::env::var("OBS_USER") {
            self.obs.user_name = val;
        }
        if let Ok(val) = std::env::var("OBS_PASSWORD") {
            self.obs.password = val;
        }
    }

    /// Validates budgets and required build service fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if limits.max_build_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_build_attempts must be greater than 0".to_string(),
            ));
        }
        if limits.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tool_rounds must be greater than 0".to_string(),
            ));
        }
        if limits.max_repeat == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_repeat must be greater than 0".to_string(),
            ));
        }
        if limits.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "tool_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.obs.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "obs.poll_interval_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        for (key, value) in [
            ("obs.api_url", &self.obs.api_url),
            ("obs.target_project", &self.obs.target_project),
            ("obs.repository_name", &self.obs.repository_name),
            ("obs.architecture_name", &self.obs.architecture_name),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} cannot be empty",
                    key
                )));
            }
        }

        Ok(())
    }
}
