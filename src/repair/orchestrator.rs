//! Attempt and round loop for one package.
//!
//! Each attempt starts from a fresh transcript (system prompt plus a user
//! prompt carrying the modification history) and lets the model call tools
//! round by round until the build is verified, the model stops calling
//! tools, or the round budget runs out. Every tool call goes through the
//! package's [`PackageState`](crate::state::PackageState):
//!
//! 1. verify-build before a successful publish is rejected,
//! 2. calls past the repeat bound are blocked and the model is nudged,
//! 3. cached edit results are replayed without side effects,
//! 4. anything else runs on the tool channel under the tool timeout.

use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::classify::{is_cacheable_edit, is_upload_success, parse_build_result};
use super::prompts::{
    attempt_failed_message, build_user_prompt, ordering_violation_message,
    render_system_prompt, repeat_blocked_message, DEFAULT_SYSTEM_TEMPLATE,
};
use super::workspace::PackageWorkspace;
use crate::config::RepairConfig;
use crate::error::RepairError;
use crate::llm::{Choice, GenerationRequest, LlmProvider, Message, ToolCallInfo, ToolDefinition};
use crate::state::{args_key, SharedPackageState, StateRegistry};
use crate::tools::{preview, ExecutionContext, OutcomeKind, ToolChannel, ToolKind};

/// Tool call id used for the forced publish at the end of a failed attempt.
pub const FALLBACK_CALL_ID: &str = "fallback_upload";

const ARGS_LOG_PREVIEW: usize = 500;
const RESULT_LOG_PREVIEW: usize = 1000;

/// Budgets and model parameters for the loop.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_attempts: u32,
    pub max_rounds: u32,
    pub tool_timeout: Duration,
    /// Empty means the provider default.
    pub model: String,
    pub temperature: Option<f64>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_rounds: 20,
            tool_timeout: Duration::from_secs(600),
            model: String::new(),
            temperature: None,
        }
    }
}

impl From<&RepairConfig> for OrchestratorSettings {
    fn from(config: &RepairConfig) -> Self {
        Self {
            max_attempts: config.limits.max_build_attempts,
            max_rounds: config.limits.max_tool_rounds,
            tool_timeout: config.limits.tool_timeout(),
            model: config.llm.resolved_model(),
            temperature: config.llm.temperature,
        }
    }
}

/// Why a round loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum StopReason {
    /// The verify-build tool reported success.
    BuildSucceeded,
    /// The model answered without requesting tools.
    NoToolCalls,
    RoundBudgetExhausted,
    /// A model request failed.
    LlmFailed(String),
}

/// Outcome of one attempt's round loop.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub success: bool,
    /// Latest non-empty assistant text.
    pub latest_text: String,
    pub rounds: u32,
    pub stop: StopReason,
}

/// Final result of processing one package.
#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub package: String,
    pub succeeded: bool,
    pub attempts: u32,
    pub stop: StopReason,
    pub result_file: PathBuf,
}

/// What handling a single requested call produced.
struct CallOutcome {
    text: String,
    nudge: Option<String>,
    build_verified: bool,
}

impl CallOutcome {
    fn blocked(text: String, nudge: Option<String>) -> Self {
        Self {
            text,
            nudge,
            build_verified: false,
        }
    }
}

/// Drives the repair loop for packages, one at a time.
pub struct Orchestrator {
    llm: Arc<dyn LlmProvider>,
    tools: Arc<dyn ToolChannel>,
    states: Arc<StateRegistry>,
    settings: OrchestratorSettings,
    system_template: String,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        tools: Arc<dyn ToolChannel>,
        states: Arc<StateRegistry>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            llm,
            tools,
            states,
            settings,
            system_template: DEFAULT_SYSTEM_TEMPLATE.to_string(),
        }
    }

    /// Replaces the built-in system prompt template.
    pub fn with_system_template(mut self, template: impl Into<String>) -> Self {
        self.system_template = template.into();
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Runs up to `max_attempts` attempts on a prepared workspace and writes
    /// the result file.
    pub async fn process_package(
        &self,
        workspace: &PackageWorkspace,
    ) -> Result<PackageReport, RepairError> {
        let package = workspace.name.as_str();
        let state = self.states.start_package(package).await;
        let ctx = ExecutionContext::new(package, &workspace.path, &workspace.diff_log);
        let package_path = workspace.path.display().to_string();

        let system_prompt = match render_system_prompt(
            &self.system_template,
            package,
            &workspace.result_file.display().to_string(),
            &package_path,
        ) {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::error!(package = package, error = %e, "System prompt could not be rendered");
                let banner = format!(
                    "Build failed before attempt 1.\nSystem prompt could not be rendered: {}",
                    e
                );
                tokio::fs::write(&workspace.result_file, banner).await?;
                return Err(e.into());
            }
        };

        let mut final_text = String::new();
        let mut succeeded = false;
        let mut attempts = 0;
        let mut stop = StopReason::NoToolCalls;
        let mut carried: Option<Message> = None;

        for attempt in 1..=self.settings.max_attempts {
            attempts = attempt;
            tracing::info!(
                package = package,
                attempt = attempt,
                max_attempts = self.settings.max_attempts,
                "Starting build attempt"
            );

            let history = {
                let mut st = state.lock().await;
                st.reset();
                st.modifications().to_vec()
            };

            let mut messages = vec![Message::system(system_prompt.clone())];
            messages.extend(carried.take());
            messages.push(Message::user(build_user_prompt(
                package,
                &package_path,
                attempt,
                &history,
            )));

            let outcome = self.round_loop(&ctx, &state, &mut messages, attempt).await;
            stop = outcome.stop.clone();

            if outcome.success {
                succeeded = true;
                final_text = format!("Build succeeded on attempt {}.\n{}", attempt, outcome.latest_text);
                tracing::info!(package = package, attempt = attempt, rounds = outcome.rounds, "Build succeeded");
                break;
            }

            tracing::warn!(
                package = package,
                attempt = attempt,
                rounds = outcome.rounds,
                stop = ?outcome.stop,
                "Build attempt failed"
            );
            carried = Some(Message::user(attempt_failed_message(attempt)));
            final_text = format!("Build failed on attempt {}.\n{}", attempt, outcome.latest_text);
        }

        tokio::fs::write(&workspace.result_file, &final_text).await?;
        tracing::info!(
            package = package,
            path = %workspace.result_file.display(),
            "Result saved"
        );
        if !succeeded {
            tracing::warn!(package = package, attempts = attempts, "Max attempts reached without success");
        }

        Ok(PackageReport {
            package: package.to_string(),
            succeeded,
            attempts,
            stop,
            result_file: workspace.result_file.clone(),
        })
    }

    /// One attempt: model rounds until success, no more tool calls, the round
    /// budget, or a model failure. Without a successful publish during the
    /// attempt, one publish is forced before returning failure.
    pub async fn round_loop(
        &self,
        ctx: &ExecutionContext,
        state: &SharedPackageState,
        messages: &mut Vec<Message>,
        attempt: u32,
    ) -> LoopOutcome {
        let definitions = self.tools.definitions();
        let mut did_upload = false;
        let mut rounds = 0;

        let mut choice = match self.complete(messages, &definitions).await {
            Ok(choice) => choice,
            Err(message) => {
                tracing::error!(package = %ctx.package_name, attempt = attempt, error = %message, "Model call failed");
                return LoopOutcome {
                    success: false,
                    latest_text: format!("Model call failed: {}", message),
                    rounds,
                    stop: StopReason::LlmFailed(message),
                };
            }
        };
        let mut latest_text = choice.message.text().to_string();

        let stop = loop {
            if !choice.has_pending_tool_calls() {
                break StopReason::NoToolCalls;
            }
            if rounds >= self.settings.max_rounds {
                break StopReason::RoundBudgetExhausted;
            }
            rounds += 1;
            tracing::debug!(package = %ctx.package_name, attempt = attempt, round = rounds, "Tool round");

            let calls: Vec<ToolCallInfo> = choice.tool_calls().to_vec();
            messages.push(Message::assistant_with_tool_calls(
                choice.message.content.clone(),
                calls.clone(),
            ));

            let mut nudges = Vec::new();
            for call in &calls {
                let outcome = self
                    .handle_call(ctx, state, call, attempt, rounds, &mut did_upload)
                    .await;
                messages.push(Message::tool_result(&call.id, outcome.text));
                if outcome.build_verified {
                    return LoopOutcome {
                        success: true,
                        latest_text,
                        rounds,
                        stop: StopReason::BuildSucceeded,
                    };
                }
                nudges.extend(outcome.nudge);
            }
            messages.extend(nudges.into_iter().map(Message::user));

            choice = match self.complete(messages, &definitions).await {
                Ok(next) => next,
                Err(message) => {
                    tracing::error!(package = %ctx.package_name, attempt = attempt, round = rounds, error = %message, "Model continuation failed");
                    break StopReason::LlmFailed(message);
                }
            };
            if !choice.message.text().is_empty() {
                latest_text = choice.message.text().to_string();
            }
        };

        if !did_upload {
            self.fallback_publish(ctx, state, messages).await;
        }

        LoopOutcome {
            success: false,
            latest_text,
            rounds,
            stop,
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        definitions: &[ToolDefinition],
    ) -> Result<Choice, String> {
        let mut request = GenerationRequest::new(self.settings.model.clone(), messages.to_vec())
            .with_tools(definitions.to_vec());
        if let Some(temperature) = self.settings.temperature {
            request = request.with_temperature(temperature);
        }

        let response = self.llm.generate(request).await.map_err(|e| e.to_string())?;
        response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| "LLM returned no choices".to_string())
    }

    async fn handle_call(
        &self,
        ctx: &ExecutionContext,
        state: &SharedPackageState,
        call: &ToolCallInfo,
        attempt: u32,
        round: u32,
        did_upload: &mut bool,
    ) -> CallOutcome {
        let name = call.function.name.as_str();
        let args = call.parsed_arguments();
        let key = args_key(name, &args);
        let kind = self.tools.kind_of(name);

        tracing::info!(
            package = %ctx.package_name,
            attempt = attempt,
            round = round,
            tool = name,
            args = %preview(&call.function.arguments, ARGS_LOG_PREVIEW),
            "Tool call"
        );

        if kind == Some(ToolKind::VerifyBuild) && !state.lock().await.upload_status() {
            let publish = self
                .tools
                .tool_name_for(ToolKind::Publish)
                .unwrap_or_else(|| "the upload tool".to_string());
            tracing::warn!(package = %ctx.package_name, tool = name, "Build check before upload rejected");
            return CallOutcome::blocked(ordering_violation_message(name, &publish), None);
        }

        let cached = {
            let st = state.lock().await;
            if !st.check_repeat(&key) {
                tracing::warn!(
                    package = %ctx.package_name,
                    tool = name,
                    count = st.repeat_count(&key),
                    "Repeated tool call blocked"
                );
                return CallOutcome::blocked(
                    format!(
                        "Tool call {} exceeded max repeat count ({})",
                        name,
                        st.max_repeat()
                    ),
                    Some(repeat_blocked_message(name)),
                );
            }
            st.check_cache(&key).map(str::to_string)
        };

        let text = match cached {
            Some(text) => {
                tracing::debug!(package = %ctx.package_name, tool = name, "Tool result served from cache");
                text
            }
            None => {
                let text = self.execute(ctx, state, name, args).await;
                if kind == Some(ToolKind::Edit) && is_cacheable_edit(&text) {
                    state.lock().await.write_cache(key.clone(), text.clone());
                }
                text
            }
        };

        let mut st = state.lock().await;
        st.record_history(key);

        if kind == Some(ToolKind::Publish) && is_upload_success(&text) {
            st.mark_uploaded();
            *did_upload = true;
            tracing::info!(package = %ctx.package_name, "Upload marked as successful");
        }

        let build_verified = kind == Some(ToolKind::VerifyBuild) && parse_build_result(&text);
        CallOutcome {
            text,
            nudge: None,
            build_verified,
        }
    }

    /// Runs a tool on the channel under the tool timeout. Failures become
    /// error text; edits are added to the modification log.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        state: &SharedPackageState,
        name: &str,
        args: Value,
    ) -> String {
        let started = Instant::now();
        let result = tokio::time::timeout(self.settings.tool_timeout, self.tools.call(name, args, ctx)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (outcome, text) = match result {
            Err(_) => ("timeout", format!("Error: Tool {} timed out", name)),
            Ok(Err(e)) => ("exception", format!("Error: Tool {} failed: {}", name, e)),
            Ok(Ok(output)) => {
                if !output.modifications.is_empty() {
                    let mut st = state.lock().await;
                    for record in output.modifications {
                        st.record_modification(record);
                    }
                }
                let outcome = if output.status == OutcomeKind::Ok {
                    "ok"
                } else {
                    "err"
                };
                (outcome, output.payload)
            }
        };

        tracing::info!(
            package = %ctx.package_name,
            tool = name,
            outcome = outcome,
            duration_ms = duration_ms,
            result = %preview(&text, RESULT_LOG_PREVIEW),
            "Tool executed"
        );
        text
    }

    /// Forces one publish at the end of an attempt. Only the model's own
    /// successful publish opens the verify-build gate.
    async fn fallback_publish(
        &self,
        ctx: &ExecutionContext,
        state: &SharedPackageState,
        messages: &mut Vec<Message>,
    ) {
        let Some(publish) = self.tools.tool_name_for(ToolKind::Publish) else {
            tracing::warn!(package = %ctx.package_name, "No publish tool registered, skipping fallback upload");
            return;
        };

        let args = serde_json::json!({ "package_path": ctx.workspace_root.display().to_string() });
        let text = self.execute(ctx, state, &publish, args).await;
        tracing::info!(
            package = %ctx.package_name,
            tool = %publish,
            uploaded = is_upload_success(&text),
            result = %preview(&text, 300),
            "Fallback upload"
        );
        messages.push(Message::tool_result(FALLBACK_CALL_ID, text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::GenerationResponse;
    use crate::tools::{ToolError, ToolOutput};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    struct ScriptedLlm {
        replies: Mutex<VecDeque<Message>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Message>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            let message = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Message::assistant("done"));
            let finish = if message.tool_calls.is_some() { "tool_calls" } else { "stop" };
            Ok(GenerationResponse {
                id: "resp".to_string(),
                model: "scripted".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message,
                    finish_reason: Some(finish.to_string()),
                }],
                usage: None,
            })
        }
    }

    /// Channel with canned replies per tool that counts executions.
    struct StubChannel {
        kinds: HashMap<&'static str, ToolKind>,
        replies: HashMap<&'static str, &'static str>,
        delay: Duration,
        calls: Mutex<Vec<String>>,
    }

    impl StubChannel {
        fn new() -> Self {
            let kinds = HashMap::from([
                ("read", ToolKind::Inspect),
                ("edit", ToolKind::Edit),
                ("publish", ToolKind::Publish),
                ("verify", ToolKind::VerifyBuild),
                ("slow", ToolKind::Inspect),
            ]);
            let replies = HashMap::from([
                ("read", "Name: zlib"),
                ("edit", "Success: Replaced content of zlib.spec"),
                ("publish", "Upload successful. Result: Success"),
                ("verify", "Build result: Build succeeded!"),
                ("slow", "late"),
            ]);
            Self {
                kinds,
                replies,
                delay: Duration::from_millis(200),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls_to(&self, name: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
        }
    }

    #[async_trait]
    impl ToolChannel for StubChannel {
        fn definitions(&self) -> Vec<ToolDefinition> {
            self.kinds
                .keys()
                .map(|name| ToolDefinition::function(*name, "stub", serde_json::json!({"type": "object"})))
                .collect()
        }

        fn kind_of(&self, name: &str) -> Option<ToolKind> {
            self.kinds.get(name).copied()
        }

        fn tool_name_for(&self, kind: ToolKind) -> Option<String> {
            self.kinds
                .iter()
                .find(|(_, k)| **k == kind)
                .map(|(name, _)| name.to_string())
        }

        async fn call(&self, name: &str, _args: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
            self.calls.lock().unwrap().push(name.to_string());
            if name == "slow" {
                tokio::time::sleep(self.delay).await;
            }
            self.replies
                .get(name)
                .map(|text| ToolOutput::ok(*text))
                .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
        }
    }

    fn calls(specs: &[(&str, &str)]) -> Message {
        Message::assistant_with_tool_calls(
            None,
            specs
                .iter()
                .enumerate()
                .map(|(i, (name, args))| ToolCallInfo::new(format!("call_{}", i), *name, *args))
                .collect(),
        )
    }

    fn orchestrator(llm: Arc<ScriptedLlm>, channel: Arc<StubChannel>) -> Orchestrator {
        Orchestrator::new(
            llm,
            channel,
            Arc::new(StateRegistry::new(3)),
            OrchestratorSettings {
                max_attempts: 1,
                max_rounds: 5,
                tool_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        )
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("zlib", "/work/zlib", "/logs/zlib_diff.log")
    }

    #[tokio::test]
    async fn test_repeat_bound_blocks_fourth_call() {
        let llm = Arc::new(ScriptedLlm::new(vec![calls(&[
            ("read", r#"{"file_path": "a", "n": 1}"#),
            ("read", r#"{"n": 1, "file_path": "a"}"#),
            ("read", r#"{"file_path":"a","n":1}"#),
            ("read", r#"{"file_path": "a", "n": 1}"#),
        ])]));
        let channel = Arc::new(StubChannel::new());
        let orch = orchestrator(llm.clone(), channel.clone());
        let state = Arc::new(tokio::sync::Mutex::new(crate::state::PackageState::new(3)));
        let mut messages = vec![Message::user("go")];

        let outcome = orch.round_loop(&ctx(), &state, &mut messages, 1).await;

        assert!(!outcome.success);
        assert_eq!(outcome.stop, StopReason::NoToolCalls);
        assert_eq!(channel.calls_to("read"), 3);

        let tool_texts: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == "tool" && m.tool_call_id.as_deref() != Some(FALLBACK_CALL_ID))
            .map(|m| m.text())
            .collect();
        assert_eq!(tool_texts.len(), 4);
        assert_eq!(tool_texts[3], "Tool call read exceeded max repeat count (3)");

        let nudge_pos = messages
            .iter()
            .position(|m| m.role == "user" && m.text().starts_with("Do not call read again"))
            .unwrap();
        let last_tool_pos = messages
            .iter()
            .rposition(|m| m.tool_call_id.as_deref() == Some("call_3"))
            .unwrap();
        assert!(nudge_pos > last_tool_pos);
        assert_eq!(state.lock().await.history().len(), 3);
    }

    #[tokio::test]
    async fn test_edit_results_are_cached() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            calls(&[("edit", r#"{"file_path": "zlib.spec"}"#)]),
            calls(&[("edit", r#"{"file_path": "zlib.spec"}"#)]),
        ]));
        let channel = Arc::new(StubChannel::new());
        let orch = orchestrator(llm, channel.clone());
        let state = Arc::new(tokio::sync::Mutex::new(crate::state::PackageState::new(3)));
        let mut messages = vec![Message::user("go")];

        let outcome = orch.round_loop(&ctx(), &state, &mut messages, 1).await;

        assert_eq!(outcome.rounds, 2);
        assert_eq!(channel.calls_to("edit"), 1);
        assert_eq!(state.lock().await.history().len(), 2);
        let replies: Vec<&str> = messages
            .iter()
            .filter(|m| m.tool_call_id.as_deref() == Some("call_0"))
            .map(|m| m.text())
            .collect();
        assert_eq!(replies, vec!["Success: Replaced content of zlib.spec"; 2]);
    }

    #[tokio::test]
    async fn test_tool_timeout_becomes_error_text() {
        let llm = Arc::new(ScriptedLlm::new(vec![calls(&[("slow", "{}")])]));
        let channel = Arc::new(StubChannel::new());
        let orch = orchestrator(llm, channel);
        let state = Arc::new(tokio::sync::Mutex::new(crate::state::PackageState::new(3)));
        let mut messages = vec![Message::user("go")];

        orch.round_loop(&ctx(), &state, &mut messages, 1).await;

        assert!(messages
            .iter()
            .any(|m| m.role == "tool" && m.text() == "Error: Tool slow timed out"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_not_raised() {
        let llm = Arc::new(ScriptedLlm::new(vec![calls(&[("nope", "{}")])]));
        let channel = Arc::new(StubChannel::new());
        let orch = orchestrator(llm, channel);
        let state = Arc::new(tokio::sync::Mutex::new(crate::state::PackageState::new(3)));
        let mut messages = vec![Message::user("go")];

        orch.round_loop(&ctx(), &state, &mut messages, 1).await;

        assert!(messages
            .iter()
            .any(|m| m.text() == "Error: Tool nope failed: Unknown tool: nope"));
    }

    #[tokio::test]
    async fn test_round_budget_ends_attempt_with_fallback() {
        let replies = (0..10)
            .map(|i| calls(&[("read", if i % 2 == 0 { r#"{"a":1}"# } else { r#"{"a":2}"# })]))
            .collect();
        let llm = Arc::new(ScriptedLlm::new(replies));
        let channel = Arc::new(StubChannel::new());
        let orch = orchestrator(llm, channel.clone());
        let state = Arc::new(tokio::sync::Mutex::new(crate::state::PackageState::new(10)));
        let mut messages = vec![Message::user("go")];

        let outcome = orch.round_loop(&ctx(), &state, &mut messages, 1).await;

        assert_eq!(outcome.stop, StopReason::RoundBudgetExhausted);
        assert_eq!(outcome.rounds, 5);
        assert_eq!(channel.calls_to("publish"), 1);
        let last = messages.last().unwrap();
        assert_eq!(last.tool_call_id.as_deref(), Some(FALLBACK_CALL_ID));
        assert!(!state.lock().await.upload_status());
    }

    #[tokio::test]
    async fn test_fallback_upload_keeps_verify_gate_closed() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Message::assistant("Nothing to do."),
            calls(&[("verify", "{}")]),
        ]));
        let channel = Arc::new(StubChannel::new());
        let orch = orchestrator(llm, channel.clone());
        let state = Arc::new(tokio::sync::Mutex::new(crate::state::PackageState::new(3)));

        let mut first = vec![Message::user("attempt 1")];
        let outcome = orch.round_loop(&ctx(), &state, &mut first, 1).await;
        assert_eq!(outcome.stop, StopReason::NoToolCalls);
        assert_eq!(channel.calls_to("publish"), 1);

        state.lock().await.reset();
        let mut second = vec![Message::user("attempt 2")];
        let outcome = orch.round_loop(&ctx(), &state, &mut second, 2).await;

        assert!(!outcome.success);
        assert_eq!(channel.calls_to("verify"), 0);
        let rejection = second
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("call_0"))
            .unwrap();
        assert!(rejection.text().starts_with("ERROR: Cannot call verify before uploading."));
    }

    #[tokio::test]
    async fn test_no_fallback_after_successful_publish() {
        let llm = Arc::new(ScriptedLlm::new(vec![calls(&[("publish", "{}")])]));
        let channel = Arc::new(StubChannel::new());
        let orch = orchestrator(llm, channel.clone());
        let state = Arc::new(tokio::sync::Mutex::new(crate::state::PackageState::new(3)));
        let mut messages = vec![Message::user("go")];

        orch.round_loop(&ctx(), &state, &mut messages, 1).await;

        assert_eq!(channel.calls_to("publish"), 1);
        assert!(messages
            .iter()
            .all(|m| m.tool_call_id.as_deref() != Some(FALLBACK_CALL_ID)));
    }

    #[tokio::test]
    async fn test_bad_template_still_writes_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = PackageWorkspace {
            name: "zlib".to_string(),
            path: dir.path().join("zlib"),
            result_file: dir.path().join("zlib_result.txt"),
            diff_log: dir.path().join("zlib_diff.log"),
        };
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let orch = orchestrator(llm, Arc::new(StubChannel::new()))
            .with_system_template("Repair {{ package_name");

        let err = orch.process_package(&workspace).await.unwrap_err();

        assert!(matches!(err, RepairError::Template(_)));
        let result = std::fs::read_to_string(&workspace.result_file).unwrap();
        assert!(result.starts_with("Build failed before attempt 1.\nSystem prompt could not be rendered: "));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = RepairConfig::default();
        config.limits.max_build_attempts = 5;
        config.limits.tool_timeout_secs = 7;
        config.llm.model = Some("qwen-coder".to_string());
        let settings = OrchestratorSettings::from(&config);
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.max_rounds, 20);
        assert_eq!(settings.tool_timeout, Duration::from_secs(7));
        assert_eq!(settings.model, "qwen-coder");
    }
}
