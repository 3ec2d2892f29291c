//! The agent controller: owns the Reflect → Strategize → Act → Observe loop
//! and decides when to call the model, when to dispatch a tool, when to
//! verify, and when to stop.
//!
//! Everything the loop can express as an observation is survivable; only
//! infrastructure loss (empty registry, unreachable transport beyond the
//! retry budget, unwritable scratch space) terminates a run early.

use super::gate;
use super::parser;
use super::report;
use crate::config::AgentConfig;
use crate::llm::oracle::{OracleError, PromptMessage, TextOracle};
use crate::models::{AgentState, Goal, RunResult, TurnRecord};
use crate::prompt::builder::PromptBuilder;
use crate::tools::dispatcher::Dispatcher;
use crate::tools::registry::ToolRegistry;
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::workspace::Workspace;

/// Drives one goal to completion against a registry of tools.
pub struct AgentController {
    registry: Arc<ToolRegistry>,
    oracle: Arc<dyn TextOracle>,
    dispatcher: Dispatcher,
    prompt_builder: PromptBuilder,
    workspace: Workspace,
    config: AgentConfig,
}

impl AgentController {
    /// Creates a controller for one run. Fails when the scratch directory
    /// or workspace root cannot be set up.
    pub fn new(
        registry: Arc<ToolRegistry>,
        oracle: Arc<dyn TextOracle>,
        config: AgentConfig,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::new(registry.clone(), config.default_tool_timeout_secs)
            .context("Failed to create observation scratch directory")?;
        let workspace = Workspace::new(&config.workspace_root)
            .context("Failed to initialize workspace root")?;
        let prompt_builder = PromptBuilder::new(&config);
        Ok(Self {
            registry,
            oracle,
            dispatcher,
            prompt_builder,
            workspace,
            config,
        })
    }

    /// Scratch directory holding this run's spilled observations.
    pub fn scratch_dir(&self) -> &std::path::Path {
        self.dispatcher.scratch_dir()
    }

    /// Execute a goal to completion: goal achieved, turn budget exhausted,
    /// or fatal error. Never panics and never returns `Err`; every outcome
    /// is a `RunResult`.
    pub async fn execute_goal(&mut self, goal_description: &str, max_turns: Option<u32>) -> RunResult {
        let max_turns = max_turns.unwrap_or(self.config.max_turns);
        let mut state = AgentState::new(Goal::new(goal_description), max_turns);

        info!(goal = %goal_description, max_turns, "Starting agent run");

        let tools = self.registry.list();
        if tools.is_empty() {
            error!("No tools available in registry");
            return error_result(state, "No tools available in registry");
        }
        if max_turns == 0 {
            return error_result(state, "Turn budget is zero");
        }
        info!(tool_count = tools.len(), "Registry ready");

        while state.turn_count < state.max_turns && !state.is_complete {
            let turn_start = Instant::now();
            let turn_number = state.next_turn();
            info!(turn = turn_number, max_turns = state.max_turns, "Starting turn");

            // A. Reason: build the prompt and call the model.
            let messages = self.prompt_builder.build_messages(&state, &tools);
            let raw_response = match self.complete_with_retries(&messages).await {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "Oracle transport failed beyond retry budget");
                    return error_result(state, format!("LLM transport failed: {}", e));
                }
            };

            // B. Parse. Total: the worst case is a synthetic error action.
            let parsed = parser::parse_response(&raw_response);

            // C. Finish interception and the completeness gate.
            if parsed.is_finish {
                let completion_reason = parsed
                    .action
                    .reason
                    .clone()
                    .unwrap_or_else(|| "Goal completed".to_string());
                let verdict = gate::verify_goal_completeness(&state, &completion_reason);
                let duration_ms = turn_start.elapsed().as_millis() as u64;

                if verdict.is_complete {
                    let results_file = report::save_final_results(
                        &self.workspace,
                        &state,
                        &completion_reason,
                        self.dispatcher.last_full_stdout(),
                    );
                    let observation = format!(
                        "FINISH: {}\nVERIFICATION: {}\nFINAL RESULTS SAVED: {}",
                        completion_reason, verdict.message, results_file
                    );
                    state.commit_turn(TurnRecord {
                        turn: turn_number,
                        thought: parsed.thought,
                        intent: parsed.intent,
                        action: parsed.action,
                        observation,
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                    state.is_complete = true;
                    state.completion_reason = Some(completion_reason);
                    break;
                }

                warn!(message = %verdict.message, "Goal completion rejected");
                let observation = format!(
                    "INCOMPLETE GOAL: {}\nContinue working to complete all requirements.",
                    verdict.message
                );
                state.commit_turn(TurnRecord {
                    turn: turn_number,
                    thought: parsed.thought,
                    intent: parsed.intent,
                    action: parsed.action,
                    observation,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                continue;
            }

            // D. Act. Parse failures short-circuit dispatch; the message is
            // the observation so the model can self-correct next turn.
            let observation = if parsed.action.tool_name == "error" {
                let message = parsed
                    .action
                    .parameters
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unrecognized response");
                format!("ERROR: {}", message)
            } else {
                self.dispatcher.dispatch(&parsed.action).await
            };

            // E. Observe and commit.
            let tool_name = parsed.action.tool_name.clone();
            state.commit_turn(TurnRecord {
                turn: turn_number,
                thought: parsed.thought,
                intent: parsed.intent,
                action: parsed.action,
                observation,
                duration_ms: turn_start.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            });
            info!(turn = state.turn_count, tool = %tool_name, "Turn committed");
        }

        state.end_time = Some(Utc::now());
        let success = state.is_complete;
        let summary = generate_execution_summary(&state);
        let error = if success {
            None
        } else {
            Some(format!(
                "Reached maximum turns ({}) without completing goal",
                state.max_turns
            ))
        };

        info!(success, turns = state.turn_count, "Agent run finished");
        RunResult {
            success,
            state,
            summary,
            error,
        }
    }

    /// Call the oracle, retrying transport failures up to the configured
    /// budget with a short fixed backoff.
    async fn complete_with_retries(&self, messages: &[PromptMessage]) -> Result<String, OracleError> {
        let mut attempt = 0u32;
        loop {
            match self.oracle.complete_text(messages).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.config.llm_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Oracle call failed; retrying");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn error_result(mut state: AgentState, message: impl Into<String>) -> RunResult {
    let message = message.into();
    state.end_time = Some(Utc::now());
    RunResult {
        success: false,
        summary: format!("❌ Execution failed: {}", message),
        state,
        error: Some(message),
    }
}

fn generate_execution_summary(state: &AgentState) -> String {
    let mut summary = if state.is_complete {
        let mut s = format!("✅ Goal achieved in {} turns", state.turn_count);
        if let Some(reason) = &state.completion_reason {
            s.push_str(": ");
            s.push_str(reason);
        }
        s
    } else if state.turn_count >= state.max_turns {
        format!(
            "⏰ Reached maximum turns ({}) without completing goal",
            state.max_turns
        )
    } else {
        format!("❌ Execution stopped after {} turns", state.turn_count)
    };

    if !state.transcript().is_empty() {
        let actions: BTreeSet<&str> = state
            .transcript()
            .iter()
            .map(|entry| entry.action.tool_name.as_str())
            .collect();
        summary.push_str(&format!(
            "\nActions used: {}",
            actions.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::{FnTool, ToolDescriptor, ToolError};
    use crate::tools::schema::{InputSchema, ParamType};
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Deterministic oracle replaying a fixed script of responses.
    struct ScriptedOracle {
        script: Mutex<VecDeque<Result<String, ()>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedOracle {
        fn new(responses: Vec<Result<&str, ()>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(|s| s.to_string()))
                        .collect(),
                ),
                calls: Mutex::new(0),
            })
        }

        fn call_count(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl TextOracle for ScriptedOracle {
        async fn complete_text(&self, _messages: &[PromptMessage]) -> Result<String, OracleError> {
            *self.calls.lock().unwrap() += 1;
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(())) => Err(OracleError::Api("scripted transport failure".to_string())),
                None => Err(OracleError::EmptyResponse),
            }
        }
    }

    /// In-memory file store shared by the create_file/read_file fixtures.
    type FileStore = Arc<Mutex<HashMap<String, String>>>;

    fn fixture_registry(files: FileStore) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();

        let store = files.clone();
        registry.register(
            ToolDescriptor::new(
                "create_file",
                "1.0.0",
                "Creates a file with the given content.",
                InputSchema::builder()
                    .required("filename", ParamType::String, "Target filename.")
                    .required("content", ParamType::String, "File content.")
                    .build(),
            ),
            Arc::new(FnTool(move |params: Map<String, serde_json::Value>| {
                let store = store.clone();
                async move {
                    let filename = params["filename"].as_str().unwrap_or_default().to_string();
                    let content = params["content"].as_str().unwrap_or_default().to_string();
                    store.lock().unwrap().insert(filename.clone(), content);
                    Ok::<serde_json::Value, ToolError>(serde_json::Value::String(format!(
                        "Created {}",
                        filename
                    )))
                }
            })),
        );

        let store = files.clone();
        registry.register(
            ToolDescriptor::new(
                "read_file",
                "1.0.0",
                "Reads a file back.",
                InputSchema::builder()
                    .required("filename", ParamType::String, "File to read.")
                    .build(),
            ),
            Arc::new(FnTool(move |params: Map<String, serde_json::Value>| {
                let store = store.clone();
                async move {
                    let filename = params["filename"].as_str().unwrap_or_default().to_string();
                    match store.lock().unwrap().get(&filename) {
                        Some(content) => Ok(serde_json::Value::String(content.clone())),
                        None => Err(ToolError::ExecutionFailed(format!("{} does not exist", filename))),
                    }
                }
            })),
        );

        registry.register(
            ToolDescriptor::new(
                "execute_shell",
                "1.0.0",
                "Pretends to run a shell command.",
                InputSchema::builder()
                    .required("command", ParamType::String, "Command line.")
                    .build(),
            ),
            Arc::new(FnTool(|params: Map<String, serde_json::Value>| async move {
                let command = params["command"].as_str().unwrap_or_default().to_string();
                Ok::<serde_json::Value, ToolError>(json!({
                    "stdout": format!("simulated output of: {}", command),
                    "return_code": 0,
                    "success": true
                }))
            })),
        );

        registry.register(
            ToolDescriptor::new(
                "sleepy",
                "1.0.0",
                "Sleeps far past its budget.",
                InputSchema::default(),
            ),
            Arc::new(FnTool(|_p: Map<String, serde_json::Value>| async move {
                tokio::time::sleep(Duration::from_secs(200)).await;
                Ok::<serde_json::Value, ToolError>(json!("never"))
            })),
        );

        Arc::new(registry)
    }

    fn test_config(workspace: &std::path::Path) -> AgentConfig {
        AgentConfig {
            workspace_root: workspace.to_path_buf(),
            default_tool_timeout_secs: 60,
            ..AgentConfig::default()
        }
    }

    fn controller_with(
        oracle: Arc<ScriptedOracle>,
        registry: Arc<ToolRegistry>,
        workspace: &std::path::Path,
    ) -> AgentController {
        AgentController::new(registry, oracle, test_config(workspace)).unwrap()
    }

    #[tokio::test]
    async fn happy_path_create_then_read_then_finish() {
        let dir = tempdir().unwrap();
        let files: FileStore = Arc::new(Mutex::new(HashMap::new()));
        let oracle = ScriptedOracle::new(vec![
            Ok("Thought: I need to create the file first.\n\
                Intent: write_file\n\
                Action: {\"tool_name\": \"create_file\", \"parameters\": {\"filename\": \"hello.txt\", \"content\": \"Hi\"}}"),
            Ok("Thought: Now read it back to verify.\n\
                Intent: read_file\n\
                Action: {\"tool_name\": \"read_file\", \"parameters\": {\"filename\": \"hello.txt\"}}"),
            Ok("Thought: File created and verified.\n\
                Action: {\"tool_name\": \"finish\", \"reason\": \"hello.txt created with content Hi and read back\"}"),
        ]);
        let mut controller =
            controller_with(oracle.clone(), fixture_registry(files.clone()), dir.path());

        let result = controller
            .execute_goal("Create file hello.txt with content Hi and read it back.", Some(10))
            .await;

        assert!(result.success, "summary: {}", result.summary);
        assert_eq!(result.state.turn_count, 3);
        assert_eq!(result.state.transcript().len(), 3);
        assert_eq!(
            result.state.transcript().iter().map(|t| t.action.tool_name.as_str()).collect::<Vec<_>>(),
            vec!["create_file", "read_file", "finish"]
        );
        assert!(result.state.transcript()[2].observation.starts_with("FINISH:"));
        assert!(result.summary.starts_with("✅ Goal achieved in 3 turns"));
        assert!(result.summary.contains("Actions used:"));
        assert_eq!(files.lock().unwrap().get("hello.txt"), Some(&"Hi".to_string()));

        // The final results file exists in the workspace and holds the trace.
        let finish_obs = &result.state.transcript()[2].observation;
        let saved_line = finish_obs
            .lines()
            .find(|l| l.starts_with("FINAL RESULTS SAVED:"))
            .unwrap();
        let path = saved_line.trim_start_matches("FINAL RESULTS SAVED:").trim();
        let report = std::fs::read_to_string(path).unwrap();
        assert!(report.contains("--- TURN 1 ---"));
        assert!(report.contains("Goal: Create file hello.txt"));
    }

    #[tokio::test]
    async fn python_literal_response_recovers_and_dispatches() {
        let dir = tempdir().unwrap();
        let files: FileStore = Arc::new(Mutex::new(HashMap::new()));
        files.lock().unwrap().insert("a".to_string(), "alpha".to_string());

        let oracle = ScriptedOracle::new(vec![
            Ok("Thought: x\nAction: {tool_name: read_file, parameters: {filename: 'a'}}"),
            Ok("Thought: read it\nAction: {\"tool_name\": \"finish\", \"reason\": \"read file a successfully\"}"),
        ]);
        let mut controller = controller_with(oracle, fixture_registry(files), dir.path());

        let result = controller.execute_goal("Read the file named a.", Some(5)).await;

        assert!(result.success);
        let first = &result.state.transcript()[0];
        assert_eq!(first.action.tool_name, "read_file");
        assert!(first.observation.starts_with("SUCCESS (read_file):"));
        assert!(first.observation.contains("alpha"));
    }

    #[tokio::test]
    async fn unparseable_response_commits_error_turn_and_continues() {
        let dir = tempdir().unwrap();
        let files: FileStore = Arc::new(Mutex::new(HashMap::new()));
        let oracle = ScriptedOracle::new(vec![
            Ok("I am going to ramble without any structure whatsoever."),
            Ok("Thought: recovering\nAction: {\"tool_name\": \"finish\", \"reason\": \"nothing left to do here\"}"),
        ]);
        let mut controller = controller_with(oracle, fixture_registry(files), dir.path());

        let result = controller.execute_goal("Say hello politely.", Some(5)).await;

        assert!(result.success);
        assert_eq!(result.state.turn_count, 2);
        let first = &result.state.transcript()[0];
        assert_eq!(first.action.tool_name, "error");
        assert!(first.observation.starts_with("ERROR: Parse error"));
    }

    #[tokio::test]
    async fn completeness_gate_rejects_then_accepts() {
        let dir = tempdir().unwrap();
        let files: FileStore = Arc::new(Mutex::new(HashMap::new()));
        files.lock().unwrap().insert("app.log".to_string(), "ERROR boom".to_string());

        let oracle = ScriptedOracle::new(vec![
            Ok("Thought: peek at the log\n\
                Intent: read_file\n\
                Action: {\"tool_name\": \"read_file\", \"parameters\": {\"filename\": \"app.log\"}}"),
            Ok("Thought: that's enough\nAction: {\"tool_name\": \"finish\", \"reason\": \"done\"}"),
            Ok("Thought: the gate wants extraction with line numbers\n\
                Intent: search_codebase\n\
                Action: {\"tool_name\": \"execute_shell\", \"parameters\": {\"command\": \"grep -Hn ERROR app.log > errors.txt\"}}"),
            Ok("Thought: now correlate with the source\n\
                Intent: search_codebase\n\
                Action: {\"tool_name\": \"execute_shell\", \"parameters\": {\"command\": \"find . -name '*.py' -exec grep -Hn 'raise ' {} \\\\; > code_refs.txt\"}}"),
            Ok("Thought: all phases are covered now\n\
                Action: {\"tool_name\": \"finish\", \"reason\": \"correlated each ERROR in app.log to its raising site in the python sources, saved to errors.txt and code_refs.txt\"}"),
        ]);
        let mut controller = controller_with(oracle, fixture_registry(files), dir.path());

        let result = controller
            .execute_goal("search log for ERROR and map to source code", Some(10))
            .await;

        assert!(result.success, "summary: {}", result.summary);
        assert_eq!(result.state.turn_count, 5);

        let rejection = &result.state.transcript()[1];
        assert!(rejection.observation.starts_with("INCOMPLETE GOAL:"));
        // At least two distinct issues are listed.
        assert!(rejection.observation.contains("No extraction phase detected"));
        assert!(rejection.observation.contains("No correlation phase detected"));

        let finish = &result.state.transcript()[4];
        assert!(finish.observation.starts_with("FINISH:"));
        assert!(finish.observation.contains("all analysis phases detected"));
    }

    #[tokio::test(start_paused = true)]
    async fn tool_timeout_is_survivable() {
        let dir = tempdir().unwrap();
        let files: FileStore = Arc::new(Mutex::new(HashMap::new()));
        let oracle = ScriptedOracle::new(vec![
            Ok("Thought: run the slow tool\nAction: {\"tool_name\": \"sleepy\", \"parameters\": {}}"),
            Ok("Thought: give up on it\nAction: {\"tool_name\": \"finish\", \"reason\": \"the slow tool was abandoned after timing out\"}"),
        ]);
        let mut controller = controller_with(oracle, fixture_registry(files), dir.path());

        let result = controller.execute_goal("Exercise the slow tool once.", Some(5)).await;

        assert!(result.success);
        let first = &result.state.transcript()[0];
        assert!(first.observation.starts_with("ERROR (sleepy):"));
        assert!(first.observation.contains("Execution timed out"));
        assert_eq!(result.state.turn_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_exhausts_retries_then_fails_run() {
        let dir = tempdir().unwrap();
        let files: FileStore = Arc::new(Mutex::new(HashMap::new()));
        let oracle = ScriptedOracle::new(vec![Err(()), Err(()), Err(())]);
        let mut controller =
            controller_with(oracle.clone(), fixture_registry(files), dir.path());

        let result = controller.execute_goal("Anything at all.", Some(5)).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("LLM transport failed"));
        // Initial attempt plus the two-retry budget.
        assert_eq!(oracle.call_count(), 3);
        assert_eq!(result.state.turn_count, 0);
    }

    #[tokio::test]
    async fn empty_registry_is_fatal() {
        let dir = tempdir().unwrap();
        let oracle = ScriptedOracle::new(vec![]);
        let mut controller = controller_with(oracle, Arc::new(ToolRegistry::new()), dir.path());

        let result = controller.execute_goal("Do something.", Some(5)).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No tools available in registry"));
        assert!(result.summary.contains("No tools available"));
    }

    #[tokio::test]
    async fn zero_turn_budget_returns_immediately() {
        let dir = tempdir().unwrap();
        let files: FileStore = Arc::new(Mutex::new(HashMap::new()));
        let oracle = ScriptedOracle::new(vec![]);
        let mut controller = controller_with(oracle.clone(), fixture_registry(files), dir.path());

        let result = controller.execute_goal("Do something.", Some(0)).await;

        assert!(!result.success);
        assert_eq!(oracle.call_count(), 0);
        assert_eq!(result.state.turn_count, 0);
    }

    #[tokio::test]
    async fn max_turns_exhaustion_reports_budget() {
        let dir = tempdir().unwrap();
        let files: FileStore = Arc::new(Mutex::new(HashMap::new()));
        let shell_turn = "Thought: keep looking around\n\
                          Action: {\"tool_name\": \"execute_shell\", \"parameters\": {\"command\": \"ls\"}}";
        let oracle = ScriptedOracle::new(vec![Ok(shell_turn), Ok(shell_turn)]);
        let mut controller = controller_with(oracle, fixture_registry(files), dir.path());

        let result = controller.execute_goal("Wander forever.", Some(2)).await;

        assert!(!result.success);
        assert_eq!(result.state.turn_count, 2);
        assert!(result.summary.contains("Reached maximum turns (2)"));
        assert!(result.error.as_deref().unwrap().contains("maximum turns"));
    }

    #[tokio::test]
    async fn transcript_count_invariant_holds_at_every_commit() {
        let dir = tempdir().unwrap();
        let files: FileStore = Arc::new(Mutex::new(HashMap::new()));
        let oracle = ScriptedOracle::new(vec![
            Ok("garbage turn"),
            Ok("Thought: shell\nAction: {\"tool_name\": \"execute_shell\", \"parameters\": {\"command\": \"ls\"}}"),
            Ok("Thought: end\nAction: {\"tool_name\": \"finish\", \"reason\": \"walked through three very different turns\"}"),
        ]);
        let mut controller = controller_with(oracle, fixture_registry(files), dir.path());

        let result = controller.execute_goal("Mixed turn shapes.", Some(10)).await;

        assert_eq!(result.state.turn_count as usize, result.state.transcript().len());
        for (i, entry) in result.state.transcript().iter().enumerate() {
            assert_eq!(entry.turn as usize, i + 1);
        }
    }
}
