//! Validated, sandboxed tool dispatch and observation formatting.
//!
//! One dispatcher instance serves one agent run: it owns the observation
//! funnel (and with it the run's scratch directory) and caches the most
//! recent full stdout for the final-results serializer.

use super::funnel::{ObservationFunnel, ObservationSummary};
use super::registry::{RegisteredTool, ToolRegistry};
use crate::models::ParsedAction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Failure,
}

/// Outcome of a single tool dispatch.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    pub duration_ms: u64,
    /// Receipt for spilled output, set by observation formatting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ObservationSummary>,
}

impl ToolResult {
    pub fn failure(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: ToolStatus::Failure,
            output: None,
            error: Some(error.into()),
            cost: None,
            duration_ms,
            summary: None,
        }
    }

    pub fn success(output: Value, duration_ms: u64) -> Self {
        Self {
            status: ToolStatus::Success,
            output: Some(output),
            error: None,
            cost: None,
            duration_ms,
            summary: None,
        }
    }
}

/// Executes parsed actions against the registry and turns the raw results
/// into observation strings for the transcript.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    funnel: ObservationFunnel,
    default_timeout: Duration,
    last_full_stdout: Option<String>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, default_timeout_secs: u64) -> io::Result<Self> {
        Ok(Self {
            registry,
            funnel: ObservationFunnel::new()?,
            default_timeout: Duration::from_secs(default_timeout_secs),
            last_full_stdout: None,
        })
    }

    /// Scratch directory holding spilled outputs for this run.
    pub fn scratch_dir(&self) -> &Path {
        self.funnel.scratch_dir()
    }

    /// Full stdout of the most recent tool that produced one.
    pub fn last_full_stdout(&self) -> Option<&str> {
        self.last_full_stdout.as_deref()
    }

    /// Execute a single action and return the formatted observation.
    ///
    /// All failure modes short of infrastructure loss are expressed in the
    /// returned string; this method never errors.
    #[instrument(skip(self, action), fields(tool_name = %action.tool_name))]
    pub async fn dispatch(&mut self, action: &ParsedAction) -> String {
        let start = Instant::now();
        let tool_name = action.tool_name.as_str();

        // The controller intercepts finish before dispatch; formatting it
        // here keeps direct callers safe.
        if action.is_finish() {
            let reason = action.reason.as_deref().unwrap_or("Goal completed");
            return format!("FINISH: {}", reason);
        }

        // Side channel: surface the raw command line for UX transparency.
        if tool_name == "execute_shell" {
            if let Some(command) = action.parameters.get("command").and_then(Value::as_str) {
                info!(target: "reagent::commands", command = %command, "💻 Command");
            }
        }

        let tool = match self.resolve(tool_name) {
            Some(tool) => tool,
            None => {
                return format!(
                    "ERROR: Tool '{}' not found. Available tools: {}",
                    tool_name,
                    self.registry.keys().join(", ")
                );
            }
        };

        let mut result = self.run_tool(&tool, action, start).await;
        info!(
            tool = %tool.descriptor.key(),
            status = ?result.status,
            duration_ms = result.duration_ms,
            "Tool execution completed"
        );

        self.format_observation(tool_name, &mut result)
    }

    fn resolve(&self, tool_name: &str) -> Option<Arc<RegisteredTool>> {
        match tool_name.split_once(':') {
            Some((name, version)) => self.registry.get(name, version),
            None => self.registry.get_any(tool_name),
        }
    }

    async fn run_tool(
        &self,
        tool: &RegisteredTool,
        action: &ParsedAction,
        start: Instant,
    ) -> ToolResult {
        let validated = match tool.validator.validate(&action.parameters) {
            Ok(validated) => validated,
            Err(e) => {
                warn!(tool = %tool.descriptor.key(), error = %e, "Parameter validation failed");
                return ToolResult::failure(e.to_string(), start.elapsed().as_millis() as u64);
            }
        };

        let timeout = tool
            .descriptor
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        match tokio::time::timeout(timeout, tool.handler.call(validated)).await {
            Ok(Ok(output)) => ToolResult::success(output, start.elapsed().as_millis() as u64),
            Ok(Err(e)) => {
                error!(tool = %tool.descriptor.key(), error = %e, "Tool execution failed");
                ToolResult::failure(e.to_string(), start.elapsed().as_millis() as u64)
            }
            Err(_) => {
                error!(
                    tool = %tool.descriptor.key(),
                    timeout_secs = timeout.as_secs(),
                    "Tool execution timed out; abandoning the call"
                );
                ToolResult::failure(
                    format!("Execution timed out after {} seconds", timeout.as_secs()),
                    start.elapsed().as_millis() as u64,
                )
            }
        }
    }

    /// Formats a tool result into an observation string, applying the
    /// 3-layer funnel to oversize outputs. Re-formatting a result whose
    /// summary is already populated reuses the existing spill file, so the
    /// mapping from result to observation is stable.
    pub fn format_observation(&mut self, tool_name: &str, result: &mut ToolResult) -> String {
        if result.status == ToolStatus::Failure {
            let mut error_msg = result.error.clone().unwrap_or_else(|| "Unknown error".to_string());

            if error_msg.contains("Missing required fields") {
                error_msg.push_str(
                    "\n\nGUIDANCE: When calling a tool, you must provide all required parameters \
                     in the 'parameters' object. Review the tool's schema and provide the missing fields.",
                );
            } else if tool_name == "execute_shell" && error_msg.to_lowercase().contains("truncated") {
                error_msg.push_str(
                    "\nSUGGESTION: Output was truncated. Try breaking the command into smaller \
                     parts or save results to files.",
                );
            }

            return format!("ERROR ({}): {}", tool_name, error_msg);
        }

        let mut observation_parts = vec![format!("SUCCESS ({}):", tool_name)];

        let mut summary_slot = result.summary.take();
        match &result.output {
            Some(Value::Object(map)) => {
                let mut key_info = Vec::new();
                for (key, value) in map {
                    match value {
                        Value::String(text) if key == "stdout" => {
                            self.last_full_stdout = Some(text.clone());
                            match self.apply_funnel(text, tool_name, &mut summary_slot) {
                                Some(block) => key_info.push(block),
                                None => key_info.push(format!("{}: {}", key, text)),
                            }
                        }
                        Value::String(text) if text.chars().count() > 200 => {
                            let head: String = text.chars().take(200).collect();
                            key_info.push(format!("{}: {}... (truncated)", key, head));
                        }
                        Value::String(text) => key_info.push(format!("{}: {}", key, text)),
                        other => key_info.push(format!("{}: {}", key, other)),
                    }
                }
                observation_parts.push(key_info.join("\n"));
            }
            Some(Value::String(text)) => {
                match self.apply_funnel(text, tool_name, &mut summary_slot) {
                    Some(block) => observation_parts.push(block),
                    None => observation_parts.push(text.clone()),
                }
            }
            Some(other) => observation_parts.push(other.to_string()),
            None => {}
        }
        result.summary = summary_slot;

        let mut metadata_parts = Vec::new();
        if result.duration_ms > 0 {
            metadata_parts.push(format!("{}ms", result.duration_ms));
        }
        if let Some(cost) = result.cost {
            metadata_parts.push(format!("${:.4}", cost));
        }
        if tool_name == "execute_shell" {
            if let Some(Value::Object(map)) = &result.output {
                if let Some(return_code) = map.get("return_code") {
                    metadata_parts.push(format!("return_code: {}", return_code));
                }
                if let Some(success) = map.get("success") {
                    metadata_parts.push(format!("success: {}", success));
                }
            }
        }
        if !metadata_parts.is_empty() {
            observation_parts.push(format!("({})", metadata_parts.join(", ")));
        }

        observation_parts.join("\n")
    }

    /// Applies the funnel to one text payload. Returns the director block
    /// for large outputs, `None` for small ones. A summary that already
    /// carries a spill path is reused rather than re-spilled.
    fn apply_funnel(
        &mut self,
        text: &str,
        tool_name: &str,
        summary_slot: &mut Option<ObservationSummary>,
    ) -> Option<String> {
        if !ObservationFunnel::is_large(text) {
            return None;
        }

        if let Some(existing) = summary_slot.as_ref() {
            if existing.full_output_saved_to.is_some() {
                let preview = super::funnel::preview(text);
                return Some(super::funnel::director_block(existing, &preview));
            }
        }

        match self.funnel.process(text, tool_name) {
            Ok(Some(funneled)) => {
                *summary_slot = Some(funneled.summary);
                Some(funneled.block)
            }
            Ok(None) => None,
            Err(e) => {
                // Spill failed; keep the loop alive with an unsaved receipt.
                warn!(error = %e, "Failed to spill large output; emitting preview without a saved path");
                let summary = super::funnel::summarize(text, tool_name, None);
                let preview = super::funnel::preview(text);
                let block = super::funnel::director_block(&summary, &preview);
                *summary_slot = Some(summary);
                Some(block)
            }
        }
    }
}
