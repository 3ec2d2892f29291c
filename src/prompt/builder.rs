//! Turn-aware prompt assembly under a hard token budget.
//!
//! The skeleton order is fixed: system instructions, tool catalog, goal,
//! security boundaries, prior turns, then the prompt for the next action.
//! History is the only elastic section; it is formatted at escalating
//! truncation aggression until the whole prompt fits, and the oldest turns
//! are dropped only as a last resort.

use super::tokens::TokenCounter;
use super::truncate::{truncate_observation, Aggression};
use crate::config::AgentConfig;
use crate::llm::oracle::PromptMessage;
use crate::models::{AgentState, Intent, TurnRecord};
use crate::tools::registry::RegisteredTool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// What the truncator had to do to make one prompt fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationReport {
    pub aggression: Aggression,
    pub turns_kept: usize,
    pub turns_total: usize,
}

impl TruncationReport {
    pub fn dropped_turns(&self) -> usize {
        self.turns_total - self.turns_kept
    }
}

/// Builds the full text prompt for each turn.
pub struct PromptBuilder {
    system_prompt: String,
    workspace_root: PathBuf,
    token_counter: TokenCounter,
    max_tokens_per_turn: usize,
    warning_threshold: usize,
}

impl PromptBuilder {
    pub fn new(config: &AgentConfig) -> Self {
        Self::with_token_counter(config, TokenCounter::new())
    }

    pub fn with_token_counter(config: &AgentConfig, token_counter: TokenCounter) -> Self {
        Self {
            system_prompt: build_system_prompt(),
            workspace_root: config.workspace_root.clone(),
            token_counter,
            max_tokens_per_turn: config.max_tokens_per_turn,
            warning_threshold: config.warning_threshold,
        }
    }

    /// Builds the prompt for the next turn.
    pub fn build_prompt(&self, state: &AgentState, tools: &[Arc<RegisteredTool>]) -> String {
        self.build_prompt_with_report(state, tools).0
    }

    /// Builds the prompt and reports what truncation was applied.
    pub fn build_prompt_with_report(
        &self,
        state: &AgentState,
        tools: &[Arc<RegisteredTool>],
    ) -> (String, TruncationReport) {
        let base_prompt = self.base_prompt(state, tools);
        let (history_text, report) = self.fit_history(state.transcript(), &base_prompt);

        let mut parts = vec![base_prompt];
        if !history_text.is_empty() {
            parts.push("PREVIOUS STEPS:".to_string());
            parts.push(history_text);
            parts.push(String::new());
        }
        parts.push(format!("TURN {}:", state.next_turn()));
        parts.push("What should you do next to accomplish the goal?".to_string());
        parts.push(String::new());
        parts.push("Your response:".to_string());

        let prompt = parts.join("\n");

        let total_tokens = self.token_counter.count(&prompt);
        if total_tokens > self.warning_threshold {
            warn!(
                tokens = total_tokens,
                ceiling = self.max_tokens_per_turn,
                "Prompt size above warning threshold"
            );
        }

        (prompt, report)
    }

    /// Wraps the prompt as the single-message list the transport expects.
    pub fn build_messages(&self, state: &AgentState, tools: &[Arc<RegisteredTool>]) -> Vec<PromptMessage> {
        vec![PromptMessage::system(self.build_prompt(state, tools))]
    }

    fn base_prompt(&self, state: &AgentState, tools: &[Arc<RegisteredTool>]) -> String {
        [
            self.system_prompt.clone(),
            String::new(),
            format!("GOAL: {}", state.goal.description),
            String::new(),
            "HARD SECURITY BOUNDARIES:".to_string(),
            format!("• You are working within: {}", self.workspace_root.display()),
            "• All file operations must stay within this directory.".to_string(),
            "• Use relative paths when possible (e.g., './logs/error.log').".to_string(),
            "• CRITICAL: Any attempt to access, modify, or list files outside of this workspace \
             will result in immediate termination of the task."
                .to_string(),
            String::new(),
            "AVAILABLE TOOLS:".to_string(),
            format_tool_catalog(tools),
            String::new(),
        ]
        .join("\n")
    }

    /// Progressive thinning: try each aggression level in order, then drop
    /// the oldest turns under minimal truncation until the budget holds.
    fn fit_history(&self, transcript: &[TurnRecord], base_prompt: &str) -> (String, TruncationReport) {
        let turns_total = transcript.len();
        if transcript.is_empty() {
            return (
                String::new(),
                TruncationReport {
                    aggression: Aggression::Normal,
                    turns_kept: 0,
                    turns_total,
                },
            );
        }

        let base_tokens = self.token_counter.count(base_prompt);

        for aggression in Aggression::ALL {
            let history_text = format_history(transcript, aggression);
            let total = base_tokens + self.token_counter.count(&history_text);
            if total <= self.max_tokens_per_turn {
                if aggression > Aggression::Normal {
                    info!(?aggression, tokens = total, "Applied history truncation to fit context");
                }
                return (
                    history_text,
                    TruncationReport {
                        aggression,
                        turns_kept: turns_total,
                        turns_total,
                    },
                );
            }
        }

        // Last resort: shed oldest turns while keeping minimal truncation.
        let mut kept = transcript;
        while !kept.is_empty() {
            let history_text = format_history(kept, Aggression::Minimal);
            let total = base_tokens + self.token_counter.count(&history_text);
            if total <= self.max_tokens_per_turn {
                warn!(
                    turns_kept = kept.len(),
                    turns_total,
                    "Context management: dropped oldest turns to fit the token budget"
                );
                return (
                    history_text,
                    TruncationReport {
                        aggression: Aggression::Minimal,
                        turns_kept: kept.len(),
                        turns_total,
                    },
                );
            }
            warn!(dropped_turn = kept[0].turn, "Dropping oldest turn from prompt history");
            kept = &kept[1..];
        }

        (
            String::new(),
            TruncationReport {
                aggression: Aggression::Minimal,
                turns_kept: 0,
                turns_total,
            },
        )
    }
}

/// Formats history entries as labeled blocks separated by blank lines.
fn format_history(transcript: &[TurnRecord], aggression: Aggression) -> String {
    let mut parts = Vec::new();
    for entry in transcript {
        parts.push(format!("Turn {}:", entry.turn));
        parts.push(format!("Thought: {}", entry.thought));
        if let Some(intent) = &entry.intent {
            parts.push(format!("Intent: {}", intent));
        }
        parts.push(format!("Action: {}", entry.action));
        parts.push(format!(
            "Observation: {}",
            truncate_observation(&entry.observation, aggression)
        ));
        parts.push(String::new());
    }
    parts.join("\n")
}

/// Formats the tool catalog with required/optional parameter markers.
fn format_tool_catalog(tools: &[Arc<RegisteredTool>]) -> String {
    let mut descriptions = Vec::new();
    for tool in tools {
        let descriptor = &tool.descriptor;
        let mut params = Vec::new();
        for (name, prop) in &descriptor.input_schema.properties {
            let marker = if descriptor.input_schema.required.contains(name) {
                " (required)"
            } else {
                " (optional)"
            };
            let description = prop.description.as_deref().unwrap_or("No description");
            params.push(format!(
                "  - {} ({}){}: {}",
                name,
                prop.param_type.as_str(),
                marker,
                description
            ));
        }
        let params_block = if params.is_empty() {
            "  None".to_string()
        } else {
            params.join("\n")
        };
        descriptions.push(format!(
            "- {}:{}\n  Description: {}\n  Parameters:\n{}",
            descriptor.name, descriptor.version, descriptor.description, params_block
        ));
    }
    descriptions.join("\n")
}

fn build_system_prompt() -> String {
    let intents = Intent::ALL
        .iter()
        .map(|i| i.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let (os_name, shell_notes, grep_features) = system_context();

    format!(
        "You are an autonomous AI agent that accomplishes complex goals by reasoning step-by-step and using available tools.\n\
         \n\
         SYSTEM CONTEXT:\n\
         • Operating System: {os_name}\n\
         • Shell Limitations: {shell_notes}\n\
         • Grep Capabilities: {grep_features}\n\
         \n\
         ## INTENT-DRIVEN WORKFLOW\n\
         \n\
         Your response MUST follow this three-part format exactly:\n\
         \n\
         Thought: [Reason about your goal and formulate a plan for the immediate next action.]\n\
         Intent: [Classify your plan into a single intent from the CANONICAL INTENTS LIST below.]\n\
         Action: {{\"tool_name\": \"tool_name\", \"parameters\": {{\"param\": \"value\"}}}}\n\
         \n\
         ### EXAMPLE:\n\
         Thought: The goal is to check Python files for style errors. I'll first check if a linter like 'ruff' is already on the system before attempting to use it.\n\
         Intent: check_tool_availability\n\
         Action: {{\"tool_name\": \"check_command_exists\", \"parameters\": {{\"command_name\": \"ruff\"}}}}\n\
         \n\
         ### CANONICAL INTENTS LIST:\n\
         You MUST choose one of the following: {intents}\n\
         \n\
         RULES FOR SYSTEMATIC EXECUTION:\n\
         1. TOOL SELECTION: Use appropriate tools for tasks. Check availability first, install if missing, consult help if needed.\n\
         2. FILE DISAMBIGUATION: When multiple files exist with same name, use find to discover all, analyze context (timestamps, location, size), choose intelligently with full paths. Never prompt user - decide based on context.\n\
         3. USER INTERACTION: Confirm before risky actions (delete, overwrite, install). Prompt user when stuck after trying multiple approaches or for critical decisions.\n\
         4. When goal is complete, use: Action: {{\"tool_name\": \"finish\", \"reason\": \"explanation\"}}\n\
         5. Be systematic and verify your work before finishing.\n\
         6. NEVER include any text outside the three-part format - no analysis, explanations, or commentary.\n\
         7. If errors occur, structure your Thought as: Error Analysis (what happened), Root Cause (why), Correction Plan (next action).\n\
         \n\
         EXHAUSTIVE SEARCH STRATEGY:\n\
         For complex search/analysis tasks, use this systematic approach:\n\
         \n\
         PHASE 1 - DISCOVERY: Use find commands to locate all relevant files (e.g., find . -name \"*.log\" -type f > found_files.txt)\n\
         PHASE 2 - EXTRACTION: Extract patterns with line numbers (grep -Hn \"PATTERN\" files) and context (grep -A3 -B3), redirect large outputs to files\n\
         PHASE 3 - CORRELATION: Cross-reference findings (find . -name \"*.py\" -exec grep -Hn \"error\" {{}} \\; > code_refs.txt)\n\
         PHASE 4 - VERIFICATION: Confirm all file types searched, patterns comprehensive, correlations accurate before finishing\n\
         \n\
         When a tool reports LARGE OUTPUT DETECTED, the complete output is already saved at the path it names; read or grep that file instead of re-running the command.\n\
         \n\
         SYSTEM-SPECIFIC COMMANDS:\n\
         {command_examples}",
        os_name = os_name,
        shell_notes = shell_notes,
        grep_features = grep_features,
        intents = intents,
        command_examples = system_command_examples(os_name),
    )
}

fn system_context() -> (&'static str, &'static str, &'static str) {
    match std::env::consts::OS {
        "macos" => (
            "macos",
            "macOS grep does not support -P (Perl regex). Use basic regex or sed/awk instead.",
            "Supports: -E (extended regex), -n (line numbers), -H (filenames). No -P support.",
        ),
        "linux" => (
            "linux",
            "GNU tools available with full feature sets.",
            "Supports: -P (Perl regex), -E (extended regex), -n, -H and all GNU features.",
        ),
        _ => (
            "windows",
            "Windows environment - use PowerShell compatible commands.",
            "Limited grep. Consider using select-string in PowerShell.",
        ),
    }
}

fn system_command_examples(os_name: &str) -> &'static str {
    match os_name {
        "macos" => {
            "macOS Command Examples:\n\
             • Regex search: grep -E \"pattern1|pattern2\" file.txt\n\
             • Exception search: grep -Hn \"raise \" *.py\n\
             • Case-insensitive: grep -i \"error\" *.log\n\
             • Count matches: grep -c \"pattern\" file.txt\n\
             • Context lines: grep -A3 -B3 \"pattern\" file.txt\n\
             • AVOID: grep -P (not supported on macOS)"
        }
        "linux" => {
            "Linux Command Examples:\n\
             • Perl regex: grep -P \"(?<=raise )\\w+\" file.txt\n\
             • Extended regex: grep -E \"pattern1|pattern2\" file.txt\n\
             • All GNU features available\n\
             • Use -P for advanced regex patterns"
        }
        _ => {
            "Windows Command Examples:\n\
             • Use PowerShell select-string instead of grep\n\
             • Example: select-string \"pattern\" -path \"*.txt\""
        }
    }
}
