//! Core data model for an agent run: the goal, the actions parsed out of
//! model responses, the append-only transcript, and the final run result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The high-level user objective driving a run. Created once per run and
/// never mutated afterwards.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Goal {
    /// Unique identifier for the goal.
    pub id: Uuid,
    /// Natural-language description of what the agent should accomplish.
    pub description: String,
    /// Opaque operational constraints (budget, priority, ...). The core
    /// carries these through without interpreting them.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub constraints: Map<String, Value>,
}

impl Goal {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            constraints: Map::new(),
        }
    }

    pub fn with_constraints(
        description: impl Into<String>,
        constraints: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            constraints,
        }
    }
}

/// Closed vocabulary the model uses to classify each turn.
///
/// Intent is advisory only: the dispatcher keys off `tool_name`, never off
/// the intent label. Unknown labels are kept as raw text on the turn record.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    LintCode,
    FormatCode,
    RunTests,
    InstallDependencies,
    ParseStructuredData,
    CheckForSecrets,
    SearchCodebase,
    ReadFile,
    WriteFile,
    ListFiles,
    ProvisionTool,
    CheckToolAvailability,
    AskUser,
    ConfirmWithUser,
}

impl Intent {
    /// Every canonical intent, in the order the system prompt lists them.
    pub const ALL: [Intent; 14] = [
        Intent::LintCode,
        Intent::FormatCode,
        Intent::RunTests,
        Intent::InstallDependencies,
        Intent::ParseStructuredData,
        Intent::CheckForSecrets,
        Intent::SearchCodebase,
        Intent::ReadFile,
        Intent::WriteFile,
        Intent::ListFiles,
        Intent::ProvisionTool,
        Intent::CheckToolAvailability,
        Intent::AskUser,
        Intent::ConfirmWithUser,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::LintCode => "lint_code",
            Intent::FormatCode => "format_code",
            Intent::RunTests => "run_tests",
            Intent::InstallDependencies => "install_dependencies",
            Intent::ParseStructuredData => "parse_structured_data",
            Intent::CheckForSecrets => "check_for_secrets",
            Intent::SearchCodebase => "search_codebase",
            Intent::ReadFile => "read_file",
            Intent::WriteFile => "write_file",
            Intent::ListFiles => "list_files",
            Intent::ProvisionTool => "provision_tool",
            Intent::CheckToolAvailability => "check_tool_availability",
            Intent::AskUser => "ask_user",
            Intent::ConfirmWithUser => "confirm_with_user",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim();
        Intent::ALL
            .iter()
            .find(|i| i.as_str().eq_ignore_ascii_case(label))
            .copied()
            .ok_or(())
    }
}

/// The action extracted from one model response: a tool to call with its
/// parameters, or `finish` carrying the completion reason.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParsedAction {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ParsedAction {
    pub fn new(tool_name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
            reason: None,
        }
    }

    /// Synthetic action committed when a response could not be parsed. The
    /// message rides in the parameters so it survives serialization.
    pub fn error(message: impl Into<String>) -> Self {
        let mut parameters = Map::new();
        parameters.insert("error".to_string(), Value::String(message.into()));
        Self {
            tool_name: "error".to_string(),
            parameters,
            reason: None,
        }
    }

    pub fn is_finish(&self) -> bool {
        self.tool_name == "finish"
    }
}

impl fmt::Display for ParsedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{{\"tool_name\": \"{}\"}}", self.tool_name),
        }
    }
}

/// One committed iteration of the loop: thought, advisory intent, the action
/// taken, and the (possibly funnel-processed) observation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TurnRecord {
    /// 1-based turn number, equal to the commit order.
    pub turn: u32,
    pub thought: String,
    /// Raw intent label as the model wrote it. See [`TurnRecord::canonical_intent`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub action: ParsedAction,
    pub observation: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl TurnRecord {
    /// The intent resolved against the canonical vocabulary, if it matches.
    pub fn canonical_intent(&self) -> Option<Intent> {
        self.intent.as_deref().and_then(|s| s.parse().ok())
    }
}

/// Complete state of one agent run.
///
/// The transcript is append-only: the only mutation path is
/// [`AgentState::commit_turn`], which keeps `turn_count == transcript.len()`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentState {
    pub goal: Goal,
    transcript: Vec<TurnRecord>,
    pub turn_count: u32,
    pub max_turns: u32,
    pub is_complete: bool,
    pub completion_reason: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl AgentState {
    pub fn new(goal: Goal, max_turns: u32) -> Self {
        Self {
            goal,
            transcript: Vec::new(),
            turn_count: 0,
            max_turns,
            is_complete: false,
            completion_reason: None,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Append a committed turn. Panics in debug builds if the record's turn
    /// number does not match the commit order.
    pub fn commit_turn(&mut self, record: TurnRecord) {
        debug_assert_eq!(record.turn, self.turn_count + 1, "turn committed out of order");
        self.transcript.push(record);
        self.turn_count += 1;
    }

    pub fn transcript(&self) -> &[TurnRecord] {
        &self.transcript
    }

    /// The 1-based number of the turn currently being executed.
    pub fn next_turn(&self) -> u32 {
        self.turn_count + 1
    }

    /// Clear all history and start over with a different goal.
    pub fn reset_for_new_goal(&mut self, goal: Goal) {
        self.goal = goal;
        self.transcript.clear();
        self.turn_count = 0;
        self.is_complete = false;
        self.completion_reason = None;
        self.start_time = Utc::now();
        self.end_time = None;
    }

    /// Whether `other` is essentially the same goal as the current one.
    pub fn is_same_goal(&self, other: &str) -> bool {
        self.goal.description.trim().to_lowercase() == other.trim().to_lowercase()
    }
}

/// Final outcome of [`crate::agent::AgentController::execute_goal`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunResult {
    /// True only when the goal finished and passed the completeness gate.
    pub success: bool,
    pub state: AgentState,
    /// Human-readable one-paragraph summary of the run.
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    pub fn total_duration_ms(&self) -> i64 {
        let end = self.state.end_time.unwrap_or_else(Utc::now);
        (end - self.state.start_time).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(turn: u32) -> TurnRecord {
        TurnRecord {
            turn,
            thought: "checking the file".to_string(),
            intent: Some("read_file".to_string()),
            action: ParsedAction::new("read_file", Map::new()),
            observation: "SUCCESS (read_file): hello".to_string(),
            duration_ms: 12,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn commit_turn_keeps_count_in_sync() {
        let mut state = AgentState::new(Goal::new("test"), 5);
        assert_eq!(state.turn_count, 0);
        state.commit_turn(record(1));
        state.commit_turn(record(2));
        assert_eq!(state.turn_count, 2);
        assert_eq!(state.transcript().len(), 2);
        assert_eq!(state.transcript()[1].turn, 2);
    }

    #[test]
    fn reset_clears_history() {
        let mut state = AgentState::new(Goal::new("first"), 5);
        state.commit_turn(record(1));
        state.is_complete = true;
        state.completion_reason = Some("done".to_string());

        state.reset_for_new_goal(Goal::new("second"));
        assert_eq!(state.turn_count, 0);
        assert!(state.transcript().is_empty());
        assert!(!state.is_complete);
        assert!(state.completion_reason.is_none());
        assert!(state.is_same_goal("  SECOND "));
    }

    #[test]
    fn intent_parses_canonical_labels() {
        assert_eq!("run_tests".parse::<Intent>(), Ok(Intent::RunTests));
        assert_eq!(" Check_Tool_Availability ".parse::<Intent>(), Ok(Intent::CheckToolAvailability));
        assert!("deploy_to_prod".parse::<Intent>().is_err());
        assert_eq!(Intent::ALL.len(), 14);
    }

    #[test]
    fn error_action_carries_message() {
        let action = ParsedAction::error("Parse error: no action found");
        assert_eq!(action.tool_name, "error");
        assert_eq!(
            action.parameters.get("error"),
            Some(&json!("Parse error: no action found"))
        );
        assert!(!action.is_finish());
    }

    #[test]
    fn turn_record_round_trips_through_json() {
        let original = record(3);
        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: TurnRecord = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.turn, 3);
        assert_eq!(decoded.action, original.action);
        assert_eq!(decoded.canonical_intent(), Some(Intent::ReadFile));
    }
}
