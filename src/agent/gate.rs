//! Completeness gate: a heuristic post-check run before a `finish` action
//! is accepted on analysis-flavored goals.
//!
//! The gate never blocks non-analysis goals. For the rest it looks for the
//! footprints of a real investigation (discovery, extraction, correlation,
//! saved artifacts) in the transcript and rejects with a concrete issue
//! list the model can act on. Keyword triggers are known to false-positive
//! on goals that merely contain "find"; that noise costs one turn at worst
//! and is accepted.

use crate::models::AgentState;

const ANALYSIS_KEYWORDS: [&str; 8] = [
    "search",
    "find",
    "analyze",
    "correlate",
    "map",
    "identify",
    "extract",
    "discover",
];

const SUPERFICIAL_REASONS: [&str; 5] = [
    "done",
    "complete",
    "finished",
    "found errors",
    "searched files",
];

/// Outcome of one gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    pub is_complete: bool,
    pub message: String,
}

/// Decide whether the goal is plausibly complete given the transcript.
/// Deterministic: re-running on an unchanged state yields the same outcome.
pub fn verify_goal_completeness(state: &AgentState, completion_reason: &str) -> GateOutcome {
    let goal = state.goal.description.to_lowercase();
    let completion_reason = completion_reason.to_lowercase();

    let is_analysis_goal = ANALYSIS_KEYWORDS.iter().any(|kw| goal.contains(kw));
    if !is_analysis_goal {
        return GateOutcome {
            is_complete: true,
            message: "Goal completion accepted".to_string(),
        };
    }

    let mut issues: Vec<String> = Vec::new();

    let shell_params: Vec<String> = state
        .transcript()
        .iter()
        .filter(|entry| entry.action.tool_name == "execute_shell")
        .map(|entry| {
            serde_json::to_string(&entry.action.parameters).unwrap_or_default()
        })
        .collect();
    let file_action_count = state
        .transcript()
        .iter()
        .filter(|entry| matches!(entry.action.tool_name.as_str(), "create_file" | "read_file"))
        .count();

    // Discovery phase.
    let find_commands = shell_params
        .iter()
        .filter(|p| p.to_lowercase().contains("find"))
        .count();
    if find_commands == 0 && goal.contains("find") {
        issues.push(
            "No discovery phase detected - missing 'find' commands to locate all relevant files"
                .to_string(),
        );
    }

    // Extraction phase for error analysis.
    if goal.contains("error") && goal.contains("log") {
        let grep_commands: Vec<&String> = shell_params
            .iter()
            .filter(|p| p.to_lowercase().contains("grep"))
            .collect();
        if grep_commands.is_empty() {
            issues.push(
                "No extraction phase detected - missing 'grep' commands to extract error patterns"
                    .to_string(),
            );
        } else {
            let has_line_numbers = grep_commands
                .iter()
                .any(|p| p.contains("-n") || p.contains("-H"));
            if !has_line_numbers {
                issues.push(
                    "Grep commands should include line numbers (-n or -H) for proper correlation"
                        .to_string(),
                );
            }
        }
    }

    // Correlation phase.
    if goal.contains("correlate")
        || goal.contains("map")
        || (goal.contains("source") && goal.contains("code"))
    {
        let py_searches = shell_params
            .iter()
            .filter(|p| p.contains("*.py") || p.to_lowercase().contains("python"))
            .count();
        if py_searches == 0 {
            issues.push(
                "No correlation phase detected - missing source code searches in Python files"
                    .to_string(),
            );
        }
    }

    // Intermediate artifacts for anything non-trivial.
    if shell_params.len() > 3 && file_action_count == 0 {
        issues.push(
            "Complex analysis should save intermediate results to files for verification"
                .to_string(),
        );
    }

    // Redirection usage for large search outputs.
    let redirect_commands = shell_params.iter().filter(|p| p.contains('>')).count();
    let large_output_commands = shell_params
        .iter()
        .filter(|p| {
            let lower = p.to_lowercase();
            lower.contains("grep") || lower.contains("find")
        })
        .count();
    if large_output_commands >= 2 && redirect_commands == 0 {
        issues.push(
            "Large search outputs should use shell redirection (> filename.txt) to avoid truncation"
                .to_string(),
        );
    }

    // A completion reason that is both canned and short is not evidence of
    // understanding.
    if SUPERFICIAL_REASONS.iter().any(|r| completion_reason.contains(r))
        && completion_reason.chars().count() < 50
    {
        issues.push(
            "Completion reason is too brief - should demonstrate comprehensive understanding of findings"
                .to_string(),
        );
    }

    if issues.is_empty() {
        GateOutcome {
            is_complete: true,
            message: "Goal completion verified - all analysis phases detected".to_string(),
        }
    } else {
        GateOutcome {
            is_complete: false,
            message: format!("Goal verification failed: {}", issues.join("; ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentState, Goal, ParsedAction, TurnRecord};
    use chrono::Utc;
    use serde_json::{json, Map, Value};

    fn turn(n: u32, tool: &str, params: Value) -> TurnRecord {
        TurnRecord {
            turn: n,
            thought: "t".to_string(),
            intent: None,
            action: ParsedAction::new(tool, params.as_object().cloned().unwrap_or_default()),
            observation: "SUCCESS".to_string(),
            duration_ms: 1,
            timestamp: Utc::now(),
        }
    }

    fn state_with(goal: &str, turns: Vec<TurnRecord>) -> AgentState {
        let mut state = AgentState::new(Goal::new(goal), 20);
        for t in turns {
            state.commit_turn(t);
        }
        state
    }

    #[test]
    fn non_analysis_goals_pass_unconditionally() {
        let state = state_with("create hello.txt with content Hi", vec![]);
        let outcome = verify_goal_completeness(&state, "file created");
        assert!(outcome.is_complete);
        assert_eq!(outcome.message, "Goal completion accepted");
    }

    #[test]
    fn premature_finish_on_analysis_goal_lists_multiple_issues() {
        let state = state_with(
            "search log files for ERROR entries and map them to source code",
            vec![turn(1, "read_file", json!({"filename": "app.log"}))],
        );
        let outcome = verify_goal_completeness(&state, "done");
        assert!(!outcome.is_complete);
        assert!(outcome.message.contains("No extraction phase detected"));
        assert!(outcome.message.contains("No correlation phase detected"));
        assert!(outcome.message.contains("too brief"));
    }

    #[test]
    fn grep_without_line_numbers_is_flagged() {
        let state = state_with(
            "find errors in the log files",
            vec![
                turn(1, "execute_shell", json!({"command": "find . -name '*.log' > files.txt"})),
                turn(2, "execute_shell", json!({"command": "grep ERROR app.log"})),
            ],
        );
        let outcome = verify_goal_completeness(&state, "extracted every error with full context");
        assert!(!outcome.is_complete);
        assert!(outcome.message.contains("line numbers (-n or -H)"));
    }

    #[test]
    fn thorough_run_is_verified() {
        let state = state_with(
            "search log for ERROR and correlate with source code",
            vec![
                turn(1, "execute_shell", json!({"command": "find . -name '*.log' -type f > found_files.txt"})),
                turn(2, "execute_shell", json!({"command": "grep -Hn ERROR app.log > errors.txt"})),
                turn(3, "execute_shell", json!({"command": "find . -name '*.py' -exec grep -Hn 'raise ' {} \\; > code_refs.txt"})),
                turn(4, "read_file", json!({"filename": "errors.txt"})),
            ],
        );
        let outcome = verify_goal_completeness(
            &state,
            "correlated 14 ERROR lines in app.log to raise sites in handlers.py and db.py",
        );
        assert!(outcome.is_complete, "message: {}", outcome.message);
        assert!(outcome.message.contains("all analysis phases detected"));
    }

    #[test]
    fn unredirected_search_output_is_flagged() {
        let state = state_with(
            "analyze the repository",
            vec![
                turn(1, "execute_shell", json!({"command": "grep -rn TODO src"})),
                turn(2, "execute_shell", json!({"command": "grep -rn FIXME src"})),
                turn(3, "read_file", json!({"filename": "src/lib.rs"})),
            ],
        );
        let outcome =
            verify_goal_completeness(&state, "catalogued every TODO and FIXME with file context");
        assert!(!outcome.is_complete);
        assert!(outcome.message.contains("shell redirection"));
    }

    #[test]
    fn gate_is_deterministic_on_unchanged_state() {
        let state = state_with("find the slow query", vec![]);
        let first = verify_goal_completeness(&state, "done");
        let second = verify_goal_completeness(&state, "done");
        assert_eq!(first, second);
    }
}
