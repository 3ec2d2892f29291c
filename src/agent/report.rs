//! Final results file: the complete, untruncated record of a finished run,
//! persisted so nothing the agent produced is lost to context management.

use crate::models::AgentState;
use crate::workspace::Workspace;
use chrono::{Local, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tracing::{error, info};

fn stdout_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"stdout:\s*([^|]+)").unwrap())
}

/// Serialize the whole run into a results file in the workspace root.
///
/// Returns the written path, or an `ERROR: ...` string when persisting
/// failed; the caller embeds either directly into the finish observation.
pub fn save_final_results(
    workspace: &Workspace,
    state: &AgentState,
    completion_reason: &str,
    last_full_stdout: Option<&str>,
) -> String {
    let digest = Sha256::digest(state.goal.description.as_bytes());
    let goal_hash: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let filename = format!("final_result_{}_{}.txt", goal_hash, timestamp);

    let content = render(state, completion_reason, last_full_stdout);

    match workspace.write_text(&filename, &content) {
        Ok(path) => {
            info!(path = %path.display(), "Final results saved");
            path.display().to_string()
        }
        Err(e) => {
            error!(error = %e, "Failed to save final results");
            format!("ERROR: Could not save final results - {}", e)
        }
    }
}

fn render(state: &AgentState, completion_reason: &str, last_full_stdout: Option<&str>) -> String {
    let end_time = state.end_time.unwrap_or_else(Utc::now);
    let mut lines: Vec<String> = vec![
        "=".repeat(80),
        "REAGENT - FINAL RESULTS".to_string(),
        "=".repeat(80),
        format!("Goal: {}", state.goal.description),
        format!("Completion Reason: {}", completion_reason),
        format!("Turns Completed: {}", state.turn_count),
        format!(
            "Execution Time: {} - {}",
            state.start_time.format("%Y-%m-%d %H:%M:%S"),
            end_time.format("%Y-%m-%d %H:%M:%S")
        ),
        String::new(),
        format!("{} EXECUTION TRACE {}", "=".repeat(40), "=".repeat(40)),
        String::new(),
    ];

    // Full observations here, never the prompt-truncated form.
    for entry in state.transcript() {
        lines.push(format!("--- TURN {} ---", entry.turn));
        lines.push(format!("Thought: {}", entry.thought));
        lines.push(format!("Action: {}", entry.action));
        lines.push(format!("Observation: {}", entry.observation));
        lines.push(String::new());
    }

    let final_outputs = extract_final_outputs(state);
    if !final_outputs.is_empty() {
        lines.push(format!("{} FINAL OUTPUTS {}", "=".repeat(40), "=".repeat(40)));
        lines.push(String::new());
        lines.extend(final_outputs);
    }

    if let Some(stdout) = last_full_stdout {
        if stdout.chars().count() >= 100 {
            lines.push(String::new());
            lines.push(format!(
                "{} COMPLETE FINAL OUTPUT {}",
                "=".repeat(40),
                "=".repeat(40)
            ));
            lines.push("# This is the complete, untruncated output from the final command:".to_string());
            lines.push(String::new());
            lines.push(stdout.to_string());
            lines.push(String::new());
        }
    }

    lines.join("\n")
}

/// Pull significant stdout blocks out of the last three turns' SUCCESS
/// observations.
fn extract_final_outputs(state: &AgentState) -> Vec<String> {
    let transcript = state.transcript();
    let recent = if transcript.len() >= 3 {
        &transcript[transcript.len() - 3..]
    } else {
        transcript
    };

    let mut outputs = Vec::new();
    for entry in recent {
        let observation = &entry.observation;
        if !observation.contains("SUCCESS") || !observation.contains("stdout:") {
            continue;
        }
        if let Some(caps) = stdout_pattern().captures(observation) {
            let content = caps[1].trim();
            if content.chars().count() > 50 {
                outputs.push(format!(
                    "From Turn {} ({}):",
                    entry.turn, entry.action.tool_name
                ));
                outputs.push(content.to_string());
                outputs.push(String::new());
            }
        }
    }
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Goal, ParsedAction, TurnRecord};
    use chrono::Utc;
    use serde_json::Map;
    use tempfile::tempdir;

    fn turn(n: u32, tool: &str, observation: &str) -> TurnRecord {
        TurnRecord {
            turn: n,
            thought: format!("thought {}", n),
            intent: None,
            action: ParsedAction::new(tool, Map::new()),
            observation: observation.to_string(),
            duration_ms: 7,
            timestamp: Utc::now(),
        }
    }

    fn sample_state() -> AgentState {
        let mut state = AgentState::new(Goal::new("inventory the logs"), 10);
        state.commit_turn(turn(1, "execute_shell", "SUCCESS (execute_shell):\nstdout: short"));
        state.commit_turn(turn(
            2,
            "execute_shell",
            &format!(
                "SUCCESS (execute_shell):\nstdout: {}",
                "a meaningful result line of more than fifty characters total"
            ),
        ));
        state.commit_turn(turn(3, "finish", "FINISH: inventoried all logs"));
        state
    }

    #[test]
    fn report_contains_header_trace_and_outputs() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::new(dir.path()).unwrap();
        let state = sample_state();

        let long_stdout = "x".repeat(150);
        let path = save_final_results(&workspace, &state, "inventoried all logs", Some(&long_stdout));
        assert!(!path.starts_with("ERROR"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("REAGENT - FINAL RESULTS"));
        assert!(content.contains("Goal: inventory the logs"));
        assert!(content.contains("Completion Reason: inventoried all logs"));
        assert!(content.contains("Turns Completed: 3"));
        assert!(content.contains("EXECUTION TRACE"));
        assert!(content.contains("--- TURN 1 ---"));
        assert!(content.contains("--- TURN 3 ---"));
        assert!(content.contains("FINAL OUTPUTS"));
        assert!(content.contains("From Turn 2 (execute_shell):"));
        assert!(content.contains("COMPLETE FINAL OUTPUT"));
        assert!(content.contains(&long_stdout));
    }

    #[test]
    fn short_cached_stdout_is_omitted() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::new(dir.path()).unwrap();
        let state = sample_state();

        let path = save_final_results(&workspace, &state, "reason", Some("tiny"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("COMPLETE FINAL OUTPUT"));
    }

    #[test]
    fn only_significant_stdout_blocks_are_extracted() {
        let state = sample_state();
        let outputs = extract_final_outputs(&state);
        // Turn 1's stdout is under the significance threshold; turn 3 has
        // no stdout. Only turn 2 survives.
        assert_eq!(outputs.len(), 3);
        assert!(outputs[0].starts_with("From Turn 2"));
    }

    #[test]
    fn write_failure_is_reported_in_band() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::new(dir.path().join("ws")).unwrap();
        std::fs::remove_dir_all(dir.path().join("ws")).unwrap();

        let state = sample_state();
        let result = save_final_results(&workspace, &state, "reason", None);
        assert!(result.starts_with("ERROR: Could not save final results"));
    }
}
