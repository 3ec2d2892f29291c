//! The 3-layer observation funnel.
//!
//! Any tool output past the size thresholds is (1) spilled verbatim to a
//! scratch file and summarized into a receipt, (2) previewed head/tail, and
//! (3) rendered as a compact director block for the transcript. Small
//! outputs bypass the funnel entirely.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Outputs longer than this many lines engage the funnel.
pub const LARGE_OUTPUT_LINE_THRESHOLD: usize = 50;
/// Outputs longer than this many characters engage the funnel.
pub const LARGE_OUTPUT_CHAR_THRESHOLD: usize = 2000;

const PREVIEW_HEAD_LINES: usize = 10;
const PREVIEW_TAIL_LINES: usize = 5;
/// Preview lines are clipped so a funneled observation stays bounded
/// (~1.5 KB) no matter how wide the spilled payload was.
const PREVIEW_MAX_LINE_CHARS: usize = 100;

/// Tools whose JSON-array payloads get match/file counts in the receipt.
const SEARCH_TOOLS: [&str; 2] = ["content_search", "sourcegraph_search"];

/// Layer 1 receipt: metadata describing a spilled output.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ObservationSummary {
    pub total_lines: usize,
    pub total_chars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_matches: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_with_matches: Option<usize>,
    pub status_flag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_output_saved_to: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Everything the dispatcher needs to describe one funneled output.
#[derive(Debug, Clone)]
pub struct FunneledOutput {
    pub summary: ObservationSummary,
    pub preview: String,
    /// The director block embedded into the observation string.
    pub block: String,
}

/// Owns the run-scoped scratch directory and applies the funnel layers.
/// Spilled files are write-once and live for the lifetime of the run.
pub struct ObservationFunnel {
    scratch: TempDir,
}

impl ObservationFunnel {
    pub fn new() -> io::Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("reagent_observations_")
            .tempdir()?;
        info!(path = %scratch.path().display(), "Initialized observation scratch directory");
        Ok(Self { scratch })
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Whether `output` qualifies as large. Exactly-at-threshold payloads do
    /// not engage the funnel.
    pub fn is_large(output: &str) -> bool {
        line_count(output) > LARGE_OUTPUT_LINE_THRESHOLD
            || output.chars().count() > LARGE_OUTPUT_CHAR_THRESHOLD
    }

    /// Runs all three layers. Returns `None` when the output is small enough
    /// to ride in the observation directly.
    pub fn process(&self, output: &str, tool_name: &str) -> io::Result<Option<FunneledOutput>> {
        if !Self::is_large(output) {
            return Ok(None);
        }

        let saved_path = self.spill(output, tool_name)?;
        let summary = summarize(output, tool_name, Some(&saved_path));
        let preview = preview(output);
        let block = director_block(&summary, &preview);

        Ok(Some(FunneledOutput {
            summary,
            preview,
            block,
        }))
    }

    /// Layer 1: write the complete output to the scratch directory and
    /// return the file's absolute path.
    pub fn spill(&self, output: &str, tool_name: &str) -> io::Result<PathBuf> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let digest = Sha256::digest(output.as_bytes());
        let prefix8 = digest
            .iter()
            .take(4)
            .map(|b| format!("{:02x}", b))
            .collect::<String>();
        let filename = format!("{}_{}_{}.txt", tool_name, timestamp, prefix8);
        let filepath = self.scratch.path().join(filename);

        fs::write(&filepath, output)?;
        info!(
            chars = output.len(),
            path = %filepath.display(),
            "Saved large output to scratch file"
        );
        Ok(filepath)
    }
}

fn line_count(output: &str) -> usize {
    output.matches('\n').count() + 1
}

/// Layer 1 receipt construction, with match/file counts for search tools
/// returning JSON arrays.
pub fn summarize(output: &str, tool_name: &str, saved_path: Option<&Path>) -> ObservationSummary {
    let mut summary = ObservationSummary {
        total_lines: line_count(output),
        total_chars: output.chars().count(),
        total_matches: None,
        files_with_matches: None,
        status_flag: "success".to_string(),
        full_output_saved_to: saved_path.map(|p| p.display().to_string()),
        metadata: {
            let mut m = Map::new();
            m.insert("tool".to_string(), Value::String(tool_name.to_string()));
            m
        },
    };

    if SEARCH_TOOLS.contains(&tool_name) {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(output) {
            summary.total_matches = Some(items.len());
            let files: std::collections::BTreeSet<&str> = items
                .iter()
                .filter_map(|item| item.get("file").and_then(Value::as_str))
                .collect();
            summary.files_with_matches = Some(files.len());
        }
    }

    summary
}

/// Layer 2 trailer: first 10 lines, an elision marker, last 5 lines. The
/// tail is omitted for payloads of 15 lines or fewer.
pub fn preview(output: &str) -> String {
    let lines: Vec<&str> = output.split('\n').collect();
    let total_lines = lines.len();

    let clip = |line: &str| -> String {
        if line.chars().count() > PREVIEW_MAX_LINE_CHARS {
            let clipped: String = line.chars().take(PREVIEW_MAX_LINE_CHARS).collect();
            format!("{}...", clipped)
        } else {
            line.to_string()
        }
    };

    let mut parts: Vec<String> = lines
        .iter()
        .take(PREVIEW_HEAD_LINES)
        .map(|&l| clip(l))
        .collect();

    if total_lines > PREVIEW_HEAD_LINES + PREVIEW_TAIL_LINES {
        let truncated = total_lines - PREVIEW_HEAD_LINES - PREVIEW_TAIL_LINES;
        parts.push(format!("... [{} lines truncated] ...", truncated));
        parts.extend(
            lines[total_lines - PREVIEW_TAIL_LINES..]
                .iter()
                .map(|&l| clip(l)),
        );
    } else if total_lines > PREVIEW_HEAD_LINES {
        let truncated = total_lines - PREVIEW_HEAD_LINES;
        parts.push(format!("... [{} lines truncated] ...", truncated));
    }

    parts.join("\n")
}

/// Layer 3 director block. Strategic "what to do next" guidance lives in
/// the system prompt, not here.
pub fn director_block(summary: &ObservationSummary, preview: &str) -> String {
    let mut lines = vec![
        "📊 LARGE OUTPUT DETECTED:".to_string(),
        format!(
            "  - Total: {} lines, {} chars",
            summary.total_lines, summary.total_chars
        ),
    ];
    if let Some(matches) = summary.total_matches {
        lines.push(format!("  - Matches: {} results", matches));
    }
    if let Some(files) = summary.files_with_matches {
        lines.push(format!("  - Files: {} files", files));
    }
    if let Some(path) = &summary.full_output_saved_to {
        lines.push(format!("  - Full output saved to: {}", path));
    }
    lines.push(format!("  - Preview (head/tail):\n{}", preview));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn numbered_lines(n: usize) -> String {
        (0..n)
            .map(|i| format!("Result {}", i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn threshold_boundaries() {
        // Exactly 50 lines and under 2000 chars: not large.
        let at_line_limit = numbered_lines(50);
        assert!(at_line_limit.chars().count() <= LARGE_OUTPUT_CHAR_THRESHOLD);
        assert!(!ObservationFunnel::is_large(&at_line_limit));

        // 51 lines: large.
        assert!(ObservationFunnel::is_large(&numbered_lines(51)));

        // Exactly 2000 chars on one line: not large. One past: large.
        let exactly: String = "x".repeat(2000);
        assert!(!ObservationFunnel::is_large(&exactly));
        let over: String = "x".repeat(2001);
        assert!(ObservationFunnel::is_large(&over));
    }

    #[test]
    fn spill_preserves_output_byte_identical() {
        let funnel = ObservationFunnel::new().unwrap();
        let output = numbered_lines(100);
        let path = funnel.spill(&output, "execute_shell").unwrap();

        assert!(path.starts_with(funnel.scratch_dir()));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("execute_shell_"));
        assert!(name.ends_with(".txt"));
        assert_eq!(fs::read(&path).unwrap(), output.as_bytes());
    }

    #[test]
    fn small_output_bypasses_funnel() {
        let funnel = ObservationFunnel::new().unwrap();
        let result = funnel.process("Hello World\nsecond line", "test_tool").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn large_output_is_funneled() {
        let funnel = ObservationFunnel::new().unwrap();
        let output = numbered_lines(100);
        let funneled = funnel.process(&output, "execute_shell").unwrap().unwrap();

        assert_eq!(funneled.summary.total_lines, 100);
        assert_eq!(funneled.summary.total_chars, output.chars().count());
        assert!(funneled.block.contains("📊 LARGE OUTPUT DETECTED:"));
        assert!(funneled.block.contains("Total: 100 lines"));
        assert!(funneled.block.contains("Full output saved to:"));
        assert!(funneled.block.contains("Preview (head/tail):"));

        // The referenced path exists and holds the unabridged output.
        let saved = funneled.summary.full_output_saved_to.as_ref().unwrap();
        assert_eq!(fs::read_to_string(saved).unwrap(), output);
    }

    #[test]
    fn preview_has_exact_head_and_tail() {
        let output = numbered_lines(100);
        let p = preview(&output);
        let lines: Vec<&str> = p.split('\n').collect();
        assert_eq!(lines.len(), PREVIEW_HEAD_LINES + 1 + PREVIEW_TAIL_LINES);
        assert_eq!(lines[0], "Result 0");
        assert_eq!(lines[9], "Result 9");
        assert_eq!(lines[10], "... [85 lines truncated] ...");
        assert_eq!(lines[11], "Result 95");
        assert_eq!(lines[15], "Result 99");
    }

    #[test]
    fn preview_omits_tail_for_short_payloads() {
        let output = numbered_lines(14);
        let p = preview(&output);
        assert!(p.contains("... [4 lines truncated] ..."));
        assert!(!p.contains("Result 13\n")); // tail not re-emitted
    }

    #[test]
    fn funneled_observation_stays_bounded() {
        let wide_line = "z".repeat(5000);
        let output = (0..80).map(|_| wide_line.clone()).collect::<Vec<_>>().join("\n");
        let summary = summarize(&output, "execute_shell", None);
        let block = director_block(&summary, &preview(&output));
        assert!(block.chars().count() <= 2000, "block was {} chars", block.chars().count());
    }

    #[test]
    fn search_results_get_match_metadata() {
        let items: Vec<Value> = (0..120)
            .map(|i| {
                json!({
                    "file": if i % 3 == 0 { "a.py" } else { "b.py" },
                    "line": i,
                    "match": "def probe()"
                })
            })
            .collect();
        let output = serde_json::to_string_pretty(&items).unwrap();

        let summary = summarize(&output, "content_search", None);
        assert_eq!(summary.total_matches, Some(120));
        assert_eq!(summary.files_with_matches, Some(2));

        // Non-search tools skip the JSON probe.
        let summary = summarize(&output, "execute_shell", None);
        assert_eq!(summary.total_matches, None);
    }

    #[test]
    fn summary_round_trips_through_json() {
        let summary = summarize("one\ntwo", "content_search", Some(Path::new("/tmp/x.txt")));
        let encoded = serde_json::to_string(&summary).unwrap();
        let decoded: ObservationSummary = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.total_lines, 2);
        assert_eq!(decoded.full_output_saved_to.as_deref(), Some("/tmp/x.txt"));
        assert_eq!(decoded.metadata.get("tool"), Some(&json!("content_search")));
    }
}
