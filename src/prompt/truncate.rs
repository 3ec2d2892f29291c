//! Observation truncation with progressive aggression.
//!
//! Three levels trade context fidelity for room: line counts, per-line
//! character budgets, and whether a middle sample is kept all shrink as the
//! level rises. Lines that look like file listings go through a
//! path-preserving truncator, and observations carrying the host UI's bold
//! section markers are never trimmed at all.

use regex::Regex;
use std::sync::OnceLock;

/// How hard the truncator squeezes one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Aggression {
    Normal,
    Aggressive,
    Minimal,
}

impl Aggression {
    /// All levels, mildest first; the prompt builder tries them in order.
    pub const ALL: [Aggression; 3] = [Aggression::Normal, Aggression::Aggressive, Aggression::Minimal];

    fn limits(&self) -> Limits {
        match self {
            Aggression::Normal => Limits {
                max_lines: 20,
                sample_lines: 3,
                max_line_chars: 100,
                keep_middle: true,
            },
            Aggression::Aggressive => Limits {
                max_lines: 10,
                sample_lines: 2,
                max_line_chars: 80,
                keep_middle: true,
            },
            Aggression::Minimal => Limits {
                max_lines: 6,
                sample_lines: 1,
                max_line_chars: 60,
                keep_middle: false,
            },
        }
    }
}

struct Limits {
    max_lines: usize,
    sample_lines: usize,
    max_line_chars: usize,
    keep_middle: bool,
}

/// Bold section labels the host UI renders specially. Observations carrying
/// any of these are passed through untouched.
const UI_SECTION_MARKERS: [&str; 6] = [
    "**New Facts:**",
    "**Hypothesis:**",
    "**Progress Check:**",
    "**Thought:**",
    "**Executing Action:**",
    "**Observation:**",
];

/// Substrings suggesting the line names files and should keep its path.
const FILE_PATH_INDICATORS: [&str; 16] = [
    "• ", "- ", "file:", "path:", ".py", ".js", ".ts", ".json", ".csv", ".txt", ".md", "/", "\\",
    "Files found:", "Found in:", "matches in",
];

fn bullet_path_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[•\-]\s+(\S+\.[A-Za-z0-9]+)").unwrap())
}

fn bare_path_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([A-Za-z0-9_/\\.\-]+\.[A-Za-z0-9]+)").unwrap())
}

/// Truncate one observation at the given aggression level.
pub fn truncate_observation(observation: &str, aggression: Aggression) -> String {
    if observation.trim().is_empty() {
        return observation.to_string();
    }

    if UI_SECTION_MARKERS.iter().any(|m| observation.contains(m)) {
        return observation.to_string();
    }

    let limits = aggression.limits();
    let lines: Vec<String> = observation
        .split('\n')
        .map(|line| truncate_line(line, limits.max_line_chars))
        .collect();

    if lines.len() <= limits.max_lines {
        return lines.join("\n");
    }

    let total = lines.len();
    let sample = limits.sample_lines;
    let mut truncated: Vec<String> = lines[..sample].to_vec();

    if limits.keep_middle {
        let middle_start = (total / 2).saturating_sub(sample / 2);
        let middle: Vec<String> = lines[middle_start..middle_start + sample].to_vec();
        let omitted = total - 2 * sample - middle.len();
        truncated.push(format!("... [{} lines omitted] ...", omitted));
        truncated.extend(middle);
        truncated.push(format!("... [showing last {} lines] ...", sample));
        truncated.extend(lines[total - sample..].to_vec());
    } else {
        truncated.push(format!("... [{} lines omitted] ...", total - 2 * sample));
        truncated.extend(lines[total - sample..].to_vec());
    }

    truncated.join("\n")
}

/// Line truncation that tries to keep a complete path token before falling
/// back to an ordinary clip.
pub fn truncate_line(line: &str, max_chars: usize) -> String {
    if line.chars().count() <= max_chars {
        return line.to_string();
    }

    let is_file_line = FILE_PATH_INDICATORS.iter().any(|ind| line.contains(ind));
    if is_file_line {
        let captured = bullet_path_pattern()
            .captures(line)
            .or_else(|| bare_path_pattern().captures(line))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        if let Some(path) = captured {
            // Only preserve the path when it actually fits the budget.
            if path.chars().count() + 10 <= max_chars {
                if line.contains("• ") {
                    return format!("• {}", path);
                }
                if line.contains("- ") {
                    return format!("- {}", path);
                }
                let prefix: String = line.chars().take(20).collect();
                if prefix.chars().count() + path.chars().count() + 3 <= max_chars {
                    return format!("{}...{}", prefix, path);
                }
                return path;
            }
        }
    }

    let clipped: String = line.chars().take(max_chars).collect();
    format!("{}...", clipped)
}
