//! Total parser for model responses.
//!
//! A response is expected to carry `Thought:`, an optional `Intent:`, and an
//! `Action:` JSON object. Real models drift from that contract constantly,
//! so extraction runs a ladder of strategies (balanced-brace scan, regex
//! patterns, key scraping) and each strategy returns an `Option`; the first
//! hit wins. The entry point never fails: unparseable input produces a
//! synthetic `error` action the loop can surface as an observation.

use crate::models::ParsedAction;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Structured result of parsing one raw model response.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub thought: String,
    /// Raw intent label, if the response carried one.
    pub intent: Option<String>,
    pub action: ParsedAction,
    pub is_finish: bool,
    pub raw_response: String,
}

/// Parse a raw model response. Total: any input yields a `ParsedResponse`.
pub fn parse_response(raw: &str) -> ParsedResponse {
    debug!(
        head = %raw.chars().take(200).collect::<String>(),
        "Parsing model response"
    );

    let thought = extract_thought(raw);
    let intent = extract_intent(raw);
    let action_map = extract_action_json(raw);

    let (thought, action_map) = match (thought, action_map) {
        (Some(t), Some(a)) => (t, a),
        (t, a) => {
            warn!(
                has_thought = t.is_some(),
                has_action = a.is_some(),
                "Could not extract thought and action from response"
            );
            return error_response(raw, intent, "could not extract thought and action");
        }
    };

    // Validation failure falls back to scraping the raw response so that
    // whatever fields are recoverable still survive.
    let action = build_action(&action_map).or_else(|| {
        extract_with_heuristics(raw)
            .as_ref()
            .and_then(build_action)
    });

    match action {
        Some(action) => {
            let is_finish = action.is_finish();
            ParsedResponse {
                thought,
                intent,
                action,
                is_finish,
                raw_response: raw.to_string(),
            }
        }
        None => {
            warn!("Extracted action failed validation and could not be reconstructed");
            error_response(raw, intent, "could not construct valid action from parsed data")
        }
    }
}

fn error_response(raw: &str, intent: Option<String>, message: &str) -> ParsedResponse {
    ParsedResponse {
        thought: "Failed to parse response".to_string(),
        intent,
        action: ParsedAction::error(format!("Parse error: {}", message)),
        is_finish: false,
        raw_response: raw.to_string(),
    }
}

/// Case-insensitive substring search. Needles are ASCII, so a byte-window
/// match always lands on a char boundary.
fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let ned = needle.as_bytes();
    if ned.is_empty() || from >= hay.len() {
        return None;
    }
    hay[from..]
        .windows(ned.len())
        .position(|w| w.eq_ignore_ascii_case(ned))
        .map(|i| i + from)
}

fn extract_thought(raw: &str) -> Option<String> {
    let start = find_ci(raw, "Thought:", 0)? + "Thought:".len();
    let end = [
        find_ci(raw, "Intent:", start),
        find_ci(raw, "Action:", start),
    ]
    .into_iter()
    .flatten()
    .min()
    .unwrap_or(raw.len());

    let thought = raw[start..end].trim();
    if thought.is_empty() {
        None
    } else {
        Some(thought.to_string())
    }
}

fn extract_intent(raw: &str) -> Option<String> {
    let start = find_ci(raw, "Intent:", 0)? + "Intent:".len();
    let end = find_ci(raw, "Action:", start).unwrap_or(raw.len());
    let intent = raw[start..end].trim();
    if intent.is_empty() {
        None
    } else {
        Some(intent.to_string())
    }
}

/// Runs the extraction strategies in order; first hit wins.
fn extract_action_json(raw: &str) -> Option<Map<String, Value>> {
    extract_balanced_braces(raw)
        .or_else(|| extract_with_patterns(raw))
        .or_else(|| extract_with_heuristics(raw))
}

/// Strategy 1: walk forward from the `Action:` marker counting braces.
fn extract_balanced_braces(raw: &str) -> Option<Map<String, Value>> {
    let action_pos = find_ci(raw, "Action:", 0)?;
    let brace_start = raw[action_pos..].find('{')? + action_pos;

    let mut depth = 0usize;
    let mut brace_end = None;
    for (offset, ch) in raw[brace_start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    brace_end = Some(brace_start + offset);
                    break;
                }
            }
            _ => {}
        }
    }

    let slice = &raw[brace_start..=brace_end?];
    parse_object(slice)
}

/// Strategy 2: regex patterns over the whole response.
fn extract_with_patterns(raw: &str) -> Option<Map<String, Value>> {
    static ACTION_OBJECT: OnceLock<Regex> = OnceLock::new();
    static SPLIT_PATTERN: OnceLock<Regex> = OnceLock::new();
    let action_object =
        ACTION_OBJECT.get_or_init(|| Regex::new(r"(?s)Action:\s*(\{.*?\})").unwrap());
    let split_pattern = SPLIT_PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)"tool_name":\s*"([^"]+)".*?"parameters":\s*(\{.*?\})"#).unwrap()
    });

    for caps in action_object.captures_iter(raw) {
        if let Some(map) = parse_object(&caps[1]) {
            return Some(map);
        }
    }

    if let Some(caps) = split_pattern.captures(raw) {
        if let Ok(params) = serde_json::from_str::<Value>(&caps[2]) {
            let mut map = Map::new();
            map.insert("tool_name".to_string(), Value::String(caps[1].to_string()));
            map.insert("parameters".to_string(), params);
            return Some(map);
        }
    }

    None
}

/// Strategy 3: scrape individual keys out of malformed JSON.
fn extract_with_heuristics(raw: &str) -> Option<Map<String, Value>> {
    static TOOL_NAME: OnceLock<Regex> = OnceLock::new();
    static PARAMETERS: OnceLock<Regex> = OnceLock::new();
    static REASON: OnceLock<Regex> = OnceLock::new();
    let tool_name_re =
        TOOL_NAME.get_or_init(|| Regex::new(r#""tool_name":\s*"([^"]+)""#).unwrap());
    let parameters_re =
        PARAMETERS.get_or_init(|| Regex::new(r#"(?s)"parameters":\s*(\{.*?\})"#).unwrap());
    let reason_re = REASON.get_or_init(|| Regex::new(r#""reason":\s*"([^"]*)""#).unwrap());

    let tool_name = tool_name_re.captures(raw)?.get(1)?.as_str().to_string();
    let mut result = Map::new();
    result.insert("tool_name".to_string(), Value::String(tool_name));

    if let Some(caps) = parameters_re.captures(raw) {
        let params_str = &caps[1];
        match serde_json::from_str::<Value>(params_str) {
            Ok(params) => {
                result.insert("parameters".to_string(), params);
            }
            Err(_) if params_str.contains("script_content") => {
                result.insert(
                    "parameters".to_string(),
                    Value::Object(extract_script_parameters(params_str)),
                );
            }
            Err(_) => {
                result.insert("parameters".to_string(), Value::Object(Map::new()));
            }
        }
    }

    if let Some(caps) = reason_re.captures(raw) {
        result.insert("reason".to_string(), Value::String(caps[1].to_string()));
    }

    Some(result)
}

/// Multi-line script bodies routinely break JSON escaping; recover the two
/// fields that matter and unescape the content by hand.
fn extract_script_parameters(params_str: &str) -> Map<String, Value> {
    static SCRIPT_TYPE: OnceLock<Regex> = OnceLock::new();
    let script_type_re =
        SCRIPT_TYPE.get_or_init(|| Regex::new(r#""script_type":\s*"([^"]*)""#).unwrap());

    let mut result = Map::new();

    if let Some(content) = extract_string_field(params_str, "\"script_content\":") {
        let cleaned = content.replace("\\n", "\n").replace("\\\"", "\"");
        result.insert("script_content".to_string(), Value::String(cleaned));
    }
    if let Some(caps) = script_type_re.captures(params_str) {
        result.insert("script_type".to_string(), Value::String(caps[1].to_string()));
    }

    result
}

/// Finds `key` and returns the quoted string after it, stopping at the
/// first unescaped quote that is followed by the next field or the closing
/// brace.
fn extract_string_field(text: &str, key: &str) -> Option<String> {
    let key_pos = text.find(key)?;
    let after = &text[key_pos + key.len()..];
    let open = after.find('"')?;
    let body = &after[open + 1..];

    let bytes = body.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'"' || (i > 0 && bytes[i - 1] == b'\\') {
            continue;
        }
        let rest = body[i + 1..].trim_start();
        if rest.is_empty() || rest.starts_with('}') {
            return Some(body[..i].to_string());
        }
        if let Some(after_comma) = rest.strip_prefix(',') {
            if after_comma.trim_start().starts_with('"') {
                return Some(body[..i].to_string());
            }
        }
    }
    None
}

/// Parses a brace-delimited slice as JSON, normalizing Python-literal and
/// bare-key forms when strict parsing fails.
fn parse_object(slice: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(slice) {
        return Some(map);
    }
    let normalized = normalize_literal(slice);
    match serde_json::from_str::<Value>(&normalized) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Converts Python-dict-flavored text to JSON: quoting keys, rewriting
/// `None`/`True`/`False`, and double-quoting single-quoted or bare values.
fn normalize_literal(input: &str) -> String {
    static QUOTED_KEY: OnceLock<Regex> = OnceLock::new();
    static BARE_KEY: OnceLock<Regex> = OnceLock::new();
    static PY_NONE: OnceLock<Regex> = OnceLock::new();
    static PY_TRUE: OnceLock<Regex> = OnceLock::new();
    static PY_FALSE: OnceLock<Regex> = OnceLock::new();
    static QUOTED_VALUE: OnceLock<Regex> = OnceLock::new();
    static BARE_VALUE: OnceLock<Regex> = OnceLock::new();

    let quoted_key =
        QUOTED_KEY.get_or_init(|| Regex::new(r"(?P<pre>[{,]\s*)'(?P<k>[^']*)'\s*:").unwrap());
    let bare_key = BARE_KEY
        .get_or_init(|| Regex::new(r"(?P<pre>[{,]\s*)(?P<k>[A-Za-z_][A-Za-z0-9_]*)\s*:").unwrap());
    let py_none = PY_NONE.get_or_init(|| Regex::new(r":\s*None\b").unwrap());
    let py_true = PY_TRUE.get_or_init(|| Regex::new(r":\s*True\b").unwrap());
    let py_false = PY_FALSE.get_or_init(|| Regex::new(r":\s*False\b").unwrap());
    let quoted_value =
        QUOTED_VALUE.get_or_init(|| Regex::new(r":\s*'(?P<v>[^']*)'").unwrap());
    let bare_value = BARE_VALUE
        .get_or_init(|| Regex::new(r":\s*(?P<v>[A-Za-z_][A-Za-z0-9_./\-]*)").unwrap());

    let step = quoted_key.replace_all(input, "$pre\"$k\":");
    let step = bare_key.replace_all(&step, "$pre\"$k\":");
    let step = py_none.replace_all(&step, ": null");
    let step = py_true.replace_all(&step, ": true");
    let step = py_false.replace_all(&step, ": false");
    let step = quoted_value.replace_all(&step, ": \"$v\"");
    let step = bare_value.replace_all(&step, |caps: &regex::Captures| {
        let v = &caps["v"];
        if v == "null" || v == "true" || v == "false" {
            format!(": {}", v)
        } else {
            format!(": \"{}\"", v)
        }
    });
    step.into_owned()
}

/// Schema validation plus fallback construction: `tool_name` must be a
/// non-empty string, `parameters` defaults to `{}`, `reason` is optional.
fn build_action(map: &Map<String, Value>) -> Option<ParsedAction> {
    let tool_name = map.get("tool_name")?.as_str()?.trim().to_string();
    if tool_name.is_empty() {
        return None;
    }

    let parameters = map
        .get("parameters")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let reason = map
        .get("reason")
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    Some(ParsedAction {
        tool_name,
        parameters,
        reason,
    })
}
