//! # Configuration Module
//!
//! Defines structures and logic for loading and managing configuration for
//! the agent runtime. Configuration can be loaded from a JSON file, with
//! environment variables and caller-supplied overrides layered on top.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Parameters for the default HTTP text oracle.
#[derive(Deserialize, Debug, Clone)]
pub struct OracleParameters {
    /// Optional API key. Falls back to the `OPENAI_API_KEY` environment
    /// variable when absent from both config file and override.
    pub api_key: Option<String>,
    /// Model name sent to the completion endpoint.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_completion_tokens")]
    pub max_completion_tokens: u32,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_completion_tokens() -> u32 {
    4096
}

impl Default for OracleParameters {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: None,
            temperature: default_temperature(),
            max_completion_tokens: default_completion_tokens(),
        }
    }
}

/// Runtime configuration for the agent core.
///
/// Priority for loading values:
/// 1. Caller-supplied overrides (highest).
/// 2. Values from the JSON configuration file.
/// 3. Environment variables (API key only).
/// 4. Coded defaults (lowest).
#[derive(Deserialize, Debug, Clone)]
pub struct AgentConfig {
    /// Turn budget applied when `execute_goal` is not given one explicitly.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Hard ceiling on prompt size, in tokens.
    #[serde(default = "default_max_tokens_per_turn")]
    pub max_tokens_per_turn: usize,
    /// Soft threshold above which a diagnostic is logged.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: usize,
    /// Per-call tool timeout in seconds, unless the descriptor overrides it.
    #[serde(default = "default_tool_timeout_secs")]
    pub default_tool_timeout_secs: u64,
    /// How many times a failed oracle call is retried before the run aborts.
    #[serde(default = "default_llm_retries")]
    pub llm_retries: u32,
    /// Root directory all tool file operations must stay within.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    #[serde(default)]
    pub oracle: OracleParameters,
}

pub(crate) fn default_max_turns() -> u32 {
    10
}
fn default_max_tokens_per_turn() -> usize {
    8000
}
fn default_warning_threshold() -> usize {
    6000
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_llm_retries() -> u32 {
    2
}
fn default_workspace_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_tokens_per_turn: default_max_tokens_per_turn(),
            warning_threshold: default_warning_threshold(),
            default_tool_timeout_secs: default_tool_timeout_secs(),
            llm_retries: default_llm_retries(),
            workspace_root: default_workspace_root(),
            oracle: OracleParameters::default(),
        }
    }
}

impl AgentConfig {
    /// Loads configuration from a JSON file, falling back to defaults when
    /// the file does not exist.
    ///
    /// # Arguments
    /// * `config_file_path`: Path to the JSON configuration file.
    /// * `workspace_override`: Optional workspace root taking precedence
    ///   over both the file value and the current directory.
    pub fn load(config_file_path: &str, workspace_override: Option<PathBuf>) -> Result<Self> {
        let path = Path::new(config_file_path);
        let mut loaded: AgentConfig = if path.exists() {
            let config_str = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file at: {}", config_file_path))?;
            serde_json::from_str(&config_str)
                .with_context(|| format!("Failed to parse config file: {}", config_file_path))?
        } else {
            warn!(
                "Config file not found at: {}. Using default values and environment variables.",
                config_file_path
            );
            AgentConfig::default()
        };

        if let Some(root) = workspace_override {
            loaded.workspace_root = root;
        }

        // API key precedence: config file value, then environment.
        if loaded.oracle.api_key.is_none() {
            if let Ok(env_key) = std::env::var("OPENAI_API_KEY") {
                loaded.oracle.api_key = Some(env_key);
            }
        }

        if loaded.warning_threshold >= loaded.max_tokens_per_turn {
            warn!(
                warning_threshold = loaded.warning_threshold,
                max_tokens_per_turn = loaded.max_tokens_per_turn,
                "warning_threshold is not below max_tokens_per_turn; diagnostics will be noisy"
            );
        }

        Ok(loaded)
    }
}
