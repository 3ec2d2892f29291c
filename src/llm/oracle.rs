//! The LLM seam: a synchronous-in-spirit, text-in / text-out oracle.
//!
//! The controller takes the oracle as an explicit dependency so tests can
//! inject a deterministic implementation; there is no process-wide client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while obtaining a completion.
#[derive(Error, Debug)]
pub enum OracleError {
    /// Error related to network requests (connection refused, timeout, ...).
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Error reported by the completion API (bad request, rate limit, ...).
    #[error("API error: {0}")]
    Api(String),
    /// The transport succeeded but the response body carried no text.
    #[error("Model returned an empty response")]
    EmptyResponse,
    /// Required API key was not provided.
    #[error("No API key provided")]
    NoApiKey,
    #[error("Other error: {0}")]
    Other(String),
}

impl OracleError {
    /// Whether the controller's retry budget applies to this error.
    /// Configuration problems never resolve by retrying.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, OracleError::NoApiKey)
    }
}

/// Role of a message sent to the oracle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// A single message in the request to the oracle.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }
}

/// Trait defining the interface to the language model.
///
/// Implementations must return the raw response text; parsing the ReAct
/// structure out of it is the controller's job, not the transport's.
#[async_trait]
pub trait TextOracle: Send + Sync {
    async fn complete_text(&self, messages: &[PromptMessage]) -> Result<String, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_api_key_is_not_retryable() {
        assert!(!OracleError::NoApiKey.is_retryable());
        assert!(OracleError::EmptyResponse.is_retryable());
        assert!(OracleError::Api("rate limited".to_string()).is_retryable());
    }

    #[test]
    fn prompt_message_serializes_lowercase_roles() {
        let msg = PromptMessage::system("do the thing");
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("\"role\":\"system\""));
    }
}
