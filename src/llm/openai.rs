use super::oracle::{OracleError, PromptMessage, TextOracle};
use crate::config::OracleParameters;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Text-mode oracle backed by any OpenAI-compatible chat-completions
/// endpoint. Tool calling is deliberately unused: the agent speaks the
/// labeled Thought/Intent/Action format in plain text.
#[derive(Debug)]
pub struct OpenAiTextOracle {
    http_client: HttpClient,
    base_url: String,
    parameters: OracleParameters,
}

impl OpenAiTextOracle {
    #[instrument(skip(parameters))]
    pub fn new(parameters: OracleParameters) -> Result<Self, OracleError> {
        let key = parameters
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                error!("API key not provided and not found in OPENAI_API_KEY env var.");
                OracleError::NoApiKey
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| OracleError::Other(format!("Invalid API key format: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(OracleError::Network)?;

        let base_url = parameters
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Ok(Self {
            http_client,
            base_url,
            parameters,
        })
    }
}

#[async_trait]
impl TextOracle for OpenAiTextOracle {
    #[instrument(skip(self, messages), fields(model = %self.parameters.model))]
    async fn complete_text(&self, messages: &[PromptMessage]) -> Result<String, OracleError> {
        let payload = ChatRequest {
            model: &self.parameters.model,
            messages,
            temperature: self.parameters.temperature,
            max_tokens: self.parameters.max_completion_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(OracleError::Network)?;

        let status = response.status();
        debug!(status = ?status, "Received completion response status");

        if !status.is_success() {
            let error_body = response.text().await.map_err(OracleError::Network)?;
            error!(error_body = %error_body, "Completion API error");
            return Err(OracleError::Api(format!(
                "API request failed with status {}: {}",
                status, error_body
            )));
        }

        let chat_response = response.json::<ChatResponse>().await.map_err(|e| {
            error!(error = %e, "Failed to parse completion JSON response");
            if e.is_decode() {
                OracleError::Other(format!("JSON decoding error: {}", e))
            } else {
                OracleError::Network(e)
            }
        })?;

        let text = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(OracleError::EmptyResponse);
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{bearer_token, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_parameters(api_key: &str, base_url: String) -> OracleParameters {
        OracleParameters {
            api_key: Some(api_key.to_string()),
            model: "gpt-test".to_string(),
            base_url: Some(base_url),
            temperature: 0.2,
            max_completion_tokens: 512,
        }
    }

    #[tokio::test]
    async fn test_new_without_api_key_fails() {
        std::env::remove_var("OPENAI_API_KEY");
        let params = OracleParameters {
            api_key: None,
            ..OracleParameters::default()
        };
        match OpenAiTextOracle::new(params) {
            Err(OracleError::NoApiKey) => {}
            other => panic!("Expected NoApiKey error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_complete_text_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(bearer_token("test_key"))
            .and(header("Content-Type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-test123",
                "object": "chat.completion",
                "created": 1677652288,
                "model": "gpt-test",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": "Thought: ready\nAction: {\"tool_name\": \"finish\", \"reason\": \"ok\"}"
                    },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 9, "completion_tokens": 12, "total_tokens": 21 }
            })))
            .mount(&server)
            .await;

        let oracle = OpenAiTextOracle::new(test_parameters("test_key", server.uri())).unwrap();
        let text = oracle
            .complete_text(&[PromptMessage::system("prompt")])
            .await
            .unwrap();
        assert!(text.starts_with("Thought: ready"));
    }

    #[tokio::test]
    async fn test_api_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let oracle = OpenAiTextOracle::new(test_parameters("test_key", server.uri())).unwrap();
        let err = oracle
            .complete_text(&[PromptMessage::system("prompt")])
            .await
            .unwrap_err();
        match err {
            OracleError::Api(msg) => {
                assert!(msg.contains("429"));
                assert!(msg.contains("rate limited"));
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "index": 0, "message": { "role": "assistant", "content": "   " } }]
            })))
            .mount(&server)
            .await;

        let oracle = OpenAiTextOracle::new(test_parameters("test_key", server.uri())).unwrap();
        let err = oracle
            .complete_text(&[PromptMessage::system("prompt")])
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::EmptyResponse));
    }
}
