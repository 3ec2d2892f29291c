//! Tool descriptors, the handler trait, and the registry that holds them.
//!
//! The registry is populated at startup and treated as an immutable value
//! for the duration of a run; the controller and dispatcher share it behind
//! an `Arc` and never write through it.

use super::schema::{CompiledValidator, InputSchema};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Errors raised from inside a tool's execution logic.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Invalid arguments for tool '{tool_name}': {message}")]
    InvalidArguments { tool_name: String, message: String },
    #[error("Tool '{0}' not found")]
    NotFound(String),
    #[error("Other tool error: {0}")]
    Other(String),
}

/// The complete, static definition of a callable tool.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub version: String,
    /// Semantic description shown to the model in the tool catalog.
    pub description: String,
    pub input_schema: InputSchema,
    #[serde(default)]
    pub output_schema: Value,
    /// Per-call timeout override in seconds. Installer-style tools set this
    /// above the 60 s default, up to 120 s.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            input_schema,
            output_schema: Value::Null,
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Registry key, `name:version`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}

/// Defines the callable side of a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Executes the tool with already-validated parameters.
    async fn call(&self, params: Map<String, Value>) -> Result<Value, ToolError>;
}

/// Adapter registering a plain async closure as a tool handler.
pub struct FnTool<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, params: Map<String, Value>) -> Result<Value, ToolError> {
        (self.0)(params).await
    }
}

/// A descriptor paired with its handler and the validator compiled from its
/// schema at registration time.
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub validator: CompiledValidator,
    pub handler: Arc<dyn ToolHandler>,
}

/// In-memory registry keyed by `name:version`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, compiling its input-schema validator once. An
    /// existing entry under the same `name:version` is overwritten with a
    /// warning.
    pub fn register(&mut self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) {
        let key = descriptor.key();
        if self.tools.contains_key(&key) {
            warn!(tool = %key, "Overwriting tool already present in registry");
        }
        let validator = CompiledValidator::compile(&descriptor.input_schema);
        self.tools.insert(
            key,
            Arc::new(RegisteredTool {
                descriptor,
                validator,
                handler,
            }),
        );
    }

    /// Retrieves a tool by exact name and version.
    pub fn get(&self, name: &str, version: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.get(&format!("{}:{}", name, version)).cloned()
    }

    /// Retrieves any registered version of `name` (lowest version key wins).
    pub fn get_any(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools
            .values()
            .find(|t| t.descriptor.name == name)
            .cloned()
    }

    /// All registered tools, ordered by `name:version` key.
    pub fn list(&self) -> Vec<Arc<RegisteredTool>> {
        self.tools.values().cloned().collect()
    }

    /// The `name:version` keys, for "tool not found" messages.
    pub fn keys(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}
