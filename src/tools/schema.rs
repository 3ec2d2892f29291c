//! Tool input schemas and the validators compiled from them.
//!
//! A descriptor's schema is walked exactly once, at registration time; each
//! dispatch then runs the precompiled per-field checks instead of rebuilding
//! a validator from the schema on every call.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The exact "Missing required fields" phrasing is load-bearing: the
    /// dispatcher keys its guidance hint off it.
    #[error("Missing required fields: {0:?}")]
    MissingRequired(Vec<String>),
    #[error("Parameter '{field}' has wrong type: expected {expected}, got {got}")]
    WrongType {
        field: String,
        expected: &'static str,
        got: String,
    },
}

/// JSON-schema primitive types the validator understands.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// Schema for a single tool parameter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PropertySchema {
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl PropertySchema {
    pub fn typed(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            description: Some(description.into()),
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// JSON-schema-like description of a tool's input object. Property order is
/// kept stable (BTreeMap) so prompt rendering is deterministic.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct InputSchema {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl InputSchema {
    pub fn builder() -> InputSchemaBuilder {
        InputSchemaBuilder::default()
    }
}

#[derive(Default)]
pub struct InputSchemaBuilder {
    schema: InputSchema,
}

impl InputSchemaBuilder {
    pub fn required(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        let name = name.into();
        self.schema
            .properties
            .insert(name.clone(), PropertySchema::typed(param_type, description));
        self.schema.required.push(name);
        self
    }

    pub fn optional(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.schema
            .properties
            .insert(name.into(), PropertySchema::typed(param_type, description));
        self
    }

    pub fn optional_with_default(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        default: Value,
    ) -> Self {
        self.schema.properties.insert(
            name.into(),
            PropertySchema::typed(param_type, description).with_default(default),
        );
        self
    }

    pub fn build(self) -> InputSchema {
        self.schema
    }
}

struct FieldCheck {
    name: String,
    param_type: ParamType,
    default: Option<Value>,
}

/// Per-descriptor validator produced by [`CompiledValidator::compile`].
pub struct CompiledValidator {
    checks: Vec<FieldCheck>,
    required: Vec<String>,
}

impl CompiledValidator {
    pub fn compile(schema: &InputSchema) -> Self {
        let checks = schema
            .properties
            .iter()
            .map(|(name, prop)| FieldCheck {
                name: name.clone(),
                param_type: prop.param_type,
                default: prop.default.clone(),
            })
            .collect();
        Self {
            checks,
            required: schema.required.clone(),
        }
    }

    /// Checks required presence, coerces value types, and fills schema
    /// defaults. Parameters not named by the schema are dropped.
    pub fn validate(&self, params: &Map<String, Value>) -> Result<Map<String, Value>, ValidationError> {
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|name| !params.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingRequired(missing));
        }

        let mut validated = Map::new();
        for check in &self.checks {
            match params.get(&check.name) {
                Some(value) => {
                    let coerced = coerce(value, check.param_type).ok_or_else(|| {
                        ValidationError::WrongType {
                            field: check.name.clone(),
                            expected: check.param_type.as_str(),
                            got: json_type_name(value).to_string(),
                        }
                    })?;
                    validated.insert(check.name.clone(), coerced);
                }
                None => {
                    if let Some(default) = &check.default {
                        validated.insert(check.name.clone(), default.clone());
                    }
                }
            }
        }

        for extra in params.keys().filter(|k| !validated.contains_key(k.as_str())) {
            if !self.checks.iter().any(|c| &c.name == extra) {
                debug!(parameter = %extra, "Dropping parameter not present in tool schema");
            }
        }

        Ok(validated)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn coerce(value: &Value, target: ParamType) -> Option<Value> {
    match target {
        ParamType::String => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        ParamType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
            Value::Number(n) => {
                let f = n.as_f64()?;
                if f.fract() == 0.0 {
                    Some(Value::from(f as i64))
                } else {
                    None
                }
            }
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        ParamType::Number => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
            _ => None,
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        ParamType::Array => matches!(value, Value::Array(_)).then(|| value.clone()),
        ParamType::Object => matches!(value, Value::Object(_)).then(|| value.clone()),
    }
}
