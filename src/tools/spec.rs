//! Tool specifications and local argument validation.

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::ToolError;

/// Parameter types the tools accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    /// Array of strings. A single string is accepted as a one-element list.
    StringList,
}

/// One named, typed parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub required: bool,
    pub description: &'static str,
    /// Permitted values for string parameters; empty means any.
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub allowed: &'static [&'static str],
}

impl ParamSpec {
    pub fn required(name: &'static str, ty: ParamType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            required: true,
            description,
            allowed: &[],
        }
    }

    pub fn optional(name: &'static str, ty: ParamType, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty, description)
        }
    }

    pub fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }

    fn check(&self, tool: &str, value: &Value) -> Result<(), ToolError> {
        let invalid = |reason: String| ToolError::SchemaInvalid {
            name: tool.to_string(),
            reason,
        };
        match (self.ty, value) {
            (ParamType::String, Value::String(s)) => {
                if !self.allowed.is_empty() && !self.allowed.contains(&s.as_str()) {
                    return Err(invalid(format!(
                        "'{}' must be one of {:?}, got '{}'",
                        self.name, self.allowed, s
                    )));
                }
                Ok(())
            }
            (ParamType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
            (ParamType::Boolean, Value::Bool(_)) => Ok(()),
            (ParamType::StringList, Value::String(s)) if !s.trim().is_empty() => Ok(()),
            (ParamType::StringList, Value::Array(items)) => {
                if items.iter().all(Value::is_string) {
                    Ok(())
                } else {
                    Err(invalid(format!("'{}' must be a list of strings", self.name)))
                }
            }
            (ty, other) => Err(invalid(format!(
                "'{}' expects {:?}, got {}",
                self.name,
                ty,
                type_name(other)
            ))),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Static description of one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    /// Repeating the call has no effect beyond the first.
    pub idempotent: bool,
    /// The call mutates mailbox state.
    pub side_effect: bool,
}

impl ToolSpec {
    /// Validate arguments against the schema. Nulls count as absent.
    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), ToolError> {
        for key in args.keys() {
            if !self.params.iter().any(|p| p.name == key) {
                return Err(ToolError::SchemaInvalid {
                    name: self.name.to_string(),
                    reason: format!("unknown parameter '{key}'"),
                });
            }
        }
        for param in &self.params {
            match args.get(param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(ToolError::SchemaInvalid {
                        name: self.name.to_string(),
                        reason: format!("missing required parameter '{}'", param.name),
                    });
                }
                None | Some(Value::Null) => {}
                Some(value) => param.check(self.name, value)?,
            }
        }
        Ok(())
    }

    /// JSON-schema rendering of the parameters.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            let mut prop = match p.ty {
                ParamType::String => json!({"type": "string"}),
                ParamType::Integer => json!({"type": "integer"}),
                ParamType::Boolean => json!({"type": "boolean"}),
                ParamType::StringList => json!({"type": "array", "items": {"type": "string"}}),
            };
            prop["description"] = json!(p.description);
            if !p.allowed.is_empty() {
                prop["enum"] = json!(p.allowed);
            }
            properties.insert(p.name.to_string(), prop);
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();
        json!({"type": "object", "properties": properties, "required": required})
    }

    /// Catalogue entry shown to the reasoning model.
    pub fn describe(&self) -> String {
        let mut flags = Vec::new();
        if self.side_effect {
            flags.push("modifies mailbox");
        }
        if self.idempotent {
            flags.push("idempotent");
        }
        format!(
            "- {}: {}{}\n  parameters: {}",
            self.name,
            self.description,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            },
            self.parameters_schema()
        )
    }
}
