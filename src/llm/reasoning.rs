//! Reasoning layer: one ReAct step per call.
//!
//! The model sees the tool catalogue, the user request and the full trace,
//! and replies with either a single tool action or a final answer.

use serde_json::{Map, Value};

use crate::error::LlmError;
use crate::llm::prompts::{PromptTemplate, PromptVars};
use crate::llm::service::{LlmService, extract_json};

/// Outcome of one Thinking step.
#[derive(Debug, Clone, PartialEq)]
pub enum ReasoningStep {
    /// Call one tool with the given (unresolved) arguments.
    Act {
        thought: String,
        tool: String,
        arguments: Map<String, Value>,
    },
    /// Stop and reply to the user.
    Answer { thought: String, answer: String },
}

/// Reasoning layer that wraps the LLM service.
#[derive(Clone)]
pub struct Reasoning {
    llm: LlmService,
}

impl Reasoning {
    pub fn new(llm: LlmService) -> Self {
        Self { llm }
    }

    /// Ask the model for the next step.
    pub async fn next_step(
        &self,
        tools: &str,
        query: &str,
        trace: &str,
    ) -> Result<ReasoningStep, LlmError> {
        let mut vars = PromptVars::new();
        vars.insert("tools", tools.to_string());
        vars.insert("query", query.to_string());
        vars.insert(
            "trace",
            if trace.is_empty() {
                "(no steps yet)".to_string()
            } else {
                trace.to_string()
            },
        );

        let raw = self.llm.complete(PromptTemplate::ReactStep, &vars).await?;
        parse_reasoning_step(&raw)
            .map_err(|reason| LlmError::invalid_response(self.llm.model_name(), reason))
    }
}

/// Parse a model reply into a [`ReasoningStep`].
///
/// Accepts `{"thought", "action": {"tool", "arguments"}}`, `{"thought", "answer"}`,
/// and the `{"action": "<tool>", "action_input": {...}}` shape, where an action
/// named `Final Answer` carries the answer in `action_input`.
pub fn parse_reasoning_step(raw: &str) -> Result<ReasoningStep, String> {
    let json = extract_json(raw);
    let value: Value = serde_json::from_str(&json).map_err(|e| format!("JSON parse error: {e}"))?;
    let obj = value
        .as_object()
        .ok_or_else(|| "reasoning step must be a JSON object".to_string())?;

    let thought = obj
        .get("thought")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let answer = obj.get("answer").and_then(Value::as_str);
    let action = obj.get("action");

    match (answer, action) {
        (Some(_), Some(_)) => Err("step contains both an action and an answer".into()),
        (Some(answer), None) => Ok(ReasoningStep::Answer {
            thought,
            answer: answer.to_string(),
        }),
        (None, Some(Value::Object(action))) => {
            let tool = action
                .get("tool")
                .and_then(Value::as_str)
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| "action is missing a tool name".to_string())?;
            let arguments = match action.get("arguments") {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(args)) => args.clone(),
                Some(_) => return Err("action arguments must be an object".into()),
            };
            Ok(ReasoningStep::Act {
                thought,
                tool: tool.trim().to_string(),
                arguments,
            })
        }
        (None, Some(Value::String(tool))) => {
            let input = obj.get("action_input").cloned().unwrap_or(Value::Null);
            if tool.eq_ignore_ascii_case("final answer") {
                let answer = match input {
                    Value::String(s) => s,
                    Value::Null => return Err("final answer is empty".into()),
                    other => other.to_string(),
                };
                return Ok(ReasoningStep::Answer { thought, answer });
            }
            let arguments = match input {
                Value::Object(args) => args,
                Value::Null => Map::new(),
                _ => return Err("action_input must be an object".into()),
            };
            Ok(ReasoningStep::Act {
                thought,
                tool: tool.trim().to_string(),
                arguments,
            })
        }
        (None, Some(_)) => Err("action must be an object or a tool name".into()),
        (None, None) => Err("step has neither an action nor an answer".into()),
    }
}
