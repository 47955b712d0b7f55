//! Reasoning episode state machine and trace.
//!
//! An episode is the only place later tool arguments may come from: a
//! reference object `{"$from": {"step": N, "path": "emails.*.id"}}` inside the
//! arguments is replaced with the value selected from step N's recorded result.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{EpisodeError, ToolError};

/// Key marking an argument reference.
pub const REFERENCE_KEY: &str = "$from";

/// Characters of each observation shown to the next reasoning step.
const OBSERVATION_PREVIEW_CHARS: usize = 1500;

/// Truncate text for a trace line, collapsing whitespace.
pub fn truncate_for_preview(output: &str, max_chars: usize) -> String {
    let collapsed = output.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((byte_offset, _)) => format!("{}...", &collapsed[..byte_offset]),
        None => collapsed,
    }
}

/// State of a reasoning episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeState {
    Thinking,
    Acting,
    Observing,
    Answering,
    Failed,
}

impl EpisodeState {
    pub fn can_transition_to(&self, target: EpisodeState) -> bool {
        use EpisodeState::*;

        matches!(
            (self, target),
            (Thinking, Acting) | (Thinking, Answering) | (Thinking, Failed) |
            (Acting, Observing) | (Acting, Failed) |
            (Observing, Thinking) | (Observing, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Answering | Self::Failed)
    }
}

impl std::fmt::Display for EpisodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Thinking => "thinking",
            Self::Acting => "acting",
            Self::Observing => "observing",
            Self::Answering => "answering",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One tool call with its resolved arguments and observation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ToolInvocation {
    pub fn new(
        tool: impl Into<String>,
        arguments: Map<String, Value>,
        outcome: Result<Value, ToolError>,
    ) -> Self {
        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(e) => (None, Some(format!("{}: {}", e.label(), e))),
        };
        Self {
            tool: tool.into(),
            arguments,
            result,
            error,
            timestamp: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Observation text for the trace.
    pub fn observation(&self) -> String {
        match (&self.result, &self.error) {
            (_, Some(error)) => format!("ERROR {error}"),
            (Some(value), None) => truncate_for_preview(&value.to_string(), OBSERVATION_PREVIEW_CHARS),
            (None, None) => "(no output)".to_string(),
        }
    }
}

/// A (Thought, Action, Observation) triple. Numbered from 1.
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub number: usize,
    pub thought: String,
    pub invocation: ToolInvocation,
}

/// One user query and everything the router did for it.
#[derive(Debug)]
pub struct ReasoningEpisode {
    pub id: Uuid,
    pub query: String,
    pub state: EpisodeState,
    pub steps: Vec<Step>,
    pub answer: Option<String>,
    pub failure: Option<EpisodeError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ReasoningEpisode {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            state: EpisodeState::Thinking,
            steps: Vec::new(),
            answer: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn transition_to(&mut self, new_state: EpisodeState) -> Result<(), String> {
        if !self.state.can_transition_to(new_state) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.state, new_state
            ));
        }
        self.state = new_state;
        if new_state.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Append a completed step. Moves Acting → Observing → Thinking.
    pub fn record(&mut self, thought: String, invocation: ToolInvocation) -> Result<(), String> {
        self.transition_to(EpisodeState::Observing)?;
        let number = self.steps.len() + 1;
        self.steps.push(Step {
            number,
            thought,
            invocation,
        });
        self.transition_to(EpisodeState::Thinking)
    }

    pub fn finish(&mut self, answer: String) -> Result<(), String> {
        self.transition_to(EpisodeState::Answering)?;
        self.answer = Some(answer);
        Ok(())
    }

    /// Any non-terminal state may fail.
    pub fn fail(&mut self, error: EpisodeError) {
        if !self.state.is_terminal() {
            self.state = EpisodeState::Failed;
            self.finished_at = Some(Utc::now());
        }
        self.failure = Some(error);
    }

    /// The answer, or the structured failure.
    pub fn outcome(&self) -> Result<&str, &EpisodeError> {
        match (&self.answer, &self.failure) {
            (_, Some(error)) => Err(error),
            (Some(answer), None) => Ok(answer),
            (None, None) => Ok(""),
        }
    }

    pub fn invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.steps.iter().map(|s| &s.invocation)
    }

    /// Full trace rendered for the next reasoning step.
    pub fn trace(&self) -> String {
        self.steps
            .iter()
            .map(|step| {
                format!(
                    "Step {}\nThought: {}\nAction: {} {}\nObservation: {}",
                    step.number,
                    step.thought,
                    step.invocation.tool,
                    Value::Object(step.invocation.arguments.clone()),
                    step.invocation.observation()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Replace every `$from` reference in `arguments` with the value it selects.
    pub fn resolve_arguments(&self, arguments: &Map<String, Value>) -> Result<Map<String, Value>, String> {
        arguments
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.resolve_value(value)?)))
            .collect()
    }

    fn resolve_value(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::Object(map) => match map.get(REFERENCE_KEY) {
                Some(reference) if map.len() == 1 => self.dereference(reference),
                _ => Ok(Value::Object(self.resolve_arguments(map)?)),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn dereference(&self, reference: &Value) -> Result<Value, String> {
        let number = reference
            .get("step")
            .and_then(Value::as_u64)
            .ok_or("reference needs a numeric 'step'")? as usize;
        let path = reference.get("path").and_then(Value::as_str).unwrap_or("");

        let step = number
            .checked_sub(1)
            .and_then(|i| self.steps.get(i))
            .ok_or_else(|| format!("reference to step {number}, which has not run"))?;
        let result = step
            .invocation
            .result
            .as_ref()
            .ok_or_else(|| format!("reference to step {number}, which failed"))?;

        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        select(result, &segments).map_err(|e| format!("step {number} path '{path}': {e}"))
    }
}

/// Walk `segments` into `value`. `*` maps over a list and flattens nested maps.
fn select(value: &Value, segments: &[&str]) -> Result<Value, String> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(value.clone());
    };
    match (*head, value) {
        ("*", Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            let nested = rest.contains(&"*");
            for item in items {
                match select(item, rest)? {
                    Value::Array(inner) if nested => out.extend(inner),
                    selected => out.push(selected),
                }
            }
            Ok(Value::Array(out))
        }
        ("*", _) => Err("'*' applied to a non-list".to_string()),
        (key, Value::Object(map)) => map
            .get(key)
            .ok_or_else(|| format!("no field '{key}'"))
            .and_then(|v| select(v, rest)),
        (index, Value::Array(items)) => index
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .ok_or_else(|| format!("no element '{index}'"))
            .and_then(|v| select(v, rest)),
        (key, _) => Err(format!("cannot select '{key}' from a scalar")),
    }
}
