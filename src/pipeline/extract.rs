//! Summarizer and task extractor.
//!
//! Both are LLM pass-throughs over fixed templates. Text is sanitized and
//! length-limited first. Extraction yields tasks lazily; deadlines the model
//! leaves out are filled from the email text when a deadline phrase is present.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{LlmError, PipelineError};
use crate::llm::prompts::{PromptTemplate, PromptVars};
use crate::llm::service::{LlmService, extract_json};
use crate::pipeline::types::{Task, TaskPriority, TaskStatus};
use crate::safety::InputGuard;

static DEADLINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:by|due|before|until)\s+((?:mon|tues|wednes|thurs|fri|satur|sun)day|tomorrow|tonight|today|eod|end of (?:the )?(?:day|week|month)|next week|\d{1,2}:\d{2}|\d{1,2}/\d{1,2}(?:/\d{2,4})?)\b",
    )
    .unwrap()
});

static URGENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(urgent|asap|immediately|emergency|critical|deadline|high priority)\b")
        .unwrap()
});

/// First deadline phrase in `text`, as written (`by Friday` → `Friday`).
pub fn find_deadline(text: &str) -> Option<String> {
    DEADLINE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(alias = "description", alias = "title")]
    task: String,
    #[serde(default)]
    deadline: Option<String>,
}

/// Lazy, single-pass sequence of tasks from one extraction call.
///
/// Consuming it does not call the LLM again; a fresh call to
/// [`Extractor::extract_tasks`] re-derives the tasks.
pub struct TaskIter {
    raw: std::vec::IntoIter<RawTask>,
    email_id: String,
    fallback_deadline: Option<String>,
    priority: TaskPriority,
}

impl TaskIter {
    fn empty(email_id: &str) -> Self {
        Self {
            raw: Vec::new().into_iter(),
            email_id: email_id.to_string(),
            fallback_deadline: None,
            priority: TaskPriority::Medium,
        }
    }
}

impl Iterator for TaskIter {
    type Item = Task;

    fn next(&mut self) -> Option<Task> {
        loop {
            let raw = self.raw.next()?;
            let description = normalize_description(&raw.task);
            if description.is_empty() {
                continue;
            }
            let deadline = raw
                .deadline
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("null"))
                .or_else(|| find_deadline(&raw.task))
                .or_else(|| self.fallback_deadline.clone());
            return Some(Task {
                description,
                email_id: self.email_id.clone(),
                deadline,
                status: TaskStatus::Open,
                priority: self.priority,
            });
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.raw.len()))
    }
}

fn normalize_description(task: &str) -> String {
    let trimmed = task.trim().trim_start_matches(['-', '*', '•']).trim();
    let trimmed = trimmed.trim_end_matches('.').trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Summarize and extract tasks through the LLM service.
pub struct Extractor {
    llm: LlmService,
    guard: InputGuard,
}

impl Extractor {
    pub fn new(llm: LlmService, guard: InputGuard) -> Self {
        Self { llm, guard }
    }

    /// One-phrase summary of `text`.
    pub async fn summarize(&self, text: &str) -> Result<String, PipelineError> {
        let mut vars = PromptVars::new();
        vars.insert("content", self.guard.prepare(text)?);
        let raw = self.llm.complete(PromptTemplate::Summarize, &vars).await?;

        let summary = raw.trim().trim_matches('"').trim().to_string();
        if summary.is_empty() {
            return Err(LlmError::invalid_response(self.llm.model_name(), "empty summary").into());
        }
        Ok(summary)
    }

    /// Action items in `text`, attributed to `email_id`.
    ///
    /// No actionable items is an empty sequence, not an error.
    pub async fn extract_tasks(&self, email_id: &str, text: &str) -> Result<TaskIter, PipelineError> {
        if text.trim().is_empty() {
            return Ok(TaskIter::empty(email_id));
        }

        let prepared = self.guard.prepare(text)?;
        let mut vars = PromptVars::new();
        vars.insert("content", prepared);
        let raw = self.llm.complete(PromptTemplate::ExtractTasks, &vars).await?;
        let tasks = parse_tasks(&raw)
            .map_err(|reason| LlmError::invalid_response(self.llm.model_name(), reason))?;

        debug!(id = email_id, count = tasks.len(), "Tasks extracted");
        Ok(TaskIter {
            raw: tasks.into_iter(),
            email_id: email_id.to_string(),
            fallback_deadline: find_deadline(text),
            priority: if URGENCY.is_match(text) {
                TaskPriority::High
            } else {
                TaskPriority::Medium
            },
        })
    }
}

/// Accepts a bare array or an object wrapping it under `tasks`.
fn parse_tasks(raw: &str) -> Result<Vec<RawTask>, String> {
    let value: Value =
        serde_json::from_str(&extract_json(raw)).map_err(|e| format!("JSON parse error: {e}"))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("tasks") {
            Some(Value::Array(items)) => items,
            _ => return Err("expected a JSON array of tasks".into()),
        },
        _ => return Err("expected a JSON array of tasks".into()),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(task) => Ok(RawTask {
                task,
                deadline: None,
            }),
            other => serde_json::from_value(other).map_err(|e| format!("invalid task entry: {e}")),
        })
        .collect()
}
