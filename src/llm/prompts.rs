//! Fixed prompt templates.
//!
//! Every LLM call in the crate goes through one of these variants, so the
//! set of prompts the model can ever see is closed and reviewable here.

use std::collections::BTreeMap;

use crate::error::LlmError;

/// Variables substituted into a template's `{name}` placeholders.
pub type PromptVars = BTreeMap<&'static str, String>;

/// Closed set of prompt templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptTemplate {
    /// Binary importance judgement for ambiguous emails.
    ClassifyImportance,
    /// One-phrase email summary.
    Summarize,
    /// Action item extraction as a JSON array.
    ExtractTasks,
    /// One ReAct reasoning step over the tool catalogue and trace.
    ReactStep,
}

impl PromptTemplate {
    /// Stable template id.
    pub fn id(&self) -> &'static str {
        match self {
            Self::ClassifyImportance => "classify_importance",
            Self::Summarize => "summarize",
            Self::ExtractTasks => "extract_tasks",
            Self::ReactStep => "react_step",
        }
    }

    /// Variables the user template requires.
    pub fn variables(&self) -> &'static [&'static str] {
        match self {
            Self::ClassifyImportance => &["sender", "subject", "content"],
            Self::Summarize | Self::ExtractTasks => &["content"],
            Self::ReactStep => &["tools", "query", "trace"],
        }
    }

    pub fn temperature(&self) -> f32 {
        match self {
            Self::ReactStep => 0.0,
            Self::Summarize => 0.2,
            Self::ClassifyImportance | Self::ExtractTasks => 0.0,
        }
    }

    pub fn max_tokens(&self) -> u32 {
        match self {
            Self::ClassifyImportance => 200,
            Self::Summarize => 120,
            Self::ExtractTasks => 600,
            Self::ReactStep => 800,
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::ClassifyImportance => {
                "You classify emails as important or not important for a busy professional.\n\
                 News, updates, newsletters and marketing emails are not important.\n\
                 Respond with ONLY a JSON object:\n\
                 {\"important\": true|false, \"rationale\": \"one short sentence\"}"
            }
            Self::Summarize => {
                "You summarize emails in a single concise phrase. \
                 Do not mention names or additional context. Respond with the phrase only."
            }
            Self::ExtractTasks => {
                "You extract actionable to-do items addressed to the reader of an email.\n\
                 Respond with ONLY a JSON array. Each element is\n\
                 {\"task\": \"imperative description\", \"deadline\": \"deadline as written\" | null}.\n\
                 Start each task with a verb (e.g. \"Send the report\").\n\
                 Unsubscribe links, marketing and FYI content are not tasks.\n\
                 If there is nothing to do, respond with []."
            }
            Self::ReactStep => {
                "You are an email assistant that answers requests by calling tools, one at a time.\n\
                 Each turn, respond with ONLY one JSON object, either\n\
                 {\"thought\": \"...\", \"action\": {\"tool\": \"<tool name>\", \"arguments\": {...}}}\n\
                 or, when the trace already contains what you need,\n\
                 {\"thought\": \"...\", \"answer\": \"natural-language reply to the user\"}.\n\n\
                 Rules:\n\
                 - Call exactly one tool per turn and never nest tool calls.\n\
                 - To reuse a value returned by an earlier step, do not copy it by hand. Use a reference\n\
                   object in place of the argument value: {\"$from\": {\"step\": <step number>, \"path\": \"emails.*.id\"}}.\n\
                   Paths are dot-separated keys; \"*\" maps over every element of a list.\n\
                 - If a tool reports an error, decide whether to try a different tool or answer with the failure.\n\
                 - If no tool can satisfy the request, answer saying you are unable to perform this action."
            }
        }
    }

    fn user_template(&self) -> &'static str {
        match self {
            Self::ClassifyImportance => "From: {sender}\nSubject: {subject}\n\nContent:\n{content}",
            Self::Summarize => "Summarize this email:\n\n{content}",
            Self::ExtractTasks => "Email:\n\n{content}",
            Self::ReactStep => "Available tools:\n{tools}\n\nUser request: {query}\n\nTrace so far:\n{trace}",
        }
    }

    /// Render the user message, failing on a missing variable.
    pub fn render(&self, vars: &PromptVars) -> Result<String, LlmError> {
        let mut rendered = self.user_template().to_string();
        for &variable in self.variables() {
            let value = vars.get(variable).ok_or(LlmError::MissingVariable {
                template: self.id(),
                variable,
            })?;
            rendered = rendered.replace(&format!("{{{variable}}}"), value);
        }
        Ok(rendered)
    }
}
