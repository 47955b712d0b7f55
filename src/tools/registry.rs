//! Tool registry: the closed catalogue the reasoning model can call.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::ops::MailOperations;
use crate::pipeline::actions::LabelChange;
use crate::tools::call::{ItemError, ToolCall, ToolKind, ToolOutput};
use crate::tools::spec::ToolSpec;

/// Registry of available tools.
///
/// The tool set is fixed at construction; every tool dispatches onto the same
/// [`MailOperations`] the pipeline uses.
pub struct ToolRegistry {
    ops: Arc<MailOperations>,
    tools: BTreeMap<&'static str, (ToolKind, ToolSpec)>,
}

impl ToolRegistry {
    pub fn new(ops: Arc<MailOperations>) -> Self {
        let tools = ToolKind::ALL
            .into_iter()
            .map(|kind| (kind.name(), (kind, kind.spec())))
            .collect();
        Self { ops, tools }
    }

    /// Get a tool spec by name.
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|(_, spec)| spec)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool names, sorted.
    pub fn list(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.values().map(|(_, spec)| spec)
    }

    /// Tool catalogue for the reasoning prompt.
    pub fn describe(&self) -> String {
        self.specs()
            .map(ToolSpec::describe)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Look up, validate and type a call. Never touches the mailbox.
    pub fn resolve(&self, name: &str, args: &Map<String, Value>) -> Result<ToolCall, ToolError> {
        let (kind, spec) = self.tools.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;
        spec.validate(args)?;
        ToolCall::parse(*kind, args)
    }

    /// Resolve and execute in one step.
    pub async fn invoke(&self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let call = self.resolve(name, args)?;
        Ok(self.execute(call).await?.to_value())
    }

    /// Execute a typed call against the mail operations.
    pub async fn execute(&self, call: ToolCall) -> Result<ToolOutput, ToolError> {
        let name = call.kind().name();
        let failed = |e: &dyn std::fmt::Display| ToolError::ExecutionFailed {
            name: name.to_string(),
            reason: e.to_string(),
        };
        debug!(tool = name, "Executing tool");

        match call {
            ToolCall::FetchEmails { query, count } => {
                let emails = self.ops.fetch(&query, count).await.map_err(|e| failed(&e))?;
                Ok(ToolOutput::emails(&emails))
            }
            ToolCall::ClassifyEmail { email_id } => self
                .ops
                .classify(&email_id)
                .await
                .map(ToolOutput::Classification)
                .map_err(|e| failed(&e)),
            ToolCall::SummarizeEmail { email_id } => {
                let summary = self.ops.summarize(&email_id).await.map_err(|e| failed(&e))?;
                Ok(ToolOutput::Summary { email_id, summary })
            }
            ToolCall::ExtractTasks { email_id } => {
                let tasks = self
                    .ops
                    .extract_tasks(&email_id)
                    .await
                    .map_err(|e| failed(&e))?;
                Ok(ToolOutput::Tasks { email_id, tasks })
            }
            ToolCall::ApplyLabelChange {
                email_ids,
                add,
                remove,
            } => {
                let mut results = Vec::new();
                let mut errors = Vec::new();
                for id in email_ids {
                    match self.ops.apply_label_change(&id, &add, &remove).await {
                        Ok(change) => results.push(change),
                        Err(e) => errors.push(ItemError {
                            email_id: id,
                            error: e.to_string(),
                        }),
                    }
                }
                changes(name, results, errors)
            }
            ToolCall::ManageEmail { email_ids, action } => {
                let mut results = Vec::new();
                let mut errors = Vec::new();
                for id in email_ids {
                    match self.ops.manage(&id, action).await {
                        Ok(change) => results.push(change),
                        Err(e) => errors.push(ItemError {
                            email_id: id,
                            error: e.to_string(),
                        }),
                    }
                }
                changes(name, results, errors)
            }
        }
    }
}

/// Partial success is reported per item; a total failure is an error.
fn changes(
    name: &str,
    results: Vec<LabelChange>,
    errors: Vec<ItemError>,
) -> Result<ToolOutput, ToolError> {
    if results.is_empty() && !errors.is_empty() {
        let reason = errors
            .iter()
            .map(|e| format!("{}: {}", e.email_id, e.error))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ToolError::ExecutionFailed {
            name: name.to_string(),
            reason,
        });
    }
    if !errors.is_empty() {
        warn!(tool = name, failed = errors.len(), "Label change partially failed");
    }
    Ok(ToolOutput::Changes { results, errors })
}
