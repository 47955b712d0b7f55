//! The closed set of tools and their typed calls.
//!
//! Arguments arrive as a JSON object from the reasoning model. After schema
//! validation they are parsed into a [`ToolCall`], so execution never touches
//! untyped arguments.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ToolError;
use crate::pipeline::actions::{LabelChange, MailboxAction};
use crate::pipeline::types::{ClassificationResult, Email, Task};
use crate::tools::spec::{ParamSpec, ParamType, ToolSpec};

/// Characters of body text included in a fetched email's snippet.
const SNIPPET_CHARS: usize = 200;

/// Every tool the registry exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    FetchEmails,
    ClassifyEmail,
    SummarizeEmail,
    ExtractTasks,
    ApplyLabelChange,
    ManageEmail,
}

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        Self::FetchEmails,
        Self::ClassifyEmail,
        Self::SummarizeEmail,
        Self::ExtractTasks,
        Self::ApplyLabelChange,
        Self::ManageEmail,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchEmails => "fetch_emails",
            Self::ClassifyEmail => "classify_email",
            Self::SummarizeEmail => "summarize_email",
            Self::ExtractTasks => "extract_tasks",
            Self::ApplyLabelChange => "apply_label_change",
            Self::ManageEmail => "manage_email",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn spec(&self) -> ToolSpec {
        let email_id = || ParamSpec::required("email_id", ParamType::String, "Id of the email");
        let email_ids = || {
            ParamSpec::required(
                "email_ids",
                ParamType::StringList,
                "Ids of the emails to change",
            )
        };
        let (description, params, idempotent, side_effect) = match self {
            Self::FetchEmails => (
                "Search the mailbox and return matching emails, newest first. Query syntax: \
                 from:, subject:, label:, is:unread, has:attachment, newer_than:2d, free text.",
                vec![
                    ParamSpec::optional("query", ParamType::String, "Search criteria"),
                    ParamSpec::optional("count", ParamType::Integer, "Max results (1-50, default 10)"),
                ],
                true,
                false,
            ),
            Self::ClassifyEmail => (
                "Decide whether an email is important, with score and rationale.",
                vec![email_id()],
                true,
                false,
            ),
            Self::SummarizeEmail => (
                "Summarize an email in one or two sentences.",
                vec![email_id()],
                true,
                false,
            ),
            Self::ExtractTasks => (
                "Extract actionable tasks and deadlines from an email.",
                vec![email_id()],
                true,
                false,
            ),
            Self::ApplyLabelChange => (
                "Add and/or remove labels on one or more emails.",
                vec![
                    email_ids(),
                    ParamSpec::optional("add", ParamType::StringList, "Labels to add"),
                    ParamSpec::optional("remove", ParamType::StringList, "Labels to remove"),
                ],
                true,
                true,
            ),
            Self::ManageEmail => (
                "Apply a mailbox action (trash, archive, mark_read, mark_unread, spam).",
                vec![
                    email_ids(),
                    ParamSpec::required("action", ParamType::String, "Action to apply")
                        .one_of(&MailboxAction::ALL),
                ],
                true,
                true,
            ),
        };
        ToolSpec {
            name: self.name(),
            description,
            params,
            idempotent,
            side_effect,
        }
    }
}

/// A validated, typed tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    FetchEmails {
        query: String,
        count: Option<usize>,
    },
    ClassifyEmail {
        email_id: String,
    },
    SummarizeEmail {
        email_id: String,
    },
    ExtractTasks {
        email_id: String,
    },
    ApplyLabelChange {
        email_ids: Vec<String>,
        add: Vec<String>,
        remove: Vec<String>,
    },
    ManageEmail {
        email_ids: Vec<String>,
        action: MailboxAction,
    },
}

impl ToolCall {
    /// Build a typed call from arguments that already passed `ToolSpec::validate`.
    pub fn parse(kind: ToolKind, args: &Map<String, Value>) -> Result<Self, ToolError> {
        let invalid = |reason: String| ToolError::SchemaInvalid {
            name: kind.name().to_string(),
            reason,
        };
        let call = match kind {
            ToolKind::FetchEmails => Self::FetchEmails {
                query: opt_str(args, "query").unwrap_or_default(),
                count: match args.get("count").and_then(Value::as_i64) {
                    Some(n) if n < 0 => return Err(invalid("'count' must not be negative".into())),
                    Some(n) => Some(n as usize),
                    None => None,
                },
            },
            ToolKind::ClassifyEmail => Self::ClassifyEmail {
                email_id: req_str(args, "email_id").ok_or_else(|| invalid("empty 'email_id'".into()))?,
            },
            ToolKind::SummarizeEmail => Self::SummarizeEmail {
                email_id: req_str(args, "email_id").ok_or_else(|| invalid("empty 'email_id'".into()))?,
            },
            ToolKind::ExtractTasks => Self::ExtractTasks {
                email_id: req_str(args, "email_id").ok_or_else(|| invalid("empty 'email_id'".into()))?,
            },
            ToolKind::ApplyLabelChange => {
                let add = str_list(args, "add");
                let remove = str_list(args, "remove");
                if add.is_empty() && remove.is_empty() {
                    return Err(invalid("nothing to add or remove".into()));
                }
                Self::ApplyLabelChange {
                    email_ids: ids(args).ok_or_else(|| invalid("no email ids".into()))?,
                    add,
                    remove,
                }
            }
            ToolKind::ManageEmail => Self::ManageEmail {
                email_ids: ids(args).ok_or_else(|| invalid("no email ids".into()))?,
                action: opt_str(args, "action")
                    .unwrap_or_default()
                    .parse()
                    .map_err(invalid)?,
            },
        };
        Ok(call)
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            Self::FetchEmails { .. } => ToolKind::FetchEmails,
            Self::ClassifyEmail { .. } => ToolKind::ClassifyEmail,
            Self::SummarizeEmail { .. } => ToolKind::SummarizeEmail,
            Self::ExtractTasks { .. } => ToolKind::ExtractTasks,
            Self::ApplyLabelChange { .. } => ToolKind::ApplyLabelChange,
            Self::ManageEmail { .. } => ToolKind::ManageEmail,
        }
    }
}

fn opt_str(args: &Map<String, Value>, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(|s| s.trim().to_string())
}

fn req_str(args: &Map<String, Value>, key: &str) -> Option<String> {
    opt_str(args, key).filter(|s| !s.is_empty())
}

fn str_list(args: &Map<String, Value>, key: &str) -> Vec<String> {
    let items: Vec<String> = match args.get(key) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Deduplicated ids in first-seen order; `None` if there are none.
fn ids(args: &Map<String, Value>) -> Option<Vec<String>> {
    let mut seen = BTreeSet::new();
    let ids: Vec<String> = str_list(args, "email_ids")
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect();
    (!ids.is_empty()).then_some(ids)
}

// ── Outputs ─────────────────────────────────────────────────────────

/// Compact view of a fetched email.
#[derive(Debug, Clone, Serialize)]
pub struct EmailDigest {
    pub id: String,
    pub sender: Option<String>,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub labels: BTreeSet<String>,
    pub snippet: String,
    pub has_attachment: bool,
}

impl From<&Email> for EmailDigest {
    fn from(email: &Email) -> Self {
        let body = email.body.as_deref().unwrap_or_default();
        let mut snippet: String = body.chars().take(SNIPPET_CHARS).collect();
        if body.chars().count() > SNIPPET_CHARS {
            snippet.push_str("...");
        }
        Self {
            id: email.id.clone(),
            sender: email.sender.clone(),
            subject: email.subject.clone(),
            received_at: email.received_at,
            labels: email.labels.clone(),
            snippet,
            has_attachment: email.has_attachment,
        }
    }
}

/// A per-email failure inside a multi-email mutation.
#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub email_id: String,
    pub error: String,
}

/// Structured result of a successful tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Emails {
        emails: Vec<EmailDigest>,
        count: usize,
    },
    Classification(ClassificationResult),
    Summary {
        email_id: String,
        summary: String,
    },
    Tasks {
        email_id: String,
        tasks: Vec<Task>,
    },
    Changes {
        results: Vec<LabelChange>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        errors: Vec<ItemError>,
    },
}

impl ToolOutput {
    pub fn emails(emails: &[Email]) -> Self {
        Self::Emails {
            emails: emails.iter().map(EmailDigest::from).collect(),
            count: emails.len(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
