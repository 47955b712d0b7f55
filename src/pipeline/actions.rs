//! Action executor: idempotent label changes on the email source.
//!
//! Every mutation the core performs, including folder sorting and mailbox
//! actions such as archive or trash, is a label add/remove pair applied here.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::llm::retry::RetryPolicy;
use crate::pipeline::types::ClassificationResult;
use crate::source::{EmailSource, labels};

/// Label applied to unimportant mail when sorting.
pub const LOW_PRIORITY_LABEL: &str = "Low-Priority";
/// Label applied to noise (newsletters, automated senders) when sorting.
pub const PROMOTIONS_LABEL: &str = "Promotions";

/// Named mailbox actions, each a fixed label delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailboxAction {
    Trash,
    Archive,
    MarkRead,
    MarkUnread,
    Spam,
}

impl MailboxAction {
    pub const ALL: [&'static str; 5] = ["trash", "archive", "mark_read", "mark_unread", "spam"];

    /// `(add, remove)` labels for this action.
    pub fn label_delta(&self) -> (Vec<String>, Vec<String>) {
        let (add, remove): (&[&str], &[&str]) = match self {
            Self::Trash => (&[labels::TRASH], &[labels::INBOX]),
            Self::Archive => (&[], &[labels::INBOX]),
            Self::MarkRead => (&[], &[labels::UNREAD]),
            Self::MarkUnread => (&[labels::UNREAD], &[]),
            Self::Spam => (&[labels::SPAM], &[labels::INBOX]),
        };
        (
            add.iter().map(|l| l.to_string()).collect(),
            remove.iter().map(|l| l.to_string()).collect(),
        )
    }
}

impl FromStr for MailboxAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trash" | "delete" => Ok(Self::Trash),
            "archive" => Ok(Self::Archive),
            "mark_read" | "read" => Ok(Self::MarkRead),
            "mark_unread" | "unread" => Ok(Self::MarkUnread),
            "spam" | "mark_spam" => Ok(Self::Spam),
            other => Err(format!("unknown mailbox action '{other}'")),
        }
    }
}

/// `(add, remove)` for sorting an unimportant email.
pub fn sort_delta(result: &ClassificationResult) -> (Vec<String>, Vec<String>) {
    let target = if result.noise {
        PROMOTIONS_LABEL
    } else {
        LOW_PRIORITY_LABEL
    };
    (vec![target.to_string()], vec![labels::INBOX.to_string()])
}

/// Outcome of a label change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelChange {
    pub email_id: String,
    /// Label set after the change.
    pub labels: BTreeSet<String>,
    /// False when the change was already in effect.
    pub applied: bool,
}

/// Applies label changes through the email source with bounded retry.
pub struct ActionExecutor {
    source: Arc<dyn EmailSource>,
    retry: RetryPolicy,
}

impl ActionExecutor {
    pub fn new(source: Arc<dyn EmailSource>, retry: RetryPolicy) -> Self {
        Self { source, retry }
    }

    /// Add and remove labels on one email.
    ///
    /// Idempotent: labels already present (added) or absent (removed) are
    /// no-ops, and a change with nothing left to do succeeds without a write.
    pub async fn apply_label_change(
        &self,
        email_id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<LabelChange, PipelineError> {
        if let Some(label) = add.iter().find(|l| remove.contains(l)) {
            return Err(PipelineError::LabelConflict {
                label: label.clone(),
            });
        }

        let current = self
            .retry
            .run("get", || self.source.get(email_id))
            .await?
            .labels;

        let to_add: Vec<String> = add
            .iter()
            .filter(|l| !current.contains(*l))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let to_remove: Vec<String> = remove
            .iter()
            .filter(|l| current.contains(*l))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if to_add.is_empty() && to_remove.is_empty() {
            debug!(id = email_id, "Label change already in effect");
            return Ok(LabelChange {
                email_id: email_id.to_string(),
                labels: current,
                applied: false,
            });
        }

        self.retry
            .run("modify", || self.source.modify(email_id, &to_add, &to_remove))
            .await?;

        let mut labels = current;
        for label in &to_remove {
            labels.remove(label);
        }
        labels.extend(to_add.iter().cloned());

        info!(id = email_id, add = ?to_add, remove = ?to_remove, "Labels changed");
        Ok(LabelChange {
            email_id: email_id.to_string(),
            labels,
            applied: true,
        })
    }

    /// Apply a named mailbox action.
    pub async fn apply_action(
        &self,
        email_id: &str,
        action: MailboxAction,
    ) -> Result<LabelChange, PipelineError> {
        let (add, remove) = action.label_delta();
        self.apply_label_change(email_id, &add, &remove).await
    }
}
