//! Shared types for the email processing pipeline and the tool layer.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label prefix marking which pipeline stages already ran on an email.
pub const STAGE_LABEL_PREFIX: &str = "mail-agent/";

// ── Email ───────────────────────────────────────────────────────────

/// Transient copy of one email from the source adapter.
///
/// The adapter owns the canonical state; the core only reads snapshots and
/// requests label changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    /// Opaque, source-unique id.
    pub id: String,
    /// Raw `From` value (may be `Name <addr>`).
    pub sender: Option<String>,
    pub subject: String,
    /// Plain-text body, if the source could produce one.
    pub body: Option<String>,
    pub received_at: DateTime<Utc>,
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub has_attachment: bool,
}

impl Email {
    /// Bare address of the sender, lowercased (`Bob <bob@x.com>` → `bob@x.com`).
    pub fn sender_address(&self) -> Option<String> {
        self.sender.as_deref().and_then(normalize_address)
    }

    /// Domain part of the sender address.
    pub fn sender_domain(&self) -> Option<String> {
        self.sender_address()
            .and_then(|addr| addr.rsplit_once('@').map(|(_, domain)| domain.to_string()))
    }

    /// Subject and body joined, as seen by text-level rules and the LLM.
    pub fn text(&self) -> String {
        match self.body.as_deref() {
            Some(body) if !body.trim().is_empty() => format!("{}\n\n{}", self.subject, body),
            _ => self.subject.clone(),
        }
    }

    /// Per-stage processed flags, derived from stage labels.
    pub fn processed(&self) -> ProcessedStages {
        ProcessedStages {
            classified: self.has_label(&Stage::Classified.label()),
            summarized: self.has_label(&Stage::Summarized.label()),
            tasks_extracted: self.has_label(&Stage::TasksExtracted.label()),
            sorted: self.has_label(&Stage::Sorted.label()),
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }
}

/// Extract a lowercase bare address from a `From` header value.
pub fn normalize_address(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let addr = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if end > start => &raw[start + 1..end],
        _ => raw,
    };
    let addr = addr.trim().trim_matches('"');
    if addr.is_empty() {
        None
    } else {
        Some(addr.to_lowercase())
    }
}

// ── Processed stages ────────────────────────────────────────────────

/// Stages whose completion is recorded on the email itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classified,
    Summarized,
    TasksExtracted,
    Sorted,
}

impl Stage {
    /// Label that records this stage on the email.
    pub fn label(&self) -> String {
        let name = match self {
            Self::Classified => "classified",
            Self::Summarized => "summarized",
            Self::TasksExtracted => "tasks-extracted",
            Self::Sorted => "sorted",
        };
        format!("{STAGE_LABEL_PREFIX}{name}")
    }
}

/// Per-stage processed flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedStages {
    pub classified: bool,
    pub summarized: bool,
    pub tasks_extracted: bool,
    pub sorted: bool,
}

// ── Classification ──────────────────────────────────────────────────

/// Binary importance decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Important,
    NotImportant,
}

impl Decision {
    pub fn from_bool(important: bool) -> Self {
        if important {
            Self::Important
        } else {
            Self::NotImportant
        }
    }

    pub fn is_important(&self) -> bool {
        matches!(self, Self::Important)
    }
}

/// Which source produced a classification decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionSource {
    Rule,
    Llm,
    HybridTiebreak,
}

impl DecisionSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Llm => "llm",
            Self::HybridTiebreak => "hybrid-tiebreak",
        }
    }
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of classifying one email. Never persisted; the score is not
/// written back onto the `Email`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub email_id: String,
    /// Rule score in [0, 1].
    pub score: f32,
    pub decision: Decision,
    pub source: DecisionSource,
    pub rationale: String,
    /// Names of the rules that fired.
    pub fired_rules: Vec<String>,
    /// True when the LLM was needed but unavailable and the tiebreak was used.
    pub degraded: bool,
    /// True when only negative (noise) rules fired.
    pub noise: bool,
}

// ── Tasks ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    High,
    Medium,
}

/// An action item extracted from an email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub description: String,
    pub email_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
}

// ── UI-facing outputs ───────────────────────────────────────────────

/// Notification tile for an important email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub email_id: String,
    pub sender: Option<String>,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub summary: String,
}

/// Resulting label set after a sort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortAction {
    pub email_id: String,
    pub labels: BTreeSet<String>,
}

/// Pipeline stage names used in per-item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Fetch,
    Filter,
    Classify,
    Summarize,
    ExtractTasks,
    Sort,
}

impl PipelineStage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Filter => "filter",
            Self::Classify => "classify",
            Self::Summarize => "summarize",
            Self::ExtractTasks => "extract_tasks",
            Self::Sort => "sort",
        }
    }
}

/// How a single email left the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Already processed on an earlier run.
    Skipped,
    /// Important: notification and tasks produced.
    Notified { tasks: usize },
    /// Not important: labels changed.
    Sorted,
    /// Removed from the run at `stage`.
    Failed { stage: PipelineStage, error: String },
}

impl ItemOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Notified { .. } => "notified",
            Self::Sorted => "sorted",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Per-item entry in a pipeline report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStatus {
    pub email_id: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationResult>,
}

/// Everything one pipeline run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: uuid::Uuid,
    pub criteria: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Set when listing the source failed; no items were processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
    pub items: Vec<ItemStatus>,
    pub notifications: Vec<Notification>,
    pub todos: Vec<Task>,
    pub sort_actions: Vec<SortAction>,
}

impl PipelineReport {
    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Failed { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Skipped))
            .count()
    }

    /// Number of classifications that fell back to the rules-only tiebreak.
    pub fn degraded(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.classification.as_ref().is_some_and(|c| c.degraded))
            .count()
    }

    pub fn status_of(&self, email_id: &str) -> Option<&ItemOutcome> {
        self.items
            .iter()
            .find(|i| i.email_id == email_id)
            .map(|i| &i.outcome)
    }
}
