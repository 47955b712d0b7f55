//! Deterministic pipeline orchestrator.
//!
//! Flow:
//! 1. Fetch: list ids for the criteria, then get each email
//! 2. Filter (barrier): skip emails already classified on an earlier run
//! 3. Classify → important: Summarize → Extract-Tasks (bounded parallelism)
//! 4. Sort (barrier): relabel the unimportant emails
//!
//! Stages only drop items. A failure on one email removes that email from the
//! run and is recorded in its status; the run itself always completes.
//! The orchestrator owns no classification logic: every stage is a call into
//! [`MailOperations`].

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::ops::MailOperations;
use crate::pipeline::actions::sort_delta;
use crate::pipeline::types::{
    ClassificationResult, Email, ItemOutcome, ItemStatus, Notification, PipelineReport,
    PipelineStage, SortAction, Stage, Task,
};

/// Default number of emails analyzed concurrently.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Result of the per-email analysis stage.
enum Analysis {
    Important {
        classification: ClassificationResult,
        notification: Notification,
        tasks: Vec<Task>,
    },
    Unimportant {
        classification: ClassificationResult,
    },
}

/// Stage an item was dropped at, the cause, and any classification made first.
type StageFailure = (PipelineStage, PipelineError, Option<ClassificationResult>);

/// Runs the fixed stage chain over a batch of emails.
pub struct PipelineOrchestrator {
    ops: Arc<MailOperations>,
    concurrency: usize,
}

impl PipelineOrchestrator {
    pub fn new(ops: Arc<MailOperations>, concurrency: usize) -> Self {
        Self {
            ops,
            concurrency: concurrency.max(1),
        }
    }

    /// Run the pipeline over up to `limit` emails matching `criteria`.
    pub async fn run(&self, criteria: &str, limit: usize) -> PipelineReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, criteria, limit, "Pipeline run started");

        let mut report = PipelineReport {
            run_id,
            criteria: criteria.to_string(),
            started_at,
            finished_at: started_at,
            fetch_error: None,
            items: Vec::new(),
            notifications: Vec::new(),
            todos: Vec::new(),
            sort_actions: Vec::new(),
        };

        // ── Fetch ───────────────────────────────────────────────────
        let ids = match self.ops.list(criteria, limit).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(%run_id, error = %e, "Fetch failed, nothing processed");
                report.fetch_error = Some(e.to_string());
                report.finished_at = Utc::now();
                return report;
            }
        };

        let ops = &self.ops;
        let mut fetched: Vec<(usize, String, Result<Email, PipelineError>)> =
            stream::iter(ids.into_iter().enumerate())
                .map(|(idx, id)| async move {
                    let result = ops.get(&id).await.map_err(PipelineError::from);
                    (idx, id, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        fetched.sort_by_key(|(idx, _, _)| *idx);

        // ── Filter (barrier) ────────────────────────────────────────
        let mut items: Vec<(usize, ItemStatus)> = Vec::new();
        let mut pending: Vec<(usize, Email)> = Vec::new();
        for (idx, id, result) in fetched {
            match result {
                Ok(email) if email.processed().classified => {
                    debug!(id = %id, "Already processed, skipping");
                    items.push((idx, status(&id, ItemOutcome::Skipped, None)));
                }
                Ok(email) => pending.push((idx, email)),
                Err(e) => items.push((idx, failed(&id, PipelineStage::Fetch, &e, None))),
            }
        }

        // ── Classify → Summarize → Extract ──────────────────────────
        let analyzed: Vec<(usize, Email, Result<Analysis, StageFailure>)> =
            stream::iter(pending)
                .map(|(idx, email)| async move {
                    let result = self.analyze(&email).await;
                    (idx, email, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        // ── Sort (barrier) ──────────────────────────────────────────
        let mut notifications: Vec<(usize, Notification)> = Vec::new();
        let mut todos: Vec<(usize, Vec<Task>)> = Vec::new();
        let mut to_sort: Vec<(usize, Email, ClassificationResult)> = Vec::new();

        for (idx, email, result) in analyzed {
            match result {
                Ok(Analysis::Important {
                    classification,
                    notification,
                    tasks,
                }) => {
                    self.mark_stages(
                        &email.id,
                        &[Stage::Classified, Stage::Summarized, Stage::TasksExtracted],
                    )
                    .await;
                    let outcome = ItemOutcome::Notified { tasks: tasks.len() };
                    items.push((idx, status(&email.id, outcome, Some(classification))));
                    notifications.push((idx, notification));
                    todos.push((idx, tasks));
                }
                Ok(Analysis::Unimportant { classification }) => {
                    to_sort.push((idx, email, classification));
                }
                Err((stage, e, classification)) => {
                    items.push((idx, failed(&email.id, stage, &e, classification)));
                }
            }
        }

        let sorted: Vec<(usize, String, ClassificationResult, Result<SortAction, PipelineError>)> =
            stream::iter(to_sort)
                .map(|(idx, email, classification)| async move {
                    let result = self.sort(&email, &classification).await;
                    (idx, email.id, classification, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut sort_actions: Vec<(usize, SortAction)> = Vec::new();
        for (idx, id, classification, result) in sorted {
            match result {
                Ok(action) => {
                    items.push((idx, status(&id, ItemOutcome::Sorted, Some(classification))));
                    sort_actions.push((idx, action));
                }
                Err(e) => {
                    items.push((idx, failed(&id, PipelineStage::Sort, &e, Some(classification))))
                }
            }
        }

        items.sort_by_key(|(idx, _)| *idx);
        notifications.sort_by_key(|(idx, _)| *idx);
        todos.sort_by_key(|(idx, _)| *idx);
        sort_actions.sort_by_key(|(idx, _)| *idx);

        report.items = items.into_iter().map(|(_, s)| s).collect();
        report.notifications = notifications.into_iter().map(|(_, n)| n).collect();
        report.todos = todos.into_iter().flat_map(|(_, t)| t).collect();
        report.sort_actions = sort_actions.into_iter().map(|(_, a)| a).collect();
        report.finished_at = Utc::now();

        info!(
            %run_id,
            total = report.items.len(),
            notified = report.notifications.len(),
            sorted = report.sort_actions.len(),
            skipped = report.skipped(),
            failed = report.failed(),
            degraded = report.degraded(),
            "Pipeline run complete"
        );
        report
    }

    /// Classify, then summarize and extract tasks for important emails.
    async fn analyze(&self, email: &Email) -> Result<Analysis, StageFailure> {
        let classification = self
            .ops
            .classify_email(email)
            .await
            .map_err(|e| (PipelineStage::Classify, e, None))?;

        if !classification.decision.is_important() {
            return Ok(Analysis::Unimportant { classification });
        }

        let summary = match self.ops.summarize_email(email).await {
            Ok(summary) => summary,
            Err(e) => return Err((PipelineStage::Summarize, e, Some(classification))),
        };
        let tasks = match self.ops.extract_email_tasks(email).await {
            Ok(tasks) => tasks,
            Err(e) => return Err((PipelineStage::ExtractTasks, e, Some(classification))),
        };

        Ok(Analysis::Important {
            notification: Notification {
                email_id: email.id.clone(),
                sender: email.sender.clone(),
                subject: email.subject.clone(),
                date: email.received_at,
                summary,
            },
            classification,
            tasks,
        })
    }

    /// Relabel one unimportant email and record the stages it passed.
    async fn sort(
        &self,
        email: &Email,
        classification: &ClassificationResult,
    ) -> Result<SortAction, PipelineError> {
        let (mut add, remove) = sort_delta(classification);
        add.push(Stage::Classified.label());
        add.push(Stage::Sorted.label());
        let change = self.ops.apply_label_change(&email.id, &add, &remove).await?;
        Ok(SortAction {
            email_id: change.email_id,
            labels: change.labels,
        })
    }

    /// Record completed stages on the email. Failure only costs a re-run.
    async fn mark_stages(&self, id: &str, stages: &[Stage]) {
        let add: Vec<String> = stages.iter().map(Stage::label).collect();
        if let Err(e) = self.ops.apply_label_change(id, &add, &[]).await {
            warn!(id, error = %e, "Failed to record processed stages");
        }
    }
}

fn status(id: &str, outcome: ItemOutcome, classification: Option<ClassificationResult>) -> ItemStatus {
    ItemStatus {
        email_id: id.to_string(),
        outcome,
        classification,
    }
}

fn failed(
    id: &str,
    stage: PipelineStage,
    error: &PipelineError,
    classification: Option<ClassificationResult>,
) -> ItemStatus {
    error!(id, stage = stage.label(), error = %error, "Email dropped from pipeline run");
    status(
        id,
        ItemOutcome::Failed {
            stage,
            error: error.to_string(),
        },
        classification,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::retry::RetryPolicy;
    use crate::llm::service::LlmService;
    use crate::pipeline::classifier::{AmbiguityBand, HybridClassifier};
    use crate::pipeline::extract::Extractor;
    use crate::pipeline::rules::{RuleDef, RuleEvaluator, RuleTarget};
    use crate::pipeline::types::DecisionSource;
    use crate::safety::{InputGuard, Overflow, TextLimit};
    use crate::source::{EmailSource, InMemoryMailbox};
    use crate::test_support::{CountingSource, Reply, ScriptedLlm, email};

    fn model() -> Arc<ScriptedLlm> {
        ScriptedLlm::new()
            .route(
                "classify_importance",
                r#"{"important": true, "rationale": "needs a reply"}"#,
            )
            .route("summarize", "Report requested")
            .route_fn("extract_tasks", |prompt| {
                if prompt.contains("report") {
                    Reply::Text(r#"[{"task": "Send the report", "deadline": "Friday"}]"#.into())
                } else {
                    Reply::Text("[]".into())
                }
            })
            .build()
    }

    fn rules() -> Vec<RuleDef> {
        vec![
            RuleDef::new("urgent", RuleTarget::Subject, "urgent", 0.9),
            RuleDef::new("review", RuleTarget::Subject, "review", 0.5),
            RuleDef::new("promo", RuleTarget::Sender, "^deals@", -0.5),
        ]
    }

    fn orchestrator(
        source: Arc<dyn EmailSource>,
        llm: Arc<ScriptedLlm>,
        band: AmbiguityBand,
        limit: TextLimit,
    ) -> PipelineOrchestrator {
        let service = LlmService::new(llm, RetryPolicy::none());
        let classifier = HybridClassifier::new(
            Arc::new(RuleEvaluator::from_defs(rules()).unwrap()),
            band,
            service.clone(),
            InputGuard::new(limit),
        );
        let extractor = Extractor::new(service, InputGuard::default());
        let ops = MailOperations::new(source, classifier, extractor, RetryPolicy::none());
        PipelineOrchestrator::new(Arc::new(ops), 2)
    }

    #[tokio::test]
    async fn routes_important_and_unimportant_mail() {
        let mailbox = Arc::new(InMemoryMailbox::with_emails([
            email("m1", "boss@corp.com", "URGENT: Q3 report", "Please send the report by Friday."),
            email("m2", "deals@shop.com", "Weekend sale", "Everything 50% off"),
        ]));
        let llm = model();
        let pipeline = orchestrator(
            mailbox.clone(),
            llm.clone(),
            AmbiguityBand::default(),
            TextLimit::default(),
        );

        let report = pipeline.run("is:unread", 10).await;

        assert!(report.fetch_error.is_none());
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.status_of("m1"), Some(&ItemOutcome::Notified { tasks: 1 }));
        assert_eq!(report.status_of("m2"), Some(&ItemOutcome::Sorted));

        assert_eq!(report.notifications.len(), 1);
        assert_eq!(report.notifications[0].summary, "Report requested");
        assert_eq!(report.todos[0].description, "Send the report");
        assert_eq!(report.todos[0].email_id, "m1");

        let sorted = &report.sort_actions[0];
        assert_eq!(sorted.email_id, "m2");
        assert!(sorted.labels.contains("Promotions"));
        assert!(!sorted.labels.contains("INBOX"));

        // Both emails were decided by rules alone.
        assert_eq!(llm.calls_for("classify_importance"), 0);
        let m2 = mailbox.get("m2").await.unwrap();
        assert!(m2.processed().classified && m2.processed().sorted);
    }

    #[tokio::test]
    async fn second_run_skips_processed_mail() {
        let mailbox = Arc::new(InMemoryMailbox::with_emails([email(
            "m1",
            "boss@corp.com",
            "URGENT: Q3 report",
            "Please send the report by Friday.",
        )]));
        let llm = model();
        let pipeline = orchestrator(mailbox, llm.clone(), AmbiguityBand::default(), TextLimit::default());

        pipeline.run("", 10).await;
        let second = pipeline.run("", 10).await;

        assert_eq!(second.status_of("m1"), Some(&ItemOutcome::Skipped));
        assert!(second.notifications.is_empty());
        assert_eq!(llm.calls_for("summarize"), 1);
    }

    #[tokio::test]
    async fn one_failing_classification_keeps_the_rest() {
        // Every email is ambiguous; m3's body is too large and rejected.
        let mailbox = Arc::new(InMemoryMailbox::with_emails([
            email("m1", "a@corp.com", "Lunch?", "Free at noon?"),
            email("m2", "b@corp.com", "Report", "Please send the report by Friday."),
            email("m3", "c@corp.com", "Long", &"word ".repeat(400)),
            email("m4", "d@corp.com", "Notes", "Minutes attached"),
        ]));
        let band = AmbiguityBand::new(0.0, 1.0).unwrap();
        let limit = TextLimit {
            max_chars: 500,
            overflow: Overflow::Reject,
        };
        let pipeline = orchestrator(mailbox, model(), band, limit);

        let report = pipeline.run("", 10).await;

        assert_eq!(report.items.len(), 4);
        assert_eq!(report.failed(), 1);
        match report.status_of("m3") {
            Some(ItemOutcome::Failed { stage, .. }) => assert_eq!(*stage, PipelineStage::Classify),
            other => panic!("Expected classify failure, got {:?}", other),
        }
        assert_eq!(report.notifications.len(), 3);
        assert!(report.items.iter().all(|i| i.email_id == "m3"
            || i.classification.as_ref().map(|c| c.source) == Some(DecisionSource::Llm)));
    }

    #[tokio::test]
    async fn fetch_failure_on_one_email_is_per_item() {
        let mailbox = Arc::new(InMemoryMailbox::with_emails([
            email("m1", "boss@corp.com", "URGENT", "Call me"),
            email("m2", "boss@corp.com", "URGENT again", "Call me now"),
        ]));
        let source = Arc::new(CountingSource::new(mailbox).failing_get("m2"));
        let pipeline = orchestrator(source, model(), AmbiguityBand::default(), TextLimit::default());

        let report = pipeline.run("", 10).await;
        assert_eq!(report.status_of("m1"), Some(&ItemOutcome::Notified { tasks: 0 }));
        assert!(matches!(
            report.status_of("m2"),
            Some(ItemOutcome::Failed {
                stage: PipelineStage::Fetch,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn summarize_outage_fails_only_that_item() {
        let llm = ScriptedLlm::new()
            .route("summarize", "unused")
            .queue("summarize", vec![Reply::Unavailable])
            .route("extract_tasks", "[]")
            .build();
        let mailbox = Arc::new(InMemoryMailbox::with_emails([email(
            "m1",
            "boss@corp.com",
            "URGENT",
            "Call me",
        )]));
        let pipeline = orchestrator(mailbox, llm, AmbiguityBand::default(), TextLimit::default());

        let report = pipeline.run("", 10).await;
        assert!(matches!(
            report.status_of("m1"),
            Some(ItemOutcome::Failed {
                stage: PipelineStage::Summarize,
                ..
            })
        ));
        assert!(report.notifications.is_empty());
    }

    #[tokio::test]
    async fn list_failure_is_reported_not_raised() {
        let mailbox = Arc::new(InMemoryMailbox::new());
        let pipeline = orchestrator(mailbox, model(), AmbiguityBand::default(), TextLimit::default());

        let report = pipeline.run("is:nonsense", 10).await;
        assert!(report.fetch_error.is_some());
        assert!(report.items.is_empty());
    }
}
