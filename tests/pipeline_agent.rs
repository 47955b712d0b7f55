//! End-to-end tests: the deterministic pipeline and the tool router over the
//! in-memory mailbox, with a stub LLM keyed by prompt template.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Map, Value, json};

use mail_agent::agent::{EpisodeState, ToolRouter};
use mail_agent::error::{EpisodeError, LlmError};
use mail_agent::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};
use mail_agent::llm::{LlmService, Reasoning, RetryPolicy};
use mail_agent::ops::MailOperations;
use mail_agent::pipeline::PipelineOrchestrator;
use mail_agent::pipeline::actions::{LOW_PRIORITY_LABEL, PROMOTIONS_LABEL};
use mail_agent::pipeline::classifier::{AmbiguityBand, HybridClassifier};
use mail_agent::pipeline::extract::Extractor;
use mail_agent::pipeline::rules::RuleEvaluator;
use mail_agent::pipeline::types::{DecisionSource, Email, ItemOutcome, Stage, TaskPriority};
use mail_agent::safety::InputGuard;
use mail_agent::source::{EmailSource, InMemoryMailbox};
use mail_agent::tools::ToolRegistry;

/// Stub LLM: fixed replies per template, plus a script for the reasoning loop.
struct StubLlm {
    fixed: HashMap<&'static str, String>,
    react: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<String>>,
}

impl StubLlm {
    fn new(react: Vec<Value>) -> Arc<Self> {
        let fixed = HashMap::from([
            ("summarize", "Budget report needed by Friday".to_string()),
            (
                "extract_tasks",
                r#"[{"task": "send the report", "deadline": "Friday"}]"#.to_string(),
            ),
            (
                "classify_importance",
                r#"{"important": false, "rationale": "routine"}"#.to_string(),
            ),
        ]);
        Arc::new(Self {
            fixed,
            react: Mutex::new(react.into_iter().map(|v| v.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self, template: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|t| *t == template).count()
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let template = request.metadata.get("template").cloned().unwrap_or_default();
        self.calls.lock().unwrap().push(template.clone());

        let content = if template == "react_step" {
            self.react.lock().unwrap().pop_front()
        } else {
            self.fixed.get(template.as_str()).cloned()
        };
        content
            .map(|content| CompletionResponse {
                content,
                input_tokens: 0,
                output_tokens: 0,
            })
            .ok_or_else(|| LlmError::Unavailable {
                provider: "stub".into(),
                reason: format!("no reply scripted for {template}"),
            })
    }
}

fn email(id: &str, sender: &str, subject: &str, body: &str, age_minutes: i64) -> Email {
    Email {
        id: id.into(),
        sender: Some(sender.into()),
        subject: subject.into(),
        body: Some(body.into()),
        received_at: Utc::now() - Duration::minutes(age_minutes),
        labels: ["INBOX", "UNREAD"].iter().map(|l| l.to_string()).collect(),
        has_attachment: false,
    }
}

fn mailbox() -> Arc<InMemoryMailbox> {
    let mut lunch = email("m3", "sam@corp.com", "Lunch", "Tacos at noon?", 3);
    lunch.labels.insert("Project-X".into());
    let mut sync = email("m4", "sam@corp.com", "Sync notes", "Notes from today", 4);
    sync.labels.insert("Project-X".into());
    Arc::new(InMemoryMailbox::with_emails([
        email(
            "m1",
            "Boss <boss@corp.com>",
            "URGENT: budget",
            "Please send the report by Friday.",
            1,
        ),
        email(
            "m2",
            "deals@newsletter.shop.com",
            "Weekly deals",
            "Big savings. Click here to unsubscribe.",
            2,
        ),
        lunch,
        sync,
    ]))
}

fn operations(source: Arc<dyn EmailSource>, llm: Arc<StubLlm>) -> Arc<MailOperations> {
    let service = LlmService::new(llm, RetryPolicy::none());
    Arc::new(MailOperations::new(
        source,
        HybridClassifier::new(
            Arc::new(RuleEvaluator::default_rules()),
            AmbiguityBand::default(),
            service.clone(),
            InputGuard::default(),
        ),
        Extractor::new(service, InputGuard::default()),
        RetryPolicy::none(),
    ))
}

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn pipeline_routes_important_mail_and_sorts_the_rest() {
    let mailbox = mailbox();
    let llm = StubLlm::new(vec![]);
    let orchestrator = PipelineOrchestrator::new(operations(mailbox.clone(), llm.clone()), 2);

    let report = orchestrator.run("is:unread", 10).await;

    assert!(report.fetch_error.is_none());
    assert_eq!(report.items.len(), 4);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.status_of("m1"), Some(&ItemOutcome::Notified { tasks: 1 }));
    for id in ["m2", "m3", "m4"] {
        assert_eq!(report.status_of(id), Some(&ItemOutcome::Sorted), "{id}");
    }

    // Important mail produces a notification and a to-do.
    assert_eq!(report.notifications.len(), 1);
    assert_eq!(report.notifications[0].summary, "Budget report needed by Friday");
    assert_eq!(report.todos.len(), 1);
    assert_eq!(report.todos[0].description, "Send the report");
    assert_eq!(report.todos[0].deadline.as_deref(), Some("Friday"));
    assert_eq!(report.todos[0].priority, TaskPriority::High);

    // Every decision came from the rules; no classification prompt was needed.
    assert_eq!(llm.calls("classify_importance"), 0);
    assert!(report
        .items
        .iter()
        .all(|i| i.classification.as_ref().is_some_and(|c| c.source == DecisionSource::Rule)));

    // Sorting is a label delta on the source.
    assert_eq!(report.sort_actions.len(), 3);
    let newsletter = mailbox.get("m2").await.unwrap();
    assert!(newsletter.has_label(PROMOTIONS_LABEL));
    assert!(!newsletter.has_label("INBOX"));
    let lunch = mailbox.get("m3").await.unwrap();
    assert!(lunch.has_label(LOW_PRIORITY_LABEL));
    assert!(lunch.has_label(&Stage::Sorted.label()));
    let urgent = mailbox.get("m1").await.unwrap();
    assert!(urgent.has_label("INBOX"));
    assert!(urgent.processed().classified);

    // A second pass over the same mailbox does no work.
    let again = orchestrator.run("", 10).await;
    assert_eq!(again.skipped(), 4);
    assert_eq!(llm.calls("summarize"), 1);
    assert!(again.sort_actions.is_empty());
}

#[tokio::test]
async fn router_threads_fetched_ids_into_label_change() {
    let mailbox = mailbox();
    let llm = StubLlm::new(vec![
        json!({
            "thought": "Find everything Sam sent.",
            "action": {"tool": "fetch_emails", "arguments": {"query": "from:sam@corp.com", "count": 20}}
        }),
        json!({
            "thought": "Remove Project-X from each result.",
            "action": {"tool": "apply_label_change", "arguments": {
                "email_ids": {"$from": {"step": 1, "path": "emails.*.id"}},
                "remove": ["Project-X"]
            }}
        }),
        json!({"thought": "Both updated.", "answer": "Removed Project-X from 2 emails from Sam."}),
    ]);
    let ops = operations(mailbox.clone(), llm.clone());
    let router = ToolRouter::new(
        Arc::new(ToolRegistry::new(ops)),
        Reasoning::new(LlmService::new(llm.clone(), RetryPolicy::none())),
        6,
    );

    let episode = router.run("Remove the Project-X label from everything Sam sent").await;

    assert_eq!(episode.state, EpisodeState::Answering);
    assert_eq!(episode.outcome().unwrap(), "Removed Project-X from 2 emails from Sam.");
    let tools: Vec<&str> = episode.invocations().map(|i| i.tool.as_str()).collect();
    assert_eq!(tools, ["fetch_emails", "apply_label_change"]);

    let fetched: Vec<Value> = episode.steps[0].invocation.result.as_ref().unwrap()["emails"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].clone())
        .collect();
    assert_eq!(
        episode.steps[1].invocation.arguments["email_ids"],
        Value::Array(fetched)
    );
    for id in ["m3", "m4"] {
        assert!(!mailbox.get(id).await.unwrap().has_label("Project-X"), "{id}");
    }
    assert_eq!(llm.calls("react_step"), 3);
}

#[tokio::test]
async fn router_and_pipeline_share_classification_semantics() {
    let mailbox = mailbox();
    let llm = StubLlm::new(vec![]);
    let ops = operations(mailbox.clone(), llm);
    let registry = ToolRegistry::new(ops.clone());

    let via_tool = registry
        .invoke("classify_email", &args(json!({"email_id": "m1"})))
        .await
        .unwrap();
    let via_pipeline = ops.classify("m1").await.unwrap();

    assert_eq!(via_tool, serde_json::to_value(&via_pipeline).unwrap());
    assert_eq!(via_tool["decision"], "important");
}

#[tokio::test]
async fn router_fails_cleanly_when_the_script_runs_out() {
    let llm = StubLlm::new(vec![json!({
        "thought": "Trash it.",
        "action": {"tool": "manage_email", "arguments": {"email_ids": ["m2"], "action": "trash"}}
    })]);
    let mailbox = mailbox();
    let router = ToolRouter::new(
        Arc::new(ToolRegistry::new(operations(mailbox.clone(), llm.clone()))),
        Reasoning::new(LlmService::new(llm, RetryPolicy::none())),
        6,
    );

    let episode = router.run("Trash the newsletter").await;

    // The mutation that ran stays applied; the episode reports the outage.
    assert!(mailbox.get("m2").await.unwrap().has_label("TRASH"));
    assert_eq!(episode.state, EpisodeState::Failed);
    assert!(matches!(
        episode.outcome(),
        Err(EpisodeError::ReasoningUnavailable(_))
    ));
}
