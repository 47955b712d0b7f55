//! Shared test doubles: a scripted LLM, an email builder and a counting source.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{LlmError, SourceError};
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider, Role};
use crate::pipeline::types::Email;
use crate::source::EmailSource;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Unavailable,
    RateLimited,
}

impl Reply {
    fn into_result(self) -> Result<String, LlmError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Unavailable => Err(LlmError::Unavailable {
                provider: "scripted".into(),
                reason: "connection refused".into(),
            }),
            Self::RateLimited => Err(LlmError::RateLimited {
                provider: "scripted".into(),
                retry_after: None,
            }),
        }
    }
}

type Responder = Box<dyn Fn(&str) -> Reply + Send + Sync>;

/// LLM double that answers per prompt template.
///
/// Lookup order per call: queued replies for the template, then the
/// template's responder, then the default responder.
#[derive(Default)]
pub struct ScriptedLlm {
    default: Option<Responder>,
    routes: HashMap<String, Responder>,
    queues: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call returns `text`.
    pub fn fixed(text: &str) -> Arc<Self> {
        let text = text.to_string();
        Arc::new(Self {
            default: Some(Box::new(move |_| Reply::Text(text.clone()))),
            ..Self::default()
        })
    }

    /// Every call fails with `reply` (an error variant).
    pub fn failing(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            default: Some(Box::new(move |_| reply.clone())),
            ..Self::default()
        })
    }

    /// Fixed reply for one template.
    pub fn route(mut self, template: &str, text: &str) -> Self {
        let text = text.to_string();
        self.routes
            .insert(template.into(), Box::new(move |_| Reply::Text(text.clone())));
        self
    }

    /// Reply computed from the rendered user prompt.
    pub fn route_fn(
        mut self,
        template: &str,
        f: impl Fn(&str) -> Reply + Send + Sync + 'static,
    ) -> Self {
        self.routes.insert(template.into(), Box::new(f));
        self
    }

    /// Replies consumed in order before falling back to the route.
    pub fn queue(self, template: &str, replies: Vec<Reply>) -> Self {
        if let Ok(mut queues) = self.queues.lock() {
            queues
                .entry(template.into())
                .or_default()
                .extend(replies);
        }
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, template: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == template)
            .count()
    }

    /// Rendered user prompts sent for `template`, in call order.
    pub fn prompts_for(&self, template: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == template)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let template = request
            .metadata
            .get("template")
            .cloned()
            .unwrap_or_default();
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.calls
            .lock()
            .unwrap()
            .push((template.clone(), prompt.clone()));

        let queued = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&template)
            .and_then(|q| q.pop_front());
        let reply = match queued {
            Some(reply) => reply,
            None => match self.routes.get(&template).or(self.default.as_ref()) {
                Some(responder) => responder(&prompt),
                None => Reply::Unavailable,
            },
        };

        reply.into_result().map(|content| CompletionResponse {
            content,
            input_tokens: 10,
            output_tokens: 5,
        })
    }
}

/// Build an unread inbox email.
pub fn email(id: &str, sender: &str, subject: &str, body: &str) -> Email {
    Email {
        id: id.into(),
        sender: Some(sender.into()),
        subject: subject.into(),
        body: Some(body.into()),
        received_at: Utc::now(),
        labels: ["INBOX", "UNREAD"].iter().map(|l| l.to_string()).collect(),
        has_attachment: false,
    }
}

/// Source wrapper that counts calls and can fail `get` for chosen ids.
pub struct CountingSource {
    inner: Arc<dyn EmailSource>,
    pub lists: AtomicUsize,
    pub gets: AtomicUsize,
    pub modifies: AtomicUsize,
    fail_get: Vec<String>,
    fail_modify: bool,
}

impl CountingSource {
    pub fn new(inner: Arc<dyn EmailSource>) -> Self {
        Self {
            inner,
            lists: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            modifies: AtomicUsize::new(0),
            fail_get: Vec::new(),
            fail_modify: false,
        }
    }

    pub fn failing_get(mut self, id: &str) -> Self {
        self.fail_get.push(id.to_string());
        self
    }

    pub fn failing_modify(mut self) -> Self {
        self.fail_modify = true;
        self
    }

    pub fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn modify_calls(&self) -> usize {
        self.modifies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailSource for CountingSource {
    fn name(&self) -> &str {
        "counting"
    }

    async fn list(&self, criteria: &str, limit: usize) -> Result<Vec<String>, SourceError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list(criteria, limit).await
    }

    async fn get(&self, id: &str) -> Result<Email, SourceError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.iter().any(|f| f == id) {
            return Err(SourceError::Rejected {
                id: id.to_string(),
                reason: "scripted failure".into(),
            });
        }
        self.inner.get(id).await
    }

    async fn modify(
        &self,
        id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<(), SourceError> {
        self.modifies.fetch_add(1, Ordering::SeqCst);
        if self.fail_modify {
            return Err(SourceError::Rejected {
                id: id.to_string(),
                reason: "read-only mailbox".into(),
            });
        }
        self.inner.modify(id, add, remove).await
    }
}
