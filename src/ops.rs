//! Mail operations shared by the pipeline and the tool registry.
//!
//! Both execution models call these same functions, so classifying,
//! summarizing or relabeling an email means the same thing everywhere.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{PipelineError, SourceError};
use crate::llm::retry::RetryPolicy;
use crate::pipeline::actions::{ActionExecutor, LabelChange, MailboxAction};
use crate::pipeline::classifier::HybridClassifier;
use crate::pipeline::extract::Extractor;
use crate::pipeline::types::{ClassificationResult, Email, Task};
use crate::source::EmailSource;

/// Smallest and largest number of emails one fetch may return.
pub const FETCH_MIN: usize = 1;
pub const FETCH_MAX: usize = 50;
pub const FETCH_DEFAULT: usize = 10;

/// Clamp a requested fetch count into `FETCH_MIN..=FETCH_MAX`.
pub fn clamp_fetch_count(count: Option<usize>) -> usize {
    count.unwrap_or(FETCH_DEFAULT).clamp(FETCH_MIN, FETCH_MAX)
}

/// The canonical set of mail operations.
pub struct MailOperations {
    source: Arc<dyn EmailSource>,
    classifier: HybridClassifier,
    extractor: Extractor,
    executor: ActionExecutor,
    retry: RetryPolicy,
}

impl MailOperations {
    pub fn new(
        source: Arc<dyn EmailSource>,
        classifier: HybridClassifier,
        extractor: Extractor,
        retry: RetryPolicy,
    ) -> Self {
        let executor = ActionExecutor::new(Arc::clone(&source), retry);
        Self {
            source,
            classifier,
            extractor,
            executor,
            retry,
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    // ── Fetch ───────────────────────────────────────────────────────

    /// Ids matching `criteria`, newest first.
    pub async fn list(&self, criteria: &str, limit: usize) -> Result<Vec<String>, SourceError> {
        self.retry
            .run("list", || self.source.list(criteria, limit))
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Email, SourceError> {
        self.retry.run("get", || self.source.get(id)).await
    }

    /// The one fetch operation: list then get, skipping ids that vanished
    /// between the two calls.
    pub async fn fetch(&self, criteria: &str, count: Option<usize>) -> Result<Vec<Email>, SourceError> {
        let ids = self.list(criteria, clamp_fetch_count(count)).await?;
        let mut emails = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id).await {
                Ok(email) => emails.push(email),
                Err(SourceError::NotFound { .. }) => {
                    warn!(id = %id, "Listed email disappeared before fetch");
                }
                Err(e) => return Err(e),
            }
        }
        debug!(criteria, count = emails.len(), "Fetched emails");
        Ok(emails)
    }

    // ── Analysis ────────────────────────────────────────────────────

    pub async fn classify_email(&self, email: &Email) -> Result<ClassificationResult, PipelineError> {
        self.classifier.classify(email).await
    }

    pub async fn summarize_email(&self, email: &Email) -> Result<String, PipelineError> {
        self.extractor.summarize(&email.text()).await
    }

    pub async fn extract_email_tasks(&self, email: &Email) -> Result<Vec<Task>, PipelineError> {
        Ok(self
            .extractor
            .extract_tasks(&email.id, &email.text())
            .await?
            .collect())
    }

    /// Fetch by id, then classify.
    pub async fn classify(&self, id: &str) -> Result<ClassificationResult, PipelineError> {
        let email = self.get(id).await?;
        self.classify_email(&email).await
    }

    pub async fn summarize(&self, id: &str) -> Result<String, PipelineError> {
        let email = self.get(id).await?;
        self.summarize_email(&email).await
    }

    pub async fn extract_tasks(&self, id: &str) -> Result<Vec<Task>, PipelineError> {
        let email = self.get(id).await?;
        self.extract_email_tasks(&email).await
    }

    // ── Mutations ───────────────────────────────────────────────────

    pub async fn apply_label_change(
        &self,
        id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<LabelChange, PipelineError> {
        self.executor.apply_label_change(id, add, remove).await
    }

    pub async fn manage(&self, id: &str, action: MailboxAction) -> Result<LabelChange, PipelineError> {
        self.executor.apply_action(id, action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::service::LlmService;
    use crate::pipeline::classifier::AmbiguityBand;
    use crate::pipeline::rules::RuleEvaluator;
    use crate::safety::InputGuard;
    use crate::source::InMemoryMailbox;
    use crate::test_support::{ScriptedLlm, email};

    fn ops(emails: Vec<Email>) -> MailOperations {
        let llm = LlmService::new(ScriptedLlm::fixed("[]"), RetryPolicy::none());
        MailOperations::new(
            Arc::new(InMemoryMailbox::with_emails(emails)),
            HybridClassifier::new(
                Arc::new(RuleEvaluator::default_rules()),
                AmbiguityBand::default(),
                llm.clone(),
                InputGuard::default(),
            ),
            Extractor::new(llm, InputGuard::default()),
            RetryPolicy::none(),
        )
    }

    #[test]
    fn fetch_count_is_clamped() {
        assert_eq!(clamp_fetch_count(None), 10);
        assert_eq!(clamp_fetch_count(Some(0)), 1);
        assert_eq!(clamp_fetch_count(Some(500)), 50);
        assert_eq!(clamp_fetch_count(Some(7)), 7);
    }

    #[tokio::test]
    async fn fetch_lists_then_gets() {
        let ops = ops(vec![
            email("m1", "bob@corp.com", "One", "body"),
            email("m2", "alice@corp.com", "Two", "body"),
        ]);
        let emails = ops.fetch("from:bob", None).await.unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].id, "m1");
    }

    #[tokio::test]
    async fn id_operations_surface_missing_email() {
        let ops = ops(vec![]);
        assert!(matches!(
            ops.classify("ghost").await,
            Err(PipelineError::Fetch(SourceError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn extract_tasks_collects_empty_sequence() {
        let ops = ops(vec![email("m1", "a@x.com", "FYI", "Nothing to do")]);
        assert!(ops.extract_tasks("m1").await.unwrap().is_empty());
    }
}
