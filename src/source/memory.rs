//! In-memory mailbox adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::SourceError;
use crate::pipeline::types::Email;
use crate::source::{EmailSource, SearchQuery};

/// Mailbox held entirely in memory. Label changes are applied in place.
pub struct InMemoryMailbox {
    name: String,
    emails: RwLock<HashMap<String, Email>>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::with_emails([])
    }

    pub fn with_emails(emails: impl IntoIterator<Item = Email>) -> Self {
        let map = emails.into_iter().map(|e| (e.id.clone(), e)).collect();
        Self {
            name: "memory".to_string(),
            emails: RwLock::new(map),
        }
    }

    /// Insert or replace an email.
    pub async fn insert(&self, email: Email) {
        self.emails.write().await.insert(email.id.clone(), email);
    }

    pub async fn len(&self) -> usize {
        self.emails.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.emails.read().await.is_empty()
    }
}

impl Default for InMemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmailSource for InMemoryMailbox {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self, criteria: &str, limit: usize) -> Result<Vec<String>, SourceError> {
        let query = SearchQuery::parse(criteria)?;
        let now = Utc::now();
        let emails = self.emails.read().await;

        let mut matched: Vec<&Email> = emails.values().filter(|e| query.matches(e, now)).collect();
        matched.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let ids: Vec<String> = matched.into_iter().take(limit).map(|e| e.id.clone()).collect();
        debug!(source = %self.name, criteria, count = ids.len(), "Listed emails");
        Ok(ids)
    }

    async fn get(&self, id: &str) -> Result<Email, SourceError> {
        self.emails
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound { id: id.to_string() })
    }

    async fn modify(
        &self,
        id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<(), SourceError> {
        let mut emails = self.emails.write().await;
        let email = emails
            .get_mut(id)
            .ok_or_else(|| SourceError::NotFound { id: id.to_string() })?;
        for label in remove {
            email.labels.remove(label);
        }
        for label in add {
            email.labels.insert(label.clone());
        }
        debug!(source = %self.name, id, ?add, ?remove, "Labels modified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::email;

    #[tokio::test]
    async fn list_filters_and_orders_newest_first() {
        let mut older = email("m1", "alice@x.com", "Older", "body");
        older.received_at = Utc::now() - chrono::Duration::hours(5);
        let newer = email("m2", "alice@x.com", "Newer", "body");
        let other = email("m3", "bob@y.com", "Other", "body");
        let mailbox = InMemoryMailbox::with_emails([older, newer, other]);

        let ids = mailbox.list("from:alice", 10).await.unwrap();
        assert_eq!(ids, vec!["m2".to_string(), "m1".to_string()]);

        let ids = mailbox.list("", 1).await.unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn huge_age_filters_list_without_panicking() {
        let mailbox = InMemoryMailbox::with_emails([email("m1", "alice@x.com", "Hi", "body")]);

        assert_eq!(mailbox.list("newer_than:100000000d", 10).await.unwrap(), vec!["m1".to_string()]);
        assert!(mailbox.list("older_than:100000000d", 10).await.unwrap().is_empty());
        assert!(matches!(
            mailbox.list("older_than:999999999999999999m", 10).await,
            Err(SourceError::InvalidCriteria(_))
        ));
    }

    #[tokio::test]
    async fn modify_applies_labels() {
        let mailbox = InMemoryMailbox::with_emails([email("m1", "a@x.com", "Hi", "body")]);
        mailbox
            .modify("m1", &["Work".into()], &["INBOX".into()])
            .await
            .unwrap();
        let e = mailbox.get("m1").await.unwrap();
        assert!(e.labels.contains("Work"));
        assert!(!e.labels.contains("INBOX"));
    }

    #[tokio::test]
    async fn missing_ids_are_not_found() {
        let mailbox = InMemoryMailbox::new();
        assert!(matches!(
            mailbox.get("nope").await,
            Err(SourceError::NotFound { .. })
        ));
        assert!(mailbox.modify("nope", &[], &[]).await.is_err());
    }

    #[tokio::test]
    async fn invalid_criteria_surfaces() {
        let mailbox = InMemoryMailbox::new();
        assert!(matches!(
            mailbox.list("is:whatever", 10).await,
            Err(SourceError::InvalidCriteria(_))
        ));
    }
}
