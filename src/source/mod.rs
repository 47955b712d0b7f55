//! Email source adapters.
//!
//! The core never talks to a mail provider directly. It goes through
//! [`EmailSource`], which exposes list/get/modify over the provider's
//! search grammar. Two local adapters ship with the crate:
//! - `InMemoryMailbox`: label state and search in memory
//! - `eml::load_dir`: seeds an in-memory mailbox from a directory of `.eml` files

pub mod eml;
pub mod memory;
pub mod query;

pub use memory::InMemoryMailbox;
pub use query::SearchQuery;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::pipeline::types::Email;

/// Well-known system labels.
pub mod labels {
    pub const INBOX: &str = "INBOX";
    pub const UNREAD: &str = "UNREAD";
    pub const IMPORTANT: &str = "IMPORTANT";
    pub const STARRED: &str = "STARRED";
    pub const TRASH: &str = "TRASH";
    pub const SPAM: &str = "SPAM";
}

/// Pure I/O interface to the user's mailbox.
#[async_trait]
pub trait EmailSource: Send + Sync {
    /// Adapter name for logging (e.g. "memory", "gmail").
    fn name(&self) -> &str;

    /// Ids matching `criteria`, newest first, at most `limit`.
    async fn list(&self, criteria: &str, limit: usize) -> Result<Vec<String>, SourceError>;

    /// Fetch a snapshot of one email.
    async fn get(&self, id: &str) -> Result<Email, SourceError>;

    /// Add and remove labels on one email.
    async fn modify(&self, id: &str, add: &[String], remove: &[String])
    -> Result<(), SourceError>;
}
