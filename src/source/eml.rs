//! Load a directory of `.eml` files into an in-memory mailbox.
//!
//! Message content is read once at startup; label state then lives in the
//! mailbox, so label changes never rewrite the files.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::pipeline::types::Email;
use crate::source::InMemoryMailbox;
use crate::source::labels;

/// Parse every `*.eml` file in `dir`. Unparseable files are skipped.
pub fn load_dir(dir: &Path) -> Result<InMemoryMailbox, SourceError> {
    let mut emails = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("eml") {
            continue;
        }
        let raw = std::fs::read(&path)?;
        let fallback_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        match parse_email(&raw, &fallback_id) {
            Some(email) => {
                debug!(id = %email.id, path = %path.display(), "Loaded email");
                emails.push(email);
            }
            None => warn!(path = %path.display(), "Skipping unparseable email file"),
        }
    }

    info!(count = emails.len(), dir = %dir.display(), "Loaded .eml mailbox");
    Ok(InMemoryMailbox::with_emails(emails))
}

/// Convert raw RFC 5322 bytes into an [`Email`]. New mail starts in INBOX, unread.
pub fn parse_email(raw: &[u8], fallback_id: &str) -> Option<Email> {
    let parsed = MessageParser::default().parse(raw)?;

    let sender = parsed.from().and_then(|addr| addr.first()).map(|a| {
        match (a.name(), a.address()) {
            (Some(name), Some(address)) => format!("{name} <{address}>"),
            (None, Some(address)) => address.to_string(),
            (Some(name), None) => name.to_string(),
            (None, None) => String::new(),
        }
    });
    let sender = sender.filter(|s| !s.is_empty());

    let body = parsed
        .body_text(0)
        .map(|t| t.to_string())
        .or_else(|| parsed.body_html(0).map(|h| strip_html(h.as_ref())))
        .filter(|b| !b.trim().is_empty());

    let received_at = parsed.date().and_then(|d| {
        chrono::NaiveDate::from_ymd_opt(d.year as i32, u32::from(d.month), u32::from(d.day))
            .and_then(|date| {
                date.and_hms_opt(u32::from(d.hour), u32::from(d.minute), u32::from(d.second))
            })
            .map(|naive| {
                let offset_secs = i64::from(d.tz_hour) * 3600 + i64::from(d.tz_minute) * 60;
                let offset_secs = if d.tz_before_gmt {
                    -offset_secs
                } else {
                    offset_secs
                };
                DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
                    - chrono::Duration::seconds(offset_secs)
            })
    });

    let mut label_set = BTreeSet::new();
    label_set.insert(labels::INBOX.to_string());
    label_set.insert(labels::UNREAD.to_string());

    Some(Email {
        id: parsed
            .message_id()
            .map(|s| s.to_string())
            .unwrap_or_else(|| fallback_id.to_string()),
        sender,
        subject: parsed.subject().unwrap_or("(no subject)").to_string(),
        body,
        received_at: received_at.unwrap_or_else(Utc::now),
        labels: label_set,
        has_attachment: parsed.attachment_count() > 0,
    })
}

/// Strip tags and collapse whitespace.
fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
