//! Search grammar shared by the local adapters.
//!
//! Supports the subset of the provider grammar the agent uses:
//! `from:`, `subject:`, `label:`, `is:unread|read|important|starred`,
//! `has:attachment`, `newer_than:`/`older_than:` (`7d`, `12h`), quoted
//! phrases, free text, and `-` negation on any term.

use chrono::{DateTime, Duration, Utc};

use crate::error::SourceError;
use crate::pipeline::types::Email;
use crate::source::labels;

#[derive(Debug, Clone, PartialEq)]
enum Term {
    From(String),
    Subject(String),
    Label(String),
    Unread,
    Read,
    Important,
    Starred,
    HasAttachment,
    NewerThan(Duration),
    OlderThan(Duration),
    Text(String),
}

/// Parsed search criteria. An empty query matches everything.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchQuery {
    terms: Vec<(bool, Term)>,
}

impl SearchQuery {
    pub fn parse(input: &str) -> Result<Self, SourceError> {
        let mut terms = Vec::new();
        for token in tokenize(input) {
            let (negated, token) = match token.strip_prefix('-') {
                Some(rest) if !rest.is_empty() => (true, rest.to_string()),
                _ => (false, token),
            };
            terms.push((negated, parse_term(&token)?));
        }
        Ok(Self { terms })
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Whether `email` satisfies every term as of `now`.
    pub fn matches(&self, email: &Email, now: DateTime<Utc>) -> bool {
        self.terms
            .iter()
            .all(|(negated, term)| term_matches(term, email, now) != *negated)
    }
}

fn parse_term(token: &str) -> Result<Term, SourceError> {
    let Some((op, value)) = token.split_once(':') else {
        return Ok(Term::Text(token.to_lowercase()));
    };
    let value = value.trim_matches('"');
    let invalid = |reason: &str| SourceError::InvalidCriteria(format!("{token}: {reason}"));

    match op.to_lowercase().as_str() {
        "from" => Ok(Term::From(value.to_lowercase())),
        "subject" => Ok(Term::Subject(value.to_lowercase())),
        "label" | "in" => Ok(Term::Label(value.to_string())),
        "is" => match value.to_lowercase().as_str() {
            "unread" => Ok(Term::Unread),
            "read" => Ok(Term::Read),
            "important" => Ok(Term::Important),
            "starred" => Ok(Term::Starred),
            _ => Err(invalid("unknown is: value")),
        },
        "has" => match value.to_lowercase().as_str() {
            "attachment" => Ok(Term::HasAttachment),
            _ => Err(invalid("unknown has: value")),
        },
        "newer_than" => parse_age(value)
            .map(Term::NewerThan)
            .ok_or_else(|| invalid("expected Nd or Nh")),
        "older_than" => parse_age(value)
            .map(Term::OlderThan)
            .ok_or_else(|| invalid("expected Nd or Nh")),
        // Unknown operators (e.g. URLs like "https://...") search as text.
        _ => Ok(Term::Text(token.to_lowercase())),
    }
}

fn parse_age(value: &str) -> Option<Duration> {
    let value = value.trim().to_lowercase();
    let unit = value.chars().last()?;
    let n: i64 = value[..value.len() - unit.len_utf8()].parse().ok()?;
    match unit {
        'd' => Duration::try_days(n),
        'h' => Duration::try_hours(n),
        'm' => Duration::try_days(n.checked_mul(30)?),
        'y' => Duration::try_days(n.checked_mul(365)?),
        _ => None,
    }
}

fn has_label(email: &Email, label: &str) -> bool {
    email.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
}

fn term_matches(term: &Term, email: &Email, now: DateTime<Utc>) -> bool {
    match term {
        Term::From(needle) => email
            .sender
            .as_deref()
            .is_some_and(|s| s.to_lowercase().contains(needle.as_str())),
        Term::Subject(needle) => email.subject.to_lowercase().contains(needle.as_str()),
        Term::Label(label) => has_label(email, label),
        Term::Unread => has_label(email, labels::UNREAD),
        Term::Read => !has_label(email, labels::UNREAD),
        Term::Important => has_label(email, labels::IMPORTANT),
        Term::Starred => has_label(email, labels::STARRED),
        Term::HasAttachment => email.has_attachment,
        // A cutoff before the earliest representable date: everything is newer.
        Term::NewerThan(age) => now
            .checked_sub_signed(*age)
            .is_none_or(|cutoff| email.received_at >= cutoff),
        Term::OlderThan(age) => now
            .checked_sub_signed(*age)
            .is_some_and(|cutoff| email.received_at < cutoff),
        Term::Text(needle) => {
            email.subject.to_lowercase().contains(needle.as_str())
                || email
                    .body
                    .as_deref()
                    .is_some_and(|b| b.to_lowercase().contains(needle.as_str()))
                || email
                    .sender
                    .as_deref()
                    .is_some_and(|s| s.to_lowercase().contains(needle.as_str()))
        }
    }
}

/// Split on whitespace, keeping `"quoted phrases"` (including `op:"a b"`) together.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in input.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
