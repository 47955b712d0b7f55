//! Safety layer applied to email content before it reaches the LLM.
//!
//! - `ContentSanitizer` redacts email addresses, phone numbers and SSNs.
//! - `TextLimit` enforces the configured input length (truncate or reject).

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

static EMAIL_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap()
});

static SSN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}[-.]?\d{2}[-.]?\d{4}\b").unwrap());

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").unwrap());

/// Redacts personal identifiers from text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentSanitizer;

impl ContentSanitizer {
    pub fn new() -> Self {
        Self
    }

    /// Replace identifiers with `[EMAIL]`, `[SSN]` and `[PHONE]`.
    pub fn sanitize(&self, text: &str) -> String {
        let text = EMAIL_ADDRESS.replace_all(text, "[EMAIL]");
        // SSN before phone: an undelimited 9-digit run is not a phone number.
        let text = SSN.replace_all(&text, "[SSN]");
        PHONE.replace_all(&text, "[PHONE]").into_owned()
    }
}

/// What to do with input longer than the limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overflow {
    #[default]
    Truncate,
    Reject,
}

/// Maximum input length for LLM-bound text, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextLimit {
    pub max_chars: usize,
    pub overflow: Overflow,
}

impl Default for TextLimit {
    fn default() -> Self {
        Self {
            max_chars: 4000,
            overflow: Overflow::Truncate,
        }
    }
}

impl TextLimit {
    /// Apply the limit, truncating on a char boundary or rejecting.
    pub fn apply(&self, text: &str) -> Result<String, PipelineError> {
        let length = text.chars().count();
        if length <= self.max_chars {
            return Ok(text.to_string());
        }
        match self.overflow {
            Overflow::Reject => Err(PipelineError::InputTooLarge {
                length,
                max: self.max_chars,
            }),
            Overflow::Truncate => Ok(text.chars().take(self.max_chars).collect()),
        }
    }
}

/// Sanitizer plus length limit, applied in that order.
#[derive(Debug, Clone, Default)]
pub struct InputGuard {
    pub sanitizer: ContentSanitizer,
    pub limit: TextLimit,
}

impl InputGuard {
    pub fn new(limit: TextLimit) -> Self {
        Self {
            sanitizer: ContentSanitizer::new(),
            limit,
        }
    }

    /// Prepare text for an LLM call.
    pub fn prepare(&self, text: &str) -> Result<String, PipelineError> {
        self.limit.apply(&self.sanitizer.sanitize(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_emails_phones_and_ssns() {
        let s = ContentSanitizer::new();
        let out = s.sanitize("Reach me at jane.doe@corp.com or 555-123-4567, SSN 123-45-6789.");
        assert_eq!(out, "Reach me at [EMAIL] or [PHONE], SSN [SSN].");
    }

    #[test]
    fn leaves_plain_text_alone() {
        let s = ContentSanitizer::new();
        let text = "Please send the report by Friday.";
        assert_eq!(s.sanitize(text), text);
    }

    #[test]
    fn truncates_on_char_boundary() {
        let limit = TextLimit {
            max_chars: 3,
            overflow: Overflow::Truncate,
        };
        assert_eq!(limit.apply("héllo").unwrap(), "hél");
        assert_eq!(limit.apply("hé").unwrap(), "hé");
    }

    #[test]
    fn rejects_oversize_input() {
        let limit = TextLimit {
            max_chars: 5,
            overflow: Overflow::Reject,
        };
        let err = limit.apply("too long input").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InputTooLarge { length: 14, max: 5 }
        ));
    }

    #[test]
    fn guard_sanitizes_before_limiting() {
        let guard = InputGuard::new(TextLimit {
            max_chars: 7,
            overflow: Overflow::Reject,
        });
        // 17 chars raw, 7 once redacted.
        assert_eq!(guard.prepare("bob@example.co.uk").unwrap(), "[EMAIL]");
    }
}
