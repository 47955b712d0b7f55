//! Deterministic rule evaluator.
//!
//! Scores an email in [0, 1] from weighted regex rules:
//! - keywords in the subject, body, or either
//! - sender address patterns (VIPs, noreply)
//! - sender domain patterns (newsletters, marketing)
//!
//! Negative weights mark noise. The summed weight is clamped into [0, 1].
//! The evaluator is pure: it never touches the network or the LLM.

use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::pipeline::types::Email;

/// Which part of the email a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    Subject,
    Body,
    /// Subject or body.
    Text,
    /// Bare sender address.
    Sender,
    /// Domain part of the sender address.
    Domain,
}

/// Serializable rule definition, as read from a rules file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDef {
    pub name: String,
    pub target: RuleTarget,
    /// Case-insensitive regex.
    pub pattern: String,
    pub weight: f32,
}

impl RuleDef {
    pub fn new(name: &str, target: RuleTarget, pattern: &str, weight: f32) -> Self {
        Self {
            name: name.into(),
            target,
            pattern: pattern.into(),
            weight,
        }
    }
}

/// A rule with its compiled regex.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub target: RuleTarget,
    pub weight: f32,
    regex: Regex,
}

/// A rule that matched during evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredRule {
    pub name: String,
    pub weight: f32,
}

/// Result of evaluating one email.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleScore {
    /// Clamped score in [0, 1].
    pub score: f32,
    pub fired: Vec<FiredRule>,
}

impl RuleScore {
    pub fn fired_names(&self) -> Vec<String> {
        self.fired.iter().map(|r| r.name.clone()).collect()
    }

    /// Only negative (noise) rules fired.
    pub fn is_noise(&self) -> bool {
        !self.fired.is_empty() && self.fired.iter().all(|r| r.weight < 0.0)
    }
}

/// Weighted rule evaluator.
#[derive(Debug, Clone)]
pub struct RuleEvaluator {
    rules: Vec<Rule>,
}

impl RuleEvaluator {
    /// Compile rule definitions.
    pub fn from_defs(defs: Vec<RuleDef>) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(defs.len());
        for def in defs {
            if !def.weight.is_finite() {
                return Err(ConfigError::InvalidValue {
                    key: format!("rule {}", def.name),
                    message: "weight must be a finite number".into(),
                });
            }
            let regex = RegexBuilder::new(&def.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| ConfigError::InvalidValue {
                    key: format!("rule {}", def.name),
                    message: e.to_string(),
                })?;
            rules.push(Rule {
                name: def.name,
                target: def.target,
                weight: def.weight,
                regex,
            });
        }
        Ok(Self { rules })
    }

    /// Load a JSON array of [`RuleDef`] from disk.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let defs: Vec<RuleDef> = serde_json::from_str(&raw).map_err(|e| {
            ConfigError::ParseError(format!("rules file {}: {}", path.display(), e))
        })?;
        Self::from_defs(defs)
    }

    /// Built-in rule set: urgency keywords, VIP senders, deadline phrasing,
    /// and negative noise signals.
    pub fn default_rules() -> Self {
        Self::from_defs(Self::default_defs()).expect("built-in rules are valid")
    }

    /// Definitions behind [`RuleEvaluator::default_rules`].
    pub fn default_defs() -> Vec<RuleDef> {
        vec![
            RuleDef::new(
                "urgent_subject",
                RuleTarget::Subject,
                r"\b(urgent|asap|immediately|emergency|critical)\b",
                0.6,
            ),
            RuleDef::new(
                "urgent_body",
                RuleTarget::Body,
                r"\b(urgent|asap|immediately|emergency|critical)\b",
                0.3,
            ),
            RuleDef::new("deadline", RuleTarget::Text, r"\b(deadline|overdue)\b", 0.3),
            RuleDef::new(
                "deadline_phrase",
                RuleTarget::Body,
                r"\b(by|due)\s+(\w+day|tomorrow|eod|\d{1,2}:\d{2}|\d{1,2}/\d{1,2})\b",
                0.2,
            ),
            RuleDef::new("payment", RuleTarget::Text, r"\b(payment|invoice) (due|overdue|failed)\b", 0.3),
            RuleDef::new(
                "vip_sender",
                RuleTarget::Sender,
                r"^(boss|teamlead|ceo|director|manager)@",
                0.4,
            ),
            RuleDef::new("noreply_sender", RuleTarget::Sender, r"^no[\-_.]?reply@", -0.5),
            RuleDef::new(
                "automated_sender",
                RuleTarget::Sender,
                r"^(mailer[\-_]?daemon|postmaster|notifications?)@",
                -0.4,
            ),
            RuleDef::new(
                "newsletter_domain",
                RuleTarget::Domain,
                r"(^|\.)(marketing|newsletter|promo|campaign|news)\.",
                -0.4,
            ),
            RuleDef::new("unsubscribe_subject", RuleTarget::Subject, r"\bunsubscribe\b", -0.4),
            RuleDef::new(
                "unsubscribe_footer",
                RuleTarget::Body,
                r"(unsubscribe|manage your subscription|email preferences|opt[- ]?out)",
                -0.5,
            ),
        ]
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Score an email. Missing sender or body contributes nothing.
    pub fn evaluate(&self, email: &Email) -> RuleScore {
        let sender = email.sender_address();
        let domain = email.sender_domain();

        let mut total = 0.0f32;
        let mut fired = Vec::new();
        for rule in &self.rules {
            let matched = match rule.target {
                RuleTarget::Subject => rule.regex.is_match(&email.subject),
                RuleTarget::Body => email
                    .body
                    .as_deref()
                    .is_some_and(|body| rule.regex.is_match(body)),
                RuleTarget::Text => {
                    rule.regex.is_match(&email.subject)
                        || email
                            .body
                            .as_deref()
                            .is_some_and(|body| rule.regex.is_match(body))
                }
                RuleTarget::Sender => sender.as_deref().is_some_and(|s| rule.regex.is_match(s)),
                RuleTarget::Domain => domain.as_deref().is_some_and(|d| rule.regex.is_match(d)),
            };

            if matched {
                total += rule.weight;
                fired.push(FiredRule {
                    name: rule.name.clone(),
                    weight: rule.weight,
                });
            }
        }

        let score = total.clamp(0.0, 1.0);
        debug!(id = %email.id, score, fired = fired.len(), "Rules evaluated");
        RuleScore { score, fired }
    }
}
