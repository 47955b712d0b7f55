//! Hybrid importance classification.
//!
//! The rule score decides alone outside the ambiguity band. Inside it the
//! LLM verdict wins; when the LLM cannot give one, the rule score is compared
//! against the band midpoint and the result is marked degraded.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ConfigError, LlmError, PipelineError};
use crate::llm::prompts::{PromptTemplate, PromptVars};
use crate::llm::service::{LlmService, extract_json};
use crate::pipeline::rules::RuleEvaluator;
use crate::pipeline::types::{ClassificationResult, Decision, DecisionSource, Email};
use crate::safety::InputGuard;

/// Closed score interval in which rules alone are not trusted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmbiguityBand {
    low: f32,
    high: f32,
}

/// Where a score sits relative to the band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandPosition {
    Below,
    Within,
    Above,
}

impl AmbiguityBand {
    pub fn new(low: f32, high: f32) -> Result<Self, ConfigError> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !in_unit(low) || !in_unit(high) {
            return Err(ConfigError::InvalidValue {
                key: "ambiguity band".into(),
                message: format!("bounds must lie in [0, 1], got [{low}, {high}]"),
            });
        }
        if low > high {
            return Err(ConfigError::InvalidValue {
                key: "ambiguity band".into(),
                message: format!("low bound {low} exceeds high bound {high}"),
            });
        }
        Ok(Self { low, high })
    }

    pub fn low(&self) -> f32 {
        self.low
    }

    pub fn high(&self) -> f32 {
        self.high
    }

    pub fn midpoint(&self) -> f32 {
        (self.low + self.high) / 2.0
    }

    pub fn position(&self, score: f32) -> BandPosition {
        if score > self.high {
            BandPosition::Above
        } else if score < self.low {
            BandPosition::Below
        } else {
            BandPosition::Within
        }
    }
}

impl Default for AmbiguityBand {
    fn default() -> Self {
        Self {
            low: 0.3,
            high: 0.7,
        }
    }
}

/// Decision plus the source that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub decision: Decision,
    pub source: DecisionSource,
}

impl PolicyOutcome {
    /// The tiebreak is only reached when the LLM was needed and gave no verdict.
    pub fn degraded(&self) -> bool {
        self.source == DecisionSource::HybridTiebreak
    }
}

/// The hybrid decision table.
///
/// | position | verdict  | decision            | source          |
/// |----------|----------|---------------------|-----------------|
/// | above    | any      | important           | rule            |
/// | below    | any      | not important       | rule            |
/// | within   | Some(v)  | v                   | llm             |
/// | within   | None     | score >= midpoint   | hybrid-tiebreak |
pub fn decide(score: f32, band: &AmbiguityBand, verdict: Option<bool>) -> PolicyOutcome {
    match (band.position(score), verdict) {
        (BandPosition::Above, _) => PolicyOutcome {
            decision: Decision::Important,
            source: DecisionSource::Rule,
        },
        (BandPosition::Below, _) => PolicyOutcome {
            decision: Decision::NotImportant,
            source: DecisionSource::Rule,
        },
        (BandPosition::Within, Some(important)) => PolicyOutcome {
            decision: Decision::from_bool(important),
            source: DecisionSource::Llm,
        },
        (BandPosition::Within, None) => PolicyOutcome {
            decision: Decision::from_bool(score >= band.midpoint()),
            source: DecisionSource::HybridTiebreak,
        },
    }
}

#[derive(Debug, Deserialize)]
struct LlmVerdict {
    important: bool,
    #[serde(default)]
    rationale: String,
}

/// Rules first, LLM for the ambiguous middle.
pub struct HybridClassifier {
    rules: Arc<RuleEvaluator>,
    band: AmbiguityBand,
    llm: LlmService,
    guard: InputGuard,
}

impl HybridClassifier {
    pub fn new(
        rules: Arc<RuleEvaluator>,
        band: AmbiguityBand,
        llm: LlmService,
        guard: InputGuard,
    ) -> Self {
        Self {
            rules,
            band,
            llm,
            guard,
        }
    }

    pub fn band(&self) -> AmbiguityBand {
        self.band
    }

    /// Classify one email from its own snapshot.
    ///
    /// LLM failures never propagate: they degrade to the tiebreak. The only
    /// error is oversize input when the input limit rejects instead of truncating.
    pub async fn classify(&self, email: &Email) -> Result<ClassificationResult, PipelineError> {
        let rule_score = self.rules.evaluate(email);
        let score = rule_score.score;

        let (outcome, rationale) = match self.band.position(score) {
            BandPosition::Above | BandPosition::Below => {
                let outcome = decide(score, &self.band, None);
                let rationale = format!(
                    "rule score {score:.2} outside ambiguity band [{:.2}, {:.2}]",
                    self.band.low, self.band.high
                );
                (outcome, rationale)
            }
            BandPosition::Within => {
                let content = self.guard.prepare(email.body.as_deref().unwrap_or_default())?;
                match self.ask_llm(email, content).await {
                    Ok(verdict) => (
                        decide(score, &self.band, Some(verdict.important)),
                        verdict.rationale,
                    ),
                    Err(e) => {
                        warn!(
                            id = %email.id,
                            score,
                            error = %e,
                            "LLM unavailable for ambiguous email, using rule tiebreak"
                        );
                        let rationale = format!(
                            "classification degraded ({}): rule score {score:.2} vs band midpoint {:.2}",
                            e,
                            self.band.midpoint()
                        );
                        (decide(score, &self.band, None), rationale)
                    }
                }
            }
        };

        debug!(
            id = %email.id,
            score,
            decision = ?outcome.decision,
            source = %outcome.source,
            "Email classified"
        );

        Ok(ClassificationResult {
            email_id: email.id.clone(),
            score,
            decision: outcome.decision,
            source: outcome.source,
            rationale,
            fired_rules: rule_score.fired_names(),
            degraded: outcome.degraded(),
            noise: rule_score.is_noise(),
        })
    }

    async fn ask_llm(&self, email: &Email, content: String) -> Result<LlmVerdict, LlmError> {
        let mut vars = PromptVars::new();
        vars.insert(
            "sender",
            self.guard
                .sanitizer
                .sanitize(email.sender.as_deref().unwrap_or("(unknown sender)")),
        );
        vars.insert("subject", self.guard.sanitizer.sanitize(&email.subject));
        vars.insert("content", content);

        let raw = self
            .llm
            .complete(PromptTemplate::ClassifyImportance, &vars)
            .await?;
        serde_json::from_str::<LlmVerdict>(&extract_json(&raw))
            .map_err(|e| LlmError::invalid_response(self.llm.model_name(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::retry::RetryPolicy;
    use crate::pipeline::rules::{RuleDef, RuleTarget};
    use crate::safety::{Overflow, TextLimit};
    use crate::test_support::{Reply, ScriptedLlm, email};

    fn band() -> AmbiguityBand {
        AmbiguityBand::new(0.3, 0.7).unwrap()
    }

    fn classifier(rules: Vec<RuleDef>, llm: Arc<ScriptedLlm>) -> HybridClassifier {
        HybridClassifier::new(
            Arc::new(RuleEvaluator::from_defs(rules).unwrap()),
            band(),
            LlmService::new(llm, RetryPolicy::none()),
            InputGuard::default(),
        )
    }

    fn subject_rule(pattern: &str, weight: f32) -> RuleDef {
        RuleDef::new(pattern, RuleTarget::Subject, pattern, weight)
    }

    #[test]
    fn decision_table() {
        let b = band();
        let above = decide(0.9, &b, Some(false));
        assert_eq!(above.decision, Decision::Important);
        assert_eq!(above.source, DecisionSource::Rule);

        let below = decide(0.1, &b, Some(true));
        assert_eq!(below.decision, Decision::NotImportant);
        assert_eq!(below.source, DecisionSource::Rule);

        let llm = decide(0.5, &b, Some(false));
        assert_eq!(llm.decision, Decision::NotImportant);
        assert_eq!(llm.source, DecisionSource::Llm);

        let tie_high = decide(0.5, &b, None);
        assert_eq!(tie_high.decision, Decision::Important);
        assert!(tie_high.degraded());

        let tie_low = decide(0.4, &b, None);
        assert_eq!(tie_low.decision, Decision::NotImportant);
        assert_eq!(tie_low.source, DecisionSource::HybridTiebreak);
    }

    #[test]
    fn band_bounds_are_inclusive() {
        let b = band();
        assert_eq!(b.position(0.3), BandPosition::Within);
        assert_eq!(b.position(0.7), BandPosition::Within);
        assert_eq!(b.position(0.71), BandPosition::Above);
        assert_eq!(b.position(0.29), BandPosition::Below);
    }

    #[test]
    fn invalid_band_is_rejected() {
        assert!(AmbiguityBand::new(0.8, 0.2).is_err());
        assert!(AmbiguityBand::new(-0.1, 0.5).is_err());
        assert!(AmbiguityBand::new(0.5, 0.5).is_ok());
    }

    #[tokio::test]
    async fn urgent_subject_decided_by_rule_without_llm() {
        let llm = ScriptedLlm::fixed(r#"{"important": false, "rationale": "unused"}"#);
        let c = classifier(vec![subject_rule("urgent", 0.9)], llm.clone());

        let result = c
            .classify(&email("m1", "boss@corp.com", "URGENT: respond today", "Call me"))
            .await
            .unwrap();
        assert!(result.score >= 0.9);
        assert_eq!(result.source, DecisionSource::Rule);
        assert_eq!(result.decision, Decision::Important);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn scores_outside_band_never_call_llm() {
        let llm = ScriptedLlm::fixed(r#"{"important": true}"#);
        let c = classifier(
            vec![subject_rule("urgent", 0.9), subject_rule("sale", -0.9)],
            llm.clone(),
        );

        for subject in ["urgent", "big sale", "hello", "urgent urgent", "sale urgent"] {
            let result = c
                .classify(&email("m", "a@x.com", subject, "body"))
                .await
                .unwrap();
            assert_eq!(result.source, DecisionSource::Rule, "subject: {subject}");
        }
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn llm_verdict_wins_inside_band() {
        let llm = ScriptedLlm::new()
            .route(
                "classify_importance",
                r#"{"important": true, "rationale": "asks for a decision"}"#,
            )
            .build();
        let c = classifier(vec![subject_rule("review", 0.5)], llm.clone());

        let result = c
            .classify(&email("m1", "a@x.com", "Please review", "Need a yes/no"))
            .await
            .unwrap();
        assert_eq!(result.source, DecisionSource::Llm);
        assert_eq!(result.decision, Decision::Important);
        assert_eq!(result.rationale, "asks for a decision");
        assert!(!result.degraded);
        assert_eq!(llm.calls_for("classify_importance"), 1);
    }

    #[tokio::test]
    async fn unavailable_llm_degrades_to_tiebreak() {
        let llm = ScriptedLlm::failing(Reply::Unavailable);
        let c = classifier(vec![subject_rule("review", 0.6)], llm.clone());

        let result = c
            .classify(&email("m1", "a@x.com", "Please review", "Need a yes/no"))
            .await
            .unwrap();
        assert_eq!(result.source, DecisionSource::HybridTiebreak);
        // 0.6 >= midpoint 0.5
        assert_eq!(result.decision, Decision::Important);
        assert!(result.degraded);
        assert!(result.rationale.contains("degraded"));
    }

    #[tokio::test]
    async fn unparseable_verdict_degrades_to_tiebreak() {
        let llm = ScriptedLlm::fixed("I think this one matters.");
        let c = classifier(vec![subject_rule("review", 0.4)], llm);

        let result = c
            .classify(&email("m1", "a@x.com", "Please review", "body"))
            .await
            .unwrap();
        assert_eq!(result.source, DecisionSource::HybridTiebreak);
        assert_eq!(result.decision, Decision::NotImportant);
    }

    #[tokio::test]
    async fn llm_sees_sanitized_content() {
        let llm = ScriptedLlm::fixed(r#"{"important": false}"#);
        let c = classifier(vec![subject_rule("call", 0.5)], llm.clone());

        c.classify(&email(
            "m1",
            "a@x.com",
            "Call me",
            "My number is 555-123-4567, mail jane@corp.com",
        ))
        .await
        .unwrap();

        let prompt = &llm.prompts_for("classify_importance")[0];
        assert!(prompt.contains("[PHONE]"));
        assert!(prompt.contains("[EMAIL]"));
        assert!(!prompt.contains("555-123-4567"));
    }

    #[tokio::test]
    async fn oversize_body_rejected_only_when_configured() {
        let llm = ScriptedLlm::fixed(r#"{"important": true}"#);
        let c = HybridClassifier::new(
            Arc::new(RuleEvaluator::from_defs(vec![subject_rule("review", 0.5)]).unwrap()),
            band(),
            LlmService::new(llm.clone(), RetryPolicy::none()),
            InputGuard::new(TextLimit {
                max_chars: 10,
                overflow: Overflow::Reject,
            }),
        );

        let err = c
            .classify(&email("m1", "a@x.com", "Please review", &"x".repeat(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InputTooLarge { .. }));
        assert_eq!(llm.call_count(), 0);
    }
}
