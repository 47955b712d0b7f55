//! Configuration types.
//!
//! Everything is read once from the environment at startup and is immutable
//! afterwards.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::agent::router::DEFAULT_MAX_STEPS;
use crate::error::ConfigError;
use crate::llm::retry::RetryPolicy;
use crate::llm::{LlmBackend, LlmConfig};
use crate::ops::{FETCH_DEFAULT, clamp_fetch_count};
use crate::pipeline::classifier::AmbiguityBand;
use crate::pipeline::email_processor::DEFAULT_PROCESS_INTERVAL_SECS;
use crate::pipeline::processor::DEFAULT_CONCURRENCY;
use crate::safety::{Overflow, TextLimit};

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub band: AmbiguityBand,
    /// JSON rule file; the built-in rule set is used when unset.
    pub rules_path: Option<PathBuf>,
    pub limit: TextLimit,
    pub concurrency: usize,
    pub fetch_query: String,
    pub fetch_limit: usize,
    /// Interval between background runs.
    pub interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            band: AmbiguityBand::default(),
            rules_path: None,
            limit: TextLimit::default(),
            concurrency: DEFAULT_CONCURRENCY,
            fetch_query: "is:unread".to_string(),
            fetch_limit: FETCH_DEFAULT,
            interval: Duration::from_secs(DEFAULT_PROCESS_INTERVAL_SECS),
        }
    }
}

/// LLM settings. The key is checked only when a provider is built.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub backend: LlmBackend,
    pub model: String,
    api_key: Option<SecretString>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Anthropic,
            model: LlmBackend::Anthropic.default_model().to_string(),
            api_key: None,
        }
    }
}

impl LlmSettings {
    pub fn llm_config(&self) -> Result<LlmConfig, ConfigError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingRequired {
                key: self.backend.api_key_var().to_string(),
                hint: format!("export {}=...", self.backend.api_key_var()),
            })?;
        Ok(LlmConfig {
            backend: self.backend,
            api_key,
            model: self.model.clone(),
        })
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub llm: LlmSettings,
    pub retry: RetryPolicy,
    /// Maximum tool steps per reasoning episode.
    pub max_steps: usize,
    /// Directory of `.eml` files backing the local mailbox.
    pub maildir: Option<PathBuf>,
    /// Daily-rotated log files are written here when set.
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            llm: LlmSettings::default(),
            retry: RetryPolicy::default(),
            max_steps: DEFAULT_MAX_STEPS,
            maildir: None,
            log_dir: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults;
    /// inconsistent values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<f32>().ok());
        let number = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };
        let path = |key: &str| lookup(key).filter(|s| !s.trim().is_empty()).map(PathBuf::from);

        let defaults = PipelineConfig::default();
        let band = AmbiguityBand::new(
            parsed("MAIL_AGENT_BAND_LOW").unwrap_or(defaults.band.low()),
            parsed("MAIL_AGENT_BAND_HIGH").unwrap_or(defaults.band.high()),
        )?;

        let overflow = match lookup("MAIL_AGENT_OVERSIZE") {
            Some(value) => parse_overflow(&value)?,
            None => Overflow::default(),
        };
        let limit = TextLimit {
            max_chars: number("MAIL_AGENT_MAX_INPUT_CHARS", defaults.limit.max_chars as u64).max(1)
                as usize,
            overflow,
        };

        let pipeline = PipelineConfig {
            band,
            rules_path: path("MAIL_AGENT_RULES_PATH"),
            limit,
            concurrency: number("MAIL_AGENT_CONCURRENCY", defaults.concurrency as u64).max(1)
                as usize,
            fetch_query: lookup("MAIL_AGENT_FETCH_QUERY").unwrap_or(defaults.fetch_query),
            fetch_limit: clamp_fetch_count(Some(
                number("MAIL_AGENT_FETCH_LIMIT", defaults.fetch_limit as u64) as usize,
            )),
            interval: Duration::from_secs(
                number("MAIL_AGENT_INTERVAL_SECS", defaults.interval.as_secs()).max(1),
            ),
        };

        let backend = match lookup("MAIL_AGENT_LLM_BACKEND") {
            Some(value) => LlmBackend::from_str(&value)?,
            None => LlmBackend::Anthropic,
        };
        let llm = LlmSettings {
            backend,
            model: lookup("MAIL_AGENT_MODEL").unwrap_or_else(|| backend.default_model().to_string()),
            api_key: lookup(backend.api_key_var())
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
        };

        let default_retry = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: number("MAIL_AGENT_RETRY_ATTEMPTS", default_retry.max_attempts as u64)
                .clamp(1, 10) as u32,
            base_delay: Duration::from_millis(number(
                "MAIL_AGENT_RETRY_BASE_MS",
                default_retry.base_delay.as_millis() as u64,
            )),
            ..default_retry
        };

        Ok(Self {
            pipeline,
            llm,
            retry,
            max_steps: number("MAIL_AGENT_MAX_STEPS", DEFAULT_MAX_STEPS as u64).max(1) as usize,
            maildir: path("MAIL_AGENT_MAILDIR"),
            log_dir: path("MAIL_AGENT_LOG_DIR"),
        })
    }
}

fn parse_overflow(value: &str) -> Result<Overflow, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "truncate" => Ok(Overflow::Truncate),
        "reject" => Ok(Overflow::Reject),
        other => Err(ConfigError::InvalidValue {
            key: "MAIL_AGENT_OVERSIZE".to_string(),
            message: format!("expected truncate or reject, got '{other}'"),
        }),
    }
}
