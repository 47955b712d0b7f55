//! LLM integration for the mail agent.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! Uses the rig-core crate for HTTP transport and the `RigAdapter` to bridge
//! rig's `CompletionModel` trait to our `LlmProvider` trait. Everything above
//! the provider talks to [`LlmService`], which only accepts fixed templates.

pub mod prompts;
pub mod provider;
pub mod reasoning;
pub mod retry;
mod rig_adapter;
pub mod service;

pub use prompts::{PromptTemplate, PromptVars};
pub use provider::*;
pub use reasoning::{Reasoning, ReasoningStep};
pub use retry::RetryPolicy;
pub use rig_adapter::RigAdapter;
pub use service::{LlmService, extract_json};

use std::str::FromStr;
use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::{ConfigError, LlmError};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    /// Environment variable holding this backend's API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::OpenAi => "gpt-4o",
        }
    }
}

impl FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "gpt" => Ok(Self::OpenAi),
            other => Err(ConfigError::InvalidValue {
                key: "MAIL_AGENT_LLM_BACKEND".to_string(),
                message: format!("unknown backend '{other}' (expected anthropic or openai)"),
            }),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_provider(config),
        LlmBackend::OpenAi => create_openai_provider(config),
    }
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::Unavailable {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::Unavailable {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}
