//! Error types for the mail agent.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Email source error: {0}")]
    Source(#[from] SourceError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Episode failed: {0}")]
    Episode(#[from] EpisodeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse kind of an LLM failure, as seen by callers of the LLM service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    Unavailable,
    RateLimited,
    InvalidResponse,
}

/// LLM service errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Prompt template {template} is missing variable {variable}")]
    MissingVariable {
        template: &'static str,
        variable: &'static str,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Map onto the three kinds exposed by the LLM service interface.
    pub fn kind(&self) -> LlmErrorKind {
        match self {
            Self::RateLimited { .. } => LlmErrorKind::RateLimited,
            Self::InvalidResponse { .. } | Self::Json(_) => LlmErrorKind::InvalidResponse,
            Self::Unavailable { .. } | Self::AuthFailed { .. } | Self::MissingVariable { .. } => {
                LlmErrorKind::Unavailable
            }
        }
    }

    /// Shorthand for a parse failure on structured output.
    pub fn invalid_response(provider: &str, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }
}

/// Email source adapter errors (the FetchError family).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Email source {source_name} unreachable: {reason}")]
    Unreachable { source_name: String, reason: String },

    #[error("Email {id} not found")]
    NotFound { id: String },

    #[error("Email source {source_name} rate limited, retry after {retry_after:?}")]
    RateLimited {
        source_name: String,
        retry_after: Option<Duration>,
    },

    #[error("Email source rejected change to {id}: {reason}")]
    Rejected { id: String, reason: String },

    #[error("Invalid search criteria: {0}")]
    InvalidCriteria(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tool invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Invalid arguments for tool {name}: {reason}")]
    SchemaInvalid { name: String, reason: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },
}

impl ToolError {
    /// Stable short label used in episode traces.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "tool_not_found",
            Self::SchemaInvalid { .. } => "tool_schema_invalid",
            Self::ExecutionFailed { .. } => "execution_failed",
        }
    }
}

/// Per-item pipeline and operation errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] SourceError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Input too large: {length} chars > {max}")]
    InputTooLarge { length: usize, max: usize },

    #[error("Label {label} is both added and removed")]
    LabelConflict { label: String },

    #[error("Rules evaluation failed: {0}")]
    Rules(String),
}

/// Terminal failure reasons of a reasoning episode.
#[derive(Debug, thiserror::Error)]
pub enum EpisodeError {
    #[error("no applicable tool: {reason}")]
    NoApplicableTool { reason: String },

    #[error("reasoning budget exceeded after {max_steps} steps")]
    BudgetExceeded { max_steps: usize },

    #[error("reasoning service unavailable: {0}")]
    ReasoningUnavailable(#[from] LlmError),

    /// The episode state machine was driven out of order.
    #[error("internal episode error: {reason}")]
    InvalidTransition { reason: String },
}

/// Result type alias for the agent.
pub type Result<T> = std::result::Result<T, Error>;
