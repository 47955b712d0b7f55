//! Template-driven LLM service: `complete(template, variables) -> text`.

use std::sync::Arc;

use tracing::debug;

use crate::error::LlmError;
use crate::llm::prompts::{PromptTemplate, PromptVars};
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::llm::retry::RetryPolicy;

/// Wraps a provider with fixed templates and bounded retry.
#[derive(Clone)]
pub struct LlmService {
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
}

impl LlmService {
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Render `template` with `vars` and run it, retrying transient failures.
    pub async fn complete(
        &self,
        template: PromptTemplate,
        vars: &PromptVars,
    ) -> Result<String, LlmError> {
        let user = template.render(vars)?;
        let request = CompletionRequest::new(vec![
            ChatMessage::system(template.system_prompt()),
            ChatMessage::user(user),
        ])
        .with_temperature(template.temperature())
        .with_max_tokens(template.max_tokens())
        .with_metadata("template", template.id());

        let response = self
            .retry
            .run(template.id(), || self.provider.complete(request.clone()))
            .await?;

        debug!(
            template = template.id(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "LLM call complete"
        );
        Ok(response.content)
    }
}

/// Extract a JSON object or array from model output (handles markdown wrapping).
pub fn extract_json(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') || inner.starts_with('[') {
                return inner.to_string();
            }
        }
    }

    // Whichever opener comes first decides between an object and an array.
    let opener = match (trimmed.find('{'), trimmed.find('[')) {
        (Some(obj), Some(arr)) if arr < obj => Some((arr, ']')),
        (Some(obj), _) => Some((obj, '}')),
        (None, Some(arr)) => Some((arr, ']')),
        (None, None) => None,
    };
    if let Some((start, close)) = opener
        && let Some(end) = trimmed.rfind(close)
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
