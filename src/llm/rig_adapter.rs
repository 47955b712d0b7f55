//! Bridge from rig-core's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionError, CompletionModel, Message};

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider, Role};

/// Adapter that drives any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut preamble: Option<String> = None;
        let mut history: Vec<Message> = Vec::new();
        for msg in &request.messages {
            match msg.role {
                Role::System => preamble = Some(msg.content.clone()),
                Role::User => history.push(Message::user(msg.content.clone())),
                Role::Assistant => history.push(Message::assistant(msg.content.clone())),
            }
        }

        let prompt = history.pop().ok_or_else(|| {
            LlmError::invalid_response(&self.model_name, "request has no user message")
        })?;

        let mut builder = self.model.completion_request(prompt).messages(history);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_completion_error(&self.model_name, e))?;

        let content = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            input_tokens: response.usage.input_tokens as u32,
            output_tokens: response.usage.output_tokens as u32,
        })
    }
}

fn map_completion_error(provider: &str, err: CompletionError) -> LlmError {
    let reason = err.to_string();
    let lower = reason.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("overloaded") {
        return LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        };
    }
    if lower.contains("401") || lower.contains("authentication") {
        return LlmError::AuthFailed {
            provider: provider.to_string(),
        };
    }
    match err {
        CompletionError::JsonError(_) | CompletionError::ResponseError(_) => {
            LlmError::invalid_response(provider, reason)
        }
        _ => LlmError::Unavailable {
            provider: provider.to_string(),
            reason,
        },
    }
}
