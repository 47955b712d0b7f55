//! Agentic tool router: a bounded ReAct loop over the tool registry.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::agent::episode::{EpisodeState, ReasoningEpisode, ToolInvocation};
use crate::error::{EpisodeError, LlmErrorKind};
use crate::llm::reasoning::{Reasoning, ReasoningStep};
use crate::tools::ToolRegistry;

/// Default maximum number of tool steps per episode.
pub const DEFAULT_MAX_STEPS: usize = 6;

/// Turns a free-text query into a sequence of validated tool calls.
///
/// Episodes share nothing but the registry, so `run` may be called
/// concurrently for independent queries.
pub struct ToolRouter {
    registry: Arc<ToolRegistry>,
    reasoning: Reasoning,
    max_steps: usize,
}

impl ToolRouter {
    pub fn new(registry: Arc<ToolRegistry>, reasoning: Reasoning, max_steps: usize) -> Self {
        Self {
            registry,
            reasoning,
            max_steps: max_steps.max(1),
        }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run one episode to completion. Never panics on model misbehavior;
    /// every failure ends up in `episode.failure`.
    pub async fn run(&self, query: &str) -> ReasoningEpisode {
        let mut episode = ReasoningEpisode::new(query);
        info!(episode = %episode.id, "Starting reasoning episode");

        if let Err(error) = self.drive(&mut episode).await {
            warn!(episode = %episode.id, steps = episode.steps.len(), error = %error, "Episode failed");
            episode.fail(error);
        } else {
            info!(episode = %episode.id, steps = episode.steps.len(), "Episode answered");
        }
        episode
    }

    async fn drive(&self, episode: &mut ReasoningEpisode) -> Result<(), EpisodeError> {
        let catalogue = self.registry.describe();

        loop {
            let step = self
                .reasoning
                .next_step(&catalogue, &episode.query, &episode.trace())
                .await
                .map_err(|e| match e.kind() {
                    LlmErrorKind::InvalidResponse => EpisodeError::NoApplicableTool {
                        reason: format!("unusable reasoning output: {e}"),
                    },
                    LlmErrorKind::Unavailable | LlmErrorKind::RateLimited => {
                        EpisodeError::ReasoningUnavailable(e)
                    }
                })?;

            let (thought, tool, arguments) = match step {
                ReasoningStep::Answer { answer, .. } => {
                    return episode.finish(answer).map_err(invariant);
                }
                ReasoningStep::Act {
                    thought,
                    tool,
                    arguments,
                } => (thought, tool, arguments),
            };

            if episode.steps.len() >= self.max_steps {
                return Err(EpisodeError::BudgetExceeded {
                    max_steps: self.max_steps,
                });
            }

            let arguments = episode
                .resolve_arguments(&arguments)
                .map_err(|reason| EpisodeError::NoApplicableTool {
                    reason: format!("invalid argument reference for {tool}: {reason}"),
                })?;
            let call = self
                .registry
                .resolve(&tool, &arguments)
                .map_err(|e| EpisodeError::NoApplicableTool {
                    reason: e.to_string(),
                })?;

            episode.transition_to(EpisodeState::Acting).map_err(invariant)?;
            debug!(
                episode = %episode.id,
                step = episode.steps.len() + 1,
                tool = %tool,
                "Invoking tool"
            );
            // One attempt only; the next step sees any error as an observation.
            let outcome = self.registry.execute(call).await.map(|out| out.to_value());
            if let Err(ref e) = outcome {
                debug!(tool = %tool, error = %e, "Tool returned an error observation");
            }
            episode
                .record(thought, ToolInvocation::new(tool, arguments, outcome))
                .map_err(invariant)?;
        }
    }
}

fn invariant(reason: String) -> EpisodeError {
    error!(reason = %reason, "Episode state machine violated");
    EpisodeError::InvalidTransition { reason }
}
