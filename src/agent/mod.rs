//! Agentic side of the core: reasoning episodes and the ReAct tool router.

pub mod episode;
pub mod router;

pub use episode::{EpisodeState, ReasoningEpisode, Step, ToolInvocation};
pub use router::{DEFAULT_MAX_STEPS, ToolRouter};
