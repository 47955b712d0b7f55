//! Deterministic email processing pipeline.
//!
//! Every fetched email flows through:
//! 1. `RuleEvaluator::evaluate()`: weighted pattern matching (no LLM)
//! 2. `HybridClassifier::classify()`: LLM only inside the ambiguity band
//! 3. `Extractor`: summary and tasks for important mail
//! 4. `ActionExecutor`: idempotent label changes for sorting
//!
//! `PipelineOrchestrator` sequences the stages; `email_processor` runs it on a timer.

pub mod actions;
pub mod classifier;
pub mod email_processor;
pub mod extract;
pub mod processor;
pub mod rules;
pub mod types;

pub use processor::PipelineOrchestrator;
