//! Mail Agent: email orchestration core.
//!
//! A deterministic pipeline (fetch, filter, classify, summarize, extract,
//! sort) and an agentic ReAct tool router, both running on the same
//! [`ops::MailOperations`].

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod ops;
pub mod pipeline;
pub mod safety;
pub mod source;
pub mod tools;

#[cfg(test)]
mod test_support;
