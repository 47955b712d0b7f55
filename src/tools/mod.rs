//! Tools the reasoning model can call.
//!
//! Each tool has a static [`ToolSpec`] (name, typed parameters, side-effect
//! flags) and executes through the shared mail operations.

pub mod call;
pub mod registry;
pub mod spec;

pub use call::{ToolCall, ToolKind, ToolOutput};
pub use registry::ToolRegistry;
pub use spec::{ParamSpec, ParamType, ToolSpec};
