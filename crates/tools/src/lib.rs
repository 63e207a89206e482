//! Tool layer: the uniform tool interface the engine dispatches through,
//! the invoker that bounds results, and the built-in workspace tool set
//! (file operations and shell execution, sandboxed to the workspace root).

pub mod exec;
pub mod file_ops;
pub mod invoker;
pub mod registry;

pub use invoker::{bound_text, run_tool_call};
pub use registry::{workspace_registry, Tool, ToolOutput, ToolRegistry};
