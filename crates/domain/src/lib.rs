//! Shared types for the myclaw agent runtime.
//!
//! Everything the other crates agree on lives here: the error type, the
//! message model, token usage accounting, provider stream events, tool call
//! types, the engine configuration snapshot, and the cancellation token.

pub mod cancel;
pub mod config;
pub mod error;
pub mod message;
pub mod stream;
pub mod tool;
pub mod usage;

pub use cancel::CancelToken;
pub use config::{EngineConfig, OverflowConfig, ProfileConfig, StateLayout};
pub use error::{Error, Result};
pub use message::{
    now_ms, AssistantContent, AssistantMessage, ChatMessage, ToolResultContent,
    ToolResultMessage, UserContent, UserMessage,
};
pub use stream::{BoxStream, StreamEvent};
pub use tool::{ToolCall, ToolDefinition};
pub use usage::{TokenCost, Usage};
