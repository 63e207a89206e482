use serde::Serialize;
use std::pin::Pin;

use crate::usage::Usage;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Fine-grained events emitted while streaming a provider response.
///
/// Provider-agnostic: every adapter converts its wire format to these.
/// When a caller registers an event callback they are forwarded verbatim,
/// in provider order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text.
    TextDelta { text: String },

    /// Incremental reasoning text (hidden from end-user output).
    ThinkingDelta { text: String },

    /// A tool call has started.
    ToolCallStarted { call_id: String, tool_name: String },

    /// Incremental tool call argument data.
    ToolCallDelta { call_id: String, delta: String },

    /// A tool call is complete with full arguments.
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Stream is finished.
    Done {
        usage: Option<Usage>,
        stop_reason: Option<String>,
    },

    /// An error occurred during streaming.
    Error { message: String },
}
