//! Agent-level events delivered to the caller's event callback.

use serde::Serialize;

use mc_domain::{AssistantMessage, StreamEvent};

use crate::runner::RunOutcome;

/// Discriminated union of everything a run can report while in flight.
///
/// Causal order within a turn:
/// `llm_start, (llm_stream)*, llm_end, (tool_start, tool_end)*,
/// [retry* | compaction], …, done`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A provider call is about to be made.
    LlmStart { iteration: usize },

    /// A fine-grained provider stream event, forwarded verbatim.
    LlmStream { event: StreamEvent },

    /// The provider call completed with this assistant message.
    LlmEnd { message: AssistantMessage },

    ToolStart {
        tool_name: String,
        tool_call_id: String,
    },

    ToolEnd {
        tool_name: String,
        tool_call_id: String,
        duration_ms: u64,
        is_error: bool,
    },

    /// A retriable provider failure; the next attempt uses `profile_id`.
    Retry {
        attempt: usize,
        reason: String,
        profile_id: String,
    },

    /// Overflow recovery mutated the message list.
    Compaction { old_count: usize, new_count: usize },

    /// The run finished.
    Done { result: RunOutcome },
}

impl AgentEvent {
    /// Event discriminant, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::LlmStart { .. } => "llm_start",
            AgentEvent::LlmStream { .. } => "llm_stream",
            AgentEvent::LlmEnd { .. } => "llm_end",
            AgentEvent::ToolStart { .. } => "tool_start",
            AgentEvent::ToolEnd { .. } => "tool_end",
            AgentEvent::Retry { .. } => "retry",
            AgentEvent::Compaction { .. } => "compaction",
            AgentEvent::Done { .. } => "done",
        }
    }
}

/// Caller-supplied observer for agent events.
pub type EventCallback = Box<dyn Fn(&AgentEvent) + Send + Sync>;
