//! Context-overflow recovery.
//!
//! Two stages, attempted in order, each at most once per iteration:
//!
//! 1. **Compaction**: everything but the last K messages is summarised
//!    through an injected provider call and replaced with a single
//!    `[Conversation summary]` user message.
//! 2. **Tool-result truncation**: oversized tool-result text parts are cut
//!    to a hard cap with an omission marker.
//!
//! The provider is injected as a closure so this module never depends on
//! the run loop that owns the client.

use std::future::Future;

use mc_domain::{
    now_ms, ChatMessage, Result, ToolResultContent, UserContent, UserMessage,
};

/// Prefix of the message that replaces compacted history.
pub const SUMMARY_MARKER: &str = "[Conversation summary]";

/// Per-record clamp applied to tool-result text when rendering history for
/// the summarisation prompt.
const TOOL_RENDER_CLAMP: usize = 500;

const SUMMARY_DIRECTIVE: &str = "\
Summarize the conversation below into a concise brief that preserves the \
current goal, decisions made, open questions, important facts about the \
user, and any pending tool state. Write in present tense; omit greetings. \
Reply with the summary only.";

/// Which recovery stages have run this iteration. Reset after tool calls
/// execute so a later iteration may recover again.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverflowRecovery {
    pub compaction_attempted: bool,
    pub truncation_attempted: bool,
}

impl OverflowRecovery {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn exhausted(&self) -> bool {
        self.compaction_attempted && self.truncation_attempted
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage 1: compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Render messages as plain text for the summarisation prompt.
pub fn render_for_summary(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        match message {
            ChatMessage::User(m) => {
                out.push_str("User: ");
                out.push_str(&m.text_content());
            }
            ChatMessage::Assistant(m) => {
                out.push_str("Assistant: ");
                out.push_str(&m.text_content());
            }
            ChatMessage::ToolResult(m) => {
                out.push_str(&format!("Tool ({}): ", m.tool_name));
                out.push_str(&clamp_chars(&m.text_content(), TOOL_RENDER_CLAMP));
            }
        }
        out.push('\n');
    }
    out
}

/// The single-message prompt sent to the summariser.
pub fn build_summary_prompt(old: &[ChatMessage]) -> String {
    format!("{SUMMARY_DIRECTIVE}\n\n{}", render_for_summary(old))
}

/// Replace everything but the last `keep_recent` messages with one summary
/// message. Returns the input unchanged when there is nothing to compact.
///
/// `summarize` receives the rendered prompt and returns the summary text,
/// typically via a closure over the provider client and the current
/// credential.
pub async fn compact_history<F, Fut>(
    messages: Vec<ChatMessage>,
    keep_recent: usize,
    summarize: F,
) -> Result<Vec<ChatMessage>>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    if messages.len() <= keep_recent {
        return Ok(messages);
    }

    let split = messages.len() - keep_recent;
    let (old, recent) = messages.split_at(split);

    let summary = summarize(build_summary_prompt(old)).await?;
    tracing::info!(
        compacted = old.len(),
        kept = recent.len(),
        summary_chars = summary.len(),
        "history compacted"
    );

    let mut compacted = Vec::with_capacity(recent.len() + 1);
    compacted.push(ChatMessage::User(UserMessage {
        content: vec![UserContent::Text {
            text: format!("{SUMMARY_MARKER}\n{summary}"),
        }],
        ts: now_ms(),
    }));
    compacted.extend_from_slice(recent);
    Ok(compacted)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage 2: tool-result truncation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cut every oversized tool-result text part down to `max_chars`, in
/// place. Under-cap parts are untouched. Returns whether anything changed.
pub fn truncate_tool_results(messages: &mut [ChatMessage], max_chars: usize) -> bool {
    let mut mutated = false;

    for message in messages.iter_mut() {
        let ChatMessage::ToolResult(result) = message else {
            continue;
        };
        for part in result.content.iter_mut() {
            let ToolResultContent::Text { text } = part;
            let total = text.chars().count();
            if total <= max_chars {
                continue;
            }
            let prefix: String = text.chars().take(max_chars).collect();
            *text = format!("{prefix}\n[truncated {} chars]", total - max_chars);
            mutated = true;
        }
    }

    mutated
}

fn clamp_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_owned()
    } else {
        s.chars().take(max_chars).collect()
    }
}
