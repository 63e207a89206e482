//! Tool invocation with result bounding.
//!
//! Dispatch failures never abort the turn: an unknown tool name or a tool
//! error is captured as a tool result with the error flag set, and the run
//! loop carries on.

use mc_domain::{CancelToken, ToolCall, ToolResultMessage};

use crate::registry::ToolRegistry;

/// Dispatch one tool call and produce its result message. Output text is
/// bounded to `max_result_chars` before it enters history.
pub async fn run_tool_call(
    registry: &ToolRegistry,
    call: &ToolCall,
    cancel: &CancelToken,
    max_result_chars: usize,
) -> ToolResultMessage {
    let Some(tool) = registry.get(&call.tool_name) else {
        return ToolResultMessage::error(
            &call.call_id,
            &call.tool_name,
            format!("unknown tool: {}", call.tool_name),
        );
    };

    match tool
        .invoke(&call.call_id, call.arguments.clone(), cancel)
        .await
    {
        Ok(output) => ToolResultMessage::text(
            &call.call_id,
            &call.tool_name,
            bound_text(&output.text_content(), max_result_chars),
        ),
        Err(e) => {
            tracing::warn!(tool = %call.tool_name, call_id = %call.call_id, error = %e, "tool failed");
            ToolResultMessage::error(
                &call.call_id,
                &call.tool_name,
                format!("tool {} failed: {e}", call.tool_name),
            )
        }
    }
}

/// Prefix truncation with an omission marker. Under-cap input is returned
/// unchanged.
pub fn bound_text(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_owned();
    }
    let prefix: String = text.chars().take(max_chars).collect();
    format!("{prefix}\n[truncated {} chars]", total - max_chars)
}
