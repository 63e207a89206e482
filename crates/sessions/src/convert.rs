//! Lossless mapping between persisted transcript records and in-memory
//! messages, plus repair of tool calls orphaned by an interrupted session.
//!
//! Assistant records keep their full content-block sequence verbatim in the
//! `contentBlocks` metadata value; the record's `content` field is only the
//! concatenated visible text. Tool-result records carry their parts and
//! flags in metadata the same way. System records are not messages and are
//! dropped on load.

use serde_json::json;

use mc_domain::{
    AssistantContent, AssistantMessage, ChatMessage, ToolResultContent, ToolResultMessage, Usage,
    UserMessage,
};

use crate::transcript::TranscriptRecord;

/// Text injected for a tool call whose result never made it to disk.
pub const ORPHANED_TOOL_RESULT_TEXT: &str = "[Tool result missing — session was interrupted]";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript → messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert persisted records into messages, in order. System-role records
/// are discarded; tool records without a call id are unanswerable and
/// skipped.
pub fn transcript_to_messages(records: &[TranscriptRecord]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(records.len());

    for record in records {
        match record.role.as_str() {
            "user" => messages.push(ChatMessage::User(UserMessage {
                content: vec![mc_domain::UserContent::Text {
                    text: record.content.clone(),
                }],
                ts: record.ts,
            })),
            "assistant" => messages.push(ChatMessage::Assistant(assistant_from_record(record))),
            "tool" => {
                let Some(call_id) = record.tool_call_id.clone() else {
                    tracing::warn!("skipping tool record without toolCallId");
                    continue;
                };
                messages.push(ChatMessage::ToolResult(tool_result_from_record(
                    record, call_id,
                )));
            }
            "system" => {}
            other => {
                tracing::warn!(role = other, "skipping transcript record with unknown role");
            }
        }
    }

    messages
}

fn assistant_from_record(record: &TranscriptRecord) -> AssistantMessage {
    let meta = record.meta.as_ref();

    // A verbatim contentBlocks value wins; otherwise reconstruct a single
    // text block from the record's visible content.
    let content = meta
        .and_then(|m| m.get("contentBlocks"))
        .and_then(|v| serde_json::from_value::<Vec<AssistantContent>>(v.clone()).ok())
        .unwrap_or_else(|| {
            vec![AssistantContent::Text {
                text: record.content.clone(),
            }]
        });

    let provider = meta
        .and_then(|m| m.get("provider"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_owned();
    let model = meta
        .and_then(|m| m.get("model"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_owned();
    let usage = meta
        .and_then(|m| m.get("usage"))
        .and_then(|v| serde_json::from_value::<Usage>(v.clone()).ok())
        .unwrap_or_default();
    let stop_reason = meta
        .and_then(|m| m.get("stopReason"))
        .and_then(|v| v.as_str())
        .map(str::to_owned);

    AssistantMessage {
        content,
        provider,
        model,
        usage,
        stop_reason,
        ts: record.ts,
    }
}

fn tool_result_from_record(record: &TranscriptRecord, call_id: String) -> ToolResultMessage {
    let meta = record.meta.as_ref();

    let content = meta
        .and_then(|m| m.get("parts"))
        .and_then(|v| serde_json::from_value::<Vec<ToolResultContent>>(v.clone()).ok())
        .unwrap_or_else(|| {
            vec![ToolResultContent::Text {
                text: record.content.clone(),
            }]
        });

    ToolResultMessage {
        tool_call_id: call_id,
        tool_name: meta
            .and_then(|m| m.get("toolName"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned(),
        content,
        is_error: meta
            .and_then(|m| m.get("isError"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        ts: record.ts,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages → transcript
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert messages to persisted records. Inverse of
/// [`transcript_to_messages`] for every field the loader reads back.
pub fn messages_to_transcript(messages: &[ChatMessage]) -> Vec<TranscriptRecord> {
    messages.iter().map(message_to_record).collect()
}

fn message_to_record(message: &ChatMessage) -> TranscriptRecord {
    match message {
        ChatMessage::User(m) => TranscriptRecord {
            role: "user".into(),
            content: m.text_content(),
            ts: m.ts,
            tool_call_id: None,
            meta: None,
        },
        ChatMessage::Assistant(m) => TranscriptRecord {
            role: "assistant".into(),
            content: m.text_content(),
            ts: m.ts,
            tool_call_id: None,
            meta: Some(json!({
                "contentBlocks": m.content,
                "provider": m.provider,
                "model": m.model,
                "usage": m.usage,
                "stopReason": m.stop_reason,
            })),
        },
        ChatMessage::ToolResult(m) => TranscriptRecord {
            role: "tool".into(),
            content: m.text_content(),
            ts: m.ts,
            tool_call_id: Some(m.tool_call_id.clone()),
            meta: Some(json!({
                "toolName": m.tool_name,
                "isError": m.is_error,
                "parts": m.content,
            })),
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orphan repair
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ensure every assistant tool call is answered before the next assistant
/// turn by injecting synthetic error results for the orphans.
///
/// For each assistant message the window up to the next assistant message
/// (or the end of the list) is scanned; any tool call whose id is not
/// answered there gets a synthetic result injected immediately after the
/// assistant, with the assistant's timestamp. Idempotent: a repaired list
/// passes through unchanged.
pub fn repair_orphaned_tool_calls(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut repaired = Vec::with_capacity(messages.len());

    for (i, message) in messages.iter().enumerate() {
        repaired.push(message.clone());

        let Some(assistant) = message.as_assistant() else {
            continue;
        };
        let calls = assistant.tool_calls();
        if calls.is_empty() {
            continue;
        }

        // Scan forward to the next assistant message for answered ids.
        let window = messages[i + 1..]
            .iter()
            .take_while(|m| m.as_assistant().is_none());
        let answered: Vec<&str> = window
            .filter_map(|m| m.as_tool_result())
            .map(|r| r.tool_call_id.as_str())
            .collect();

        for call in &calls {
            if answered.iter().any(|id| *id == call.call_id) {
                continue;
            }
            tracing::warn!(
                call_id = %call.call_id,
                tool = %call.tool_name,
                "injecting synthetic result for orphaned tool call"
            );
            repaired.push(ChatMessage::ToolResult(ToolResultMessage {
                tool_call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                content: vec![ToolResultContent::Text {
                    text: ORPHANED_TOOL_RESULT_TEXT.into(),
                }],
                is_error: true,
                ts: assistant.ts,
            }));
        }
    }

    repaired
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_domain::UserContent;

    fn assistant_with_calls(ids: &[&str], ts: i64) -> ChatMessage {
        let mut content = vec![AssistantContent::Text {
            text: "working on it".into(),
        }];
        for id in ids {
            content.push(AssistantContent::ToolCall {
                id: (*id).into(),
                name: "exec".into(),
                arguments: json!({"command": "ls"}),
            });
        }
        ChatMessage::Assistant(AssistantMessage {
            content,
            provider: "openai".into(),
            model: "gpt-4o".into(),
            usage: Usage::default(),
            stop_reason: Some("tool_calls".into()),
            ts,
        })
    }

    fn tool_result(id: &str, ts: i64) -> ChatMessage {
        ChatMessage::ToolResult(ToolResultMessage {
            tool_call_id: id.into(),
            tool_name: "exec".into(),
            content: vec![ToolResultContent::Text { text: "ok".into() }],
            is_error: false,
            ts,
        })
    }

    fn user(text: &str, ts: i64) -> ChatMessage {
        ChatMessage::User(UserMessage {
            content: vec![UserContent::Text { text: text.into() }],
            ts,
        })
    }

    // ── round trip ─────────────────────────────────────────────────

    #[test]
    fn round_trip_preserves_roles_blocks_ids_and_timestamps() {
        let original = vec![
            user("run ls for me", 100),
            assistant_with_calls(&["tc1"], 200),
            tool_result("tc1", 300),
            ChatMessage::Assistant(AssistantMessage {
                content: vec![
                    AssistantContent::Thinking {
                        text: "that went fine".into(),
                    },
                    AssistantContent::Text {
                        text: "done".into(),
                    },
                ],
                provider: "openai".into(),
                model: "gpt-4o".into(),
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                    total_tokens: 15,
                    ..Usage::default()
                },
                stop_reason: Some("stop".into()),
                ts: 400,
            }),
        ];

        let back = transcript_to_messages(&messages_to_transcript(&original));
        assert_eq!(back, original);
    }

    #[test]
    fn multi_part_tool_result_round_trips() {
        let original = vec![ChatMessage::ToolResult(ToolResultMessage {
            tool_call_id: "tc7".into(),
            tool_name: "read_file".into(),
            content: vec![
                ToolResultContent::Text { text: "part one".into() },
                ToolResultContent::Text { text: "part two".into() },
            ],
            is_error: true,
            ts: 42,
        })];
        let back = transcript_to_messages(&messages_to_transcript(&original));
        assert_eq!(back, original);
    }

    #[test]
    fn system_records_are_discarded() {
        let records = vec![
            TranscriptRecord::new("system", "you are helpful"),
            TranscriptRecord::new("user", "hello"),
        ];
        let messages = transcript_to_messages(&records);
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], ChatMessage::User(_)));
    }

    #[test]
    fn assistant_without_metadata_gets_defaults() {
        let records = vec![TranscriptRecord::new("assistant", "plain reply")];
        let messages = transcript_to_messages(&records);
        let assistant = messages[0].as_assistant().unwrap();
        assert_eq!(assistant.provider, "unknown");
        assert_eq!(assistant.model, "unknown");
        assert_eq!(assistant.usage, Usage::default());
        assert_eq!(assistant.text_content(), "plain reply");
    }

    #[test]
    fn tool_record_without_call_id_is_skipped() {
        let records = vec![TranscriptRecord::new("tool", "stray output")];
        assert!(transcript_to_messages(&records).is_empty());
    }

    // ── orphan repair ──────────────────────────────────────────────

    #[test]
    fn repair_injects_result_for_orphaned_call() {
        let list = vec![
            user("go", 1),
            assistant_with_calls(&["tc1"], 2),
            ChatMessage::Assistant(AssistantMessage::text("next turn")),
        ];
        let repaired = repair_orphaned_tool_calls(list);

        assert_eq!(repaired.len(), 4);
        let injected = repaired[2].as_tool_result().unwrap();
        assert_eq!(injected.tool_call_id, "tc1");
        assert_eq!(injected.tool_name, "exec");
        assert!(injected.is_error);
        assert_eq!(injected.text_content(), ORPHANED_TOOL_RESULT_TEXT);
        assert_eq!(injected.ts, 2, "synthetic result carries the assistant's timestamp");
    }

    #[test]
    fn repair_leaves_answered_calls_alone() {
        let list = vec![
            user("go", 1),
            assistant_with_calls(&["tc1"], 2),
            tool_result("tc1", 3),
            ChatMessage::Assistant(AssistantMessage::text("done")),
        ];
        let repaired = repair_orphaned_tool_calls(list.clone());
        assert_eq!(repaired, list);
    }

    #[test]
    fn repair_handles_partially_answered_batch() {
        let list = vec![
            assistant_with_calls(&["tc1", "tc2"], 5),
            tool_result("tc2", 6),
        ];
        let repaired = repair_orphaned_tool_calls(list);

        // Injected tc1 lands immediately after the assistant.
        assert_eq!(repaired.len(), 3);
        assert_eq!(repaired[1].as_tool_result().unwrap().tool_call_id, "tc1");
        assert!(repaired[1].as_tool_result().unwrap().is_error);
        assert_eq!(repaired[2].as_tool_result().unwrap().tool_call_id, "tc2");
    }

    #[test]
    fn repair_window_stops_at_next_assistant() {
        // tc1's answer appears only AFTER the next assistant message, which
        // does not count as answered.
        let list = vec![
            assistant_with_calls(&["tc1"], 1),
            ChatMessage::Assistant(AssistantMessage::text("interrupting")),
            tool_result("tc1", 9),
        ];
        let repaired = repair_orphaned_tool_calls(list);
        assert_eq!(repaired.len(), 4);
        assert_eq!(repaired[1].as_tool_result().unwrap().text_content(), ORPHANED_TOOL_RESULT_TEXT);
    }

    #[test]
    fn repair_is_idempotent() {
        let list = vec![
            user("go", 1),
            assistant_with_calls(&["tc1", "tc2"], 2),
            ChatMessage::Assistant(AssistantMessage::text("next")),
        ];
        let once = repair_orphaned_tool_calls(list);
        let twice = repair_orphaned_tool_calls(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn repair_of_clean_list_is_identity() {
        let list = vec![
            user("hi", 1),
            ChatMessage::Assistant(AssistantMessage::text("hello")),
        ];
        assert_eq!(repair_orphaned_tool_calls(list.clone()), list);
    }
}
