//! Session persistence for the myclaw runtime.
//!
//! Canonical session keys and filesystem slugs, append-only JSONL
//! transcripts, the `sessions.json` metadata index, and the lossless
//! transcript ↔ message conversion (including orphaned-tool-call repair).

pub mod convert;
pub mod session_key;
pub mod store;
pub mod transcript;

pub use convert::{
    messages_to_transcript, repair_orphaned_tool_calls, transcript_to_messages,
    ORPHANED_TOOL_RESULT_TEXT,
};
pub use session_key::{
    build_session_key, parse_session_key, session_slug, PeerKind, SessionKeyParams,
};
pub use store::{SessionEntry, SessionIndex, SessionMetaPatch};
pub use transcript::{SessionHeader, TranscriptLog, TranscriptRecord};
