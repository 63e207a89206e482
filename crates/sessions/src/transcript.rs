//! Append-only JSONL transcripts.
//!
//! One file per session at `<sessionsDir>/<slug>.jsonl`. The first line is
//! always the session header; every message after it is a single compact
//! JSON line. Appends are whole-record single writes so an interrupted
//! process can truncate at most the trailing line, and the loader tolerates
//! exactly that.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use mc_domain::{now_ms, Result};

use crate::session_key::session_slug;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The first line of every transcript file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHeader {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

impl SessionHeader {
    pub fn new(session_key: &str) -> Self {
        Self {
            kind: "session".into(),
            session_key: session_key.to_owned(),
            created_at: now_ms(),
        }
    }
}

/// A single persisted message line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub role: String,
    pub content: String,
    pub ts: i64,
    #[serde(
        rename = "toolCallId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl TranscriptRecord {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_owned(),
            content: content.to_owned(),
            ts: now_ms(),
            tool_call_id: None,
            meta: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only transcript store, one JSONL file per session key.
pub struct TranscriptLog {
    sessions_dir: PathBuf,
}

impl TranscriptLog {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    pub fn path_for(&self, session_key: &str) -> PathBuf {
        self.sessions_dir
            .join(format!("{}.jsonl", session_slug(session_key)))
    }

    /// Append one message.
    pub fn append(&self, session_key: &str, record: &TranscriptRecord) -> Result<()> {
        self.append_batch(session_key, std::slice::from_ref(record))
    }

    /// Append several messages as one filesystem write, so an interruption
    /// can only truncate the batch at a line boundary.
    pub fn append_batch(&self, session_key: &str, records: &[TranscriptRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let path = self.ensure_file(session_key)?;

        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(buf.as_bytes())?;

        tracing::debug!(
            session_key,
            lines = records.len(),
            "transcript appended"
        );
        Ok(())
    }

    /// Load all messages in file order. Missing file yields an empty list;
    /// the header, blank lines, and malformed lines are skipped without
    /// failing the load.
    pub fn load(&self, session_key: &str) -> Result<Vec<TranscriptRecord>> {
        let path = self.path_for(session_key);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(&path)?;
        let mut records = Vec::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: serde_json::Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(session_key, error = %e, "skipping malformed transcript line");
                    continue;
                }
            };
            if value.get("type").and_then(|v| v.as_str()) == Some("session") {
                continue;
            }
            match serde_json::from_value::<TranscriptRecord>(value) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(session_key, error = %e, "skipping malformed transcript line");
                }
            }
        }
        Ok(records)
    }

    /// Number of message lines (the header does not count).
    pub fn count(&self, session_key: &str) -> Result<usize> {
        Ok(self.load(session_key)?.len())
    }

    /// Remove a session's transcript. Idempotent; reports whether a file
    /// was actually removed.
    pub fn delete(&self, session_key: &str) -> Result<bool> {
        let path = self.path_for(session_key);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        Ok(true)
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Create the directory and write the header line (one atomic write)
    /// before the first append.
    fn ensure_file(&self, session_key: &str) -> Result<PathBuf> {
        let path = self.path_for(session_key);
        if !path.exists() {
            std::fs::create_dir_all(&self.sessions_dir)?;
            let header = SessionHeader::new(session_key);
            let mut line = serde_json::to_string(&header)?;
            line.push('\n');
            std::fs::write(&path, line)?;
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> (tempfile::TempDir, TranscriptLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path().join("sessions"));
        (dir, log)
    }

    const KEY: &str = "agent:main:channel:cli:account:default:peer:direct:tester";

    #[test]
    fn first_append_writes_header_line() {
        let (_dir, log) = log();
        log.append(KEY, &TranscriptRecord::new("user", "hello")).unwrap();

        let raw = std::fs::read_to_string(log.path_for(KEY)).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);

        let header: SessionHeader = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(header.kind, "session");
        assert_eq!(header.session_key, KEY);
    }

    #[test]
    fn load_returns_messages_in_order() {
        let (_dir, log) = log();
        log.append(KEY, &TranscriptRecord::new("user", "one")).unwrap();
        log.append(KEY, &TranscriptRecord::new("assistant", "two")).unwrap();
        log.append(KEY, &TranscriptRecord::new("user", "three")).unwrap();

        let records = log.load(KEY).unwrap();
        let contents: Vec<&str> = records.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn append_batch_is_a_single_write() {
        let (_dir, log) = log();
        let batch = vec![
            TranscriptRecord::new("user", "q"),
            TranscriptRecord::new("assistant", "a"),
        ];
        log.append_batch(KEY, &batch).unwrap();
        assert_eq!(log.count(KEY).unwrap(), 2);
    }

    #[test]
    fn load_skips_blank_and_malformed_lines() {
        let (_dir, log) = log();
        log.append(KEY, &TranscriptRecord::new("user", "valid one")).unwrap();

        // Corrupt the file the way a crashed writer would.
        let path = log.path_for(KEY);
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("\n{not json at all\n\n");
        std::fs::write(&path, raw).unwrap();

        log.append(KEY, &TranscriptRecord::new("assistant", "valid two")).unwrap();

        let records = log.load(KEY).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(log.count(KEY).unwrap(), 2);
        assert_eq!(records[0].content, "valid one");
        assert_eq!(records[1].content, "valid two");
    }

    #[test]
    fn load_accepts_unknown_fields() {
        let (_dir, log) = log();
        log.append(KEY, &TranscriptRecord::new("user", "hi")).unwrap();

        let path = log.path_for(KEY);
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str(r#"{"role":"assistant","content":"yo","ts":1,"futureField":true}"#);
        raw.push('\n');
        std::fs::write(&path, raw).unwrap();

        assert_eq!(log.count(KEY).unwrap(), 2);
    }

    #[test]
    fn load_missing_file_is_empty() {
        let (_dir, log) = log();
        assert!(log.load(KEY).unwrap().is_empty());
        assert_eq!(log.count(KEY).unwrap(), 0);
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, log) = log();
        log.append(KEY, &TranscriptRecord::new("user", "x")).unwrap();
        assert!(log.delete(KEY).unwrap());
        assert!(!log.delete(KEY).unwrap());
    }

    #[test]
    fn tool_call_id_round_trips_with_camel_case_name() {
        let mut record = TranscriptRecord::new("tool", "result");
        record.tool_call_id = Some("tc_9".into());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"toolCallId\":\"tc_9\""));

        let back: TranscriptRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_call_id.as_deref(), Some("tc_9"));
    }
}
