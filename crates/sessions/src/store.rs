//! Session metadata index.
//!
//! A single `sessions.json` file maps session key → entry. Reads go through
//! an in-memory cache keyed by the file's last-modified time; cache hits
//! return deep copies so callers can never mutate cached state. A corrupt
//! index is preserved as `sessions.json.bak.<ts>` and replaced by an empty
//! map rather than failing the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use mc_domain::{now_ms, Result};

use crate::session_key::session_slug;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One row of the index. `session_id` and `session_file` are immutable
/// after creation; `updated_at` refreshes on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub session_id: String,
    pub updated_at: i64,
    pub session_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Mutable annotation fields applied by [`SessionIndex::upsert_meta`].
/// `None` leaves the existing value in place.
#[derive(Debug, Clone, Default)]
pub struct SessionMetaPatch {
    pub last_channel: Option<String>,
    pub last_to: Option<String>,
    pub chat_type: Option<String>,
    pub model: Option<String>,
    pub total_tokens: Option<u64>,
    pub extra: Option<serde_json::Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session index
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CachedIndex {
    modified: SystemTime,
    entries: HashMap<String, SessionEntry>,
}

/// The key → entry map backed by `sessions.json`.
pub struct SessionIndex {
    path: PathBuf,
    cache: RwLock<Option<CachedIndex>>,
}

impl SessionIndex {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: sessions_dir.into().join("sessions.json"),
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the index. An absent file yields an empty map. When the file's
    /// last-modified time matches the cached value the cached map is
    /// returned as a defensive copy; otherwise the file is re-parsed.
    pub fn load(&self) -> Result<HashMap<String, SessionEntry>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let modified = std::fs::metadata(&self.path)?.modified()?;

        {
            let cache = self.cache.read();
            if let Some(cached) = cache.as_ref() {
                if cached.modified == modified {
                    return Ok(cached.entries.clone());
                }
            }
        }

        let entries = self.read_from_disk()?;
        *self.cache.write() = Some(CachedIndex {
            modified,
            entries: entries.clone(),
        });
        Ok(entries)
    }

    /// Serialise the whole map (pretty-printed) and refresh the cache.
    pub fn save(&self, entries: &HashMap<String, SessionEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json)?;

        let modified = std::fs::metadata(&self.path)?.modified()?;
        *self.cache.write() = Some(CachedIndex {
            modified,
            entries: entries.clone(),
        });
        Ok(())
    }

    /// Read-modify-write with the cache bypassed on the read side, so
    /// external writes since the last cache fill are never clobbered.
    pub fn update<F>(&self, mutate: F) -> Result<HashMap<String, SessionEntry>>
    where
        F: FnOnce(&mut HashMap<String, SessionEntry>),
    {
        let mut entries = if self.path.exists() {
            self.read_from_disk()?
        } else {
            HashMap::new()
        };
        mutate(&mut entries);
        self.save(&entries)?;
        Ok(entries)
    }

    /// Merge a patch into an entry, creating the entry (fresh identifier,
    /// derived filename) when the key is new. Refreshes `updated_at` either
    /// way and returns the resulting entry.
    pub fn upsert_meta(&self, session_key: &str, patch: SessionMetaPatch) -> Result<SessionEntry> {
        let entries = self.update(|entries| {
            let entry = entries.entry(session_key.to_owned()).or_insert_with(|| {
                SessionEntry {
                    session_id: uuid::Uuid::new_v4().to_string(),
                    updated_at: now_ms(),
                    session_file: format!("{}.jsonl", session_slug(session_key)),
                    last_channel: None,
                    last_to: None,
                    chat_type: None,
                    model: None,
                    total_tokens: None,
                    extra: None,
                }
            });
            apply_patch(entry, patch);
            entry.updated_at = now_ms();
        })?;
        entries
            .get(session_key)
            .cloned()
            .ok_or_else(|| mc_domain::Error::Other("upserted session entry missing".into()))
    }

    /// Remove an entry. Reports whether the key was present.
    pub fn delete(&self, session_key: &str) -> Result<bool> {
        let mut removed = false;
        self.update(|entries| {
            removed = entries.remove(session_key).is_some();
        })?;
        Ok(removed)
    }

    /// All session keys currently in the index.
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self.load()?.keys().cloned().collect())
    }

    /// Remove entries older than `now - max_age_ms`; returns how many were
    /// pruned.
    pub fn prune(&self, max_age_ms: i64) -> Result<usize> {
        let cutoff = now_ms() - max_age_ms;
        let mut pruned = 0;
        self.update(|entries| {
            let before = entries.len();
            entries.retain(|_, e| e.updated_at >= cutoff);
            pruned = before - entries.len();
        })?;
        Ok(pruned)
    }

    fn read_from_disk(&self) -> Result<HashMap<String, SessionEntry>> {
        let raw = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                let backup = self
                    .path
                    .with_file_name(format!("sessions.json.bak.{}", now_ms()));
                tracing::warn!(
                    error = %e,
                    backup = %backup.display(),
                    "sessions.json is corrupt; preserving and starting empty"
                );
                std::fs::rename(&self.path, &backup)?;
                Ok(HashMap::new())
            }
        }
    }
}

fn apply_patch(entry: &mut SessionEntry, patch: SessionMetaPatch) {
    if let Some(v) = patch.last_channel {
        entry.last_channel = Some(v);
    }
    if let Some(v) = patch.last_to {
        entry.last_to = Some(v);
    }
    if let Some(v) = patch.chat_type {
        entry.chat_type = Some(v);
    }
    if let Some(v) = patch.model {
        entry.model = Some(v);
    }
    if let Some(v) = patch.total_tokens {
        entry.total_tokens = Some(v);
    }
    if let Some(v) = patch.extra {
        entry.extra = Some(v);
    }
}
