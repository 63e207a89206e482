//! Session key computation and parsing.
//!
//! Canonical form:
//!
//! `agent:<agent>:channel:<channel>:account:<account>:peer:<kind>:<peerId>`
//!
//! Every segment is normalised before assembly, so the key deterministically
//! routes messages to sessions regardless of how the inbound metadata was
//! spelled. The peer identifier is the only segment allowed to contain `:`;
//! parsers treat it as everything after the `peer:<kind>:` prefix.

use std::fmt;

use serde::{Deserialize, Serialize};

use mc_domain::{Error, Result};

/// Maximum code points retained per normalised segment.
const SEGMENT_MAX_CHARS: usize = 128;

/// Conversation scope of the peer segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    Direct,
    Group,
    Channel,
}

impl PeerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerKind::Direct => "direct",
            PeerKind::Group => "group",
            PeerKind::Channel => "channel",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(PeerKind::Direct),
            "group" => Some(PeerKind::Group),
            "channel" => Some(PeerKind::Channel),
            _ => None,
        }
    }
}

impl fmt::Display for PeerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five fields a session key is assembled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeyParams {
    pub agent: String,
    pub channel: String,
    pub account: String,
    pub peer_kind: PeerKind,
    pub peer_id: String,
}

/// Normalise one key segment: trim, lowercase, collapse whitespace runs to
/// `_`, strip anything outside `[a-z0-9_.@+:-]`, clamp to 128 code points.
/// An empty result falls back to the segment-specific default.
fn normalize_segment(raw: &str, fallback: &str) -> String {
    let lowered = raw.trim().to_lowercase();

    let mut collapsed = String::with_capacity(lowered.len());
    let mut in_whitespace = false;
    for ch in lowered.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                collapsed.push('_');
            }
            in_whitespace = true;
        } else {
            collapsed.push(ch);
            in_whitespace = false;
        }
    }

    let cleaned: String = collapsed
        .chars()
        .filter(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | '.' | '@' | '+' | ':' | '-'))
        .take(SEGMENT_MAX_CHARS)
        .collect();

    if cleaned.is_empty() {
        fallback.to_owned()
    } else {
        cleaned
    }
}

/// Assemble the canonical session key. Idempotent: feeding the parsed
/// fields of a built key back in reproduces the same key.
pub fn build_session_key(params: &SessionKeyParams) -> String {
    let agent = normalize_segment(&params.agent, "main");
    let channel = normalize_segment(&params.channel, "unknown");
    let account = normalize_segment(&params.account, "default");
    let peer_id = normalize_segment(&params.peer_id, "unknown");

    format!(
        "agent:{agent}:channel:{channel}:account:{account}:peer:{}:{peer_id}",
        params.peer_kind
    )
}

/// Parse a canonical session key back into its five fields.
///
/// Splits on the first occurrence of each structural marker, so the peer
/// identifier may itself contain `:` separators.
pub fn parse_session_key(key: &str) -> Result<SessionKeyParams> {
    let malformed = || Error::MalformedKey(key.to_owned());

    let rest = key.strip_prefix("agent:").ok_or_else(malformed)?;
    let (agent, rest) = rest.split_once(":channel:").ok_or_else(malformed)?;
    let (channel, rest) = rest.split_once(":account:").ok_or_else(malformed)?;
    let (account, rest) = rest.split_once(":peer:").ok_or_else(malformed)?;
    let (kind, peer_id) = rest.split_once(':').ok_or_else(malformed)?;

    let peer_kind = PeerKind::parse(kind).ok_or_else(malformed)?;
    if agent.is_empty() || channel.is_empty() || account.is_empty() || peer_id.is_empty() {
        return Err(malformed());
    }

    Ok(SessionKeyParams {
        agent: agent.to_owned(),
        channel: channel.to_owned(),
        account: account.to_owned(),
        peer_kind,
        peer_id: peer_id.to_owned(),
    })
}

/// Filesystem-safe form of a session key: every `:` becomes `__`.
pub fn session_slug(key: &str) -> String {
    key.replace(':', "__")
}
