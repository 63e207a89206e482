//! Engine configuration snapshot and on-disk state layout.
//!
//! The engine treats configuration as an opaque struct supplied by the
//! caller; how it was produced (config files, env substitution, validation)
//! is not this crate's concern.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One credential usable against the configured provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub id: String,
    pub api_key: String,
}

/// Caps applied by the context-overflow recovery stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverflowConfig {
    /// How many trailing messages survive compaction untouched.
    #[serde(default = "d_keep_recent")]
    pub keep_recent_messages: usize,
    /// Per-part character cap applied by the truncation stage. Harsher than
    /// the invoker-time cap: this one only runs when the context already
    /// failed to fit.
    #[serde(default = "d_overflow_cap")]
    pub tool_result_max_chars: usize,
}

impl Default for OverflowConfig {
    fn default() -> Self {
        Self {
            keep_recent_messages: d_keep_recent(),
            tool_result_max_chars: d_overflow_cap(),
        }
    }
}

/// The per-run configuration snapshot handed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Provider name (e.g. `"openai"`, `"openrouter"`, `"ollama"`).
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Base URL override. When absent the provider registry default is used.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Ordered credential profiles. The first is tried first; failover
    /// rotates through the rest.
    pub profiles: Vec<ProfileConfig>,
    /// Tool sandbox directory; bootstrap markdowns live here.
    pub workspace_dir: PathBuf,
    #[serde(default = "d_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "d_max_retries")]
    pub max_retries: usize,
    /// Character cap applied to every tool result before it enters history.
    #[serde(default = "d_tool_result_cap")]
    pub tool_result_max_chars: usize,
    #[serde(default)]
    pub overflow: OverflowConfig,
}

impl EngineConfig {
    /// Minimal config for a workspace, with all limits at their defaults.
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        workspace_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            base_url: None,
            profiles: Vec::new(),
            workspace_dir: workspace_dir.into(),
            max_iterations: d_max_iterations(),
            max_retries: d_max_retries(),
            tool_result_max_chars: d_tool_result_cap(),
            overflow: OverflowConfig::default(),
        }
    }
}

fn d_keep_recent() -> usize {
    10
}
fn d_overflow_cap() -> usize {
    20_000
}
fn d_max_iterations() -> usize {
    25
}
fn d_max_retries() -> usize {
    3
}
fn d_tool_result_cap() -> usize {
    50_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State layout
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Filesystem layout under the state root.
///
/// The root defaults to `<home>/.myclaw` and can be overridden with the
/// `MYCLAW_STATE_DIR` environment variable.
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub const STATE_DIR_ENV: &'static str = "MYCLAW_STATE_DIR";

    /// Resolve the state root from the environment, falling back to
    /// `<home>/.myclaw` and finally to `./.myclaw`.
    pub fn resolve() -> Self {
        let root = std::env::var_os(Self::STATE_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".myclaw")))
            .unwrap_or_else(|| PathBuf::from(".myclaw"));
        Self { root }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-session transcripts plus `sessions.json`.
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// Tool sandbox; bootstrap markdowns live here.
    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join("workspace")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create the directory tree.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.sessions_dir())?;
        std::fs::create_dir_all(self.workspace_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
