//! Workspace bootstrap files.
//!
//! A fixed ordered list of optional markdown documents is read from the
//! workspace and injected into the system prompt, under a per-file cap and
//! a running total cap. First run also scaffolds a default `AGENTS.md`.

use std::path::Path;

use mc_domain::Result;

/// Candidate filenames, in injection order.
pub const BOOTSTRAP_FILES: &[&str] = &[
    "AGENTS.md",
    "SOUL.md",
    "USER.md",
    "TOOLS.md",
    "IDENTITY.md",
    "MEMORY.md",
    "HEARTBEAT.md",
    "BOOTSTRAP.md",
];

pub const DEFAULT_PER_FILE_CAP: usize = 50_000;
pub const DEFAULT_TOTAL_CAP: usize = 200_000;

const DEFAULT_AGENTS_MD: &str = "\
# AGENTS.md

Operating instructions for this assistant.

- Be concise and direct.
- Use the available tools rather than guessing about files or commands.
- Files in this workspace are yours to read and edit.
- Keep durable notes in MEMORY.md; it is loaded into every session.
";

/// One loaded bootstrap document.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapFile {
    pub name: String,
    pub content: String,
}

/// Read the candidate files in order. Missing, unreadable, and
/// whitespace-only files are skipped. Individual contents are clamped to
/// `per_file_cap` characters; once the running total would exceed
/// `total_cap`, the overflowing file is cut to the prefix that fits and
/// loading stops.
pub fn load_bootstrap_files(
    workspace_dir: &Path,
    per_file_cap: usize,
    total_cap: usize,
) -> Vec<BootstrapFile> {
    let mut loaded = Vec::new();
    let mut total = 0usize;

    for &name in BOOTSTRAP_FILES {
        let Ok(raw) = std::fs::read_to_string(workspace_dir.join(name)) else {
            continue;
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        let mut content = clamp_chars(trimmed, per_file_cap);
        let len = content.chars().count();

        if total + len > total_cap {
            let remaining = total_cap - total;
            if remaining == 0 {
                break;
            }
            content = clamp_chars(&content, remaining);
            tracing::debug!(file = name, "bootstrap total cap reached");
            loaded.push(BootstrapFile {
                name: name.to_owned(),
                content,
            });
            break;
        }

        total += len;
        loaded.push(BootstrapFile {
            name: name.to_owned(),
            content,
        });
    }

    loaded
}

/// Ensure the workspace directory exists and scaffold the default
/// `AGENTS.md` when absent. Existing files are never overwritten.
pub fn scaffold_workspace(workspace_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(workspace_dir)?;
    let agents = workspace_dir.join("AGENTS.md");
    if !agents.exists() {
        std::fs::write(&agents, DEFAULT_AGENTS_MD)?;
        tracing::info!(path = %agents.display(), "scaffolded default AGENTS.md");
    }
    Ok(())
}

fn clamp_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_owned()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn loads_files_in_fixed_order() {
        let dir = workspace();
        std::fs::write(dir.path().join("SOUL.md"), "soul").unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "agents").unwrap();
        std::fs::write(dir.path().join("BOOTSTRAP.md"), "boot").unwrap();

        let files = load_bootstrap_files(dir.path(), 1000, 10_000);
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["AGENTS.md", "SOUL.md", "BOOTSTRAP.md"]);
    }

    #[test]
    fn skips_missing_and_blank_files() {
        let dir = workspace();
        std::fs::write(dir.path().join("AGENTS.md"), "   \n\t  ").unwrap();
        std::fs::write(dir.path().join("USER.md"), "me").unwrap();

        let files = load_bootstrap_files(dir.path(), 1000, 10_000);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "USER.md");
    }

    #[test]
    fn clamps_individual_files() {
        let dir = workspace();
        std::fs::write(dir.path().join("AGENTS.md"), "a".repeat(500)).unwrap();

        let files = load_bootstrap_files(dir.path(), 100, 10_000);
        assert_eq!(files[0].content.chars().count(), 100);
    }

    #[test]
    fn total_cap_cuts_the_overflowing_file_and_stops() {
        let dir = workspace();
        std::fs::write(dir.path().join("AGENTS.md"), "a".repeat(80)).unwrap();
        std::fs::write(dir.path().join("SOUL.md"), "b".repeat(80)).unwrap();
        std::fs::write(dir.path().join("USER.md"), "c".repeat(80)).unwrap();

        let files = load_bootstrap_files(dir.path(), 1000, 100);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].content.chars().count(), 80);
        // Only the prefix that fits.
        assert_eq!(files[1].content.chars().count(), 20);
    }

    #[test]
    fn scaffold_creates_agents_md_once() {
        let dir = workspace();
        let ws = dir.path().join("workspace");
        scaffold_workspace(&ws).unwrap();

        let path = ws.join("AGENTS.md");
        assert!(path.exists());

        std::fs::write(&path, "customized").unwrap();
        scaffold_workspace(&ws).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "customized");
    }
}
