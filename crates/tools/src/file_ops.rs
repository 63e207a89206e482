//! File operation tools, sandboxed to the workspace root.
//!
//! Paths must be relative and free of `..` components; after resolution
//! they must still fall inside the canonicalised workspace root.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use mc_domain::{CancelToken, Error, Result};

use crate::registry::{Tool, ToolOutput};

/// Validate and resolve a requested path within the workspace root.
///
/// 1. Rejects absolute paths and raw `..` components.
/// 2. Joins onto the canonicalised root.
/// 3. Canonicalises the nearest existing ancestor and re-checks containment,
///    so symlinked escape routes are caught even for not-yet-created files.
pub fn validate_path(workspace_root: &Path, requested: &str) -> Result<PathBuf> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(Error::Other(format!(
            "absolute paths are not allowed; use a path relative to the workspace (got '{requested}')"
        )));
    }
    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err(Error::Other("path must not contain '..' components".into()));
        }
    }

    let canonical_root = workspace_root.canonicalize().map_err(|e| {
        Error::Other(format!(
            "cannot resolve workspace root '{}': {e}",
            workspace_root.display()
        ))
    })?;
    let candidate = canonical_root.join(requested_path);

    let resolved = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| Error::Other(format!("cannot resolve '{}': {e}", candidate.display())))?
    } else {
        // Canonicalise the nearest existing ancestor and re-append the rest.
        let mut existing = candidate.as_path();
        let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
        while !existing.exists() {
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    tail.push(name);
                    existing = parent;
                }
                _ => break,
            }
        }
        let mut resolved = existing.canonicalize().map_err(|e| {
            Error::Other(format!(
                "cannot resolve ancestor of '{}': {e}",
                candidate.display()
            ))
        })?;
        for part in tail.into_iter().rev() {
            resolved.push(part);
        }
        resolved
    };

    if !resolved.starts_with(&canonical_root) {
        return Err(Error::Other(format!(
            "path '{requested}' resolves outside the workspace"
        )));
    }
    Ok(resolved)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
}

pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn label(&self) -> &str {
        "Read file"
    }
    fn description(&self) -> &str {
        "Read a text file from the workspace."
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" }
            },
            "required": ["path"]
        })
    }

    async fn invoke(
        &self,
        _call_id: &str,
        args: serde_json::Value,
        _cancel: &CancelToken,
    ) -> Result<ToolOutput> {
        let args: ReadFileArgs = serde_json::from_value(args)?;
        let path = validate_path(&self.root, &args.path)?;
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(ToolOutput::text(content))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn label(&self) -> &str {
        "Write file"
    }
    fn description(&self) -> &str {
        "Create or overwrite a text file in the workspace."
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"]
        })
    }

    async fn invoke(
        &self,
        _call_id: &str,
        args: serde_json::Value,
        _cancel: &CancelToken,
    ) -> Result<ToolOutput> {
        let args: WriteFileArgs = serde_json::from_value(args)?;
        let path = validate_path(&self.root, &args.path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &args.content).await?;
        Ok(ToolOutput::text(format!(
            "wrote {} bytes to {}",
            args.content.len(),
            args.path
        )))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// edit_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct EditFileArgs {
    path: String,
    old_str: String,
    new_str: String,
}

pub struct EditFileTool {
    root: PathBuf,
}

impl EditFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }
    fn label(&self) -> &str {
        "Edit file"
    }
    fn description(&self) -> &str {
        "Replace an exact string in a workspace file. The target string must appear exactly once."
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" },
                "old_str": { "type": "string", "description": "Exact text to replace" },
                "new_str": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old_str", "new_str"]
        })
    }

    async fn invoke(
        &self,
        _call_id: &str,
        args: serde_json::Value,
        _cancel: &CancelToken,
    ) -> Result<ToolOutput> {
        let args: EditFileArgs = serde_json::from_value(args)?;
        let path = validate_path(&self.root, &args.path)?;
        let content = tokio::fs::read_to_string(&path).await?;

        let matches = content.matches(&args.old_str).count();
        if matches == 0 {
            return Err(Error::Other(format!(
                "old_str not found in {}",
                args.path
            )));
        }
        if matches > 1 {
            return Err(Error::Other(format!(
                "old_str appears {matches} times in {}; provide more context to disambiguate",
                args.path
            )));
        }

        let updated = content.replacen(&args.old_str, &args.new_str, 1);
        tokio::fs::write(&path, updated).await?;
        Ok(ToolOutput::text(format!("edited {}", args.path)))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// list_dir
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ListDirArgs {
    #[serde(default = "default_dot")]
    path: String,
}

fn default_dot() -> String {
    ".".into()
}

pub struct ListDirTool {
    root: PathBuf,
}

impl ListDirTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }
    fn label(&self) -> &str {
        "List directory"
    }
    fn description(&self) -> &str {
        "List the entries of a workspace directory."
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory relative to the workspace root (default '.')" }
            }
        })
    }

    async fn invoke(
        &self,
        _call_id: &str,
        args: serde_json::Value,
        _cancel: &CancelToken,
    ) -> Result<ToolOutput> {
        let args: ListDirArgs = serde_json::from_value(args)?;
        let path = validate_path(&self.root, &args.path)?;

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            names.push(if is_dir { format!("{name}/") } else { name });
        }
        names.sort();
        Ok(ToolOutput::text(names.join("\n")))
    }
}
