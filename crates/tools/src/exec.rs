//! Shell execution tool.
//!
//! Runs a command through `sh -c` with the workspace as the working
//! directory, a hard timeout, and cancellation. Stdout and stderr are
//! captured together with the exit status.

use std::path::PathBuf;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;

use mc_domain::{CancelToken, Error, Result};

use crate::registry::{Tool, ToolOutput};

const DEFAULT_TIMEOUT_SEC: u64 = 60;

#[derive(Debug, Deserialize)]
struct ExecArgs {
    command: String,
    /// Hard timeout in seconds.
    timeout_sec: Option<u64>,
}

pub struct ExecTool {
    workdir: PathBuf,
}

impl ExecTool {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }
    fn label(&self) -> &str {
        "Run command"
    }
    fn description(&self) -> &str {
        "Run a shell command in the workspace and return its output."
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute" },
                "timeout_sec": { "type": "integer", "description": "Hard timeout in seconds (default 60)" }
            },
            "required": ["command"]
        })
    }

    async fn invoke(
        &self,
        _call_id: &str,
        args: serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<ToolOutput> {
        let args: ExecArgs = serde_json::from_value(args)?;
        let timeout =
            std::time::Duration::from_secs(args.timeout_sec.unwrap_or(DEFAULT_TIMEOUT_SEC));

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&args.command)
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::select! {
            result = child.wait_with_output() => result?,
            _ = tokio::time::sleep(timeout) => {
                return Err(Error::Timeout(format!(
                    "command exceeded {}s: {}",
                    timeout.as_secs(),
                    args.command
                )));
            }
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled("command aborted".into()));
            }
        };

        let mut text = String::new();
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        let code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format!("[exit code {code}]"));
        }

        Ok(ToolOutput::text(text))
    }
}
