//! System-prompt composition.
//!
//! Fixed section order, sections joined by blank lines: identity, workspace
//! bootstrap files, tools, safety, runtime. The bootstrap and tools
//! sections are omitted when empty; the others always appear.

use std::path::Path;

use crate::bootstrap::BootstrapFile;

pub const DEFAULT_IDENTITY: &str = "\
You are a persistent personal assistant. You keep context across sessions \
through your workspace files and act on the user's behalf with the tools \
you are given. Be direct, be brief, and say when you don't know.";

const SAFETY_SECTION: &str = "\
## Safety

Never fabricate a tool result; if a tool fails, report the failure. Never \
attempt to bypass permission checks or to act outside the workspace you \
were given.";

/// Everything the composer needs, already loaded.
pub struct ComposerInput<'a> {
    /// Identity override. `None` uses the fixed default text.
    pub identity: Option<&'a str>,
    pub bootstrap_files: &'a [BootstrapFile],
    pub tool_names: &'a [String],
    pub model: Option<&'a str>,
    pub workspace_dir: &'a Path,
}

/// Compose the system prompt. Section order and presence are part of the
/// observable contract.
pub fn compose_system_prompt(input: &ComposerInput<'_>) -> String {
    let mut sections: Vec<String> = Vec::with_capacity(5);

    sections.push(input.identity.unwrap_or(DEFAULT_IDENTITY).to_owned());

    if !input.bootstrap_files.is_empty() {
        let mut block = String::from("<workspace-files>\n");
        for file in input.bootstrap_files {
            block.push_str(&format!(
                "<file path=\"{}\">\n{}\n</file>\n",
                file.name, file.content
            ));
        }
        block.push_str("</workspace-files>");
        sections.push(block);
    }

    if !input.tool_names.is_empty() {
        let mut block = String::from("## Tools\n\nYou can invoke these tools:\n");
        for name in input.tool_names {
            block.push_str(&format!("- {name}\n"));
        }
        block.push_str(
            "\nCall a tool when the task needs it; never describe a call instead of making it.",
        );
        sections.push(block);
    }

    sections.push(SAFETY_SECTION.to_owned());

    let mut runtime = format!(
        "## Runtime\n\nCurrent time: {}\nPlatform: {}\nWorking directory: {}",
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        std::env::consts::OS,
        input.workspace_dir.display(),
    );
    if let Some(model) = input.model {
        runtime.push_str(&format!("\nModel: {model}"));
    }
    sections.push(runtime);

    sections.join("\n\n")
}
