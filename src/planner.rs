use crate::cancel::CancellationToken;
use crate::controller::{sanitize_command, FailureAnalyzer};
use crate::error::{Error, Result};
use crate::ollama::OllamaClient;
use crate::shell::truncate_for_analysis;
use crate::ui::{self, StreamPrinter};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const IGNORED_ENTRIES: &[&str] = &[".git", "node_modules", "vendor", "target"];

const DEBUG_SYSTEM_PROMPT: &str = "You are an expert at debugging Linux shell commands. \
Analyze the following terminal error (stderr), briefly explain why it happened and give a \
concise fix the user can copy and paste.";

/// Up to `limit` visible names from `dir`, directories marked with `/`.
pub fn directory_snippet(dir: &Path, limit: usize) -> String {
    let Ok(entries) = fs::read_dir(dir) else {
        return String::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || IGNORED_ENTRIES.contains(&name.as_str()) {
                return None;
            }
            let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
            Some(if is_dir { format!("{}/", name) } else { name })
        })
        .collect();
    names.sort();
    names.truncate(limit);
    names.join(", ")
}

fn build_command_prompt(request: &str, snippet: &str) -> String {
    let context = if snippet.is_empty() {
        String::new()
    } else {
        format!("Files in the current directory: {}.\n", snippet)
    };

    format!(
        r#"You are a Linux terminal and shell expert.
Translate the following natural-language request into a SINGLE shell command.
{context}Respond ONLY with the command and nothing else. No markdown, no explanations.
Request: {request}"#,
        context = context,
        request = request
    )
}

/// Asks the model for a command that fulfils `request` and strips any
/// markdown around the answer.
pub fn generate_command(
    client: &OllamaClient,
    request: &str,
    cwd: &Path,
    context_items: usize,
) -> Result<String> {
    let snippet = directory_snippet(cwd, context_items);
    let prompt = build_command_prompt(request, &snippet);
    let response = client.generate(&prompt)?;
    let command = sanitize_command(&response);
    if command.is_empty() {
        return Err(Error::Service("the model returned an empty command".to_string()));
    }
    Ok(command)
}

fn build_debug_prompt(stderr: &str) -> String {
    format!("stderr:\n```\n{}\n```", stderr)
}

/// Streams an explanation of a failed command's stderr from the model.
pub struct ErrorAnalyzer {
    client: Arc<OllamaClient>,
    cancel: CancellationToken,
    max_chars: usize,
}

impl ErrorAnalyzer {
    pub fn new(client: Arc<OllamaClient>, cancel: CancellationToken, max_chars: usize) -> Self {
        Self {
            client,
            cancel,
            max_chars,
        }
    }
}

impl FailureAnalyzer for ErrorAnalyzer {
    fn analyze(&self, command: &str, stderr: &str) {
        tracing::debug!("analyzing failure of {:?}", command);
        println!();
        ui::info("--- shell error analysis ---");

        self.cancel.reset();
        let prompt = build_debug_prompt(&truncate_for_analysis(stderr, self.max_chars));
        let mut printer = StreamPrinter::new("analyzing error...");
        let result = self.client.generate_stream(
            &prompt,
            Some(DEBUG_SYSTEM_PROMPT),
            &self.cancel,
            |chunk| printer.chunk(chunk),
        );

        match result {
            Ok(_) => printer.finish(false),
            Err(Error::Cancelled) => printer.finish(true),
            Err(e) => {
                printer.finish(false);
                ui::warn(&format!("error analysis failed: {}", e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_skips_hidden_and_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        fs::write(dir.path().join(".env"), "").unwrap();

        assert_eq!(directory_snippet(dir.path(), 10), "Cargo.toml, src/");
    }

    #[test]
    fn snippet_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("f{}.txt", i)), "").unwrap();
        }
        assert_eq!(directory_snippet(dir.path(), 2), "f0.txt, f1.txt");
    }

    #[test]
    fn snippet_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(directory_snippet(&dir.path().join("nope"), 10), "");
    }

    #[test]
    fn prompt_includes_context_only_when_present() {
        let with = build_command_prompt("list rust files", "src/, Cargo.toml");
        assert!(with.contains("Files in the current directory: src/, Cargo.toml."));
        assert!(with.ends_with("Request: list rust files"));

        let without = build_command_prompt("list rust files", "");
        assert!(!without.contains("Files in the current directory"));
    }

    #[test]
    fn debug_prompt_fences_stderr() {
        let prompt = build_debug_prompt("ls: cannot access 'x'");
        assert_eq!(prompt, "stderr:\n```\nls: cannot access 'x'\n```");
    }
}
