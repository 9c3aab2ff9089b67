use crate::error::Result;
use crate::types::ShellOutcome;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;

/// Runs a command line in the user's native shell.
pub trait ShellRunner {
    fn run(&self, command: &str) -> Result<ShellOutcome>;
}

/// `<program> -c <command>` with the terminal attached. Stderr is shown
/// as it is produced and also kept for failure analysis.
pub struct NativeShell {
    program: String,
}

impl NativeShell {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl ShellRunner for NativeShell {
    fn run(&self, command: &str) -> Result<ShellOutcome> {
        let mut child = Command::new(&self.program)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()?;

        let tee = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut captured = Vec::new();
                let mut buf = [0u8; 4096];
                let mut stderr = std::io::stderr();
                loop {
                    match pipe.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            stderr.write_all(&buf[..n]).ok();
                            stderr.flush().ok();
                            captured.extend_from_slice(&buf[..n]);
                        }
                    }
                }
                captured
            })
        });

        let status = child.wait()?;
        let captured = tee.and_then(|h| h.join().ok()).unwrap_or_default();

        Ok(ShellOutcome {
            success: status.success(),
            stderr: String::from_utf8_lossy(&captured).into_owned(),
        })
    }
}

/// Adds `--color=always` right after the program name for tools that would
/// otherwise drop colours when their stderr is piped.
pub fn with_color_hint(command: &str, color_commands: &[String]) -> String {
    let trimmed = command.trim();
    let program = trimmed.split_whitespace().next().unwrap_or("");
    if program.is_empty() || !color_commands.iter().any(|c| c == program) {
        return trimmed.to_string();
    }
    let rest = &trimmed[program.len()..];
    format!("{} --color=always{}", program, rest)
}

/// Keeps at most `max_chars` characters of captured stderr.
pub fn truncate_for_analysis(stderr: &str, max_chars: usize) -> String {
    if stderr.chars().count() <= max_chars {
        return stderr.to_string();
    }
    let mut out: String = stderr.chars().take(max_chars).collect();
    out.push_str("\n... [truncated]");
    out
}
