use crate::types::SearchResult;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    style::Stylize,
    terminal,
};
use std::io::{self, Write};

/// One keypress answer to a decision prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    /// Esc, Ctrl-C, Ctrl-D or a closed input stream.
    Abort,
}

/// Source of single-key decisions.
pub trait Prompter {
    fn read_key(&mut self, prompt: &str) -> Key;
}

/// Reads one key from the terminal in raw mode.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn read_key(&mut self, prompt: &str) -> Key {
        print!("{}", prompt.cyan().bold());
        io::stdout().flush().ok();

        if terminal::enable_raw_mode().is_err() {
            return read_key_cooked();
        }
        let key = loop {
            let ev = match event::read() {
                Ok(ev) => ev,
                Err(_) => break Key::Abort,
            };
            let Event::Key(k) = ev else { continue };
            if k.kind != KeyEventKind::Press {
                continue;
            }
            match k.code {
                KeyCode::Char('c') | KeyCode::Char('d')
                    if k.modifiers.contains(KeyModifiers::CONTROL) =>
                {
                    break Key::Abort
                }
                KeyCode::Char(c) => break Key::Char(c),
                KeyCode::Enter => break Key::Enter,
                KeyCode::Esc => break Key::Abort,
                _ => {}
            }
        };
        terminal::disable_raw_mode().ok();

        match key {
            Key::Char(c) => println!("{}", c),
            _ => println!(),
        }
        key
    }
}

/// Fallback when stdin is not a terminal: first character of the next line.
fn read_key_cooked() -> Key {
    match read_line() {
        None => Key::Abort,
        Some(line) => line.trim().chars().next().map_or(Key::Enter, Key::Char),
    }
}

/// Next line from stdin without its newline, or `None` at end of input.
pub fn read_line() -> Option<String> {
    let mut input = String::new();
    match io::stdin().read_line(&mut input) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(input.trim_end_matches(&['\n', '\r'][..]).to_string()),
    }
}

pub fn prompt_line(prompt: &str) -> Option<String> {
    print!("{}", prompt);
    io::stdout().flush().ok();
    read_line()
}

pub fn info(msg: &str) {
    println!("{}", msg.yellow());
}

pub fn warn(msg: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), msg);
}

pub fn error(msg: &str) {
    eprintln!("{}", msg.red().bold());
}

pub fn separator() {
    println!("{}", "─".repeat(50).dark_grey());
}

pub fn print_candidate(command: &str) {
    println!("{}", "---".dark_grey());
    println!("{}", "suggested command:".green());
    println!();
    println!("{}", command);
    println!();
    println!("{}", "---".dark_grey());
}

/// Every command is echoed before it runs, in both modes.
pub fn print_running(command: &str, auto: bool) {
    println!();
    if auto {
        println!("{}", "running (auto):".yellow());
    } else {
        println!("{}", "running:".yellow());
    }
    println!("{}", command);
    println!();
}

pub fn print_results(results: &[SearchResult]) {
    println!("{}", "---".dark_grey());
    println!("{}", "matching commands:".green());
    for (i, r) in results.iter().enumerate() {
        println!(
            "  {} {} {}",
            format!("[{}]", i + 1).cyan().bold(),
            r.command,
            format!("(similarity {:.2}%)", r.score * 100.0).dark_grey()
        );
    }
    println!("{}", "---".dark_grey());
}

/// Prints streamed fragments behind an `ia:` label.
pub struct StreamPrinter {
    started: bool,
}

impl StreamPrinter {
    pub fn new(status: &str) -> Self {
        println!("{} {}", status.green(), "(ctrl-c to cancel)".dark_grey());
        Self { started: false }
    }

    pub fn chunk(&mut self, text: &str) {
        if !self.started {
            print!("{} ", "ia:".green().bold());
            self.started = true;
        }
        print!("{}", text);
        io::stdout().flush().ok();
    }

    pub fn finish(&self, cancelled: bool) {
        if cancelled {
            print!("{}", "\n[cancelled]".red());
        }
        println!();
    }
}

pub fn print_help() {
    println!();
    info("--- commands ---");
    let rows = [
        ("/<request>", "ask for a shell command (e.g. /list .rs files by size)"),
        ("/search <intent>", "find a command you ran before by meaning"),
        ("/chat <question>", "talk to the model; the conversation is kept"),
        ("/reset", "forget the chat conversation"),
        ("/model [name]", "switch the chat model (menu when no name is given)"),
        ("/ask", "confirm every command before it runs"),
        ("/auto", "run commands without asking"),
        ("/history", "list remembered commands"),
        ("/clear", "forget all remembered commands"),
        ("/help", "show this help"),
        ("cd <dir>", "change directory"),
        ("exit, quit", "leave (also ctrl-d)"),
    ];
    for (cmd, desc) in rows {
        println!("  {} {}", format!("{:<18}", cmd).cyan().bold(), desc);
    }
    println!();
}
