//! Decides when a command actually runs.
//!
//! The controller owns the session's [`ExecutionMode`]. In confirm mode every
//! candidate waits for a keypress; `x` runs it and switches to auto mode for
//! the rest of the session. Successful commands are remembered in the
//! [`SemanticStore`] on a background thread, failed ones go to the
//! [`FailureAnalyzer`].

use crate::ollama::Embedder;
use crate::search::{top_k, DEFAULT_TOP_K, MIN_SCORE};
use crate::shell::{with_color_hint, ShellRunner};
use crate::store::{RecordOutcome, SemanticStore};
use crate::types::ExecutionMode;
use crate::ui::{self, Key, Prompter};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Explains why a command failed. Runs on the interactive thread.
pub trait FailureAnalyzer {
    fn analyze(&self, command: &str, stderr: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run once (`s`/`y`), or the top result when choosing among several.
    Run,
    /// Run once and stop asking (`x`).
    Always,
    /// Zero-based index of a ranked candidate.
    Pick(usize),
    Decline,
    Unknown,
}

/// Maps a keypress to a decision. Digits `1..=choices` select a candidate.
pub fn parse_decision(key: Key, choices: usize) -> Decision {
    match key {
        Key::Abort => Decision::Decline,
        Key::Enter => Decision::Unknown,
        Key::Char(c) => match c.to_ascii_lowercase() {
            's' | 'y' => Decision::Run,
            'x' => Decision::Always,
            'n' => Decision::Decline,
            d => match d.to_digit(10) {
                Some(n) if n >= 1 && (n as usize) <= choices => Decision::Pick(n as usize - 1),
                _ => Decision::Unknown,
            },
        },
    }
}

pub struct ExecutionController {
    mode: ExecutionMode,
    shell: Box<dyn ShellRunner>,
    prompter: Box<dyn Prompter>,
    store: Arc<SemanticStore>,
    embedder: Arc<dyn Embedder>,
    embed_model: String,
    analyzer: Option<Box<dyn FailureAnalyzer>>,
    color_commands: Vec<String>,
    top_k: usize,
    min_score: f64,
    recordings: Vec<JoinHandle<()>>,
}

impl ExecutionController {
    pub fn new(
        shell: Box<dyn ShellRunner>,
        prompter: Box<dyn Prompter>,
        store: Arc<SemanticStore>,
        embedder: Arc<dyn Embedder>,
        embed_model: &str,
    ) -> Self {
        Self {
            mode: ExecutionMode::ConfirmRequired,
            shell,
            prompter,
            store,
            embedder,
            embed_model: embed_model.to_string(),
            analyzer: None,
            color_commands: Vec::new(),
            top_k: DEFAULT_TOP_K,
            min_score: MIN_SCORE,
            recordings: Vec::new(),
        }
    }

    pub fn with_analyzer(mut self, analyzer: Box<dyn FailureAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_search(mut self, top_k: usize, min_score: f64) -> Self {
        self.top_k = top_k;
        self.min_score = min_score;
        self
    }

    pub fn with_color_commands(mut self, commands: Vec<String>) -> Self {
        self.color_commands = commands;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
    }

    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    /// Later recordings and searches embed with `model`.
    pub fn set_embed_model(&mut self, model: &str) {
        self.embed_model = model.to_string();
    }

    pub fn store(&self) -> &SemanticStore {
        &self.store
    }

    /// Runs a generated command according to the current mode. Returns
    /// whether the session is in auto mode afterwards.
    pub fn handle_candidate(&mut self, candidate: &str) -> bool {
        if self.mode.is_auto() {
            self.auto_run(candidate);
            true
        } else {
            self.confirm_and_run(candidate)
        }
    }

    /// Runs `candidate` without asking; auto mode is never silent.
    pub fn auto_run(&mut self, candidate: &str) {
        ui::print_running(candidate, true);
        self.execute(candidate);
    }

    /// Shows `candidate` and waits for `s`, `x` or anything else. Returns
    /// whether the session is in auto mode afterwards.
    pub fn confirm_and_run(&mut self, candidate: &str) -> bool {
        ui::print_candidate(candidate);
        let key = self.prompter.read_key("run? [s/N/x (always)]: ");
        match parse_decision(key, 0) {
            Decision::Run => {
                ui::print_running(candidate, false);
                self.execute(candidate);
            }
            Decision::Always => {
                ui::print_running(candidate, false);
                self.execute(candidate);
                self.mode = ExecutionMode::AutoExecute;
                ui::info("auto mode on. type /ask to confirm commands again.");
            }
            _ => ui::info("cancelled."),
        }
        self.mode.is_auto()
    }

    /// Resolves `query` against remembered commands and lets the user pick
    /// one of the ranked matches. Returns `(executed, auto_mode)`.
    pub fn search(&mut self, query: &str) -> (bool, bool) {
        if self.store.is_empty() {
            ui::info("no semantic history yet. run a few commands first.");
            return (false, self.mode.is_auto());
        }

        let query_vec = match self.embedder.embed(query, &self.embed_model) {
            Ok(v) => v,
            Err(e) => {
                ui::warn(&format!("search failed: {}", e));
                return (false, self.mode.is_auto());
            }
        };

        let results = top_k(&query_vec, &self.store.snapshot(), self.top_k, self.min_score);
        if results.is_empty() {
            ui::info("no similar command found. try /<request> to generate one.");
            return (false, self.mode.is_auto());
        }

        ui::print_results(&results);
        let prompt = format!("run? [1-{}/n/x (always)]: ", results.len());
        let (index, always) = loop {
            match parse_decision(self.prompter.read_key(&prompt), results.len()) {
                Decision::Pick(i) => break (i, false),
                Decision::Run => break (0, false),
                Decision::Always => break (0, true),
                Decision::Decline => {
                    ui::info("cancelled.");
                    return (false, self.mode.is_auto());
                }
                Decision::Unknown => ui::error("invalid choice. pick a number, n or x."),
            }
        };

        let command = results[index].command.clone();
        ui::print_running(&command, false);
        self.execute(&command);
        if always {
            self.mode = ExecutionMode::AutoExecute;
            ui::info("auto mode on. type /ask to confirm commands again.");
        }
        (true, self.mode.is_auto())
    }

    /// Runs a command the user typed directly into the shell.
    pub fn run_direct(&mut self, command: &str) -> bool {
        let line = with_color_hint(command, &self.color_commands);
        println!();
        match self.shell.run(&line) {
            Ok(outcome) if outcome.success => {
                self.record_success(command);
                true
            }
            Ok(outcome) => {
                self.analyze_failure(command, &outcome.stderr);
                false
            }
            Err(e) => {
                ui::error(&format!("could not start shell: {}", e));
                false
            }
        }
    }

    fn execute(&mut self, command: &str) -> bool {
        match self.shell.run(command) {
            Ok(outcome) if outcome.success => {
                self.record_success(command);
                true
            }
            Ok(outcome) => {
                ui::error("command failed.");
                self.analyze_failure(command, &outcome.stderr);
                false
            }
            Err(e) => {
                ui::error(&format!("could not start shell: {}", e));
                false
            }
        }
    }

    fn analyze_failure(&self, command: &str, stderr: &str) {
        if stderr.trim().is_empty() {
            return;
        }
        if let Some(analyzer) = &self.analyzer {
            analyzer.analyze(command, stderr);
        }
    }

    /// Remembers `command` on a background thread. Failures are logged and
    /// never reach the caller.
    pub fn record_success(&mut self, command: &str) {
        self.recordings.retain(|h| !h.is_finished());

        let store = Arc::clone(&self.store);
        let embedder = Arc::clone(&self.embedder);
        let model = self.embed_model.clone();
        let command = command.to_string();
        let handle = thread::spawn(move || {
            match store.record_if_absent(&command, embedder.as_ref(), &model) {
                Ok(RecordOutcome::Recorded) => tracing::debug!("remembered {:?}", command),
                Ok(_) => {}
                Err(e) => tracing::warn!("could not remember {:?}: {}", command, e),
            }
        });
        self.recordings.push(handle);
    }

    pub fn clear_history(&self) {
        match self.store.clear() {
            Ok(()) => ui::info("semantic history cleared."),
            Err(e) => ui::warn(&format!("could not clear history: {}", e)),
        }
    }

    #[cfg(test)]
    fn wait_for_recordings(&mut self) {
        for h in self.recordings.drain(..) {
            h.join().unwrap();
        }
    }
}

/// Strips the markdown wrapping models like to put around commands.
///
/// Handles a ```` ``` ```` fence with an optional `bash`/`sh`/`shell` tag line,
/// and a single pair of backticks. Anything else, including embedded
/// newlines, passes through untouched.
pub fn sanitize_command(raw: &str) -> String {
    let cmd = raw.trim();

    if cmd.len() >= 6 && cmd.starts_with("```") && cmd.ends_with("```") {
        let inner = &cmd[3..cmd.len() - 3];
        let inner = ["bash\n", "sh\n", "shell\n"]
            .iter()
            .find_map(|tag| inner.strip_prefix(tag))
            .unwrap_or(inner);
        return inner.trim().to_string();
    }

    if cmd.len() >= 2 && cmd.starts_with('`') && cmd.ends_with('`') {
        return cmd[1..cmd.len() - 1].trim().to_string();
    }

    cmd.to_string()
}
