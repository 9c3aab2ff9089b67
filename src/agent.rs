//! The interactive loop: read a line, decide what it is, dispatch it.

use crate::cancel::CancellationToken;
use crate::chat::{self, Transcript};
use crate::config::Config;
use crate::controller::ExecutionController;
use crate::error::{Error, Result};
use crate::ollama::OllamaClient;
use crate::planner;
use crate::store::DIRECTIVE_PREFIX;
use crate::types::ExecutionMode;
use crate::ui::{self, StreamPrinter};
use crossterm::style::Stylize;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a line typed at the prompt asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input<'a> {
    Empty,
    Exit,
    ChangeDir(&'a str),
    Help,
    Ask,
    Auto,
    ResetChat,
    ClearHistory,
    History,
    Chat(&'a str),
    Search(&'a str),
    /// Switch the chat model; empty shows the installed models.
    Model(&'a str),
    Generate(&'a str),
    Passthrough(&'a str),
    /// A directive with its argument missing; carries the usage hint.
    Usage(&'static str),
}

fn directive_arg<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?;
    if rest.is_empty() {
        return Some("");
    }
    rest.starts_with(char::is_whitespace).then(|| rest.trim())
}

pub fn classify(line: &str) -> Input<'_> {
    let line = line.trim();
    match line {
        "" => return Input::Empty,
        "exit" | "quit" => return Input::Exit,
        "/help" => return Input::Help,
        "/ask" => return Input::Ask,
        "/auto" => return Input::Auto,
        "/reset" => return Input::ResetChat,
        "/clear" => return Input::ClearHistory,
        "/history" => return Input::History,
        _ => {}
    }

    if let Some(dir) = directive_arg(line, "cd") {
        return Input::ChangeDir(dir);
    }
    if let Some(text) = directive_arg(line, "/chat") {
        return if text.is_empty() {
            Input::Usage("/chat <question>")
        } else {
            Input::Chat(text)
        };
    }
    if let Some(query) = directive_arg(line, "/search") {
        return if query.is_empty() {
            Input::Usage("/search <what you want to do>")
        } else {
            Input::Search(query)
        };
    }
    if let Some(name) = directive_arg(line, "/model") {
        return Input::Model(name);
    }
    if let Some(request) = line.strip_prefix(DIRECTIVE_PREFIX) {
        let request = request.trim();
        return if request.is_empty() {
            Input::Usage("/<request>, e.g. /find files larger than 1G")
        } else {
            Input::Generate(request)
        };
    }
    Input::Passthrough(line)
}

/// `cwd` with the home directory shown as `~`.
pub fn display_dir(cwd: &Path, home: Option<&Path>) -> String {
    if let Some(rest) = home.and_then(|h| cwd.strip_prefix(h).ok()) {
        if rest.as_os_str().is_empty() {
            return "~".to_string();
        }
        return format!("~/{}", rest.display());
    }
    cwd.display().to_string()
}

pub fn prompt_text(mode: ExecutionMode, model: &str, dir: &str) -> String {
    let prefix = if mode.is_auto() { "ia (auto)" } else { "ia" };
    format!("{} [{}]> {} >>> ", prefix, model, dir)
}

/// Resolves the target of `cd`; empty and `~` mean home.
fn cd_target(dir: &str, home: Option<PathBuf>) -> Option<PathBuf> {
    match dir {
        "" | "~" => home,
        _ => match (dir.strip_prefix("~/"), home) {
            (Some(rest), Some(home)) => Some(home.join(rest)),
            _ => Some(PathBuf::from(dir)),
        },
    }
}

/// A menu answer: a 1-based number or an exact model name.
fn pick_model(models: &[String], answer: &str) -> Option<String> {
    let answer = answer.trim();
    if let Ok(n) = answer.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| models.get(i)).cloned();
    }
    models.iter().find(|m| m.as_str() == answer).cloned()
}

/// Resolves the chat model: `requested` if given, the only installed model,
/// or the user's pick from a numbered menu. End of input is `Cancelled`.
pub fn choose_model(client: &OllamaClient, requested: Option<&str>) -> Result<String> {
    let models = client.list_models()?;
    if models.is_empty() {
        return Err(Error::Service(
            "no models installed; try: ollama pull llama3.2".to_string(),
        ));
    }

    if let Some(model) = requested {
        if !models.iter().any(|m| m == model) {
            ui::warn(&format!("model '{}' is not installed; trying it anyway", model));
        }
        return Ok(model.to_string());
    }
    if let [only] = models.as_slice() {
        return Ok(only.clone());
    }

    ui::info("installed models:");
    for (i, m) in models.iter().enumerate() {
        println!("  [{}] {}", i + 1, m);
    }
    loop {
        let prompt = format!("choose a model [1-{}]: ", models.len());
        let Some(answer) = ui::prompt_line(&prompt) else {
            return Err(Error::Cancelled);
        };
        match pick_model(&models, &answer) {
            Some(model) => return Ok(model),
            None => ui::error("invalid choice."),
        }
    }
}

/// One interactive session. Owns everything the loop mutates.
pub struct Session {
    config: Config,
    client: Arc<OllamaClient>,
    controller: ExecutionController,
    transcript: Transcript,
    cancel: CancellationToken,
    /// No explicit embedding model is configured, so it tracks the chat model.
    embed_follows_model: bool,
}

impl Session {
    pub fn new(
        config: Config,
        client: Arc<OllamaClient>,
        controller: ExecutionController,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            embed_follows_model: config.llm.embed_model.is_none(),
            config,
            client,
            controller,
            transcript: Transcript::default(),
            cancel,
        }
    }

    pub fn run(&mut self) {
        println!();
        ui::info("type /help for the list of commands.");
        let mut first = true;

        loop {
            if first {
                println!();
                first = false;
            } else {
                ui::separator();
            }

            let Some(line) = ui::prompt_line(&self.prompt()) else {
                break;
            };
            if !self.dispatch(classify(&line)) {
                break;
            }
        }

        println!();
        ui::info("bye!");
    }

    fn prompt(&self) -> String {
        let dir = match env::current_dir() {
            Ok(cwd) => display_dir(&cwd, dirs::home_dir().as_deref()),
            Err(_) => "(unknown dir)".to_string(),
        };
        let text = prompt_text(self.controller.mode(), &self.client.model(), &dir);
        format!("{}", text.bold())
    }

    /// Returns false when the session should end.
    fn dispatch(&mut self, input: Input<'_>) -> bool {
        tracing::debug!("input: {:?}", input);
        match input {
            Input::Empty => {}
            Input::Exit => return false,
            Input::ChangeDir(dir) => change_dir(dir),
            Input::Help => ui::print_help(),
            Input::Ask => {
                self.controller.set_mode(ExecutionMode::ConfirmRequired);
                ui::info("auto mode off. commands will ask for confirmation.");
            }
            Input::Auto => {
                self.controller.set_mode(ExecutionMode::AutoExecute);
                ui::info("auto mode on. type /ask to confirm commands again.");
            }
            Input::ResetChat => {
                if self.transcript.is_empty() {
                    ui::info("no chat to reset.");
                } else {
                    self.transcript.reset();
                    ui::info("chat history cleared.");
                }
            }
            Input::ClearHistory => self.controller.clear_history(),
            Input::History => self.list_history(),
            Input::Chat(text) => self.chat(text),
            Input::Search(query) => {
                self.controller.search(query);
            }
            Input::Model(name) => self.switch_model(name),
            Input::Generate(request) => self.generate(request),
            Input::Passthrough(command) => {
                self.controller.run_direct(command);
                println!();
            }
            Input::Usage(hint) => ui::error(&format!("empty request. usage: {}", hint)),
        }
        true
    }

    fn switch_model(&mut self, name: &str) {
        let requested = (!name.is_empty()).then_some(name);
        let model = match choose_model(&self.client, requested) {
            Ok(model) => model,
            Err(Error::Cancelled) => {
                println!();
                ui::info("model unchanged.");
                return;
            }
            Err(e) => {
                ui::warn(&format!("cannot switch model: {}", e));
                return;
            }
        };
        if model == self.client.model() {
            ui::info(&format!("already using {}.", model));
            return;
        }

        self.client.set_model(&model);
        if self.embed_follows_model {
            self.controller.set_embed_model(&model);
            if !self.controller.store().is_empty() {
                ui::warn(&format!(
                    "history is now embedded with {}; commands remembered with the \
                     previous model may no longer match in /search",
                    model
                ));
            }
        }
        tracing::info!(
            "model {}, embeddings {}",
            model,
            self.controller.embed_model()
        );

        ui::info(&format!("loading \"{}\" into memory...", model));
        self.client.warm_up(self.controller.embed_model());
        ui::info(&format!("now using {}.", model));
    }

    fn generate(&mut self, request: &str) {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        ui::info("thinking...");
        let command = match planner::generate_command(
            &self.client,
            request,
            &cwd,
            self.config.behavior.directory_context_items,
        ) {
            Ok(command) => command,
            Err(e) => {
                ui::warn(&format!("could not generate a command: {}", e));
                return;
            }
        };
        self.controller.handle_candidate(&command);
    }

    fn chat(&mut self, text: &str) {
        self.cancel.reset();
        let client = Arc::clone(&self.client);
        let cancel = self.cancel.clone();
        let mut printer = StreamPrinter::new("thinking...");

        let result = chat::exchange(&mut self.transcript, text, |messages| {
            client.chat_stream(messages, &cancel, |chunk| printer.chunk(chunk))
        });

        match result {
            Ok(_) => printer.finish(false),
            Err(Error::Cancelled) => printer.finish(true),
            Err(e) => {
                printer.finish(false);
                ui::warn(&format!("chat failed: {}", e));
            }
        }
        tracing::debug!("chat transcript holds {} messages", self.transcript.len());
        self.cancel.reset();
    }

    fn list_history(&self) {
        let store = self.controller.store();
        if store.is_empty() {
            ui::info("no semantic history yet.");
            return;
        }
        ui::info(&format!("{} remembered commands:", store.len()));
        let entries = store.snapshot();
        for (i, entry) in entries.iter().enumerate() {
            println!("  {} {}", format!("{:>3}", i + 1).dark_grey(), entry.command);
        }
    }
}

fn change_dir(dir: &str) {
    let Some(target) = cd_target(dir, dirs::home_dir()) else {
        ui::error("cannot find the home directory");
        return;
    };
    if let Err(e) = env::set_current_dir(&target) {
        ui::error(&format!("cd: {}: {}", target.display(), e));
    }
}
