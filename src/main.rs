mod agent;
mod cancel;
mod chat;
mod commands;
mod config;
mod controller;
mod error;
mod ollama;
mod planner;
mod search;
mod shell;
mod similarity;
mod store;
mod types;
mod ui;

use agent::{choose_model, Session};
use anyhow::{bail, Context};
use cancel::install_interrupt_handler;
use commands::{cmd_config, cmd_doctor, cmd_history};
use config::{load_config, Config};
use controller::ExecutionController;
use ollama::{Embedder, OllamaClient};
use planner::ErrorAnalyzer;
use shell::NativeShell;
use std::{env, process, sync::Arc};
use store::{LoadStatus, SemanticStore};
use ui::TerminalPrompter;

#[derive(Debug, PartialEq)]
enum Subcommand {
    Config,
    Doctor,
    History { clear: bool },
    Help,
}

#[derive(Debug, Default, PartialEq)]
struct Cli {
    model: Option<String>,
    verbose: u8,
    command: Option<Subcommand>,
}

fn parse_args(args: &[String]) -> Result<Cli, String> {
    let mut cli = Cli::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-m" | "--model" => match iter.next() {
                Some(model) => cli.model = Some(model.clone()),
                None => return Err(format!("{} needs a model name", arg)),
            },
            "-v" => cli.verbose += 1,
            "-vv" => cli.verbose += 2,
            "-h" | "--help" | "help" => cli.command = Some(Subcommand::Help),
            "config" => cli.command = Some(Subcommand::Config),
            "doctor" => cli.command = Some(Subcommand::Doctor),
            "history" => {
                let clear = iter.as_slice().first().map(|s| s.as_str()) == Some("--clear");
                if clear {
                    iter.next();
                }
                cli.command = Some(Subcommand::History { clear });
            }
            other => return Err(format!("unknown argument '{}'", other)),
        }
    }
    Ok(cli)
}

fn print_usage() {
    eprintln!("usage: iash [-m <model>] [-v|-vv]");
    eprintln!("       iash history [--clear]");
    eprintln!("       iash config | doctor");
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,reqwest=info,hyper=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run_shell(config: Config, requested_model: Option<String>) -> anyhow::Result<()> {
    let cancel = install_interrupt_handler().context("cannot install the ctrl-c handler")?;

    let endpoint = config.endpoint();
    let probe = OllamaClient::new(&endpoint, "");
    if !probe.is_available() {
        bail!("cannot connect to ollama at {}\n  start it with: ollama serve", endpoint);
    }

    let requested = requested_model.or_else(|| config.llm.model.clone());
    let model = choose_model(&probe, requested.as_deref()).context("no model selected")?;
    let embed_model = config
        .llm
        .embed_model
        .clone()
        .unwrap_or_else(|| model.clone());
    tracing::info!("model {}, embeddings {}", model, embed_model);

    let client = Arc::new(OllamaClient::new(&endpoint, &model));
    ui::info(&format!("loading \"{}\" into memory...", model));
    client.warm_up(&embed_model);

    let history_path = config.history_path();
    let (store, status) = SemanticStore::load(&history_path);
    match status {
        LoadStatus::Missing => tracing::info!("no history at {:?} yet", store.path()),
        LoadStatus::Loaded(n) => ui::info(&format!("semantic history: {} commands", n)),
        LoadStatus::Recovered(e) => {
            ui::warn(&format!("{}; starting with an empty history", e))
        }
    }

    let embedder: Arc<dyn Embedder> = client.clone();
    let analyzer = ErrorAnalyzer::new(
        Arc::clone(&client),
        cancel.clone(),
        config.shell.max_error_chars,
    );
    let controller = ExecutionController::new(
        Box::new(NativeShell::new(&config.shell.program)),
        Box::new(TerminalPrompter),
        Arc::new(store),
        embedder,
        &embed_model,
    )
    .with_analyzer(Box::new(analyzer))
    .with_search(config.history.top_k, config.history.min_score)
    .with_color_commands(config.shell.color_commands.clone());

    Session::new(config, client, controller, cancel).run();
    Ok(())
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(msg) => {
            eprintln!("iash: {}", msg);
            print_usage();
            process::exit(2);
        }
    };

    init_tracing(cli.verbose);
    let config = load_config();

    let result = match cli.command {
        Some(Subcommand::Help) => {
            print_usage();
            Ok(())
        }
        Some(Subcommand::Config) => cmd_config().map_err(anyhow::Error::from),
        Some(Subcommand::Doctor) => cmd_doctor(&config).map_err(anyhow::Error::from),
        Some(Subcommand::History { clear }) => {
            cmd_history(&config, clear).map_err(anyhow::Error::from)
        }
        None => run_shell(config, cli.model),
    };

    if let Err(e) = result {
        eprintln!("iash: {:#}", e);
        process::exit(1);
    }
}
