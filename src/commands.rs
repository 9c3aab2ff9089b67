use crate::config::{get_config_path, save_config, Config};
use crate::error::Result;
use crate::ollama::{Embedder, OllamaClient};
use crate::store::{LoadStatus, SemanticStore};
use std::{env, io::Write, process::Command};

fn step(label: &str) {
    print!("  {} ... ", label);
    std::io::stdout().flush().ok();
}

pub fn cmd_doctor(config: &Config) -> Result<()> {
    println!("diagnostics:");
    println!();

    let endpoint = config.endpoint();
    let probe = OllamaClient::new(&endpoint, "");

    step("ollama");
    let models = if probe.is_available() {
        println!("ok");
        probe.list_models().unwrap_or_default()
    } else {
        println!("failed");
        println!("    url: {}", endpoint);
        println!("    try: ollama serve");
        Vec::new()
    };

    let model = config
        .llm
        .model
        .clone()
        .or_else(|| models.first().cloned());
    match model {
        Some(model) => {
            let client = OllamaClient::new(&endpoint, &model);

            step(&format!("model ({})", model));
            match client.generate("Say 'ok' and nothing else.") {
                Ok(_) => println!("ok"),
                Err(e) => {
                    println!("failed");
                    println!("    error: {}", e);
                    println!("    try: ollama pull {}", model);
                }
            }

            let embed_model = config.llm.embed_model.clone().unwrap_or(model);
            step(&format!("embeddings ({})", embed_model));
            match client.embed("test", &embed_model) {
                Ok(v) => println!("ok ({} dimensions)", v.len()),
                Err(e) => {
                    println!("failed");
                    println!("    error: {}", e);
                    println!("    try: ollama pull {}", embed_model);
                }
            }
        }
        None => {
            step("model");
            println!("none installed");
            println!("    try: ollama pull llama3.2");
        }
    }

    let history_path = config.history_path();
    step("history");
    match SemanticStore::load(&history_path).1 {
        LoadStatus::Missing => println!("empty (no file yet)"),
        LoadStatus::Loaded(n) => println!("ok ({} commands)", n),
        LoadStatus::Recovered(e) => {
            println!("unreadable");
            println!("    error: {}", e);
            println!("    fix:   iash history --clear");
        }
    }
    println!("    path: {}", history_path.display());

    step("config");
    if get_config_path().exists() {
        println!("ok");
    } else {
        println!("using defaults");
    }

    println!();
    Ok(())
}

pub fn cmd_history(config: &Config, clear: bool) -> Result<()> {
    let path = config.history_path();
    let (store, status) = SemanticStore::load(&path);

    if clear {
        store.clear()?;
        println!("semantic history cleared ({})", path.display());
        return Ok(());
    }

    if let LoadStatus::Recovered(e) = status {
        eprintln!("warning: {}", e);
    }
    let entries = store.snapshot();
    if entries.is_empty() {
        println!("no semantic history yet.");
        return Ok(());
    }

    println!("remembered commands ({}):", entries.len());
    println!();
    for entry in entries {
        println!("  {}", entry.command);
    }
    Ok(())
}

pub fn cmd_config() -> Result<()> {
    let config_path = get_config_path();

    if !config_path.exists() {
        save_config(&Config::default())?;
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    Command::new(&editor).arg(&config_path).status()?;

    Ok(())
}
