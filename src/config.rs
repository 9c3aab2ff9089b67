use crate::error::{Error, Result};
use crate::search::{DEFAULT_TOP_K, MIN_SCORE};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};

const APP_NAME: &str = "iash";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const HISTORY_FILE_NAME: &str = ".iash_embeddings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    /// Chosen interactively at startup when unset.
    pub model: Option<String>,
    /// Defaults to the chat model.
    pub embed_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub path: Option<PathBuf>,
    pub top_k: usize,
    pub min_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub program: String,
    pub color_commands: Vec<String>,
    pub max_error_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub directory_context_items: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub history: HistoryConfig,
    pub shell: ShellConfig,
    pub behavior: BehaviorConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_OLLAMA_URL.to_string(),
            model: None,
            embed_model: None,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            top_k: DEFAULT_TOP_K,
            min_score: MIN_SCORE,
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "bash".to_string(),
            color_commands: ["ls", "grep", "diff", "git", "kubectl", "docker", "tree"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_error_chars: 2048,
        }
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            directory_context_items: 10,
        }
    }
}

impl Config {
    /// `OLLAMA_HOST` wins over the config file.
    pub fn endpoint(&self) -> String {
        match env::var("OLLAMA_HOST") {
            Ok(host) if !host.trim().is_empty() => normalize_host(&host),
            _ => self.llm.endpoint.clone(),
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.history.path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(HISTORY_FILE_NAME)
        })
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

pub fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("config.toml")
}

pub fn load_config() -> Config {
    let path = get_config_path();
    if !path.exists() {
        return Config::default();
    }
    match fs::read_to_string(&path) {
        Ok(content) => parse_config(&content).unwrap_or_else(|e| {
            tracing::warn!("ignoring {:?}: {}", path, e);
            Config::default()
        }),
        Err(e) => {
            tracing::warn!("cannot read {:?}: {}", path, e);
            Config::default()
        }
    }
}

fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
}

pub fn save_config(config: &Config) -> Result<()> {
    let path = get_config_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config).map_err(|e| Error::Config(e.to_string()))?;
    fs::write(path, content)?;
    Ok(())
}
