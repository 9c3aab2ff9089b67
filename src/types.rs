use serde::{Deserialize, Serialize};

/// A command that ran successfully, with the embedding of its text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub command: String,
    pub embedding: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub command: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    ConfirmRequired,
    AutoExecute,
}

impl ExecutionMode {
    pub fn is_auto(self) -> bool {
        self == ExecutionMode::AutoExecute
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Result of running one command through the shell.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShellOutcome {
    pub success: bool,
    pub stderr: String,
}
