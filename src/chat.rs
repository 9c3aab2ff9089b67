use crate::error::Result;
use crate::types::{ChatMessage, Role};

pub const CHAT_SYSTEM_PROMPT: &str =
    "You are a helpful, friendly and conversational assistant. Answer the user's questions.";

/// The running `/chat` conversation.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn reset(&mut self) {
        self.messages.clear();
    }

    /// Appends a user turn, seeding the system prompt on first use, and
    /// returns the length to roll back to if the turn does not complete.
    fn begin_turn(&mut self, text: &str) -> usize {
        let checkpoint = self.messages.len();
        if self.messages.is_empty() {
            self.messages
                .push(ChatMessage::new(Role::System, CHAT_SYSTEM_PROMPT));
        }
        self.messages.push(ChatMessage::new(Role::User, text));
        checkpoint
    }

    fn rollback(&mut self, checkpoint: usize) {
        self.messages.truncate(checkpoint);
    }
}

/// Sends one user turn through `send` and records the reply.
///
/// If `send` fails (cancellation included) the transcript is restored to
/// exactly what it was before the call.
pub fn exchange(
    transcript: &mut Transcript,
    text: &str,
    send: impl FnOnce(&[ChatMessage]) -> Result<String>,
) -> Result<String> {
    let checkpoint = transcript.begin_turn(text);
    match send(transcript.messages()) {
        Ok(reply) => {
            transcript
                .messages
                .push(ChatMessage::new(Role::Assistant, reply.clone()));
            Ok(reply)
        }
        Err(e) => {
            transcript.rollback(checkpoint);
            Err(e)
        }
    }
}
