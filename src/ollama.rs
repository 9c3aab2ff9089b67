use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::types::ChatMessage;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{PoisonError, RwLock};
use std::thread;
use std::time::Duration;

/// How often a blocked stream looks at its cancellation token.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Turns text into a vector. Implemented by [`OllamaClient`]; tests swap in
/// deterministic fakes.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str, model: &str) -> Result<Vec<f64>>;
}

#[derive(Serialize)]
struct OllamaGenerate<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Serialize)]
struct OllamaChat<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaChatDelta {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaChatDelta>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Serialize)]
struct OllamaEmbed<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f64>>,
}

#[derive(Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

pub struct OllamaClient {
    base_url: String,
    model: RwLock<String>,
    client: reqwest::blocking::Client,
}

impl OllamaClient {
    pub fn new(endpoint: &str, model: &str) -> Self {
        Self {
            base_url: endpoint.trim_end_matches('/').to_string(),
            model: RwLock::new(model.to_string()),
            // Generation has no deadline other than user cancellation.
            client: reqwest::blocking::Client::builder()
                .timeout(None::<Duration>)
                .build()
                .unwrap_or_else(|_| reqwest::blocking::Client::new()),
        }
    }

    pub fn model(&self) -> String {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Points later requests at another chat model.
    pub fn set_model(&self, model: &str) {
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = model.to_string();
    }

    fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<reqwest::blocking::Response> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.post(&url).json(body).send()?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            return Err(Error::Service(format!("{} returned {}: {}", path, status, text.trim())));
        }
        Ok(resp)
    }

    pub fn generate(&self, prompt: &str) -> Result<String> {
        let model = self.model();
        let body = OllamaGenerate {
            model: &model,
            prompt,
            system: None,
            stream: false,
        };
        let resp: OllamaGenerateResponse = self.post("/api/generate", &body)?.json()?;
        if let Some(err) = resp.error {
            return Err(Error::Service(err));
        }
        Ok(resp.response)
    }

    /// Streams a completion, handing each fragment to `on_chunk` as it
    /// arrives. Returns the full text, or [`Error::Cancelled`] if `cancel`
    /// fires first.
    pub fn generate_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
        cancel: &CancellationToken,
        on_chunk: impl FnMut(&str),
    ) -> Result<String> {
        let model = self.model();
        let body = OllamaGenerate {
            model: &model,
            prompt,
            system,
            stream: true,
        };
        let resp = self.post("/api/generate", &body)?;
        read_generate_stream(BufReader::new(resp), cancel, on_chunk)
    }

    pub fn chat_stream(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
        on_chunk: impl FnMut(&str),
    ) -> Result<String> {
        let model = self.model();
        let body = OllamaChat {
            model: &model,
            messages,
            stream: true,
        };
        let resp = self.post("/api/chat", &body)?;
        read_chat_stream(BufReader::new(resp), cancel, on_chunk)
    }

    pub fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self.client.get(&url).send()?;
        if !resp.status().is_success() {
            return Err(Error::Service(format!("/api/tags returned {}", resp.status())));
        }
        let tags: OllamaTagsResponse = resp.json()?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    pub fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        self.client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .is_ok()
    }

    /// Loads the chat and embedding models into the server's memory.
    pub fn warm_up(&self, embed_model: &str) {
        if let Err(e) = self.generate("hello") {
            tracing::warn!("warm-up (generate) failed: {}", e);
        }
        if let Err(e) = self.embed("hello", embed_model) {
            tracing::warn!("warm-up (embeddings) failed: {}", e);
        }
    }
}

impl Embedder for OllamaClient {
    fn embed(&self, text: &str, model: &str) -> Result<Vec<f64>> {
        let body = OllamaEmbed { model, input: text };
        let resp: OllamaEmbedResponse = self.post("/api/embed", &body)?.json()?;
        resp.embeddings
            .into_iter()
            .next()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| Error::Service("no embedding returned".to_string()))
    }
}

fn read_generate_stream(
    reader: impl BufRead + Send + 'static,
    cancel: &CancellationToken,
    mut on_chunk: impl FnMut(&str),
) -> Result<String> {
    let mut full = String::new();
    stream_lines(reader, cancel, |line| {
        let chunk: OllamaGenerateResponse = serde_json::from_str(line)?;
        if let Some(err) = chunk.error {
            return Err(Error::Service(err));
        }
        on_chunk(&chunk.response);
        full.push_str(&chunk.response);
        Ok(chunk.done)
    })?;
    Ok(full)
}

fn read_chat_stream(
    reader: impl BufRead + Send + 'static,
    cancel: &CancellationToken,
    mut on_chunk: impl FnMut(&str),
) -> Result<String> {
    let mut full = String::new();
    stream_lines(reader, cancel, |line| {
        let chunk: OllamaChatResponse = serde_json::from_str(line)?;
        if let Some(err) = chunk.error {
            return Err(Error::Service(err));
        }
        if let Some(message) = chunk.message {
            on_chunk(&message.content);
            full.push_str(&message.content);
        }
        Ok(chunk.done)
    })?;
    Ok(full)
}

/// Feeds each non-empty NDJSON line to `handle` until it reports `done`,
/// the body ends, or `cancel` fires.
///
/// Lines are read on a worker thread so a read blocked on a silent server
/// does not delay cancellation. On cancel the worker is left behind; it
/// exits once its read returns and the channel is gone.
fn stream_lines(
    reader: impl BufRead + Send + 'static,
    cancel: &CancellationToken,
    mut handle: impl FnMut(&str) -> Result<bool>,
) -> Result<()> {
    let (tx, rx) = mpsc::channel::<io::Result<String>>();
    thread::spawn(move || {
        for line in reader.lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let line = match rx.recv_timeout(CANCEL_POLL) {
            Ok(line) => line?,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        };
        if line.trim().is_empty() {
            continue;
        }
        if handle(&line)? {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{self, Transcript};
    use crate::types::Role;
    use std::io::{Cursor, Read};
    use std::time::Instant;

    fn collect(body: &str, cancel: &CancellationToken) -> Result<String> {
        read_generate_stream(Cursor::new(body.to_string()), cancel, |_| {})
    }

    /// A body whose first byte only arrives after `delay`.
    struct SlowBody {
        delay: Duration,
        inner: Cursor<Vec<u8>>,
        waited: bool,
    }

    impl SlowBody {
        fn new(delay: Duration, body: &str) -> Self {
            Self {
                delay,
                inner: Cursor::new(body.as_bytes().to_vec()),
                waited: false,
            }
        }
    }

    impl Read for SlowBody {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.waited {
                thread::sleep(self.delay);
                self.waited = true;
            }
            self.inner.read(buf)
        }
    }

    #[test]
    fn stream_concatenates_until_done() {
        let body = "{\"response\":\"ls\",\"done\":false}\n\n{\"response\":\" -la\",\"done\":true}\n{\"response\":\"ignored\",\"done\":false}\n";
        assert_eq!(collect(body, &CancellationToken::new()).unwrap(), "ls -la");
    }

    #[test]
    fn stream_stops_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let body = "{\"response\":\"a\",\"done\":false}\n";
        assert!(matches!(collect(body, &token), Err(Error::Cancelled)));
    }

    #[test]
    fn cancel_interrupts_a_silent_server() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });

        let body = SlowBody::new(
            Duration::from_secs(3),
            "{\"response\":\"late\",\"done\":true}\n",
        );
        let started = Instant::now();
        let result = read_generate_stream(BufReader::new(body), &token, |_| {});

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn slow_stream_still_completes() {
        let body = SlowBody::new(
            Duration::from_millis(200),
            "{\"response\":\"ok\",\"done\":true}\n",
        );
        let out = read_generate_stream(BufReader::new(body), &CancellationToken::new(), |_| {});
        assert_eq!(out.unwrap(), "ok");
    }

    #[test]
    fn chat_cancelled_after_first_chunk_rolls_back_turn() {
        let mut transcript = Transcript::default();
        chat::exchange(&mut transcript, "hi", |_| Ok("hello".to_string())).unwrap();
        let before = transcript.len();

        let token = CancellationToken::new();
        let mut seen = Vec::new();
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Once\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\" upon\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\" a time\"},\"done\":true}\n",
        );
        let result = chat::exchange(&mut transcript, "tell me a story", |_| {
            read_chat_stream(Cursor::new(body.to_string()), &token, |chunk| {
                seen.push(chunk.to_string());
                // ctrl-c lands while the reply is streaming
                token.cancel();
            })
        });

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(seen, ["Once"]);
        assert_eq!(transcript.len(), before);
        assert_eq!(transcript.messages().last().unwrap().role, Role::Assistant);
    }

    #[test]
    fn model_can_be_switched() {
        let client = OllamaClient::new("http://localhost:11434", "llama3.2");
        client.set_model("qwen2.5");
        assert_eq!(client.model(), "qwen2.5");
    }

    #[test]
    fn stream_surfaces_server_error() {
        let body = "{\"error\":\"model not found\"}\n";
        match collect(body, &CancellationToken::new()) {
            Err(Error::Service(msg)) => assert_eq!(msg, "model not found"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn stream_rejects_garbage() {
        let body = "not json\n";
        assert!(matches!(collect(body, &CancellationToken::new()), Err(Error::Json(_))));
    }

    #[test]
    fn chat_chunk_parses() {
        let chunk: OllamaChatResponse =
            serde_json::from_str(r#"{"message":{"role":"assistant","content":"hi"},"done":false}"#)
                .unwrap();
        assert_eq!(chunk.message.unwrap().content, "hi");
        assert!(!chunk.done);
    }

    #[test]
    fn chat_request_serializes_roles_lowercase() {
        let messages = vec![ChatMessage::new(Role::User, "hola")];
        let body = OllamaChat {
            model: "llama3",
            messages: &messages,
            stream: true,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains(r#""role":"user""#));
    }

    #[test]
    fn endpoint_trailing_slash_trimmed() {
        let client = OllamaClient::new("http://localhost:11434/", "llama3");
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.model(), "llama3");
    }
}
