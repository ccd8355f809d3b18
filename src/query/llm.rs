//! Chat model clients and the grounded prompt.
//!
//! The orchestrator treats the language model as an opaque text
//! generator: it sends a prompt containing the retrieved chunks verbatim
//! and passes the response through unchanged. Two HTTP backends are
//! provided (a local Ollama-compatible endpoint and a remote
//! OpenAI-compatible API) plus a counting test double.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::{ModelType, Settings};
use crate::store::ChunkRecord;
use crate::types::{Result, StashError};

/// The fixed answer returned when retrieval finds nothing. The generator
/// is never invoked in that case.
pub const NO_INFORMATION_ANSWER: &str = "No relevant information was found in the knowledge base \
for this question. Add documents covering the topic, or rephrase the question with more specific \
terms.";

/// Opaque text generator behind a configurable endpoint.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce a completion for the prompt. The orchestrator passes the
    /// returned text through without interpretation.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Stable identity, e.g. `"ollama:llama3"`.
    fn id(&self) -> String;
}

/// Build the configured chat backend.
pub fn chat_model_from_settings(settings: &Settings) -> Result<Arc<dyn ChatModel>> {
    match settings.model_type {
        ModelType::Local => Ok(Arc::new(OllamaChat::new(
            "http://localhost:11434",
            &settings.local_model,
            settings.local_temperature,
            Duration::from_secs(120),
        )?)),
        ModelType::Remote => {
            let api_key = settings.remote_api_key.as_deref().ok_or_else(|| {
                StashError::Config("REMOTE_API_KEY is required for the remote model".into())
            })?;
            Ok(Arc::new(OpenAiChat::new(
                api_key,
                &settings.remote_api_base,
                &settings.remote_model,
                settings.remote_temperature,
                Duration::from_secs(120),
            )?))
        }
    }
}

/// Assemble the retrieval-grounded prompt: instructions, the retrieved
/// chunks verbatim, then the question.
pub fn build_grounded_prompt(query: &str, hits: &[(ChunkRecord, f32)]) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(
        "Answer the question using only the reference material below. \
         If the material does not contain the answer, say that the knowledge base \
         does not cover it. Do not invent facts.\n\n",
    );
    for (i, (chunk, _)) in hits.iter().enumerate() {
        prompt.push_str(&format!(
            "--- Reference {} (source: {}) ---\n{}\n\n",
            i + 1,
            chunk.metadata.source,
            chunk.text
        ));
    }
    prompt.push_str(&format!("Question: {query}\nAnswer:"));
    prompt
}

// ── Local chat (Ollama-compatible) ─────────────────────────────────────

pub struct OllamaChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OllamaChat {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| StashError::ChatBackend(format!("http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model: model.into(),
            temperature,
        })
    }
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(chat_error)?
            .error_for_status()
            .map_err(chat_error)?;
        let parsed: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|err| StashError::ChatBackend(format!("malformed response: {err}")))?;
        Ok(parsed.response)
    }

    fn id(&self) -> String {
        format!("ollama:{}", self.model)
    }
}

// ── Remote chat (OpenAI-compatible) ────────────────────────────────────

pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(StashError::Config("missing remote chat API key".into()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .map_err(|_| StashError::Config("API key contains invalid characters".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| StashError::ChatBackend(format!("http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            temperature,
        })
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(chat_error)?
            .error_for_status()
            .map_err(chat_error)?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| StashError::ChatBackend(format!("malformed response: {err}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| StashError::ChatBackend("response carried no choices".into()))
    }

    fn id(&self) -> String {
        format!("openai:{}", self.model)
    }
}

fn chat_error(err: reqwest::Error) -> StashError {
    if err.is_timeout() {
        StashError::ChatBackend(format!("request timed out: {err}"))
    } else {
        StashError::ChatBackend(err.to_string())
    }
}

// ── Counting test double ───────────────────────────────────────────────

/// Chat model that returns a fixed reply and counts invocations. Lets
/// tests assert the hallucination guard: zero retrieval must mean zero
/// generator calls.
pub struct CountingChat {
    reply: String,
    calls: AtomicUsize,
}

impl CountingChat {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of completions served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for CountingChat {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }

    fn id(&self) -> String {
        "mock:counting-chat".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChunkMetadata;

    fn hit(source: &str, text: &str) -> (ChunkRecord, f32) {
        (
            ChunkRecord {
                id: "id".into(),
                text: text.into(),
                metadata: ChunkMetadata {
                    source: source.into(),
                    file_path: None,
                    file_type: ".txt".into(),
                    processed_date: "2026-01-01T00:00:00Z".into(),
                    processing_method: "enhanced".into(),
                    chunk_index: 0,
                    chunk_total: 1,
                    titles_count: 0,
                    tables_count: 0,
                    lists_count: 0,
                    oversized: false,
                },
                embedding: None,
            },
            0.1,
        )
    }

    #[test]
    fn prompt_contains_chunks_verbatim_and_the_question() {
        let hits = vec![
            hit("a.txt", "First reference body."),
            hit("b.txt", "Second reference body."),
        ];
        let prompt = build_grounded_prompt("What is covered?", &hits);
        assert!(prompt.contains("First reference body."));
        assert!(prompt.contains("Second reference body."));
        assert!(prompt.contains("source: a.txt"));
        assert!(prompt.contains("Question: What is covered?"));
        // References precede the question.
        assert!(prompt.find("First reference").unwrap() < prompt.find("Question:").unwrap());
    }

    #[tokio::test]
    async fn counting_chat_counts() {
        let chat = CountingChat::new("answer");
        assert_eq!(chat.calls(), 0);
        chat.complete("prompt").await.unwrap();
        chat.complete("prompt").await.unwrap();
        assert_eq!(chat.calls(), 2);
    }
}
