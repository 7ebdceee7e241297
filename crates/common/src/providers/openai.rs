//! OpenAI-style chat and embedding adapters
//!
//! Also serves any OpenAI-compatible endpoint via `base_url`.

use super::{
    http_client, CompletionRequest, CompletionResponse, CompletionStream, Embedder, StreamChunk,
};
use crate::errors::{AppError, Result};
use crate::providers::{format_context, Completer};
use crate::types::Role;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Terminal sentinel on the chat completion stream
const STREAM_DONE: &str = "[DONE]";

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// System prompt and formatted context become system messages prepended
/// to the conversation.
fn build_messages(req: &CompletionRequest) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(req.messages.len() + 2);
    if !req.system_prompt.is_empty() {
        messages.push(WireMessage {
            role: "system",
            content: req.system_prompt.clone(),
        });
    }
    if !req.context.is_empty() {
        messages.push(WireMessage {
            role: "system",
            content: format_context(&req.context),
        });
    }
    for m in &req.messages {
        messages.push(WireMessage {
            role: wire_role(m.role),
            content: m.content.clone(),
        });
    }
    messages
}

fn transport_error(kind: &str, err: reqwest::Error) -> AppError {
    AppError::Completion {
        message: format!("{kind} request failed: {err}"),
        retryable: true,
    }
}

fn api_error(kind: &str, status: reqwest::StatusCode, body: String) -> AppError {
    let retryable = status.as_u16() == 429 || status.is_server_error();
    AppError::Completion {
        message: format!("{kind} API error {status}: {body}"),
        retryable,
    }
}

// ============================================================================
// Embeddings
// ============================================================================

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Result<Self> {
        let dimensions = match model.as_str() {
            "text-embedding-ada-002" => 1536,
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };
        Ok(Self {
            client: http_client()?,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            dimensions,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                input: texts,
                model: &self.model,
            })
            .send()
            .await
            .map_err(|e| AppError::Embedding {
                message: format!("openai request failed: {e}"),
                retryable: true,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding {
                message: format!("openai API error {status}: {body}"),
                retryable: status.as_u16() == 429 || status.is_server_error(),
            });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| AppError::Embedding {
            message: format!("failed to parse openai embedding response: {e}"),
            retryable: false,
        })?;

        Ok(parsed.data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request(std::slice::from_ref(&text.to_string())).await?;
        embeddings.into_iter().next().ok_or(AppError::Embedding {
            message: "openai returned no embeddings".into(),
            retryable: false,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // API caps input sizes; chunk large batches
        const BATCH_SIZE: usize = 100;
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            all.extend(self.request(chunk).await?);
        }
        Ok(all)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Chat completions
// ============================================================================

pub struct OpenAiCompleter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u32,
}

#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

impl OpenAiCompleter {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    async fn send(&self, req: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: build_messages(req),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("openai", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(api_error("openai", status, text));
        }
        Ok(response)
    }
}

#[async_trait]
impl Completer for OpenAiCompleter {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let response = self.send(req, false).await?;
        let parsed: ChatResponse = response.json().await.map_err(|e| AppError::Completion {
            message: format!("failed to parse openai response: {e}"),
            retryable: false,
        })?;

        let choice = parsed.choices.into_iter().next().ok_or(AppError::Completion {
            message: "openai returned no choices".into(),
            retryable: false,
        })?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            tokens_used: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
            finish_reason: choice.finish_reason,
        })
    }

    async fn complete_stream(&self, req: &CompletionRequest) -> Result<CompletionStream> {
        let response = self.send(req, true).await?;

        let (tx, rx) = mpsc::channel(32);
        let (err_tx, err_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buf = String::new();

            while let Some(next) = body.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = err_tx.send(AppError::Completion {
                            message: format!("openai stream read failed: {e}"),
                            retryable: true,
                        });
                        return;
                    }
                };

                buf.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);

                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if payload == STREAM_DONE {
                        return;
                    }
                    // Malformed chunks are skipped
                    let Ok(parsed) = serde_json::from_str::<StreamResponse>(payload) else {
                        continue;
                    };

                    let mut chunk = StreamChunk {
                        tokens_used: parsed.usage.map(|u| u.total_tokens),
                        ..Default::default()
                    };
                    if let Some(choice) = parsed.choices.into_iter().next() {
                        chunk.content = choice.delta.content.unwrap_or_default();
                        chunk.finish_reason = choice.finish_reason;
                    }
                    if chunk.content.is_empty()
                        && chunk.finish_reason.is_none()
                        && chunk.tokens_used.is_none()
                    {
                        continue;
                    }
                    if tx.send(chunk).await.is_err() {
                        // Consumer went away; abort the read
                        return;
                    }
                }
            }
        });

        Ok(CompletionStream {
            chunks: rx,
            error: err_rx,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, ContextDocument};

    #[test]
    fn system_prompt_and_context_are_prepended() {
        let req = CompletionRequest {
            system_prompt: "Be brief.".into(),
            context: vec![ContextDocument {
                content: "alpha".into(),
                score: 1.0,
                source: None,
            }],
            messages: vec![ChatMessage::user("what is alpha?")],
            temperature: 0.7,
            max_tokens: None,
        };

        let messages = build_messages(&req);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, "Be brief.");
        assert_eq!(messages[1].role, "system");
        assert!(messages[1].content.contains("--- Document 1 ---"));
        assert_eq!(messages[2].role, "user");
    }

    #[test]
    fn stream_payload_parsing() {
        let payload = r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hel"));

        let terminal =
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"total_tokens":42}}"#;
        let parsed: StreamResponse = serde_json::from_str(terminal).unwrap();
        assert_eq!(parsed.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(parsed.usage.unwrap().total_tokens, 42);
    }
}
