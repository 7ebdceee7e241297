//! Ollama-style local chat and embedding adapters
//!
//! Same conversation shape as the OpenAI-style adapter; no credential.
//! The endpoint defaults to a local HTTP service and can be overridden
//! with `base_url` or `OLLAMA_HOST`.

use super::{CompletionRequest, CompletionResponse, CompletionStream, Embedder, StreamChunk};
use crate::errors::{AppError, Result};
use crate::providers::{format_context, http_client, Completer};
use crate::types::Role;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

fn resolve_base_url(base_url: Option<String>) -> String {
    base_url
        .or_else(|| std::env::var("OLLAMA_HOST").ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

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

// ============================================================================
// Embeddings
// ============================================================================

pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    base_url: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(model: String, base_url: Option<String>) -> Result<Self> {
        let dimensions = match model.as_str() {
            "nomic-embed-text" => 768,
            "mxbai-embed-large" => 1024,
            "all-minilm" => 384,
            _ => 768,
        };
        Ok(Self {
            client: http_client()?,
            model,
            base_url: resolve_base_url(base_url),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| AppError::Embedding {
                message: format!("ollama request failed: {e}"),
                retryable: true,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding {
                message: format!("ollama API error {status}: {body}"),
                retryable: status.is_server_error(),
            });
        }

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| AppError::Embedding {
                message: format!("failed to parse ollama embedding response: {e}"),
                retryable: false,
            })?;
        Ok(parsed.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // The embeddings endpoint takes one prompt at a time
        let mut all = Vec::with_capacity(texts.len());
        for text in texts {
            all.push(self.embed(text).await?);
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
// Chat
// ============================================================================

pub struct OllamaCompleter {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// Response object, one per NDJSON line when streaming
#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: ResponseMessage,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize, Default)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl ChatResponse {
    fn tokens_used(&self) -> u32 {
        self.prompt_eval_count.unwrap_or(0) + self.eval_count.unwrap_or(0)
    }
}

impl OllamaCompleter {
    pub fn new(model: String, base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            model,
            base_url: resolve_base_url(base_url),
        })
    }

    async fn send(&self, req: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let body = ChatRequest {
            model: &self.model,
            messages: build_messages(req),
            stream,
            options: ChatOptions {
                temperature: req.temperature,
                num_predict: req.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Completion {
                message: format!("ollama request failed: {e}"),
                retryable: true,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Completion {
                message: format!("ollama API error {status}: {text}"),
                retryable: status.is_server_error(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Completer for OllamaCompleter {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let response = self.send(req, false).await?;
        let parsed: ChatResponse = response.json().await.map_err(|e| AppError::Completion {
            message: format!("failed to parse ollama response: {e}"),
            retryable: false,
        })?;

        Ok(CompletionResponse {
            tokens_used: parsed.tokens_used(),
            finish_reason: parsed.done_reason,
            content: parsed.message.content,
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
                            message: format!("ollama stream read failed: {e}"),
                            retryable: true,
                        });
                        return;
                    }
                };

                buf.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    // Malformed lines are skipped
                    let Ok(parsed) = serde_json::from_str::<ChatResponse>(&line) else {
                        continue;
                    };

                    // `done: true` is the terminal sentinel
                    if parsed.done {
                        let _ = tx
                            .send(StreamChunk {
                                content: parsed.message.content.clone(),
                                finish_reason: parsed
                                    .done_reason
                                    .clone()
                                    .or_else(|| Some("stop".to_string())),
                                tokens_used: Some(parsed.tokens_used()),
                            })
                            .await;
                        return;
                    }

                    if parsed.message.content.is_empty() {
                        continue;
                    }
                    let chunk = StreamChunk {
                        content: parsed.message.content,
                        ..Default::default()
                    };
                    if tx.send(chunk).await.is_err() {
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

    #[test]
    fn base_url_resolution_prefers_explicit() {
        assert_eq!(
            resolve_base_url(Some("http://gpu-box:11434".into())),
            "http://gpu-box:11434"
        );
    }

    #[test]
    fn ndjson_line_parsing() {
        let line = r#"{"model":"llama3.2","message":{"role":"assistant","content":"Hi"},"done":false}"#;
        let parsed: ChatResponse = serde_json::from_str(line).unwrap();
        assert_eq!(parsed.message.content, "Hi");
        assert!(!parsed.done);

        let terminal = r#"{"model":"llama3.2","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","prompt_eval_count":10,"eval_count":20}"#;
        let parsed: ChatResponse = serde_json::from_str(terminal).unwrap();
        assert!(parsed.done);
        assert_eq!(parsed.tokens_used(), 30);
    }
}
