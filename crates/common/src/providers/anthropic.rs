//! Anthropic-style messages adapter
//!
//! The system prompt and the formatted context go into the separate
//! `system` field; the conversation carries only user/assistant turns.
//! A stray system role in the conversation is folded into the system
//! field.

use super::{CompletionRequest, CompletionResponse, CompletionStream, StreamChunk};
use crate::errors::{AppError, Result};
use crate::providers::{format_context, http_client, Completer};
use crate::types::Role;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicCompleter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "is_false")]
    stream: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<WireUsage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Stream frames, discriminated by `type`
#[derive(Deserialize)]
#[serde(tag = "type")]
enum StreamFrame {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: BlockDelta },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: MessageDeltaBody,
        usage: Option<WireUsage>,
    },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Default)]
struct BlockDelta {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

/// Fold the request into (system field, conversation)
fn build_request_parts(req: &CompletionRequest) -> (String, Vec<WireMessage>) {
    let mut system = String::new();
    if !req.system_prompt.is_empty() {
        system.push_str(&req.system_prompt);
    }
    if !req.context.is_empty() {
        if !system.is_empty() {
            system.push_str("\n\n");
        }
        system.push_str(&format_context(&req.context));
    }

    let mut messages = Vec::with_capacity(req.messages.len());
    for m in &req.messages {
        match m.role {
            Role::System => {
                if !system.is_empty() {
                    system.push_str("\n\n");
                }
                system.push_str(&m.content);
            }
            Role::User => messages.push(WireMessage {
                role: "user",
                content: m.content.clone(),
            }),
            Role::Assistant => messages.push(WireMessage {
                role: "assistant",
                content: m.content.clone(),
            }),
        }
    }

    (system, messages)
}

fn transport_error(err: reqwest::Error) -> AppError {
    AppError::Completion {
        message: format!("anthropic request failed: {err}"),
        retryable: true,
    }
}

fn api_error(status: reqwest::StatusCode, body: String) -> AppError {
    AppError::Completion {
        message: format!("anthropic API error {status}: {body}"),
        retryable: status.as_u16() == 429 || status.is_server_error(),
    }
}

impl AnthropicCompleter {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    async fn send(&self, req: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let (system, messages) = build_request_parts(req);
        let body = MessagesRequest {
            model: &self.model,
            system,
            messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            stream,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(api_error(status, text));
        }
        Ok(response)
    }
}

#[async_trait]
impl Completer for AnthropicCompleter {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let response = self.send(req, false).await?;
        let parsed: MessagesResponse =
            response.json().await.map_err(|e| AppError::Completion {
                message: format!("failed to parse anthropic response: {e}"),
                retryable: false,
            })?;

        let content = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<String>();

        let tokens_used = parsed
            .usage
            .map(|u| u.input_tokens + u.output_tokens)
            .unwrap_or(0);

        Ok(CompletionResponse {
            content,
            tokens_used,
            finish_reason: parsed.stop_reason,
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
                            message: format!("anthropic stream read failed: {e}"),
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
                    // Malformed frames are skipped
                    let Ok(frame) = serde_json::from_str::<StreamFrame>(payload) else {
                        continue;
                    };

                    let chunk = match frame {
                        StreamFrame::ContentBlockDelta { delta } => StreamChunk {
                            content: delta.text,
                            ..Default::default()
                        },
                        StreamFrame::MessageDelta { delta, usage } => StreamChunk {
                            finish_reason: delta.stop_reason,
                            tokens_used: usage.map(|u| u.input_tokens + u.output_tokens),
                            ..Default::default()
                        },
                        StreamFrame::MessageStop => return,
                        StreamFrame::Other => continue,
                    };

                    if chunk.content.is_empty()
                        && chunk.finish_reason.is_none()
                        && chunk.tokens_used.is_none()
                    {
                        continue;
                    }
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
