//! Embedding and completion provider abstraction
//!
//! Two capability traits front every vendor:
//! - [`Embedder`]: text to fixed-dimension vectors
//! - [`Completer`]: chat completion, buffered or streamed
//!
//! Adapters: OpenAI-style chat + embeddings, Anthropic-style messages,
//! Ollama-style local chat + embeddings (no credential), Voyage
//! embeddings. A vendor missing a capability fails at pipeline
//! construction, not per request.

mod anthropic;
mod mock;
mod ollama;
mod openai;
mod voyage;

pub use anthropic::AnthropicCompleter;
pub use mock::{MockCompleter, MockEmbedder};
pub use ollama::{OllamaCompleter, OllamaEmbedder};
pub use openai::{OpenAiCompleter, OpenAiEmbedder};
pub use voyage::VoyageEmbedder;

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::keys::LoadedKeys;
use crate::types::{ChatMessage, ContextDocument};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Request timeout shared by all provider HTTP clients
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Known providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Voyage,
    Ollama,
}

impl Provider {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "voyage" => Ok(Provider::Voyage),
            "ollama" => Ok(Provider::Ollama),
            other => Err(AppError::invalid_request(format!(
                "unknown provider: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Voyage => "voyage",
            Provider::Ollama => "ollama",
        }
    }

    /// Environment variable consulted when no key file is configured
    pub fn env_var(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Voyage => Some("VOYAGE_API_KEY"),
            Provider::Ollama => None,
        }
    }

    /// Home-directory dotfile consulted last
    pub fn dotfile(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some(".openai_api_key"),
            Provider::Anthropic => Some(".anthropic_api_key"),
            Provider::Voyage => Some(".voyage_api_key"),
            Provider::Ollama => None,
        }
    }

    /// Whether the provider needs a credential at all
    pub fn requires_key(&self) -> bool {
        !matches!(self, Provider::Ollama)
    }
}

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dimension of produced vectors
    fn dimensions(&self) -> usize;

    /// Model identifier
    fn model_name(&self) -> &str;
}

impl std::fmt::Debug for dyn Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model_name", &self.model_name())
            .finish()
    }
}

/// Completion request handed to an adapter
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub context: Vec<ContextDocument>,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// Buffered completion result
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub tokens_used: u32,
    pub finish_reason: Option<String>,
}

/// One streamed completion increment
///
/// The final non-empty element may also carry a finish reason and a
/// token-usage tally.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub content: String,
    pub finish_reason: Option<String>,
    pub tokens_used: Option<u32>,
}

/// A provider stream: ordered chunks plus at most one error
///
/// Both channels are closed by the adapter on every exit path; dropping
/// the receivers aborts the upstream HTTP read.
pub struct CompletionStream {
    pub chunks: mpsc::Receiver<StreamChunk>,
    pub error: oneshot::Receiver<AppError>,
}

/// Trait for chat completion
#[async_trait]
pub trait Completer: Send + Sync {
    /// Run a completion and return the full response
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse>;

    /// Run a completion, streaming increments as the vendor produces them
    async fn complete_stream(&self, req: &CompletionRequest) -> Result<CompletionStream>;

    /// Model identifier
    fn model_name(&self) -> &str;
}

impl std::fmt::Debug for dyn Completer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer")
            .field("model_name", &self.model_name())
            .finish()
    }
}

/// Render retrieved documents as the single context block shared by all
/// adapters.
pub fn format_context(docs: &[ContextDocument]) -> String {
    let mut out = String::from("Use the following context to answer the question:\n\n");
    for (i, doc) in docs.iter().enumerate() {
        match &doc.source {
            Some(source) => {
                out.push_str(&format!("--- Document {} (Source: {}) ---\n", i + 1, source))
            }
            None => out.push_str(&format!("--- Document {} ---\n", i + 1)),
        }
        out.push_str(&doc.content);
        out.push_str("\n\n");
    }
    out
}

/// Shared HTTP client construction for adapters
fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(PROVIDER_TIMEOUT)
        .build()
        .map_err(|e| AppError::internal(format!("failed to create HTTP client: {e}")))
}

fn require_key<'a>(keys: &'a LoadedKeys, provider: Provider) -> Result<&'a str> {
    keys.get(provider).ok_or_else(|| AppError::Credential {
        message: format!("no API key loaded for {}", provider.as_str()),
    })
}

/// Instantiate the embedding adapter for a pipeline
pub fn create_embedder(cfg: &LlmConfig, keys: &LoadedKeys) -> Result<Arc<dyn Embedder>> {
    let provider = Provider::parse(&cfg.provider)?;
    match provider {
        Provider::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(
            require_key(keys, provider)?.to_string(),
            cfg.model.clone(),
            cfg.base_url.clone(),
        )?)),
        Provider::Voyage => Ok(Arc::new(VoyageEmbedder::new(
            require_key(keys, provider)?.to_string(),
            cfg.model.clone(),
            cfg.base_url.clone(),
        )?)),
        Provider::Ollama => Ok(Arc::new(OllamaEmbedder::new(
            cfg.model.clone(),
            cfg.base_url.clone(),
        )?)),
        Provider::Anthropic => Err(AppError::UnsupportedCapability {
            provider: provider.as_str().into(),
            capability: "embedding".into(),
        }),
    }
}

/// Instantiate the completion adapter for a pipeline
pub fn create_completer(cfg: &LlmConfig, keys: &LoadedKeys) -> Result<Arc<dyn Completer>> {
    let provider = Provider::parse(&cfg.provider)?;
    match provider {
        Provider::OpenAi => Ok(Arc::new(OpenAiCompleter::new(
            require_key(keys, provider)?.to_string(),
            cfg.model.clone(),
            cfg.base_url.clone(),
        )?)),
        Provider::Anthropic => Ok(Arc::new(AnthropicCompleter::new(
            require_key(keys, provider)?.to_string(),
            cfg.model.clone(),
            cfg.base_url.clone(),
        )?)),
        Provider::Ollama => Ok(Arc::new(OllamaCompleter::new(
            cfg.model.clone(),
            cfg.base_url.clone(),
        )?)),
        Provider::Voyage => Err(AppError::UnsupportedCapability {
            provider: provider.as_str().into(),
            capability: "completion".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_block_formatting() {
        let docs = vec![
            ContextDocument {
                content: "alpha beta".into(),
                score: 0.9,
                source: Some("documents".into()),
            },
            ContextDocument {
                content: "gamma".into(),
                score: 0.5,
                source: None,
            },
        ];
        let block = format_context(&docs);
        assert!(block.starts_with("Use the following context to answer the question:\n\n"));
        assert!(block.contains("--- Document 1 (Source: documents) ---\nalpha beta\n\n"));
        assert!(block.contains("--- Document 2 ---\ngamma\n\n"));
    }

    #[test]
    fn provider_parsing() {
        assert_eq!(Provider::parse("OpenAI").unwrap(), Provider::OpenAi);
        assert_eq!(Provider::parse("ollama").unwrap(), Provider::Ollama);
        assert!(Provider::parse("cohere").is_err());
    }

    #[test]
    fn voyage_cannot_complete() {
        let cfg = LlmConfig {
            provider: "voyage".into(),
            model: "voyage-3".into(),
            base_url: None,
        };
        let mut keys = LoadedKeys::default();
        keys.set(Provider::Voyage, "vk-test".into());
        let err = create_completer(&cfg, &keys).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedCapability { .. }));
    }

    #[test]
    fn anthropic_cannot_embed() {
        let cfg = LlmConfig {
            provider: "anthropic".into(),
            model: "claude-3-5-haiku-latest".into(),
            base_url: None,
        };
        let mut keys = LoadedKeys::default();
        keys.set(Provider::Anthropic, "ak-test".into());
        let err = create_embedder(&cfg, &keys).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedCapability { .. }));
    }
}
