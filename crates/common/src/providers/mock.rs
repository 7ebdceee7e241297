//! Deterministic mock providers for testing

use super::{
    CompletionRequest, CompletionResponse, CompletionStream, Completer, Embedder, StreamChunk,
};
use crate::errors::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// Embedder returning a constant vector
pub struct MockEmbedder {
    vector: Vec<f32>,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            vector: vec![0.1; dimensions],
        }
    }

    pub fn with_vector(vector: Vec<f32>) -> Self {
        Self { vector }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(self.vector.clone())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| self.vector.clone()).collect())
    }

    fn dimensions(&self) -> usize {
        self.vector.len()
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }
}

/// Completer returning a fixed answer, streamed as fixed chunks
pub struct MockCompleter {
    pub response: String,
    pub chunks: Vec<String>,
    pub tokens_used: u32,
}

impl MockCompleter {
    pub fn new(response: impl Into<String>) -> Self {
        let response = response.into();
        Self {
            chunks: vec![response.clone()],
            response,
            tokens_used: 120,
        }
    }

    pub fn with_chunks(mut self, chunks: Vec<String>) -> Self {
        self.chunks = chunks;
        self
    }
}

#[async_trait]
impl Completer for MockCompleter {
    async fn complete(&self, _req: &CompletionRequest) -> Result<CompletionResponse> {
        Ok(CompletionResponse {
            content: self.response.clone(),
            tokens_used: self.tokens_used,
            finish_reason: Some("stop".into()),
        })
    }

    async fn complete_stream(&self, _req: &CompletionRequest) -> Result<CompletionStream> {
        let (tx, rx) = mpsc::channel(8);
        let (_err_tx, err_rx) = oneshot::channel();
        let chunks = self.chunks.clone();

        tokio::spawn(async move {
            for content in chunks {
                if tx.send(StreamChunk {
                    content,
                    ..Default::default()
                })
                .await
                .is_err()
                {
                    return;
                }
            }
        });

        Ok(CompletionStream {
            chunks: rx,
            error: err_rx,
        })
    }

    fn model_name(&self) -> &str {
        "mock-completion"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embedder_is_constant() {
        let embedder = MockEmbedder::new(3);
        let a = embedder.embed("one").await.unwrap();
        let b = embedder.embed("two").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(embedder.dimensions(), 3);
    }

    #[tokio::test]
    async fn mock_completer_streams_chunks_then_closes() {
        let completer = MockCompleter::new("This is a streaming response.")
            .with_chunks(vec!["This is ".into(), "a streaming response.".into()]);

        let mut stream = completer
            .complete_stream(&CompletionRequest::default())
            .await
            .unwrap();

        let mut collected = String::new();
        while let Some(chunk) = stream.chunks.recv().await {
            collected.push_str(&chunk.content);
        }
        assert_eq!(collected, "This is a streaming response.");
        assert!(stream.error.try_recv().is_err());
    }
}
