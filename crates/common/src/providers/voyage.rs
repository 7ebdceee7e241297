//! Voyage AI embedding adapter (embedding-only vendor)

use super::Embedder;
use crate::errors::{AppError, Result};
use crate::providers::http_client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.voyageai.com/v1";

pub struct VoyageEmbedder {
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

impl VoyageEmbedder {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Result<Self> {
        let dimensions = match model.as_str() {
            "voyage-3" => 1024,
            "voyage-3-lite" => 512,
            "voyage-code-3" => 1024,
            "voyage-large-2" => 1536,
            "voyage-2" => 1024,
            _ => 1024,
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
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                input: texts,
                model: &self.model,
            })
            .send()
            .await
            .map_err(|e| AppError::Embedding {
                message: format!("voyage request failed: {e}"),
                retryable: true,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding {
                message: format!("voyage API error {status}: {body}"),
                retryable: status.as_u16() == 429 || status.is_server_error(),
            });
        }

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| AppError::Embedding {
                message: format!("failed to parse voyage embedding response: {e}"),
                retryable: false,
            })?;
        Ok(parsed.data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for VoyageEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request(std::slice::from_ref(&text.to_string())).await?;
        embeddings.into_iter().next().ok_or(AppError::Embedding {
            message: "voyage returned no embeddings".into(),
            retryable: false,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Voyage caps batch sizes well below typical corpus sizes
        const BATCH_SIZE: usize = 128;
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
