//! External embedding model clients.
//!
//! The [`TextEmbedder`] trait is the contract consumed by the embedding
//! worker and the retriever. Two implementations:
//!
//! - **[`FastApiEmbedder`]** — a local HTTP embedding service exposing
//!   `POST /embed` with `{"texts": [...], "normalize": true}` and returning
//!   `{"dim": N, "embeddings": [[...]]}`.
//! - **[`OpenAiEmbedder`]** — the OpenAI embeddings API with exponential
//!   backoff for 429/5xx responses.
//!
//! Both return the vectors in input order together with the reported
//! dimension, and fail when the response count does not match the input.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::EmbeddingConfig;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: u32 = 5;

/// External embedding client contract.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Embed a batch of texts; returns vectors in input order and the vector
    /// dimension.
    async fn embed_texts(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, usize)>;
}

/// Select an embedder from configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn TextEmbedder>> {
    match config {
        EmbeddingConfig::FastApi { base_url } => Ok(Box::new(FastApiEmbedder::new(base_url)?)),
        EmbeddingConfig::OpenAi {
            api_key,
            model,
            dimensions,
        } => Ok(Box::new(OpenAiEmbedder::new(
            api_key.clone(),
            model.clone(),
            *dimensions,
        )?)),
    }
}

// ============ FastAPI-style local service ============

pub struct FastApiEmbedder {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct FastApiEmbedResponse {
    dim: usize,
    embeddings: Vec<Vec<f32>>,
}

impl FastApiEmbedder {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl TextEmbedder for FastApiEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, usize)> {
        if texts.is_empty() {
            bail!("texts are required");
        }

        let body = serde_json::json!({
            "texts": texts,
            "normalize": true,
        });

        let resp = self
            .client
            .post(format!("{}/embed", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("embed request failed: {}", e))?;

        if !resp.status().is_success() {
            bail!("embed request returned status {}", resp.status().as_u16());
        }

        let decoded: FastApiEmbedResponse = resp.json().await?;
        if decoded.embeddings.len() != texts.len() {
            bail!(
                "embed response mismatch: expected {} embeddings, got {}",
                texts.len(),
                decoded.embeddings.len()
            );
        }

        Ok((decoded.embeddings, decoded.dim))
    }
}

// ============ OpenAI ============

pub struct OpenAiEmbedder {
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: String, dimensions: usize) -> Result<Self> {
        if api_key.trim().is_empty() {
            bail!("OPENAI_API_KEY is required");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model,
            dimensions,
            client,
        })
    }
}

#[async_trait]
impl TextEmbedder for OpenAiEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, usize)> {
        if texts.is_empty() {
            bail!("texts are required");
        }

        let mut body = serde_json::json!({
            "input": texts,
            "model": self.model,
            "encoding_format": "float",
        });
        if self.dimensions > 0 {
            body["dimensions"] = serde_json::json!(self.dimensions);
        }

        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let decoded: OpenAiEmbedResponse = response.json().await?;
                        if decoded.data.len() != texts.len() {
                            bail!(
                                "openai embed response mismatch: expected {} embeddings, got {}",
                                texts.len(),
                                decoded.data.len()
                            );
                        }
                        let dim = decoded.data.first().map(|d| d.embedding.len()).unwrap_or(0);
                        let vectors = decoded.data.into_iter().map(|d| d.embedding).collect();
                        return Ok((vectors, dim));
                    }

                    // Rate limited or server error — retry.
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!("openai API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("openai API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("embedding failed after retries")))
    }
}
