//! Embedding worker: a single-consumer pipeline that deduplicates, embeds,
//! and persists chunk vectors.
//!
//! Exactly one task consumes the bounded request channel (capacity 128).
//! Producers call [`EmbeddingService::enqueue_chunk_and_wait`], which sends a
//! request carrying a oneshot reply channel and blocks until the worker has
//! processed it. A producer that gives up (drops its receiver) does not stop
//! the worker from finishing the message — the reply is simply discarded.
//!
//! Per chunk, the worker resolves the model id (request override over
//! default), looks up an existing embedding by `(kb, content_hash, model)`,
//! calls the external embedder only on a miss, and persists new vectors with
//! insert-if-absent semantics so concurrent writers converge on one row. A
//! result with an empty vector means the embedding was reused.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::embedder::TextEmbedder;
use crate::models::JsonMap;
use crate::repository::{EmbeddingStore, NewEmbedding};

/// Channel capacity for embedding requests.
pub const EMBEDDING_QUEUE_CAPACITY: usize = 128;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("model id is required")]
    MissingModelId,
    #[error("chunk_id is required")]
    MissingChunkId,
    #[error("content is required")]
    MissingContent,
    #[error("content_hash is required")]
    MissingContentHash,
    #[error("embedding service returned no vectors")]
    EmptyResponse,
    #[error("embedding service returned a zero-dimension vector")]
    ZeroDimension,
    #[error("no embedding result returned for chunk")]
    NoChunkResult,
    #[error("embedding worker is not running")]
    WorkerUnavailable,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One chunk to embed.
#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub chunk_id: String,
    pub content: String,
    pub content_hash: String,
    pub metadata: JsonMap,
}

/// Payload sent over the embedding input channel.
pub struct EmbedChunkRequest {
    pub kb_id: String,
    pub chunk: ChunkInput,
    pub model_id: Option<String>,
    pub reply: Option<oneshot::Sender<Result<EmbeddingResult, EmbeddingError>>>,
}

/// Outcome of embedding one chunk. An empty `vector` means an existing
/// embedding row was reused.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embedding_id: String,
    pub chunk_id: String,
    pub kb_id: String,
    pub content_hash: String,
    pub model_id: String,
    pub vector: Vec<f32>,
    pub vector_dimension: usize,
}

impl EmbeddingResult {
    pub fn reused(&self) -> bool {
        self.vector.is_empty()
    }
}

pub struct EmbeddingService {
    embedder: Arc<dyn TextEmbedder>,
    repo: Arc<dyn EmbeddingStore>,
    default_model_id: String,
    tx: mpsc::Sender<EmbedChunkRequest>,
}

impl EmbeddingService {
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        repo: Arc<dyn EmbeddingStore>,
        default_model_id: String,
        tx: mpsc::Sender<EmbedChunkRequest>,
    ) -> Self {
        Self {
            embedder,
            repo,
            default_model_id,
            tx,
        }
    }

    /// Create the bounded request channel consumed by [`EmbeddingService::run`].
    pub fn channel() -> (
        mpsc::Sender<EmbedChunkRequest>,
        mpsc::Receiver<EmbedChunkRequest>,
    ) {
        mpsc::channel(EMBEDDING_QUEUE_CAPACITY)
    }

    /// Consume requests until the channel closes. Exactly one task runs this.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<EmbedChunkRequest>) {
        while let Some(req) = rx.recv().await {
            info!(
                kb_id = %req.kb_id,
                chunk_id = %req.chunk.chunk_id,
                "embedding job started"
            );
            let outcome = self
                .embed_chunk(&req.kb_id, req.chunk.clone(), req.model_id.as_deref())
                .await;

            match &outcome {
                Ok(result) => info!(
                    kb_id = %req.kb_id,
                    chunk_id = %result.chunk_id,
                    embedding_id = %result.embedding_id,
                    model_id = %result.model_id,
                    vector_dimension = result.vector_dimension,
                    reused = result.reused(),
                    "embedding job completed"
                ),
                Err(err) => error!(
                    kb_id = %req.kb_id,
                    chunk_id = %req.chunk.chunk_id,
                    error = %err,
                    "embedding job failed"
                ),
            }

            if let Some(reply) = req.reply {
                // A cancelled producer has dropped its receiver; the work is
                // done either way.
                let _ = reply.send(outcome);
            }
        }
    }

    /// Send one chunk to the worker and wait for its result.
    pub async fn enqueue_chunk_and_wait(
        &self,
        kb_id: &str,
        chunk: ChunkInput,
        model_id: Option<String>,
    ) -> Result<EmbeddingResult, EmbeddingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = EmbedChunkRequest {
            kb_id: kb_id.to_string(),
            chunk,
            model_id,
            reply: Some(reply_tx),
        };

        self.tx
            .send(request)
            .await
            .map_err(|_| EmbeddingError::WorkerUnavailable)?;

        reply_rx
            .await
            .map_err(|_| EmbeddingError::WorkerUnavailable)?
    }

    async fn embed_chunk(
        &self,
        kb_id: &str,
        chunk: ChunkInput,
        model_id: Option<&str>,
    ) -> Result<EmbeddingResult, EmbeddingError> {
        let chunk_id = chunk.chunk_id.clone();
        let results = self.embed_and_store(kb_id, vec![chunk], model_id).await?;
        results
            .into_iter()
            .find(|r| r.chunk_id == chunk_id)
            .ok_or(EmbeddingError::NoChunkResult)
    }

    /// Validate, deduplicate, embed, and persist a batch of chunks.
    pub async fn embed_and_store(
        &self,
        kb_id: &str,
        chunks: Vec<ChunkInput>,
        model_id: Option<&str>,
    ) -> Result<Vec<EmbeddingResult>, EmbeddingError> {
        for chunk in &chunks {
            if chunk.chunk_id.is_empty() {
                return Err(EmbeddingError::MissingChunkId);
            }
            if chunk.content.is_empty() {
                return Err(EmbeddingError::MissingContent);
            }
            if chunk.content_hash.is_empty() {
                return Err(EmbeddingError::MissingContentHash);
            }
        }

        let model_id = match model_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.default_model_id.clone(),
        };
        if model_id.is_empty() {
            return Err(EmbeddingError::MissingModelId);
        }

        let mut results: Vec<EmbeddingResult> = Vec::with_capacity(chunks.len());
        let mut pending: Vec<ChunkInput> = Vec::with_capacity(chunks.len());
        let mut seen: std::collections::HashSet<String> =
            std::collections::HashSet::with_capacity(chunks.len());
        let mut reused_count = 0usize;

        for chunk in chunks {
            if !seen.insert(chunk.content_hash.clone()) {
                continue;
            }

            if let Some(existing_id) = self
                .repo
                .find_embedding_id(kb_id, &chunk.content_hash, &model_id)
                .await?
            {
                reused_count += 1;
                results.push(EmbeddingResult {
                    embedding_id: existing_id,
                    chunk_id: chunk.chunk_id,
                    kb_id: kb_id.to_string(),
                    content_hash: chunk.content_hash,
                    model_id: model_id.clone(),
                    vector: Vec::new(),
                    vector_dimension: 0,
                });
                continue;
            }

            pending.push(chunk);
        }

        if pending.is_empty() {
            info!(
                kb_id,
                model_id = %model_id,
                reused_embeddings = reused_count,
                "embedding request resolved from existing vectors"
            );
            return Ok(results);
        }

        let texts: Vec<String> = pending.iter().map(|c| c.content.clone()).collect();
        let (vectors, dim) = self.embedder.embed_texts(&texts).await?;
        if vectors.len() != pending.len() {
            return Err(EmbeddingError::EmptyResponse);
        }
        if dim == 0 || vectors.iter().any(|v| v.is_empty()) {
            return Err(EmbeddingError::ZeroDimension);
        }

        let new_embeddings: Vec<NewEmbedding> = pending
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| NewEmbedding {
                id: uuid::Uuid::new_v4().to_string(),
                kb_id: kb_id.to_string(),
                content_hash: chunk.content_hash.clone(),
                model_id: model_id.clone(),
                vector,
                vector_dimension: dim,
            })
            .collect();

        let stored = self.repo.save_embeddings(new_embeddings).await?;
        info!(
            kb_id,
            model_id = %model_id,
            created_embeddings = stored.len(),
            vector_dimension = dim,
            reused_embeddings = reused_count,
            "embeddings persisted"
        );

        for (chunk, embedding) in pending.into_iter().zip(stored) {
            results.push(EmbeddingResult {
                embedding_id: embedding.id,
                chunk_id: chunk.chunk_id,
                kb_id: kb_id.to_string(),
                content_hash: embedding.content_hash,
                model_id: model_id.clone(),
                vector_dimension: if embedding.vector.is_empty() { 0 } else { dim },
                vector: embedding.vector,
            });
        }

        Ok(results)
    }
}
