//! Chunking coordinator.
//!
//! Drives a document version through the indexing pipeline: load raw bytes
//! from the object store, chunk the text with the selected strategy, embed
//! every chunk synchronously in sequence order through the embedding worker,
//! persist the chunks, and advance the version to ACTIVATED.
//!
//! Failure at any stage before activation drives the version to FAILED with a
//! structured `stage=… document_id=… version_id=… [chunk_id=…] error=…`
//! message. Re-running the pipeline for a version is idempotent: existing
//! chunks of that version are deleted before the fresh set is inserted, and
//! embeddings are reused by content hash.

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::chunking::{
    self, Chunker, ChunkingError, Language, MarkdownChunker, MarkdownOptions, Strategy,
};
use crate::embedding_worker::{ChunkInput, EmbeddingError, EmbeddingService};
use crate::models::{Chunk, ProcessingStatus};
use crate::objectstore::ObjectStore;
use crate::repository::ChunkStore;

pub const DEFAULT_MAX_RUNES: usize = 1000;
pub const DEFAULT_OVERLAP_RUNES: usize = 100;

/// Channel capacity for chunking requests.
pub const CHUNKING_QUEUE_CAPACITY: usize = 128;

#[derive(Debug, Error)]
pub enum ChunkServiceError {
    #[error("document not found")]
    DocumentNotFound,
    #[error("chunk not found")]
    ChunkNotFound,
    #[error("embedder unavailable")]
    EmbedderUnavailable,
    #[error("knowledgebase_id is required")]
    MissingKnowledgeBaseId,
    #[error("document_id is required")]
    MissingDocumentId,
    #[error("document_version_id is required")]
    MissingVersionId,
    #[error("chunk_id is required")]
    MissingChunkId,
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One document version to (re-)chunk; sent over the chunking channel or
/// built inline by [`ChunkService::initiate_document_chunking`].
#[derive(Debug, Clone)]
pub struct DocumentRequest {
    pub kb_id: String,
    pub document_id: String,
    pub document_version_id: String,
    pub raw_content_uri: String,
    pub content: String,
    pub strategy: Option<Strategy>,
    pub max_runes: usize,
    pub overlap_runes: usize,
    pub separators: Vec<String>,
    pub language_hints: Vec<Language>,
}

/// Parameters for re-chunking the latest version of a document.
#[derive(Debug, Clone, Default)]
pub struct InitiateRequest {
    pub kb_id: String,
    pub document_id: String,
    pub strategy: Option<Strategy>,
    pub max_runes: usize,
    pub overlap_runes: usize,
    pub separators: Vec<String>,
    pub language_hints: Vec<Language>,
}

#[derive(Debug, Serialize)]
pub struct InitiateResult {
    pub document_id: String,
    pub document_version_id: String,
    pub strategy: String,
    pub chunk_count: usize,
}

#[derive(Debug, Serialize)]
pub struct EmbedChunkOutcome {
    pub chunk_id: String,
    pub embedding_id: String,
    pub reused: bool,
}

pub struct ChunkService {
    repo: Arc<dyn ChunkStore>,
    store: Arc<dyn ObjectStore>,
    embedder: Option<Arc<EmbeddingService>>,
}

impl ChunkService {
    pub fn new(
        repo: Arc<dyn ChunkStore>,
        store: Arc<dyn ObjectStore>,
        embedder: Option<Arc<EmbeddingService>>,
    ) -> Self {
        Self {
            repo,
            store,
            embedder,
        }
    }

    /// Create the bounded request channel consumed by [`ChunkService::run`].
    pub fn channel() -> (mpsc::Sender<DocumentRequest>, mpsc::Receiver<DocumentRequest>) {
        mpsc::channel(CHUNKING_QUEUE_CAPACITY)
    }

    /// Consume chunking requests until the channel closes. Exactly one task
    /// runs this; per-document ordering follows from the single consumer.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<DocumentRequest>) {
        while let Some(req) = rx.recv().await {
            let document_id = req.document_id.clone();
            let version_id = req.document_version_id.clone();
            if let Err(err) = self.handle(req).await {
                error!(
                    document_id = %document_id,
                    version_id = %version_id,
                    error = %err,
                    "chunking failed"
                );
            }
        }
    }

    /// Re-chunk the latest version of a document: delete chunks of prior
    /// versions, reload the raw bytes, and run the pipeline.
    pub async fn initiate_document_chunking(
        &self,
        req: InitiateRequest,
    ) -> Result<InitiateResult, ChunkServiceError> {
        if req.kb_id.trim().is_empty() {
            return Err(ChunkServiceError::MissingKnowledgeBaseId);
        }
        if req.document_id.trim().is_empty() {
            return Err(ChunkServiceError::MissingDocumentId);
        }

        let version = self
            .repo
            .get_latest_document_version(&req.kb_id, &req.document_id)
            .await?
            .ok_or(ChunkServiceError::DocumentNotFound)?;

        if let Err(err) = self
            .repo
            .delete_chunks_by_document(&req.kb_id, &req.document_id)
            .await
        {
            self.fail_version(
                &version.document_version_id,
                "CHUNKED",
                &req.document_id,
                None,
                &err.to_string(),
            )
            .await;
            return Err(err.into());
        }

        let payload = self.store.get(&version.raw_content_uri).await?;
        let content = String::from_utf8_lossy(&payload).to_string();

        let doc_request = DocumentRequest {
            kb_id: req.kb_id.clone(),
            document_id: req.document_id.clone(),
            document_version_id: version.document_version_id.clone(),
            raw_content_uri: version.raw_content_uri.clone(),
            content,
            strategy: req.strategy,
            max_runes: req.max_runes,
            overlap_runes: req.overlap_runes,
            separators: req.separators.clone(),
            language_hints: req.language_hints.clone(),
        };
        let strategy_name = resolved_strategy_name(&doc_request);
        let chunk_count = self.handle(doc_request).await?;

        Ok(InitiateResult {
            document_id: req.document_id,
            document_version_id: version.document_version_id,
            strategy: strategy_name.to_string(),
            chunk_count,
        })
    }

    /// Re-embed a single chunk and attach the resulting embedding id.
    pub async fn embed_chunk_by_id(
        &self,
        kb_id: &str,
        chunk_id: &str,
    ) -> Result<EmbedChunkOutcome, ChunkServiceError> {
        if kb_id.trim().is_empty() {
            return Err(ChunkServiceError::MissingKnowledgeBaseId);
        }
        if chunk_id.trim().is_empty() {
            return Err(ChunkServiceError::MissingChunkId);
        }
        let embedder = self
            .embedder
            .as_ref()
            .ok_or(ChunkServiceError::EmbedderUnavailable)?;

        let chunk = self
            .repo
            .get_chunk_by_id(kb_id, chunk_id)
            .await?
            .ok_or(ChunkServiceError::ChunkNotFound)?;

        let result = embedder
            .enqueue_chunk_and_wait(
                kb_id,
                ChunkInput {
                    chunk_id: chunk.id.clone(),
                    content: chunk.content.clone(),
                    content_hash: chunk.content_hash.clone(),
                    metadata: chunk.metadata.clone(),
                },
                None,
            )
            .await?;

        if result.embedding_id.is_empty() {
            return Err(ChunkServiceError::Other(anyhow::anyhow!(
                "missing embedding id for chunk {}",
                chunk.id
            )));
        }

        let updated = self
            .repo
            .update_chunk_embedding(kb_id, &chunk.id, &result.embedding_id)
            .await?;
        if !updated {
            return Err(ChunkServiceError::ChunkNotFound);
        }

        let reused = result.reused();
        Ok(EmbedChunkOutcome {
            chunk_id: chunk.id,
            embedding_id: result.embedding_id,
            reused,
        })
    }

    async fn handle(&self, req: DocumentRequest) -> Result<usize, ChunkServiceError> {
        if req.kb_id.is_empty() {
            return Err(ChunkServiceError::MissingKnowledgeBaseId);
        }
        if req.document_version_id.is_empty() {
            return Err(ChunkServiceError::MissingVersionId);
        }

        let chunker = match resolve_chunker(&req) {
            Ok(chunker) => chunker,
            Err(err) => {
                self.fail_version(
                    &req.document_version_id,
                    "CHUNKED",
                    &req.document_id,
                    None,
                    &err.to_string(),
                )
                .await;
                return Err(err.into());
            }
        };
        let strategy_name = resolved_strategy_name(&req);

        let pieces = match chunker.chunk(&req.content) {
            Ok(pieces) => pieces,
            Err(err) => {
                self.fail_version(
                    &req.document_version_id,
                    "CHUNKED",
                    &req.document_id,
                    None,
                    &err.to_string(),
                )
                .await;
                return Err(err.into());
            }
        };

        // Text is decoded and split: the version has passed extraction.
        self.repo
            .update_document_version_status(
                &req.document_version_id,
                ProcessingStatus::Extracted,
                None,
            )
            .await?;

        let now = chrono::Utc::now();
        let mut stored: Vec<Chunk> = Vec::with_capacity(pieces.len());
        for (i, piece) in pieces.into_iter().enumerate() {
            let mut metadata = piece.metadata;
            metadata.insert("start_rune".into(), serde_json::json!(piece.start_rune));
            metadata.insert("end_rune".into(), serde_json::json!(piece.end_rune));
            metadata.insert("rune_length".into(), serde_json::json!(piece.rune_length));

            stored.push(Chunk {
                id: Uuid::new_v4().to_string(),
                document_version_id: req.document_version_id.clone(),
                kb_id: req.kb_id.clone(),
                sequence_number: (i + 1) as i32,
                content_hash: hash_content(&piece.content),
                content: piece.content,
                metadata,
                chunking_strategy: strategy_name.to_string(),
                embedding_id: None,
                created_at: now,
            });
        }

        if let Some(embedder) = &self.embedder {
            for chunk in stored.iter_mut() {
                let result = embedder
                    .enqueue_chunk_and_wait(
                        &req.kb_id,
                        ChunkInput {
                            chunk_id: chunk.id.clone(),
                            content: chunk.content.clone(),
                            content_hash: chunk.content_hash.clone(),
                            metadata: chunk.metadata.clone(),
                        },
                        None,
                    )
                    .await;

                let result = match result {
                    Ok(result) if !result.embedding_id.is_empty() => result,
                    Ok(_) => {
                        let err = format!("missing embedding id for chunk {}", chunk.id);
                        self.fail_version(
                            &req.document_version_id,
                            "EMBEDDED",
                            &req.document_id,
                            Some(&chunk.id),
                            &err,
                        )
                        .await;
                        return Err(ChunkServiceError::Other(anyhow::anyhow!(err)));
                    }
                    Err(err) => {
                        self.fail_version(
                            &req.document_version_id,
                            "EMBEDDED",
                            &req.document_id,
                            Some(&chunk.id),
                            &err.to_string(),
                        )
                        .await;
                        return Err(err.into());
                    }
                };

                chunk.embedding_id = Some(result.embedding_id.clone());
                info!(
                    kb_id = %req.kb_id,
                    document_id = %req.document_id,
                    document_version_id = %req.document_version_id,
                    chunk_id = %chunk.id,
                    embedding_id = %result.embedding_id,
                    reused = result.reused(),
                    "chunk embedding linked"
                );
            }
        }

        // Idempotent re-run: clear this version's chunks before inserting.
        if let Err(err) = self
            .repo
            .delete_chunks_by_document_version(&req.document_version_id)
            .await
        {
            self.fail_version(
                &req.document_version_id,
                "CHUNKED",
                &req.document_id,
                None,
                &err.to_string(),
            )
            .await;
            return Err(err.into());
        }
        if let Err(err) = self.repo.insert_chunks(&stored).await {
            self.fail_version(
                &req.document_version_id,
                "CHUNKED",
                &req.document_id,
                None,
                &err.to_string(),
            )
            .await;
            return Err(err.into());
        }

        self.repo
            .update_document_version_status(
                &req.document_version_id,
                ProcessingStatus::Chunked,
                None,
            )
            .await?;
        if self.embedder.is_some() {
            self.repo
                .update_document_version_status(
                    &req.document_version_id,
                    ProcessingStatus::Embedded,
                    None,
                )
                .await?;
        }
        self.repo
            .activate_document_version(&req.document_version_id)
            .await?;

        Ok(stored.len())
    }

    async fn fail_version(
        &self,
        version_id: &str,
        stage: &str,
        document_id: &str,
        chunk_id: Option<&str>,
        err: &str,
    ) {
        let message = match chunk_id {
            Some(chunk_id) => format!(
                "stage={} document_id={} version_id={} chunk_id={} error={}",
                stage, document_id, version_id, chunk_id, err
            ),
            None => format!(
                "stage={} document_id={} version_id={} error={}",
                stage, document_id, version_id, err
            ),
        };
        if let Err(update_err) = self
            .repo
            .update_document_version_status(version_id, ProcessingStatus::Failed, Some(&message))
            .await
        {
            error!(
                version_id = %version_id,
                error = %update_err,
                "failed to record version failure"
            );
        }
    }
}

/// The strategy the request resolves to: an explicit choice wins, markdown
/// documents default to the markdown chunker, everything else is fixed.
fn resolved_strategy(req: &DocumentRequest) -> Strategy {
    if let Some(strategy) = req.strategy {
        return strategy;
    }
    let uri = req.raw_content_uri.to_ascii_lowercase();
    if uri.ends_with(".md") || uri.ends_with(".mdx") {
        Strategy::Markdown
    } else {
        Strategy::Fixed
    }
}

fn resolved_strategy_name(req: &DocumentRequest) -> &'static str {
    resolved_strategy(req).as_str()
}

fn resolve_chunker(req: &DocumentRequest) -> Result<Box<dyn Chunker>, ChunkingError> {
    let strategy = resolved_strategy(req);

    let max_runes = if req.max_runes == 0 {
        DEFAULT_MAX_RUNES
    } else {
        req.max_runes
    };
    if req.overlap_runes >= max_runes {
        return Err(ChunkingError::OverlapTooLarge);
    }

    match strategy {
        Strategy::Markdown => {
            let mut opts = MarkdownOptions::default();
            opts.mdx = req.raw_content_uri.to_ascii_lowercase().ends_with(".mdx");
            Ok(Box::new(MarkdownChunker::new(opts)?))
        }
        _ => chunking::new_chunker(chunking::Options {
            strategy: Some(strategy),
            max_runes,
            overlap_runes: req.overlap_runes,
            separators: req.separators.clone(),
            language_hints: req.language_hints.clone(),
        }),
    }
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(strategy: Option<Strategy>, uri: &str) -> DocumentRequest {
        DocumentRequest {
            kb_id: "kb".into(),
            document_id: "doc".into(),
            document_version_id: "ver".into(),
            raw_content_uri: uri.into(),
            content: String::new(),
            strategy,
            max_runes: 0,
            overlap_runes: 0,
            separators: Vec::new(),
            language_hints: Vec::new(),
        }
    }

    #[test]
    fn test_strategy_resolution_prefers_request() {
        let req = request(Some(Strategy::Recursive), "file:///tmp/doc.md");
        assert_eq!(resolved_strategy(&req), Strategy::Recursive);
    }

    #[test]
    fn test_strategy_resolution_by_suffix() {
        assert_eq!(
            resolved_strategy(&request(None, "s3://bucket/kb/x/guide.md")),
            Strategy::Markdown
        );
        assert_eq!(
            resolved_strategy(&request(None, "s3://bucket/kb/x/page.MDX")),
            Strategy::Markdown
        );
        assert_eq!(
            resolved_strategy(&request(None, "s3://bucket/kb/x/notes.txt")),
            Strategy::Fixed
        );
    }

    #[test]
    fn test_resolve_chunker_rejects_oversized_overlap() {
        let mut req = request(Some(Strategy::Fixed), "file:///x.txt");
        req.max_runes = 10;
        req.overlap_runes = 10;
        assert!(matches!(
            resolve_chunker(&req),
            Err(ChunkingError::OverlapTooLarge)
        ));
    }

    #[test]
    fn test_hash_content_is_sha256_hex() {
        let hash = hash_content("hello");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(hash_content("hello"), hash);
    }
}
