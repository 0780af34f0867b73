//! Persistence contracts.
//!
//! All database access goes through these narrow traits so services can be
//! exercised against in-memory fakes and wrapped by the pass-through cache
//! layer ([`crate::cache`]). The Postgres implementation lives in
//! [`crate::postgres`].
//!
//! Correctness requirements carried by implementations:
//!
//! - Chunk insertion and embedding insertion are one transaction per batch.
//! - `(kb_id, content_hash, embedding_model_id)` is a unique key per
//!   dimension-partitioned vector table (`embeddings_{dim}`).
//! - Semantic search scores are `1 - cosine_distance`; lexical scores are a
//!   non-negative full-text rank.
//! - `get_latest_document_version` orders by `version_number DESC LIMIT 1`.
//! - `activate_document_version` is a single transaction and the only writer
//!   of `documents.active_version_id` and `is_active = true`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Chunk, Document, DocumentVersion, JsonMap, ProcessingStatus, RetrievalRequestRecord,
    RetrievalResultRecord,
};

/// Reference to the latest version of a document.
#[derive(Debug, Clone)]
pub struct DocumentVersionRef {
    pub document_version_id: String,
    pub raw_content_uri: String,
}

/// Shared parameters for the semantic and lexical candidate searches.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub kb_id: String,
    pub query: String,
    pub query_vector: Vec<f32>,
    pub vector_dimension: usize,
    pub document_type: Option<String>,
    pub path_prefix: Option<String>,
    pub source: Option<String>,
    pub tags_filter: Option<JsonMap>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: i64,
}

/// One candidate from a search stream.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f64,
}

/// A chunk joined with its document context, as needed to build citations.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub document_id: String,
    pub document_version_id: String,
    pub document_path: String,
    pub document_title: Option<String>,
    pub document_type: String,
    pub content: String,
    pub metadata: JsonMap,
    pub version_number: i32,
    pub sequence_number: i32,
    pub source_metadata: JsonMap,
}

/// A new embedding row to persist; `save_embeddings` resolves the id when a
/// concurrent writer got there first.
#[derive(Debug, Clone)]
pub struct NewEmbedding {
    pub id: String,
    pub kb_id: String,
    pub content_hash: String,
    pub model_id: String,
    pub vector: Vec<f32>,
    pub vector_dimension: usize,
}

/// Chunk persistence and the document-version lifecycle writes driven by the
/// chunking coordinator.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;
    async fn delete_chunks_by_document_version(&self, document_version_id: &str) -> Result<()>;
    async fn delete_chunks_by_document(&self, kb_id: &str, document_id: &str) -> Result<()>;
    async fn get_chunk_by_id(&self, kb_id: &str, chunk_id: &str) -> Result<Option<Chunk>>;
    /// Returns false when no chunk matched.
    async fn update_chunk_embedding(
        &self,
        kb_id: &str,
        chunk_id: &str,
        embedding_id: &str,
    ) -> Result<bool>;
    async fn update_document_version_status(
        &self,
        version_id: &str,
        status: ProcessingStatus,
        error_message: Option<&str>,
    ) -> Result<()>;
    async fn get_latest_document_version(
        &self,
        kb_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentVersionRef>>;
    /// Atomically demote sibling versions, activate this one, and point the
    /// parent document at it.
    async fn activate_document_version(&self, version_id: &str) -> Result<()>;
}

/// Content-addressed embedding persistence.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    async fn model_dimension(&self, model_id: &str) -> Result<usize>;
    async fn find_embedding_id(
        &self,
        kb_id: &str,
        content_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>>;
    /// Insert-if-absent; on a `(kb, hash, model)` conflict the existing id
    /// wins and the returned entry carries it with an empty vector.
    async fn save_embeddings(&self, embeddings: Vec<NewEmbedding>) -> Result<Vec<NewEmbedding>>;
}

/// Retrieval search and observability persistence.
#[async_trait]
pub trait RetrievalStore: Send + Sync {
    async fn insert_retrieval_request(&self, record: &RetrievalRequestRecord) -> Result<()>;
    async fn update_retrieval_request(
        &self,
        request_id: &str,
        result_count: i32,
        latency_ms: i64,
        empty_result: bool,
    ) -> Result<()>;
    async fn insert_retrieval_results(&self, records: &[RetrievalResultRecord]) -> Result<()>;
    async fn search_semantic(&self, params: &SearchParams) -> Result<Vec<ScoredChunk>>;
    async fn search_lexical(&self, params: &SearchParams) -> Result<Vec<ScoredChunk>>;
    async fn get_chunks_with_documents(&self, chunk_ids: &[String]) -> Result<Vec<ChunkRecord>>;
    async fn get_chunks_with_documents_for_kb(
        &self,
        kb_id: &str,
        chunk_ids: &[String],
    ) -> Result<Vec<ChunkRecord>>;
    async fn get_chunks_by_document_version_range(
        &self,
        document_version_id: &str,
        start_seq: i32,
        end_seq: i32,
    ) -> Result<Vec<ChunkRecord>>;
}

/// Document intake persistence.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document_by_kb_path(&self, kb_id: &str, path: &str) -> Result<Option<Document>>;
    async fn insert_document(&self, document: &Document) -> Result<()>;
    async fn update_document(&self, document: &Document) -> Result<()>;
    /// Assigns the next `version_number` for the document (starting at 1) and
    /// returns the stored version.
    async fn insert_document_version(&self, version: &DocumentVersion) -> Result<DocumentVersion>;
}
