//! Pass-through cache layer between services and the repository.
//!
//! Services talk to the store traits through this wrapper so a caching
//! implementation can be introduced without touching them. This default
//! layer adds no caching; an implementation that does (e.g. a bounded LRU
//! keyed by `(kb_id, chunk_id)` and `(kb_id, content_hash, model_id)`) must
//! invalidate on every write path below.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Chunk, Document, DocumentVersion, ProcessingStatus, RetrievalRequestRecord,
    RetrievalResultRecord,
};
use crate::repository::{
    ChunkRecord, ChunkStore, DocumentStore, DocumentVersionRef, EmbeddingStore, NewEmbedding,
    RetrievalStore, ScoredChunk, SearchParams,
};

/// No-op cache layer: every call delegates to the wrapped store.
pub struct PassthroughCache<S> {
    inner: S,
}

impl<S> PassthroughCache<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: ChunkStore> ChunkStore for PassthroughCache<S> {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        // Write path: caching layers must invalidate affected chunk entries.
        self.inner.insert_chunks(chunks).await
    }

    async fn delete_chunks_by_document_version(&self, document_version_id: &str) -> Result<()> {
        self.inner
            .delete_chunks_by_document_version(document_version_id)
            .await
    }

    async fn delete_chunks_by_document(&self, kb_id: &str, document_id: &str) -> Result<()> {
        self.inner.delete_chunks_by_document(kb_id, document_id).await
    }

    async fn get_chunk_by_id(&self, kb_id: &str, chunk_id: &str) -> Result<Option<Chunk>> {
        self.inner.get_chunk_by_id(kb_id, chunk_id).await
    }

    async fn update_chunk_embedding(
        &self,
        kb_id: &str,
        chunk_id: &str,
        embedding_id: &str,
    ) -> Result<bool> {
        self.inner
            .update_chunk_embedding(kb_id, chunk_id, embedding_id)
            .await
    }

    async fn update_document_version_status(
        &self,
        version_id: &str,
        status: ProcessingStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.inner
            .update_document_version_status(version_id, status, error_message)
            .await
    }

    async fn get_latest_document_version(
        &self,
        kb_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentVersionRef>> {
        self.inner
            .get_latest_document_version(kb_id, document_id)
            .await
    }

    async fn activate_document_version(&self, version_id: &str) -> Result<()> {
        self.inner.activate_document_version(version_id).await
    }
}

#[async_trait]
impl<S: EmbeddingStore> EmbeddingStore for PassthroughCache<S> {
    async fn model_dimension(&self, model_id: &str) -> Result<usize> {
        self.inner.model_dimension(model_id).await
    }

    async fn find_embedding_id(
        &self,
        kb_id: &str,
        content_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>> {
        self.inner
            .find_embedding_id(kb_id, content_hash, model_id)
            .await
    }

    async fn save_embeddings(&self, embeddings: Vec<NewEmbedding>) -> Result<Vec<NewEmbedding>> {
        self.inner.save_embeddings(embeddings).await
    }
}

#[async_trait]
impl<S: RetrievalStore> RetrievalStore for PassthroughCache<S> {
    async fn insert_retrieval_request(&self, record: &RetrievalRequestRecord) -> Result<()> {
        self.inner.insert_retrieval_request(record).await
    }

    async fn update_retrieval_request(
        &self,
        request_id: &str,
        result_count: i32,
        latency_ms: i64,
        empty_result: bool,
    ) -> Result<()> {
        self.inner
            .update_retrieval_request(request_id, result_count, latency_ms, empty_result)
            .await
    }

    async fn insert_retrieval_results(&self, records: &[RetrievalResultRecord]) -> Result<()> {
        self.inner.insert_retrieval_results(records).await
    }

    async fn search_semantic(&self, params: &SearchParams) -> Result<Vec<ScoredChunk>> {
        self.inner.search_semantic(params).await
    }

    async fn search_lexical(&self, params: &SearchParams) -> Result<Vec<ScoredChunk>> {
        self.inner.search_lexical(params).await
    }

    async fn get_chunks_with_documents(&self, chunk_ids: &[String]) -> Result<Vec<ChunkRecord>> {
        self.inner.get_chunks_with_documents(chunk_ids).await
    }

    async fn get_chunks_with_documents_for_kb(
        &self,
        kb_id: &str,
        chunk_ids: &[String],
    ) -> Result<Vec<ChunkRecord>> {
        self.inner
            .get_chunks_with_documents_for_kb(kb_id, chunk_ids)
            .await
    }

    async fn get_chunks_by_document_version_range(
        &self,
        document_version_id: &str,
        start_seq: i32,
        end_seq: i32,
    ) -> Result<Vec<ChunkRecord>> {
        self.inner
            .get_chunks_by_document_version_range(document_version_id, start_seq, end_seq)
            .await
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for PassthroughCache<S> {
    async fn get_document_by_kb_path(&self, kb_id: &str, path: &str) -> Result<Option<Document>> {
        self.inner.get_document_by_kb_path(kb_id, path).await
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        self.inner.insert_document(document).await
    }

    async fn update_document(&self, document: &Document) -> Result<()> {
        self.inner.update_document(document).await
    }

    async fn insert_document_version(&self, version: &DocumentVersion) -> Result<DocumentVersion> {
        self.inner.insert_document_version(version).await
    }
}
