//! Embedding worker tests against an in-memory store and a scripted embedder.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use ragserve::embedder::TextEmbedder;
use ragserve::embedding_worker::{
    ChunkInput, EmbedChunkRequest, EmbeddingError, EmbeddingService,
};
use ragserve::models::JsonMap;
use ragserve::repository::{EmbeddingStore, NewEmbedding};

// ============ Fakes ============

struct FakeEmbedder {
    dim: usize,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    fn new(dim: usize) -> Self {
        Self {
            dim,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TextEmbedder for FakeEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, usize)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((
            texts.iter().map(|_| vec![0.5; self.dim]).collect(),
            self.dim,
        ))
    }
}

/// Stores embeddings in memory keyed by (kb, hash, model).
#[derive(Default)]
struct FakeEmbeddingStore {
    rows: Mutex<Vec<NewEmbedding>>,
}

#[async_trait]
impl EmbeddingStore for FakeEmbeddingStore {
    async fn model_dimension(&self, _model_id: &str) -> Result<usize> {
        Ok(4)
    }

    async fn find_embedding_id(
        &self,
        kb_id: &str,
        content_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| {
                row.kb_id == kb_id && row.content_hash == content_hash && row.model_id == model_id
            })
            .map(|row| row.id.clone()))
    }

    async fn save_embeddings(&self, embeddings: Vec<NewEmbedding>) -> Result<Vec<NewEmbedding>> {
        let mut rows = self.rows.lock().unwrap();
        let mut stored = Vec::with_capacity(embeddings.len());
        for mut embedding in embeddings {
            if let Some(existing) = rows.iter().find(|row| {
                row.kb_id == embedding.kb_id
                    && row.content_hash == embedding.content_hash
                    && row.model_id == embedding.model_id
            }) {
                // Conflict: the existing id wins, the fresh vector is dropped.
                embedding.id = existing.id.clone();
                embedding.vector.clear();
            } else {
                rows.push(embedding.clone());
            }
            stored.push(embedding);
        }
        Ok(stored)
    }
}

fn chunk(id: &str, content: &str) -> ChunkInput {
    ChunkInput {
        chunk_id: id.to_string(),
        content: content.to_string(),
        content_hash: format!("hash-of-{}", content),
        metadata: JsonMap::new(),
    }
}

fn service(
    embedder: Arc<FakeEmbedder>,
    store: Arc<FakeEmbeddingStore>,
    default_model: &str,
) -> (Arc<EmbeddingService>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = EmbeddingService::channel();
    let service = Arc::new(EmbeddingService::new(
        embedder,
        store,
        default_model.to_string(),
        tx,
    ));
    let worker = tokio::spawn(service.clone().run(rx));
    (service, worker)
}

// ============ Tests ============

#[tokio::test]
async fn embeds_and_persists_new_chunk() {
    let embedder = Arc::new(FakeEmbedder::new(4));
    let store = Arc::new(FakeEmbeddingStore::default());
    let (service, _worker) = service(embedder.clone(), store.clone(), "model-1");

    let result = service
        .enqueue_chunk_and_wait("kb-1", chunk("c1", "first text"), None)
        .await
        .unwrap();

    assert!(!result.embedding_id.is_empty());
    assert_eq!(result.chunk_id, "c1");
    assert_eq!(result.model_id, "model-1");
    assert_eq!(result.vector_dimension, 4);
    assert!(!result.reused());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.rows.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn reuses_existing_embedding_by_content_hash() {
    let embedder = Arc::new(FakeEmbedder::new(4));
    let store = Arc::new(FakeEmbeddingStore::default());
    let (service, _worker) = service(embedder.clone(), store.clone(), "model-1");

    let first = service
        .enqueue_chunk_and_wait("kb-1", chunk("c1", "same text"), None)
        .await
        .unwrap();

    // A different chunk with identical content hits the cache.
    let second = service
        .enqueue_chunk_and_wait("kb-1", chunk("c2", "same text"), None)
        .await
        .unwrap();

    assert_eq!(second.embedding_id, first.embedding_id);
    assert!(second.reused());
    assert!(second.vector.is_empty());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.rows.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn model_override_creates_separate_row() {
    let embedder = Arc::new(FakeEmbedder::new(4));
    let store = Arc::new(FakeEmbeddingStore::default());
    let (service, _worker) = service(embedder.clone(), store.clone(), "model-1");

    let default_model = service
        .enqueue_chunk_and_wait("kb-1", chunk("c1", "text"), None)
        .await
        .unwrap();
    let overridden = service
        .enqueue_chunk_and_wait("kb-1", chunk("c1", "text"), Some("model-2".into()))
        .await
        .unwrap();

    assert_eq!(default_model.model_id, "model-1");
    assert_eq!(overridden.model_id, "model-2");
    assert_ne!(default_model.embedding_id, overridden.embedding_id);
    assert_eq!(store.rows.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn missing_model_id_fails() {
    let embedder = Arc::new(FakeEmbedder::new(4));
    let store = Arc::new(FakeEmbeddingStore::default());
    let (service, _worker) = service(embedder, store, "");

    let err = service
        .enqueue_chunk_and_wait("kb-1", chunk("c1", "text"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EmbeddingError::MissingModelId));
}

#[tokio::test]
async fn validates_chunk_input() {
    let embedder = Arc::new(FakeEmbedder::new(4));
    let store = Arc::new(FakeEmbeddingStore::default());
    let (service, _worker) = service(embedder, store, "model-1");

    let mut empty_content = chunk("c1", "text");
    empty_content.content = String::new();
    assert!(matches!(
        service
            .enqueue_chunk_and_wait("kb-1", empty_content, None)
            .await
            .unwrap_err(),
        EmbeddingError::MissingContent
    ));

    let mut empty_hash = chunk("c1", "text");
    empty_hash.content_hash = String::new();
    assert!(matches!(
        service
            .enqueue_chunk_and_wait("kb-1", empty_hash, None)
            .await
            .unwrap_err(),
        EmbeddingError::MissingContentHash
    ));
}

#[tokio::test]
async fn batch_dedupes_identical_hashes_within_request() {
    let embedder = Arc::new(FakeEmbedder::new(4));
    let store = Arc::new(FakeEmbeddingStore::default());
    let (service, _worker) = service(embedder.clone(), store.clone(), "model-1");

    let results = service
        .embed_and_store(
            "kb-1",
            vec![chunk("c1", "dup"), chunk("c2", "dup"), chunk("c3", "unique")],
            None,
        )
        .await
        .unwrap();

    // One result per unique hash; the embedder saw one batch call.
    assert_eq!(results.len(), 2);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.rows.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn worker_finishes_work_when_reply_receiver_dropped() {
    let embedder = Arc::new(FakeEmbedder::new(4));
    let store = Arc::new(FakeEmbeddingStore::default());
    let (tx, rx) = EmbeddingService::channel();
    let service = Arc::new(EmbeddingService::new(
        embedder,
        store.clone(),
        "model-1".to_string(),
        tx.clone(),
    ));
    let _worker = tokio::spawn(service.clone().run(rx));

    // Simulate a cancelled producer: the reply receiver is dropped before
    // the worker replies.
    let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
    drop(reply_rx);
    tx.send(EmbedChunkRequest {
        kb_id: "kb-1".to_string(),
        chunk: chunk("c1", "abandoned"),
        model_id: None,
        reply: Some(reply_tx),
    })
    .await
    .unwrap();

    // A follow-up request on the same content must hit the persisted row.
    let result = service
        .enqueue_chunk_and_wait("kb-1", chunk("c2", "abandoned"), None)
        .await
        .unwrap();
    assert!(result.reused());
    assert_eq!(store.rows.lock().unwrap().len(), 1);
}
