//! Retrieval and hydration service tests against in-memory fakes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use ragserve::embedder::TextEmbedder;
use ragserve::models::{JsonMap, RetrievalRequestRecord, RetrievalResultRecord};
use ragserve::repository::{ChunkRecord, RetrievalStore, ScoredChunk, SearchParams};
use ragserve::retrieval::{
    Filters, HydrateRequest, RetrievalError, RetrievalRequest, RetrievalService,
};

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
        Ok((texts.iter().map(|_| vec![0.1; self.dim]).collect(), self.dim))
    }
}

#[derive(Default)]
struct FakeStore {
    semantic: Vec<ScoredChunk>,
    lexical: Vec<ScoredChunk>,
    chunks: Vec<ChunkRecord>,
    requests: Mutex<Vec<RetrievalRequestRecord>>,
    request_updates: Mutex<Vec<(String, i32, bool)>>,
    results: Mutex<Vec<RetrievalResultRecord>>,
}

#[async_trait]
impl RetrievalStore for FakeStore {
    async fn insert_retrieval_request(&self, record: &RetrievalRequestRecord) -> Result<()> {
        self.requests.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn update_retrieval_request(
        &self,
        request_id: &str,
        result_count: i32,
        _latency_ms: i64,
        empty_result: bool,
    ) -> Result<()> {
        self.request_updates.lock().unwrap().push((
            request_id.to_string(),
            result_count,
            empty_result,
        ));
        Ok(())
    }

    async fn insert_retrieval_results(&self, records: &[RetrievalResultRecord]) -> Result<()> {
        self.results.lock().unwrap().extend_from_slice(records);
        Ok(())
    }

    async fn search_semantic(&self, _params: &SearchParams) -> Result<Vec<ScoredChunk>> {
        Ok(self.semantic.clone())
    }

    async fn search_lexical(&self, _params: &SearchParams) -> Result<Vec<ScoredChunk>> {
        Ok(self.lexical.clone())
    }

    async fn get_chunks_with_documents(&self, chunk_ids: &[String]) -> Result<Vec<ChunkRecord>> {
        Ok(self
            .chunks
            .iter()
            .filter(|c| chunk_ids.contains(&c.chunk_id))
            .cloned()
            .collect())
    }

    async fn get_chunks_with_documents_for_kb(
        &self,
        kb_id: &str,
        chunk_ids: &[String],
    ) -> Result<Vec<ChunkRecord>> {
        // The kb scope is modeled by tagging fake chunk paths with the kb id.
        Ok(self
            .chunks
            .iter()
            .filter(|c| chunk_ids.contains(&c.chunk_id) && c.document_path.starts_with(kb_id))
            .cloned()
            .collect())
    }

    async fn get_chunks_by_document_version_range(
        &self,
        document_version_id: &str,
        start_seq: i32,
        end_seq: i32,
    ) -> Result<Vec<ChunkRecord>> {
        Ok(self
            .chunks
            .iter()
            .filter(|c| {
                c.document_version_id == document_version_id
                    && c.sequence_number >= start_seq
                    && c.sequence_number <= end_seq
            })
            .cloned()
            .collect())
    }
}

fn chunk_record(chunk_id: &str, path: &str, seq: i32) -> ChunkRecord {
    let mut metadata = JsonMap::new();
    metadata.insert("start_rune".into(), serde_json::json!(0));
    metadata.insert("end_rune".into(), serde_json::json!(42));
    metadata.insert("rune_length".into(), serde_json::json!(42));
    ChunkRecord {
        chunk_id: chunk_id.to_string(),
        document_id: "doc-1".to_string(),
        document_version_id: "ver-1".to_string(),
        document_path: path.to_string(),
        document_title: Some("Guide".to_string()),
        document_type: "markdown".to_string(),
        content: format!("content of {}", chunk_id),
        metadata,
        version_number: 3,
        sequence_number: seq,
        source_metadata: JsonMap::new(),
    }
}

fn request(kb: &str, query: &str) -> RetrievalRequest {
    RetrievalRequest {
        kb_id: kb.to_string(),
        query: query.to_string(),
        top_k: None,
        hybrid_weight: None,
        retrieval_profile: None,
        semantic_weight: None,
        debug: false,
        filters: Filters::default(),
    }
}

// ============ Retrieve ============

#[tokio::test]
async fn retrieve_fuses_and_ranks_results() {
    let store = Arc::new(FakeStore {
        semantic: vec![
            ScoredChunk { chunk_id: "x".into(), score: 0.9 },
            ScoredChunk { chunk_id: "y".into(), score: 0.3 },
        ],
        lexical: vec![
            ScoredChunk { chunk_id: "x".into(), score: 0.1 },
            ScoredChunk { chunk_id: "y".into(), score: 0.9 },
        ],
        chunks: vec![chunk_record("x", "kb1/a.md", 1), chunk_record("y", "kb1/b.md", 1)],
        ..FakeStore::default()
    });
    let embedder = Arc::new(FakeEmbedder::new(384));
    let service = RetrievalService::new(store.clone(), embedder.clone());

    let mut req = request("11111111-1111-1111-1111-111111111111", "some natural language query");
    req.hybrid_weight = Some(0.7);
    let response = service.retrieve(req).await.unwrap();

    assert_eq!(response.result_count, 2);
    assert_eq!(response.results[0].chunk_id, "x");
    assert_eq!(response.results[1].chunk_id, "y");

    let expected_x = 0.7 * 1.0 + 0.3 * (0.1 / 0.9);
    let expected_y = 0.7 * (0.3 / 0.9) + 0.3 * 1.0;
    assert!((response.results[0].scores.final_score - expected_x).abs() < 1e-9);
    assert!((response.results[1].scores.final_score - expected_y).abs() < 1e-9);

    // Passages mirror results; the response echoes the effective weight.
    assert_eq!(response.passages.len(), 2);
    assert_eq!(response.hybrid_weight, 0.7);
    assert_eq!(response.index_version, "active-document-versions");
    assert_eq!(response.query_id, response.request_id);

    // Citation carries the rune offsets from chunk metadata.
    let citation = &response.results[0].citation;
    assert_eq!(citation.version_number, 3);
    assert_eq!(citation.chunk_sequence, 1);
    assert_eq!(citation.start_rune, Some(0));
    assert_eq!(citation.rune_length, Some(42));

    // The query was embedded exactly once.
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retrieve_records_observability_rows() {
    let store = Arc::new(FakeStore {
        semantic: vec![ScoredChunk { chunk_id: "x".into(), score: 1.0 }],
        lexical: Vec::new(),
        chunks: vec![chunk_record("x", "kb1/a.md", 1)],
        ..FakeStore::default()
    });
    let service = RetrievalService::new(store.clone(), Arc::new(FakeEmbedder::new(8)));

    let response = service
        .retrieve(request("11111111-1111-1111-1111-111111111111", "find the thing"))
        .await
        .unwrap();

    let requests = store.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    // The initial row is written before any search runs.
    assert_eq!(requests[0].result_count, 0);
    assert_eq!(requests[0].id, response.request_id);

    let results = store.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].rank, 1);
    assert_eq!(results[0].retrieval_request_id, response.request_id);

    let updates = store.request_updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0], (response.request_id.clone(), 1, false));
}

#[tokio::test]
async fn retrieve_flags_empty_results() {
    let store = Arc::new(FakeStore::default());
    let service = RetrievalService::new(store.clone(), Arc::new(FakeEmbedder::new(8)));

    let response = service
        .retrieve(request("11111111-1111-1111-1111-111111111111", "nothing matches this"))
        .await
        .unwrap();

    assert_eq!(response.result_count, 0);
    assert!(response.results.is_empty());

    let updates = store.request_updates.lock().unwrap();
    assert_eq!(updates[0].1, 0);
    assert!(updates[0].2, "empty_result flag not set");

    // No per-rank rows for an empty result set.
    assert!(store.results.lock().unwrap().is_empty());
}

#[tokio::test]
async fn retrieve_debug_metadata_reports_classification() {
    let store = Arc::new(FakeStore {
        semantic: vec![ScoredChunk { chunk_id: "x".into(), score: 0.5 }],
        lexical: vec![ScoredChunk { chunk_id: "x".into(), score: 0.5 }],
        chunks: vec![chunk_record("x", "kb1/a.md", 1)],
        ..FakeStore::default()
    });
    let service = RetrievalService::new(store, Arc::new(FakeEmbedder::new(8)));

    let mut req = request(
        "11111111-1111-1111-1111-111111111111",
        "how does chunk activation preserve old active versions during failure",
    );
    req.debug = true;
    let response = service.retrieve(req).await.unwrap();

    let debug = response.debug.expect("debug metadata missing");
    assert_eq!(debug.retrieval_profile_effective, "semantic");
    assert_eq!(debug.semantic_weight_effective, 0.8);
    assert!(debug
        .auto_signals_detected
        .contains(&"question_form".to_string()));
    assert!(!debug.reranker_applied);
    assert_eq!(debug.semantic_candidates, 1);
    assert_eq!(debug.lexical_candidates, 1);
    assert_eq!(response.hybrid_weight, 0.8);
}

#[tokio::test]
async fn retrieve_validates_input() {
    let service = RetrievalService::new(
        Arc::new(FakeStore::default()),
        Arc::new(FakeEmbedder::new(8)),
    );

    let err = service.retrieve(request("kb", "")).await.unwrap_err();
    assert!(matches!(err, RetrievalError::MissingQuery));
    assert!(err.is_client_error());

    let mut req = request("kb", "q");
    req.top_k = Some(51);
    assert!(matches!(
        service.retrieve(req).await.unwrap_err(),
        RetrievalError::InvalidTopK
    ));

    let mut req = request("kb", "q");
    req.semantic_weight = Some(1.2);
    assert!(matches!(
        service.retrieve(req).await.unwrap_err(),
        RetrievalError::InvalidHybridWeight
    ));

    let mut req = request("kb", "q");
    req.retrieval_profile = Some("fuzzy".into());
    assert!(matches!(
        service.retrieve(req).await.unwrap_err(),
        RetrievalError::InvalidProfile
    ));
}

// ============ Hydrate ============

#[tokio::test]
async fn hydrate_expands_neighbors_and_sorts() {
    let store = Arc::new(FakeStore {
        chunks: vec![
            chunk_record("c1", "kb1/doc.md", 1),
            chunk_record("c2", "kb1/doc.md", 2),
            chunk_record("c3", "kb1/doc.md", 3),
            chunk_record("c4", "kb1/doc.md", 4),
        ],
        ..FakeStore::default()
    });
    let service = RetrievalService::new(store, Arc::new(FakeEmbedder::new(8)));

    let response = service
        .hydrate(HydrateRequest {
            kb_id: "kb1".into(),
            chunk_ids: vec!["c3".into()],
            adjacent_before: 1,
            adjacent_after: 1,
        })
        .await
        .unwrap();

    let ids: Vec<&str> = response.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["c2", "c3", "c4"]);
    assert_eq!(response.chunk_count, 3);

    // Hydrated entries carry empty score triples.
    for chunk in &response.chunks {
        assert_eq!(chunk.scores.final_score, 0.0);
        assert_eq!(chunk.scores.semantic, 0.0);
        assert_eq!(chunk.scores.lexical, 0.0);
    }
}

#[tokio::test]
async fn hydrate_never_leaks_other_knowledge_bases() {
    let store = Arc::new(FakeStore {
        chunks: vec![
            chunk_record("mine", "kb1/doc.md", 1),
            chunk_record("theirs", "kb2/doc.md", 1),
        ],
        ..FakeStore::default()
    });
    let service = RetrievalService::new(store, Arc::new(FakeEmbedder::new(8)));

    let response = service
        .hydrate(HydrateRequest {
            kb_id: "kb1".into(),
            chunk_ids: vec!["mine".into(), "theirs".into()],
            adjacent_before: 0,
            adjacent_after: 0,
        })
        .await
        .unwrap();

    let ids: Vec<&str> = response.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["mine"]);
}

#[tokio::test]
async fn hydrate_deduplicates_overlapping_windows() {
    let store = Arc::new(FakeStore {
        chunks: vec![
            chunk_record("c1", "kb1/doc.md", 1),
            chunk_record("c2", "kb1/doc.md", 2),
            chunk_record("c3", "kb1/doc.md", 3),
        ],
        ..FakeStore::default()
    });
    let service = RetrievalService::new(store, Arc::new(FakeEmbedder::new(8)));

    let response = service
        .hydrate(HydrateRequest {
            kb_id: "kb1".into(),
            chunk_ids: vec!["c1".into(), "c2".into()],
            adjacent_before: 1,
            adjacent_after: 1,
        })
        .await
        .unwrap();

    // Overlapping neighbor windows collapse to unique chunks.
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for chunk in &response.chunks {
        *counts.entry(chunk.chunk_id.as_str()).or_default() += 1;
    }
    assert!(counts.values().all(|&n| n == 1));
    assert_eq!(response.chunk_count, 3);
}

#[tokio::test]
async fn hydrate_validates_bounds() {
    let service = RetrievalService::new(
        Arc::new(FakeStore::default()),
        Arc::new(FakeEmbedder::new(8)),
    );

    let err = service
        .hydrate(HydrateRequest {
            kb_id: "kb1".into(),
            chunk_ids: Vec::new(),
            adjacent_before: 0,
            adjacent_after: 0,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::MissingChunkIds));

    let err = service
        .hydrate(HydrateRequest {
            kb_id: "kb1".into(),
            chunk_ids: vec!["c".into()],
            adjacent_before: 0,
            adjacent_after: 11,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::InvalidAdjacentRange));
}
