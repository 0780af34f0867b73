//! Hybrid retrieval.
//!
//! A query is embedded once, run through two candidate searches over the same
//! filtered set (vector cosine similarity and lexical full-text rank), and
//! the two score streams are max-normalized independently, fused as
//! `w·semantic + (1-w)·lexical`, and sorted with deterministic tie-breakers.
//! The semantic weight `w` comes from the query classifier unless the request
//! pins it explicitly.
//!
//! Every request writes a `retrieval_requests` observability row up front and
//! updates it with count/latency/empty-result at the end; per-rank
//! `retrieval_results` rows are written only on success.
//!
//! Hydration fetches chunks by id plus adjacent neighbors by sequence number,
//! always scoped to the requesting knowledge base.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::embedder::TextEmbedder;
use crate::models::{JsonMap, RetrievalRequestRecord, RetrievalResultRecord};
use crate::repository::{ChunkRecord, RetrievalStore, SearchParams};

pub const DEFAULT_TOP_K: i32 = 5;
pub const DEFAULT_HYBRID_WEIGHT: f64 = 0.7;
pub const MAX_TOP_K: i32 = 50;
pub const MAX_HYDRATE_CHUNK_IDS: usize = 100;
pub const MAX_ADJACENT: i32 = 10;

const CANDIDATE_FLOOR: i64 = 50;
const CANDIDATE_CAP: i64 = 200;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("knowledgebase_id is required")]
    MissingKnowledgeBase,
    #[error("query is required")]
    MissingQuery,
    #[error("top_k must be between 1 and 50")]
    InvalidTopK,
    #[error("hybrid_weight must be between 0 and 1")]
    InvalidHybridWeight,
    #[error("retrieval_profile must be one of: auto, exact, balanced, semantic")]
    InvalidProfile,
    #[error("created_after must be before created_before")]
    InvalidCreatedRange,
    #[error("chunk_ids is required")]
    MissingChunkIds,
    #[error("chunk_ids exceeds maximum of 100")]
    TooManyChunkIds,
    #[error("adjacent_before and adjacent_after must be between 0 and 10")]
    InvalidAdjacentRange,
    #[error("embedding service returned no vectors")]
    EmptyEmbedding,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RetrievalError {
    /// Validation failures map to the client-error status class.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            RetrievalError::EmptyEmbedding | RetrievalError::Other(_)
        )
    }
}

/// Controls the default semantic weight for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalProfile {
    Auto,
    Exact,
    Balanced,
    Semantic,
}

impl RetrievalProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalProfile::Auto => "auto",
            RetrievalProfile::Exact => "exact",
            RetrievalProfile::Balanced => "balanced",
            RetrievalProfile::Semantic => "semantic",
        }
    }

    /// Parse a request profile; empty means auto.
    pub fn parse(value: &str) -> Result<Self, RetrievalError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(RetrievalProfile::Auto),
            "exact" => Ok(RetrievalProfile::Exact),
            "balanced" => Ok(RetrievalProfile::Balanced),
            "semantic" => Ok(RetrievalProfile::Semantic),
            _ => Err(RetrievalError::InvalidProfile),
        }
    }
}

/// Metadata filters applied identically to both candidate searches.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub document_type: Option<String>,
    pub path_prefix: Option<String>,
    pub source: Option<String>,
    pub tags: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

/// A retrieval request after HTTP decoding.
#[derive(Debug, Clone, Default)]
pub struct RetrievalRequest {
    pub kb_id: String,
    pub query: String,
    pub top_k: Option<i32>,
    pub hybrid_weight: Option<f64>,
    /// Raw profile string as received; parsed during classification so an
    /// invalid value surfaces as a validation error.
    pub retrieval_profile: Option<String>,
    pub semantic_weight: Option<f64>,
    pub debug: bool,
    pub filters: Filters,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Score {
    pub semantic: f64,
    pub lexical: f64,
    #[serde(rename = "final")]
    pub final_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub document_id: String,
    pub document_version_id: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub version_number: i32,
    pub chunk_sequence: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_rune: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_rune: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rune_length: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Offsets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_rune: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_rune: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rune_length: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultEntry {
    pub chunk_id: String,
    pub document_id: String,
    pub document_version_id: String,
    pub document_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_title: Option<String>,
    pub document_type: String,
    pub content: String,
    pub metadata: JsonMap,
    pub scores: Score,
    pub citation: Citation,
    pub source_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub section_path: Vec<String>,
    pub text: String,
    pub score: f64,
    pub score_detail: Score,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offsets: Option<Offsets>,
}

#[derive(Debug, Serialize)]
pub struct DebugMetadata {
    pub retrieval_profile_effective: String,
    pub semantic_weight_effective: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub auto_signals_detected: Vec<String>,
    pub lexical_candidates: usize,
    pub semantic_candidates: usize,
    pub reranker_applied: bool,
    #[serde(skip_serializing_if = "JsonMap::is_empty")]
    pub filters_applied: JsonMap,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub request_id: String,
    pub query_id: String,
    pub index_version: String,
    pub kb_id: String,
    pub query: String,
    pub top_k: i32,
    pub hybrid_weight: f64,
    pub result_count: usize,
    pub latency_ms: i64,
    pub results: Vec<ResultEntry>,
    pub passages: Vec<ResultEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugMetadata>,
}

#[derive(Debug, Clone, Default)]
pub struct HydrateRequest {
    pub kb_id: String,
    pub chunk_ids: Vec<String>,
    pub adjacent_before: i32,
    pub adjacent_after: i32,
}

#[derive(Debug, Serialize)]
pub struct HydrateResponse {
    pub kb_id: String,
    pub chunk_count: usize,
    pub chunks: Vec<ResultEntry>,
}

// ============ Query classification ============

fn quoted_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""[^"]+"|'[^']+'"#).unwrap())
}

fn symbol_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[/._]|::|->").unwrap())
}

fn camel_snake_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z]+[A-Z][a-zA-Z0-9]*|[a-zA-Z]+_[a-zA-Z0-9_]+").unwrap())
}

fn error_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:[A-Z]{2,}[_-]?\d+|\d+\.\d+\.\d+|v\d+(?:\.\d+)*)\b").unwrap()
    })
}

/// Resolve the effective profile, semantic weight, and signal list for a
/// request. Explicit `semantic_weight` wins over explicit `hybrid_weight`,
/// which wins over a named profile; `auto` analyzes the query text.
pub fn resolve_profile_and_weight(
    req: &RetrievalRequest,
) -> Result<(RetrievalProfile, f64, Vec<String>), RetrievalError> {
    let profile = RetrievalProfile::parse(req.retrieval_profile.as_deref().unwrap_or(""))?;

    if let Some(weight) = req.semantic_weight {
        return Ok((profile, weight, vec!["semantic_weight_override".into()]));
    }
    if let Some(weight) = req.hybrid_weight {
        return Ok((profile, weight, vec!["hybrid_weight_override".into()]));
    }

    match profile {
        RetrievalProfile::Exact => Ok((profile, 0.2, Vec::new())),
        RetrievalProfile::Balanced => Ok((profile, 0.5, Vec::new())),
        RetrievalProfile::Semantic => Ok((profile, 0.8, Vec::new())),
        RetrievalProfile::Auto => {
            let (auto_profile, signals) = classify_auto_profile(&req.query);
            let weight = match auto_profile {
                RetrievalProfile::Exact => 0.2,
                RetrievalProfile::Semantic => 0.8,
                _ => 0.5,
            };
            Ok((auto_profile, weight, signals))
        }
    }
}

/// Classify a query into a retrieval profile from its textual signals.
pub fn classify_auto_profile(query: &str) -> (RetrievalProfile, Vec<String>) {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return (RetrievalProfile::Balanced, Vec::new());
    }

    let tokens = trimmed.split_whitespace().count();
    let lower = trimmed.to_lowercase();
    let mut lexical: Vec<String> = Vec::new();
    let mut semantic: Vec<String> = Vec::new();

    if quoted_phrase_re().is_match(trimmed) {
        lexical.push("quoted_phrase".into());
    }
    if symbol_re().is_match(trimmed) {
        lexical.push("symbols".into());
    }
    if camel_snake_re().is_match(trimmed) {
        lexical.push("identifier_tokens".into());
    }
    if error_code_re().is_match(trimmed) {
        lexical.push("error_or_version_pattern".into());
    }
    if tokens <= 4 {
        lexical.push("short_query".into());
    }

    if lower.starts_with("how ")
        || lower.starts_with("why ")
        || lower.starts_with("when ")
        || lower.starts_with("what ")
    {
        semantic.push("question_form".into());
    }
    if tokens >= 9 {
        semantic.push("long_natural_language".into());
    }
    if !symbol_re().is_match(trimmed) && !camel_snake_re().is_match(trimmed) {
        semantic.push("conversational_phrasing".into());
    }

    if lexical.len() > semantic.len() {
        return (RetrievalProfile::Exact, lexical);
    }
    if semantic.len() > lexical.len() {
        return (RetrievalProfile::Semantic, semantic);
    }

    let mut signals = lexical;
    signals.extend(semantic);
    (RetrievalProfile::Balanced, dedupe_strings(signals))
}

// ============ Service ============

pub struct RetrievalService {
    repo: Arc<dyn RetrievalStore>,
    embedder: Arc<dyn TextEmbedder>,
    default_top_k: i32,
}

impl RetrievalService {
    pub fn new(repo: Arc<dyn RetrievalStore>, embedder: Arc<dyn TextEmbedder>) -> Self {
        Self {
            repo,
            embedder,
            default_top_k: DEFAULT_TOP_K,
        }
    }

    pub async fn retrieve(&self, req: RetrievalRequest) -> Result<QueryResponse, RetrievalError> {
        let top_k = req.top_k.unwrap_or(self.default_top_k);
        validate_request(&req, top_k)?;

        let (profile_effective, semantic_weight, auto_signals) =
            resolve_profile_and_weight(&req)?;
        if !(0.0..=1.0).contains(&semantic_weight) {
            return Err(RetrievalError::InvalidHybridWeight);
        }

        let started = Instant::now();
        let created_at = Utc::now();
        let request_id = Uuid::new_v4().to_string();
        let filter_payload = build_filter_payload(&req.filters);

        self.repo
            .insert_retrieval_request(&RetrievalRequestRecord {
                id: request_id.clone(),
                kb_id: req.kb_id.clone(),
                query: req.query.clone(),
                filters: filter_payload.clone(),
                top_k,
                hybrid_weight: semantic_weight,
                result_count: 0,
                latency_ms: 0,
                empty_result: false,
                created_at,
            })
            .await?;

        let (vectors, dim) = self.embedder.embed_texts(&[req.query.clone()]).await?;
        let query_vector = vectors.into_iter().next().ok_or(RetrievalError::EmptyEmbedding)?;

        let params = SearchParams {
            kb_id: req.kb_id.clone(),
            query: req.query.clone(),
            query_vector,
            vector_dimension: dim,
            document_type: req.filters.document_type.clone(),
            path_prefix: normalize_path_prefix(req.filters.path_prefix.as_deref()),
            source: req.filters.source.clone(),
            tags_filter: build_tags_filter(&req.filters.tags),
            created_after: req.filters.created_after,
            created_before: req.filters.created_before,
            limit: candidate_limit(top_k),
        };

        let semantic = self.repo.search_semantic(&params).await?;
        let lexical = self.repo.search_lexical(&params).await?;
        let semantic_count = semantic.len();
        let lexical_count = lexical.len();

        let semantic_scores = normalize_scores(&semantic);
        let lexical_scores = normalize_scores(&lexical);

        let mut merged = merge_scores(&semantic_scores, &lexical_scores, semantic_weight);
        sort_results(&mut merged);
        merged.truncate(top_k as usize);

        let chunk_ids: Vec<String> = merged.iter().map(|m| m.chunk_id.clone()).collect();
        let chunks = self.repo.get_chunks_with_documents(&chunk_ids).await?;
        let chunk_map: HashMap<&str, &ChunkRecord> =
            chunks.iter().map(|c| (c.chunk_id.as_str(), c)).collect();

        let mut results = Vec::with_capacity(merged.len());
        let mut result_records = Vec::with_capacity(merged.len());
        for (i, item) in merged.iter().enumerate() {
            let Some(chunk) = chunk_map.get(item.chunk_id.as_str()) else {
                continue;
            };
            results.push(build_result(chunk, item.score));
            result_records.push(RetrievalResultRecord {
                id: Uuid::new_v4().to_string(),
                retrieval_request_id: request_id.clone(),
                chunk_id: item.chunk_id.clone(),
                rank: (i + 1) as i32,
                semantic_score: item.score.semantic,
                lexical_score: item.score.lexical,
                final_score: item.score.final_score,
                created_at: Utc::now(),
            });
        }

        let latency_ms = started.elapsed().as_millis() as i64;
        let empty_result = results.is_empty();

        self.repo.insert_retrieval_results(&result_records).await?;
        self.repo
            .update_retrieval_request(&request_id, results.len() as i32, latency_ms, empty_result)
            .await?;

        info!(
            kb_id = %req.kb_id,
            request_id = %request_id,
            profile = profile_effective.as_str(),
            semantic_weight,
            result_count = results.len(),
            latency_ms,
            "retrieval completed"
        );

        let debug = req.debug.then(|| DebugMetadata {
            retrieval_profile_effective: profile_effective.as_str().to_string(),
            semantic_weight_effective: semantic_weight,
            auto_signals_detected: auto_signals,
            lexical_candidates: lexical_count,
            semantic_candidates: semantic_count,
            reranker_applied: false,
            filters_applied: filter_payload,
        });

        Ok(QueryResponse {
            request_id: request_id.clone(),
            query_id: request_id,
            index_version: "active-document-versions".to_string(),
            kb_id: req.kb_id,
            query: req.query,
            top_k,
            hybrid_weight: semantic_weight,
            result_count: results.len(),
            latency_ms,
            results: results.clone(),
            passages: results,
            debug,
        })
    }

    pub async fn hydrate(&self, req: HydrateRequest) -> Result<HydrateResponse, RetrievalError> {
        validate_hydrate_request(&req)?;

        let base = self
            .repo
            .get_chunks_with_documents_for_kb(&req.kb_id, &req.chunk_ids)
            .await?;

        let mut chunk_map: HashMap<String, ChunkRecord> = base
            .iter()
            .map(|c| (c.chunk_id.clone(), c.clone()))
            .collect();

        if req.adjacent_before > 0 || req.adjacent_after > 0 {
            for chunk in &base {
                let start = (chunk.sequence_number - req.adjacent_before).max(0);
                let end = chunk.sequence_number + req.adjacent_after;
                let adjacent = self
                    .repo
                    .get_chunks_by_document_version_range(
                        &chunk.document_version_id,
                        start,
                        end,
                    )
                    .await?;
                for expanded in adjacent {
                    chunk_map.insert(expanded.chunk_id.clone(), expanded);
                }
            }
        }

        let mut chunks: Vec<ChunkRecord> = chunk_map.into_values().collect();
        chunks.sort_by(|a, b| {
            a.document_path
                .cmp(&b.document_path)
                .then(a.sequence_number.cmp(&b.sequence_number))
        });

        let results: Vec<ResultEntry> = chunks
            .iter()
            .map(|chunk| build_result(chunk, Score::default()))
            .collect();

        Ok(HydrateResponse {
            kb_id: req.kb_id,
            chunk_count: results.len(),
            chunks: results,
        })
    }
}

// ============ Validation ============

fn validate_request(req: &RetrievalRequest, top_k: i32) -> Result<(), RetrievalError> {
    if req.kb_id.is_empty() {
        return Err(RetrievalError::MissingKnowledgeBase);
    }
    if req.query.is_empty() {
        return Err(RetrievalError::MissingQuery);
    }
    if !(1..=MAX_TOP_K).contains(&top_k) {
        return Err(RetrievalError::InvalidTopK);
    }
    for weight in [req.hybrid_weight, req.semantic_weight].into_iter().flatten() {
        if !(0.0..=1.0).contains(&weight) {
            return Err(RetrievalError::InvalidHybridWeight);
        }
    }
    if let (Some(after), Some(before)) = (req.filters.created_after, req.filters.created_before) {
        if after > before {
            return Err(RetrievalError::InvalidCreatedRange);
        }
    }
    Ok(())
}

fn validate_hydrate_request(req: &HydrateRequest) -> Result<(), RetrievalError> {
    if req.kb_id.is_empty() {
        return Err(RetrievalError::MissingKnowledgeBase);
    }
    if req.chunk_ids.is_empty() {
        return Err(RetrievalError::MissingChunkIds);
    }
    if req.chunk_ids.len() > MAX_HYDRATE_CHUNK_IDS {
        return Err(RetrievalError::TooManyChunkIds);
    }
    if !(0..=MAX_ADJACENT).contains(&req.adjacent_before)
        || !(0..=MAX_ADJACENT).contains(&req.adjacent_after)
    {
        return Err(RetrievalError::InvalidAdjacentRange);
    }
    Ok(())
}

// ============ Scoring ============

#[derive(Debug, Clone)]
struct MergedScore {
    chunk_id: String,
    score: Score,
}

/// Over-fetch factor applied to top_k, clamped to [50, 200].
fn candidate_limit(top_k: i32) -> i64 {
    (i64::from(top_k) * 5).clamp(CANDIDATE_FLOOR, CANDIDATE_CAP)
}

fn normalize_path_prefix(prefix: Option<&str>) -> Option<String> {
    let prefix = prefix?;
    if prefix.is_empty() {
        return None;
    }
    if prefix.ends_with('%') {
        Some(prefix.to_string())
    } else {
        Some(format!("{}%", prefix))
    }
}

fn build_tags_filter(tags: &[String]) -> Option<JsonMap> {
    if tags.is_empty() {
        return None;
    }
    let mut map = JsonMap::new();
    map.insert("tags".into(), serde_json::json!(tags));
    Some(map)
}

fn build_filter_payload(filters: &Filters) -> JsonMap {
    let mut payload = JsonMap::new();
    if let Some(ref doc_type) = filters.document_type {
        payload.insert("document_type".into(), serde_json::json!(doc_type));
    }
    if let Some(ref prefix) = filters.path_prefix {
        payload.insert("path_prefix".into(), serde_json::json!(prefix));
    }
    if let Some(ref source) = filters.source {
        payload.insert("source".into(), serde_json::json!(source));
    }
    if !filters.tags.is_empty() {
        payload.insert("tags".into(), serde_json::json!(filters.tags));
    }
    if let Some(after) = filters.created_after {
        payload.insert("created_after".into(), serde_json::json!(after.to_rfc3339()));
    }
    if let Some(before) = filters.created_before {
        payload.insert("created_before".into(), serde_json::json!(before.to_rfc3339()));
    }
    payload
}

/// Max-normalize one score stream. Negative raw scores clamp to zero; a
/// stream whose maximum is zero is left as zeros.
fn normalize_scores(items: &[crate::repository::ScoredChunk]) -> HashMap<String, f64> {
    let mut scores = HashMap::with_capacity(items.len());
    let mut max = 0.0f64;
    for item in items {
        let value = item.score.max(0.0);
        scores.insert(item.chunk_id.clone(), value);
        if value > max {
            max = value;
        }
    }
    if max > 0.0 {
        for value in scores.values_mut() {
            *value /= max;
        }
    }
    scores
}

fn merge_scores(
    semantic: &HashMap<String, f64>,
    lexical: &HashMap<String, f64>,
    weight: f64,
) -> Vec<MergedScore> {
    let mut merged = Vec::with_capacity(semantic.len() + lexical.len());
    let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();

    for id in semantic.keys().chain(lexical.keys()) {
        if !seen.insert(id.as_str()) {
            continue;
        }
        let sem = semantic.get(id).copied().unwrap_or(0.0);
        let lex = lexical.get(id).copied().unwrap_or(0.0);
        merged.push(MergedScore {
            chunk_id: id.clone(),
            score: Score {
                semantic: sem,
                lexical: lex,
                final_score: weight * sem + (1.0 - weight) * lex,
            },
        });
    }
    merged
}

/// Sort by (final desc, semantic desc, lexical desc, chunk id asc) so ties
/// resolve deterministically.
fn sort_results(results: &mut [MergedScore]) {
    results.sort_by(|a, b| {
        b.score
            .final_score
            .partial_cmp(&a.score.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.score
                    .semantic
                    .partial_cmp(&a.score.semantic)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| {
                b.score
                    .lexical
                    .partial_cmp(&a.score.lexical)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

// ============ Result building ============

fn build_result(chunk: &ChunkRecord, score: Score) -> ResultEntry {
    let citation = build_citation(chunk);
    let offsets = match (citation.start_rune, citation.end_rune, citation.rune_length) {
        (None, None, None) => None,
        (start_rune, end_rune, rune_length) => Some(Offsets {
            start_rune,
            end_rune,
            rune_length,
        }),
    };
    let section_path = extract_string_slice(&chunk.metadata, "section_path");

    ResultEntry {
        chunk_id: chunk.chunk_id.clone(),
        document_id: chunk.document_id.clone(),
        document_version_id: chunk.document_version_id.clone(),
        document_path: chunk.document_path.clone(),
        document_title: chunk.document_title.clone(),
        document_type: chunk.document_type.clone(),
        content: chunk.content.clone(),
        metadata: chunk.metadata.clone(),
        scores: score,
        citation,
        source_uri: chunk.document_path.clone(),
        title: chunk.document_title.clone(),
        section_path,
        text: chunk.content.clone(),
        score: score.final_score,
        score_detail: score,
        offsets,
    }
}

fn build_citation(chunk: &ChunkRecord) -> Citation {
    Citation {
        document_id: chunk.document_id.clone(),
        document_version_id: chunk.document_version_id.clone(),
        path: chunk.document_path.clone(),
        title: chunk.document_title.clone(),
        version_number: chunk.version_number,
        chunk_sequence: chunk.sequence_number,
        start_rune: extract_int(&chunk.metadata, "start_rune"),
        end_rune: extract_int(&chunk.metadata, "end_rune"),
        rune_length: extract_int(&chunk.metadata, "rune_length"),
    }
}

fn extract_int(metadata: &JsonMap, key: &str) -> Option<i64> {
    metadata.get(key).and_then(|value| {
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
    })
}

fn extract_string_slice(metadata: &JsonMap, key: &str) -> Vec<String> {
    metadata
        .get(key)
        .and_then(|value| value.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn dedupe_strings(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}
