//! Core domain types for the knowledge-base pipeline.
//!
//! The data lifecycle is:
//!
//! ```text
//! upload → Document + DocumentVersion (RECEIVED → STORED)
//!             │
//!         chunking → Chunk (version CHUNKED → EMBEDDED)
//!             │
//!         embedding → Embedding (content-addressed, immutable)
//!             │
//!         activation → version ACTIVATED, siblings demoted
//!             │
//!         retrieval → RetrievalRequestRecord + RetrievalResultRecord
//! ```
//!
//! A `Document` owns its versions, a version owns its chunks, and a chunk
//! references (never owns) an `Embedding`. At most one version per document
//! is active; only that version's chunks are searchable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JSON object used for metadata fields persisted as JSONB.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Processing state of a [`DocumentVersion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Received,
    Stored,
    Extracted,
    Chunked,
    Embedded,
    Activated,
    SkippedUnsupported,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Received => "RECEIVED",
            ProcessingStatus::Stored => "STORED",
            ProcessingStatus::Extracted => "EXTRACTED",
            ProcessingStatus::Chunked => "CHUNKED",
            ProcessingStatus::Embedded => "EMBEDDED",
            ProcessingStatus::Activated => "ACTIVATED",
            ProcessingStatus::SkippedUnsupported => "SKIPPED_UNSUPPORTED",
            ProcessingStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RECEIVED" => Some(ProcessingStatus::Received),
            "STORED" => Some(ProcessingStatus::Stored),
            "EXTRACTED" => Some(ProcessingStatus::Extracted),
            "CHUNKED" => Some(ProcessingStatus::Chunked),
            "EMBEDDED" => Some(ProcessingStatus::Embedded),
            "ACTIVATED" => Some(ProcessingStatus::Activated),
            "SKIPPED_UNSUPPORTED" => Some(ProcessingStatus::SkippedUnsupported),
            "FAILED" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessingStatus::SkippedUnsupported
                | ProcessingStatus::Activated
                | ProcessingStatus::Failed
        )
    }

    /// Whether moving from `self` to `next` is a valid forward transition.
    ///
    /// FAILED is reachable from any non-terminal state: the failing stage
    /// records itself in the version's error message rather than in the
    /// transition graph.
    pub fn can_transition_to(self, next: Self) -> bool {
        if next == ProcessingStatus::Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (ProcessingStatus::Received, ProcessingStatus::Stored)
                | (ProcessingStatus::Stored, ProcessingStatus::Extracted)
                | (ProcessingStatus::Stored, ProcessingStatus::SkippedUnsupported)
                | (ProcessingStatus::Extracted, ProcessingStatus::Chunked)
                | (ProcessingStatus::Chunked, ProcessingStatus::Embedded)
                | (ProcessingStatus::Embedded, ProcessingStatus::Activated)
        )
    }
}

/// A document identified by its path within a knowledge base.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub kb_id: String,
    pub path: String,
    pub title: Option<String>,
    pub document_type: String,
    pub source_metadata: JsonMap,
    pub active_version_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One immutable snapshot of a document's raw bytes.
#[derive(Debug, Clone)]
pub struct DocumentVersion {
    pub id: String,
    pub document_id: String,
    pub kb_id: String,
    pub version_number: i32,
    pub raw_content_uri: String,
    pub processing_status: ProcessingStatus,
    pub error_message: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A persisted slice of a version's text.
///
/// `sequence_number` starts at 1 and is dense within a version, ordered by
/// position in the source text. `content_hash` is the lowercase hex SHA-256
/// of `content`.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_version_id: String,
    pub kb_id: String,
    pub sequence_number: i32,
    pub content: String,
    pub content_hash: String,
    pub metadata: JsonMap,
    pub chunking_strategy: String,
    pub embedding_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A content-addressed, immutable embedding vector.
///
/// `(kb_id, content_hash, model_id)` is unique; multiple chunks may reference
/// the same embedding.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub id: String,
    pub kb_id: String,
    pub content_hash: String,
    pub model_id: String,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// An embedding model registered in the database; vector storage is keyed by
/// its dimension.
#[derive(Debug, Clone)]
pub struct EmbeddingModel {
    pub id: String,
    pub name: String,
    pub vector_dimension: i32,
    pub provider: String,
}

/// Observability record for one retrieval request.
#[derive(Debug, Clone)]
pub struct RetrievalRequestRecord {
    pub id: String,
    pub kb_id: String,
    pub query: String,
    pub filters: JsonMap,
    pub top_k: i32,
    pub hybrid_weight: f64,
    pub result_count: i32,
    pub latency_ms: i64,
    pub empty_result: bool,
    pub created_at: DateTime<Utc>,
}

/// Observability record for one ranked retrieval result.
#[derive(Debug, Clone)]
pub struct RetrievalResultRecord {
    pub id: String,
    pub retrieval_request_id: String,
    pub chunk_id: String,
    pub rank: i32,
    pub semantic_score: f64,
    pub lexical_score: f64,
    pub final_score: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ProcessingStatus::Received,
            ProcessingStatus::Stored,
            ProcessingStatus::Extracted,
            ProcessingStatus::Chunked,
            ProcessingStatus::Embedded,
            ProcessingStatus::Activated,
            ProcessingStatus::SkippedUnsupported,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(ProcessingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ProcessingStatus::parse("BOGUS"), None);
    }

    #[test]
    fn test_happy_path_transitions() {
        use ProcessingStatus::*;
        let path = [Received, Stored, Extracted, Chunked, Embedded, Activated];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_skipped_only_from_stored() {
        use ProcessingStatus::*;
        assert!(Stored.can_transition_to(SkippedUnsupported));
        assert!(!Received.can_transition_to(SkippedUnsupported));
        assert!(!Chunked.can_transition_to(SkippedUnsupported));
    }

    #[test]
    fn test_no_skipping_stages() {
        use ProcessingStatus::*;
        assert!(!Received.can_transition_to(Chunked));
        assert!(!Stored.can_transition_to(Embedded));
        assert!(!Extracted.can_transition_to(Activated));
    }

    #[test]
    fn test_failed_from_any_nonterminal() {
        use ProcessingStatus::*;
        for status in [Received, Stored, Extracted, Chunked, Embedded] {
            assert!(status.can_transition_to(Failed));
        }
    }

    #[test]
    fn test_terminal_states_are_sinks() {
        use ProcessingStatus::*;
        for terminal in [SkippedUnsupported, Activated, Failed] {
            assert!(terminal.is_terminal());
            for next in [Received, Stored, Extracted, Chunked, Embedded, Activated, Failed] {
                assert!(!terminal.can_transition_to(next), "{:?} -> {:?}", terminal, next);
            }
        }
    }
}
