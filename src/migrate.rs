//! Database schema migrations.
//!
//! Creates all required tables and indexes; every statement is idempotent so
//! the migration runs safely at each startup.
//!
//! # Tables
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `documents` | One row per (kb, path); points at the active version |
//! | `document_versions` | Immutable snapshots with processing status |
//! | `chunks` | Text slices with content hashes and metadata |
//! | `embedding_models` | Model registry; resolves vector dimensions |
//! | `embeddings_{384,768,1536}` | Dimension-partitioned vectors (pgvector) |
//! | `retrieval_requests` / `retrieval_results` | Retrieval observability |
//! | `ingestion_jobs` | Pipeline job bookkeeping |
//!
//! Uniqueness backs the core invariants: `(kb_id, path)` per document,
//! `(document_version_id, sequence_number)` per chunk, and
//! `(kb_id, content_hash, embedding_model_id)` per vector table.

use anyhow::Result;
use sqlx::postgres::PgPool;

/// Vector dimensions with a dedicated embeddings table.
const VECTOR_DIMENSIONS: [usize; 3] = [384, 768, 1536];

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id UUID PRIMARY KEY,
            kb_id UUID NOT NULL,
            path TEXT NOT NULL,
            title TEXT,
            document_type TEXT NOT NULL DEFAULT 'unknown',
            source_metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
            active_version_id UUID,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (kb_id, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_versions (
            id UUID PRIMARY KEY,
            document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            kb_id UUID NOT NULL,
            version_number INTEGER NOT NULL,
            raw_content_uri TEXT NOT NULL,
            processing_status TEXT NOT NULL DEFAULT 'RECEIVED',
            error_message TEXT,
            is_active BOOLEAN NOT NULL DEFAULT false,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (document_id, version_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id UUID PRIMARY KEY,
            document_version_id UUID NOT NULL REFERENCES document_versions(id) ON DELETE CASCADE,
            kb_id UUID NOT NULL,
            sequence_number INTEGER NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
            chunking_strategy TEXT NOT NULL,
            embedding_id UUID,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (document_version_id, sequence_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_models (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            vector_dimension INTEGER NOT NULL,
            provider TEXT NOT NULL DEFAULT '',
            UNIQUE (name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One vector table per supported dimension so each gets its own index.
    for dim in VECTOR_DIMENSIONS {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings_{dim} (
                id UUID PRIMARY KEY,
                kb_id UUID NOT NULL,
                content_hash TEXT NOT NULL,
                embedding_model_id UUID NOT NULL REFERENCES embedding_models(id),
                embedding_vector vector({dim}) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE (kb_id, content_hash, embedding_model_id)
            )
            "#,
        ))
        .execute(pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_embeddings_{dim}_vector \
             ON embeddings_{dim} USING hnsw (embedding_vector vector_cosine_ops)",
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS retrieval_requests (
            id UUID PRIMARY KEY,
            kb_id UUID NOT NULL,
            query TEXT NOT NULL,
            filters JSONB NOT NULL DEFAULT '{}'::jsonb,
            top_k INTEGER NOT NULL,
            hybrid_weight DOUBLE PRECISION NOT NULL,
            result_count INTEGER NOT NULL DEFAULT 0,
            latency_ms BIGINT NOT NULL DEFAULT 0,
            empty_result BOOLEAN NOT NULL DEFAULT false,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS retrieval_results (
            id UUID PRIMARY KEY,
            retrieval_request_id UUID NOT NULL REFERENCES retrieval_requests(id) ON DELETE CASCADE,
            chunk_id UUID NOT NULL,
            rank INTEGER NOT NULL,
            semantic_score DOUBLE PRECISION NOT NULL,
            lexical_score DOUBLE PRECISION NOT NULL,
            final_score DOUBLE PRECISION NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_jobs (
            id UUID PRIMARY KEY,
            document_version_id UUID NOT NULL REFERENCES document_versions(id) ON DELETE CASCADE,
            kb_id UUID NOT NULL,
            job_status TEXT NOT NULL DEFAULT 'QUEUED',
            error_message TEXT,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes for the hot query paths.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_versions_document \
         ON document_versions(document_id, version_number DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_version ON chunks(document_version_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_kb ON chunks(kb_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_content_fts \
         ON chunks USING gin (to_tsvector('english', content))",
    )
    .execute(pool)
    .await?;

    Ok(())
}
