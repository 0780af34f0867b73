//! Postgres repository.
//!
//! Implements every store trait in [`crate::repository`] against a single
//! connection pool. Vectors live in dimension-partitioned tables named
//! `embeddings_{dim}` (resolved through `embedding_models`), semantic search
//! uses the pgvector cosine distance operator, and lexical search uses
//! Postgres full-text ranking over chunk content.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::models::{
    Chunk, Document, DocumentVersion, JsonMap, ProcessingStatus, RetrievalRequestRecord,
    RetrievalResultRecord,
};
use crate::repository::{
    ChunkRecord, ChunkStore, DocumentStore, DocumentVersionRef, EmbeddingStore, NewEmbedding,
    RetrievalStore, ScoredChunk, SearchParams,
};

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Dimension-specific vector table name (e.g. `embeddings_384`).
fn embedding_table(dimension: usize) -> String {
    format!("embeddings_{}", dimension)
}

fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("invalid {} '{}'", what, value))
}

fn json_object(map: &JsonMap) -> serde_json::Value {
    serde_json::Value::Object(map.clone())
}

fn object_from_value(value: serde_json::Value) -> JsonMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

fn chunk_record_from_row(row: &sqlx::postgres::PgRow) -> Result<ChunkRecord> {
    Ok(ChunkRecord {
        chunk_id: row.try_get::<Uuid, _>("chunk_id")?.to_string(),
        document_id: row.try_get::<Uuid, _>("document_id")?.to_string(),
        document_version_id: row.try_get::<Uuid, _>("document_version_id")?.to_string(),
        document_path: row.try_get("document_path")?,
        document_title: row.try_get("document_title")?,
        document_type: row.try_get("document_type")?,
        content: row.try_get("content")?,
        metadata: object_from_value(row.try_get("metadata")?),
        version_number: row.try_get("version_number")?,
        sequence_number: row.try_get("sequence_number")?,
        source_metadata: object_from_value(row.try_get("source_metadata")?),
    })
}

const CHUNK_RECORD_SELECT: &str = r#"
SELECT
    c.id AS chunk_id,
    dv.document_id AS document_id,
    c.document_version_id AS document_version_id,
    d.path AS document_path,
    d.title AS document_title,
    d.document_type AS document_type,
    c.content AS content,
    c.metadata AS metadata,
    dv.version_number AS version_number,
    c.sequence_number AS sequence_number,
    d.source_metadata AS source_metadata
FROM chunks c
JOIN document_versions dv ON c.document_version_id = dv.id
JOIN documents d ON dv.document_id = d.id
"#;

// ============ ChunkStore ============

#[async_trait]
impl ChunkStore for PgRepository {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            let embedding_id = chunk
                .embedding_id
                .as_deref()
                .map(|id| parse_uuid(id, "embedding id"))
                .transpose()?;

            sqlx::query(
                r#"
                INSERT INTO chunks
                    (id, document_version_id, kb_id, sequence_number, content,
                     content_hash, metadata, chunking_strategy, embedding_id, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(parse_uuid(&chunk.id, "chunk id")?)
            .bind(parse_uuid(&chunk.document_version_id, "version id")?)
            .bind(parse_uuid(&chunk.kb_id, "kb id")?)
            .bind(chunk.sequence_number)
            .bind(&chunk.content)
            .bind(&chunk.content_hash)
            .bind(json_object(&chunk.metadata))
            .bind(&chunk.chunking_strategy)
            .bind(embedding_id)
            .bind(chunk.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_chunks_by_document_version(&self, document_version_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE document_version_id = $1")
            .bind(parse_uuid(document_version_id, "version id")?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_chunks_by_document(&self, kb_id: &str, document_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM chunks c
            USING document_versions dv
            WHERE c.document_version_id = dv.id
              AND dv.kb_id = $1
              AND dv.document_id = $2
            "#,
        )
        .bind(parse_uuid(kb_id, "kb id")?)
        .bind(parse_uuid(document_id, "document id")?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_chunk_by_id(&self, kb_id: &str, chunk_id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query(
            r#"
            SELECT id, document_version_id, kb_id, sequence_number, content,
                   content_hash, metadata, chunking_strategy, embedding_id, created_at
            FROM chunks
            WHERE kb_id = $1 AND id = $2
            "#,
        )
        .bind(parse_uuid(kb_id, "kb id")?)
        .bind(parse_uuid(chunk_id, "chunk id")?)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Chunk {
            id: row.try_get::<Uuid, _>("id")?.to_string(),
            document_version_id: row.try_get::<Uuid, _>("document_version_id")?.to_string(),
            kb_id: row.try_get::<Uuid, _>("kb_id")?.to_string(),
            sequence_number: row.try_get("sequence_number")?,
            content: row.try_get("content")?,
            content_hash: row.try_get("content_hash")?,
            metadata: object_from_value(row.try_get("metadata")?),
            chunking_strategy: row.try_get("chunking_strategy")?,
            embedding_id: row
                .try_get::<Option<Uuid>, _>("embedding_id")?
                .map(|id| id.to_string()),
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn update_chunk_embedding(
        &self,
        kb_id: &str,
        chunk_id: &str,
        embedding_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE chunks SET embedding_id = $3 WHERE kb_id = $1 AND id = $2",
        )
        .bind(parse_uuid(kb_id, "kb id")?)
        .bind(parse_uuid(chunk_id, "chunk id")?)
        .bind(parse_uuid(embedding_id, "embedding id")?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_document_version_status(
        &self,
        version_id: &str,
        status: ProcessingStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE document_versions SET processing_status = $2, error_message = $3 WHERE id = $1",
        )
        .bind(parse_uuid(version_id, "version id")?)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_latest_document_version(
        &self,
        kb_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentVersionRef>> {
        let row = sqlx::query(
            r#"
            SELECT id, raw_content_uri
            FROM document_versions
            WHERE kb_id = $1 AND document_id = $2
            ORDER BY version_number DESC
            LIMIT 1
            "#,
        )
        .bind(parse_uuid(kb_id, "kb id")?)
        .bind(parse_uuid(document_id, "document id")?)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(DocumentVersionRef {
            document_version_id: row.try_get::<Uuid, _>("id")?.to_string(),
            raw_content_uri: row.try_get("raw_content_uri")?,
        }))
    }

    async fn activate_document_version(&self, version_id: &str) -> Result<()> {
        let version_uuid = parse_uuid(version_id, "version id")?;
        let mut tx = self.pool.begin().await?;

        // Deactivate all other versions for the same document.
        sqlx::query(
            r#"
            UPDATE document_versions SET is_active = false
            WHERE document_id = (SELECT document_id FROM document_versions WHERE id = $1)
            "#,
        )
        .bind(version_uuid)
        .execute(&mut *tx)
        .await?;

        // Activate this version and advance its status.
        sqlx::query(
            r#"
            UPDATE document_versions SET is_active = true, processing_status = 'ACTIVATED'
            WHERE id = $1
            "#,
        )
        .bind(version_uuid)
        .execute(&mut *tx)
        .await?;

        // Point the parent document at this version.
        sqlx::query(
            r#"
            UPDATE documents SET active_version_id = $1, updated_at = now()
            WHERE id = (SELECT document_id FROM document_versions WHERE id = $1)
            "#,
        )
        .bind(version_uuid)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

// ============ EmbeddingStore ============

#[async_trait]
impl EmbeddingStore for PgRepository {
    async fn model_dimension(&self, model_id: &str) -> Result<usize> {
        let dim: i32 =
            sqlx::query_scalar("SELECT vector_dimension FROM embedding_models WHERE id = $1")
                .bind(parse_uuid(model_id, "model id")?)
                .fetch_one(&self.pool)
                .await
                .with_context(|| format!("lookup dimension for model '{}'", model_id))?;
        Ok(dim as usize)
    }

    async fn find_embedding_id(
        &self,
        kb_id: &str,
        content_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>> {
        let dim = self.model_dimension(model_id).await?;
        let sql = format!(
            "SELECT id FROM {} WHERE kb_id = $1 AND content_hash = $2 AND embedding_model_id = $3 LIMIT 1",
            embedding_table(dim)
        );
        let id: Option<Uuid> = sqlx::query_scalar(&sql)
            .bind(parse_uuid(kb_id, "kb id")?)
            .bind(content_hash)
            .bind(parse_uuid(model_id, "model id")?)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id.map(|id| id.to_string()))
    }

    async fn save_embeddings(&self, embeddings: Vec<NewEmbedding>) -> Result<Vec<NewEmbedding>> {
        if embeddings.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let mut stored = Vec::with_capacity(embeddings.len());

        for mut embedding in embeddings {
            let table = embedding_table(embedding.vector_dimension);
            let kb_uuid = parse_uuid(&embedding.kb_id, "kb id")?;
            let model_uuid = parse_uuid(&embedding.model_id, "model id")?;
            let vector = pgvector::Vector::from(embedding.vector.clone());

            // Insert-if-absent; a concurrent writer with the same
            // (kb, hash, model) wins and its id is reused.
            let insert_sql = format!(
                r#"
                INSERT INTO {} (id, kb_id, content_hash, embedding_model_id, embedding_vector, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (kb_id, content_hash, embedding_model_id) DO NOTHING
                RETURNING id
                "#,
                table
            );
            let inserted: Option<Uuid> = sqlx::query_scalar(&insert_sql)
                .bind(parse_uuid(&embedding.id, "embedding id")?)
                .bind(kb_uuid)
                .bind(&embedding.content_hash)
                .bind(model_uuid)
                .bind(vector)
                .bind(now)
                .fetch_optional(&mut *tx)
                .await?;

            if inserted.is_none() {
                let select_sql = format!(
                    "SELECT id FROM {} WHERE kb_id = $1 AND content_hash = $2 AND embedding_model_id = $3 LIMIT 1",
                    table
                );
                let existing: Uuid = sqlx::query_scalar(&select_sql)
                    .bind(kb_uuid)
                    .bind(&embedding.content_hash)
                    .bind(model_uuid)
                    .fetch_one(&mut *tx)
                    .await?;
                embedding.id = existing.to_string();
                embedding.vector.clear();
            }
            stored.push(embedding);
        }

        tx.commit().await?;
        Ok(stored)
    }
}

// ============ RetrievalStore ============

#[async_trait]
impl RetrievalStore for PgRepository {
    async fn insert_retrieval_request(&self, record: &RetrievalRequestRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO retrieval_requests
                (id, kb_id, query, filters, top_k, hybrid_weight, result_count,
                 latency_ms, empty_result, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(parse_uuid(&record.id, "request id")?)
        .bind(parse_uuid(&record.kb_id, "kb id")?)
        .bind(&record.query)
        .bind(json_object(&record.filters))
        .bind(record.top_k)
        .bind(record.hybrid_weight)
        .bind(record.result_count)
        .bind(record.latency_ms)
        .bind(record.empty_result)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_retrieval_request(
        &self,
        request_id: &str,
        result_count: i32,
        latency_ms: i64,
        empty_result: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE retrieval_requests
            SET result_count = $2, latency_ms = $3, empty_result = $4
            WHERE id = $1
            "#,
        )
        .bind(parse_uuid(request_id, "request id")?)
        .bind(result_count)
        .bind(latency_ms)
        .bind(empty_result)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_retrieval_results(&self, records: &[RetrievalResultRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO retrieval_results
                    (id, retrieval_request_id, chunk_id, rank, semantic_score,
                     lexical_score, final_score, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(parse_uuid(&record.id, "result id")?)
            .bind(parse_uuid(&record.retrieval_request_id, "request id")?)
            .bind(parse_uuid(&record.chunk_id, "chunk id")?)
            .bind(record.rank)
            .bind(record.semantic_score)
            .bind(record.lexical_score)
            .bind(record.final_score)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search_semantic(&self, params: &SearchParams) -> Result<Vec<ScoredChunk>> {
        let sql = format!(
            r#"
            SELECT
                c.id AS chunk_id,
                CAST(1.0 - (e.embedding_vector <=> $1::vector) AS double precision) AS score
            FROM chunks c
            JOIN {} e ON c.embedding_id = e.id
            JOIN document_versions dv ON c.document_version_id = dv.id
            JOIN documents d ON dv.document_id = d.id
            WHERE dv.is_active = true
              AND c.kb_id = $2
              AND ($3::text IS NULL OR d.document_type = $3)
              AND ($4::text IS NULL OR d.path LIKE $4)
              AND ($5::text IS NULL OR d.source_metadata ->> 'source' = $5)
              AND ($6::jsonb = '{{}}'::jsonb OR d.source_metadata @> $6::jsonb)
              AND ($7::timestamptz IS NULL OR dv.created_at >= $7)
              AND ($8::timestamptz IS NULL OR dv.created_at <= $8)
            ORDER BY e.embedding_vector <=> $1::vector
            LIMIT $9
            "#,
            embedding_table(params.vector_dimension)
        );

        let rows = sqlx::query(&sql)
            .bind(pgvector::Vector::from(params.query_vector.clone()))
            .bind(parse_uuid(&params.kb_id, "kb id")?)
            .bind(params.document_type.as_deref())
            .bind(params.path_prefix.as_deref())
            .bind(params.source.as_deref())
            .bind(
                params
                    .tags_filter
                    .as_ref()
                    .map(json_object)
                    .unwrap_or_else(|| serde_json::json!({})),
            )
            .bind(params.created_after)
            .bind(params.created_before)
            .bind(params.limit)
            .fetch_all(&self.pool)
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            results.push(ScoredChunk {
                chunk_id: row.try_get::<Uuid, _>("chunk_id")?.to_string(),
                score: row.try_get("score")?,
            });
        }
        Ok(results)
    }

    async fn search_lexical(&self, params: &SearchParams) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT
                c.id AS chunk_id,
                CAST(ts_rank_cd(to_tsvector('english', c.content),
                                plainto_tsquery('english', $1)) AS double precision) AS score
            FROM chunks c
            JOIN document_versions dv ON c.document_version_id = dv.id
            JOIN documents d ON dv.document_id = d.id
            WHERE dv.is_active = true
              AND c.kb_id = $2
              AND to_tsvector('english', c.content) @@ plainto_tsquery('english', $1)
              AND ($3::text IS NULL OR d.document_type = $3)
              AND ($4::text IS NULL OR d.path LIKE $4)
              AND ($5::text IS NULL OR d.source_metadata ->> 'source' = $5)
              AND ($6::jsonb = '{}'::jsonb OR d.source_metadata @> $6::jsonb)
              AND ($7::timestamptz IS NULL OR dv.created_at >= $7)
              AND ($8::timestamptz IS NULL OR dv.created_at <= $8)
            ORDER BY score DESC
            LIMIT $9
            "#,
        )
        .bind(&params.query)
        .bind(parse_uuid(&params.kb_id, "kb id")?)
        .bind(params.document_type.as_deref())
        .bind(params.path_prefix.as_deref())
        .bind(params.source.as_deref())
        .bind(
            params
                .tags_filter
                .as_ref()
                .map(json_object)
                .unwrap_or_else(|| serde_json::json!({})),
        )
        .bind(params.created_after)
        .bind(params.created_before)
        .bind(params.limit)
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            results.push(ScoredChunk {
                chunk_id: row.try_get::<Uuid, _>("chunk_id")?.to_string(),
                score: row.try_get("score")?,
            });
        }
        Ok(results)
    }

    async fn get_chunks_with_documents(&self, chunk_ids: &[String]) -> Result<Vec<ChunkRecord>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = parse_uuid_list(chunk_ids)?;
        let sql = format!("{} WHERE c.id = ANY($1)", CHUNK_RECORD_SELECT);
        let rows = sqlx::query(&sql).bind(&ids).fetch_all(&self.pool).await?;
        rows.iter().map(chunk_record_from_row).collect()
    }

    async fn get_chunks_with_documents_for_kb(
        &self,
        kb_id: &str,
        chunk_ids: &[String],
    ) -> Result<Vec<ChunkRecord>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = parse_uuid_list(chunk_ids)?;
        let sql = format!(
            "{} WHERE c.id = ANY($1) AND c.kb_id = $2",
            CHUNK_RECORD_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(&ids)
            .bind(parse_uuid(kb_id, "kb id")?)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(chunk_record_from_row).collect()
    }

    async fn get_chunks_by_document_version_range(
        &self,
        document_version_id: &str,
        start_seq: i32,
        end_seq: i32,
    ) -> Result<Vec<ChunkRecord>> {
        let sql = format!(
            "{} WHERE c.document_version_id = $1 AND c.sequence_number BETWEEN $2 AND $3 \
             ORDER BY c.sequence_number",
            CHUNK_RECORD_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(parse_uuid(document_version_id, "version id")?)
            .bind(start_seq)
            .bind(end_seq)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(chunk_record_from_row).collect()
    }
}

fn parse_uuid_list(ids: &[String]) -> Result<Vec<Uuid>> {
    ids.iter().map(|id| parse_uuid(id, "chunk id")).collect()
}

// ============ DocumentStore ============

#[async_trait]
impl DocumentStore for PgRepository {
    async fn get_document_by_kb_path(&self, kb_id: &str, path: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT id, kb_id, path, title, document_type, source_metadata,
                   active_version_id, created_at, updated_at
            FROM documents
            WHERE kb_id = $1 AND path = $2
            "#,
        )
        .bind(parse_uuid(kb_id, "kb id")?)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Document {
            id: row.try_get::<Uuid, _>("id")?.to_string(),
            kb_id: row.try_get::<Uuid, _>("kb_id")?.to_string(),
            path: row.try_get("path")?,
            title: row.try_get("title")?,
            document_type: row.try_get("document_type")?,
            source_metadata: object_from_value(row.try_get("source_metadata")?),
            active_version_id: row
                .try_get::<Option<Uuid>, _>("active_version_id")?
                .map(|id| id.to_string()),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents
                (id, kb_id, path, title, document_type, source_metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(parse_uuid(&document.id, "document id")?)
        .bind(parse_uuid(&document.kb_id, "kb id")?)
        .bind(&document.path)
        .bind(&document.title)
        .bind(&document.document_type)
        .bind(json_object(&document.source_metadata))
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET title = $2, document_type = $3, source_metadata = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(parse_uuid(&document.id, "document id")?)
        .bind(&document.title)
        .bind(&document.document_type)
        .bind(json_object(&document.source_metadata))
        .bind(document.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_document_version(&self, version: &DocumentVersion) -> Result<DocumentVersion> {
        let document_uuid = parse_uuid(&version.document_id, "document id")?;
        let version_number: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO document_versions
                (id, document_id, kb_id, version_number, raw_content_uri,
                 processing_status, is_active, created_at)
            VALUES ($1, $2, $3,
                    (SELECT COALESCE(MAX(version_number), 0) + 1
                     FROM document_versions WHERE document_id = $2),
                    $4, $5, false, $6)
            RETURNING version_number
            "#,
        )
        .bind(parse_uuid(&version.id, "version id")?)
        .bind(document_uuid)
        .bind(parse_uuid(&version.kb_id, "kb id")?)
        .bind(&version.raw_content_uri)
        .bind(version.processing_status.as_str())
        .bind(version.created_at)
        .fetch_one(&self.pool)
        .await?;

        let mut stored = version.clone();
        stored.version_number = version_number;
        Ok(stored)
    }
}
