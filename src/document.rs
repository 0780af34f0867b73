//! Document intake.
//!
//! An upload creates the document on first use of a path (or updates it on
//! re-upload), allocates the next version number, stores the raw bytes in the
//! object store under
//! `kb/{kb_id}/documents/{doc_id}/versions/{version_id}/{file_name}`, and
//! advances the version RECEIVED → STORED. Only `markdown` documents are
//! eligible for chunking; anything else parks at SKIPPED_UNSUPPORTED. Stored
//! markdown versions are handed to the chunking coordinator channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::chunk_service::DocumentRequest;
use crate::models::{Document, DocumentVersion, JsonMap, ProcessingStatus};
use crate::objectstore::ObjectStore;
use crate::repository::{ChunkStore, DocumentStore};

pub const DOC_TYPE_MARKDOWN: &str = "markdown";
pub const DOC_TYPE_PDF: &str = "pdf";
pub const DOC_TYPE_IMAGE: &str = "image";
pub const DOC_TYPE_DOCX: &str = "docx";
pub const DOC_TYPE_UNKNOWN: &str = "unknown";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("knowledgebase_id is required")]
    MissingKnowledgeBaseId,
    #[error("path is required")]
    MissingPath,
    #[error("content is required")]
    MissingContent,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub kb_id: String,
    pub path: String,
    pub title: Option<String>,
    pub document_type: Option<String>,
    pub content_type: Option<String>,
    pub source_metadata: Option<JsonMap>,
    pub file_name: Option<String>,
    pub content: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct UploadResult {
    pub document_id: String,
    pub document_version_id: String,
    pub version_number: i32,
    pub path: String,
    pub document_type: String,
    pub raw_content_uri: String,
    pub processing_status: ProcessingStatus,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

pub struct DocumentService {
    documents: Arc<dyn DocumentStore>,
    versions: Arc<dyn ChunkStore>,
    store: Arc<dyn ObjectStore>,
    chunking_tx: Option<mpsc::Sender<DocumentRequest>>,
}

impl DocumentService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        versions: Arc<dyn ChunkStore>,
        store: Arc<dyn ObjectStore>,
        chunking_tx: Option<mpsc::Sender<DocumentRequest>>,
    ) -> Self {
        Self {
            documents,
            versions,
            store,
            chunking_tx,
        }
    }

    pub async fn upload(&self, req: UploadRequest) -> Result<UploadResult, DocumentError> {
        if req.kb_id.trim().is_empty() {
            return Err(DocumentError::MissingKnowledgeBaseId);
        }
        if req.path.trim().is_empty() {
            return Err(DocumentError::MissingPath);
        }
        if req.content.is_empty() {
            return Err(DocumentError::MissingContent);
        }

        let doc_type = match req.document_type.as_deref() {
            Some(doc_type) if !doc_type.is_empty() => doc_type.to_string(),
            _ => detect_document_type(&req.path, req.content_type.as_deref().unwrap_or("")),
        };

        let now = Utc::now();
        let doc = match self
            .documents
            .get_document_by_kb_path(&req.kb_id, &req.path)
            .await?
        {
            None => {
                let doc = Document {
                    id: Uuid::new_v4().to_string(),
                    kb_id: req.kb_id.clone(),
                    path: req.path.clone(),
                    title: req.title.clone(),
                    document_type: doc_type.clone(),
                    source_metadata: req.source_metadata.clone().unwrap_or_default(),
                    active_version_id: None,
                    created_at: now,
                    updated_at: now,
                };
                self.documents.insert_document(&doc).await?;
                doc
            }
            Some(mut existing) => {
                if req.title.is_some() {
                    existing.title = req.title.clone();
                }
                existing.document_type = doc_type.clone();
                if let Some(metadata) = req.source_metadata.clone() {
                    existing.source_metadata = metadata;
                }
                existing.updated_at = now;
                self.documents.update_document(&existing).await?;
                existing
            }
        };

        let version_id = Uuid::new_v4().to_string();
        let key = build_object_key(&req.kb_id, &doc.id, &version_id, req.file_name.as_deref(), &req.path);
        let uri = self.store.uri_for_key(&key);

        let version = self
            .documents
            .insert_document_version(&DocumentVersion {
                id: version_id,
                document_id: doc.id.clone(),
                kb_id: req.kb_id.clone(),
                version_number: 0,
                raw_content_uri: uri.clone(),
                processing_status: ProcessingStatus::Received,
                error_message: None,
                is_active: false,
                created_at: now,
            })
            .await?;

        if let Err(err) = self.store.put(&key, &req.content).await {
            let message = format!(
                "stage=STORED document_id={} version_id={} error={}",
                doc.id, version.id, err
            );
            if let Err(update_err) = self
                .versions
                .update_document_version_status(
                    &version.id,
                    ProcessingStatus::Failed,
                    Some(&message),
                )
                .await
            {
                warn!(version_id = %version.id, error = %update_err, "failed to record store failure");
            }
            return Err(err.into());
        }

        self.versions
            .update_document_version_status(&version.id, ProcessingStatus::Stored, None)
            .await?;

        let status = if is_supported_type(&doc.document_type) {
            ProcessingStatus::Stored
        } else {
            self.versions
                .update_document_version_status(
                    &version.id,
                    ProcessingStatus::SkippedUnsupported,
                    None,
                )
                .await?;
            ProcessingStatus::SkippedUnsupported
        };

        if status == ProcessingStatus::Stored {
            if let Some(tx) = &self.chunking_tx {
                let request = DocumentRequest {
                    kb_id: req.kb_id.clone(),
                    document_id: doc.id.clone(),
                    document_version_id: version.id.clone(),
                    raw_content_uri: uri.clone(),
                    content: String::from_utf8_lossy(&req.content).to_string(),
                    strategy: None,
                    max_runes: 0,
                    overlap_runes: 0,
                    separators: Vec::new(),
                    language_hints: Vec::new(),
                };
                if tx.send(request).await.is_err() {
                    warn!(
                        document_id = %doc.id,
                        "chunking channel closed; version stays STORED"
                    );
                }
            }
        }

        Ok(UploadResult {
            document_id: doc.id,
            document_version_id: version.id,
            version_number: version.version_number,
            path: doc.path,
            document_type: doc.document_type,
            raw_content_uri: uri,
            processing_status: status,
            is_active: false,
            created_at: version.created_at,
        })
    }
}

/// Only markdown flows through chunking; other known types are stored but
/// never chunked.
pub fn is_supported_type(doc_type: &str) -> bool {
    doc_type == DOC_TYPE_MARKDOWN
}

pub fn detect_document_type(path: &str, content_type: &str) -> String {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".md") || lower.ends_with(".mdx") {
        return DOC_TYPE_MARKDOWN.to_string();
    }
    if lower.ends_with(".pdf") {
        return DOC_TYPE_PDF.to_string();
    }
    if lower.ends_with(".docx") {
        return DOC_TYPE_DOCX.to_string();
    }

    if content_type.starts_with("text/markdown") {
        return DOC_TYPE_MARKDOWN.to_string();
    }
    if content_type.starts_with("application/pdf") {
        return DOC_TYPE_PDF.to_string();
    }
    if content_type.starts_with("image/") {
        return DOC_TYPE_IMAGE.to_string();
    }

    DOC_TYPE_UNKNOWN.to_string()
}

fn build_object_key(
    kb_id: &str,
    doc_id: &str,
    version_id: &str,
    file_name: Option<&str>,
    doc_path: &str,
) -> String {
    let mut name = file_name.unwrap_or("").trim().to_string();
    if name.is_empty() {
        name = doc_path.rsplit('/').next().unwrap_or("").to_string();
    }
    if name.is_empty() {
        name = "document".to_string();
    }
    let name = name.replace('/', "_");
    format!(
        "kb/{}/documents/{}/versions/{}/{}",
        kb_id, doc_id, version_id, name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(detect_document_type("docs/guide.md", ""), DOC_TYPE_MARKDOWN);
        assert_eq!(detect_document_type("docs/page.MDX", ""), DOC_TYPE_MARKDOWN);
        assert_eq!(detect_document_type("report.pdf", ""), DOC_TYPE_PDF);
        assert_eq!(detect_document_type("letter.docx", ""), DOC_TYPE_DOCX);
        assert_eq!(detect_document_type("notes.txt", ""), DOC_TYPE_UNKNOWN);
    }

    #[test]
    fn test_detect_by_content_type() {
        assert_eq!(
            detect_document_type("file", "text/markdown; charset=utf-8"),
            DOC_TYPE_MARKDOWN
        );
        assert_eq!(detect_document_type("file", "application/pdf"), DOC_TYPE_PDF);
        assert_eq!(detect_document_type("file", "image/png"), DOC_TYPE_IMAGE);
    }

    #[test]
    fn test_supported_gate() {
        assert!(is_supported_type(DOC_TYPE_MARKDOWN));
        assert!(!is_supported_type(DOC_TYPE_PDF));
        assert!(!is_supported_type(DOC_TYPE_UNKNOWN));
    }

    #[test]
    fn test_object_key_layout() {
        let key = build_object_key("kb1", "doc1", "ver1", Some("guide.md"), "docs/guide.md");
        assert_eq!(key, "kb/kb1/documents/doc1/versions/ver1/guide.md");
    }

    #[test]
    fn test_object_key_falls_back_to_path_basename() {
        let key = build_object_key("kb1", "doc1", "ver1", None, "docs/nested/guide.md");
        assert_eq!(key, "kb/kb1/documents/doc1/versions/ver1/guide.md");
    }

    #[test]
    fn test_object_key_sanitizes_separators() {
        let key = build_object_key("kb1", "doc1", "ver1", Some("a/b.md"), "");
        assert!(key.ends_with("/a_b.md"));
    }
}
