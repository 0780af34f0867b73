//! # ragserve
//!
//! **Backend of a retrieval-augmented knowledge base.**
//!
//! Ingests structured text documents, splits them into semantically coherent
//! chunks, produces vector embeddings with a content-addressed cache, and
//! answers queries by fusing dense-vector similarity with lexical full-text
//! ranking, returning passages with precise source citations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Upload  │──▶│ Object store   │──▶│  Chunking    │──▶│  Embedding   │
//! │ (HTTP)   │   │ file:// / s3://│   │ coordinator  │   │   worker     │
//! └──────────┘   └───────────────┘   └──────┬──────┘   └──────┬───────┘
//!                                           │                 │
//!                                           ▼                 ▼
//!                                   ┌───────────────────────────────┐
//!                                   │  Postgres (+pgvector)         │
//!                                   │  documents / versions /        │
//!                                   │  chunks / embeddings_{dim}     │
//!                                   └──────────────┬────────────────┘
//!                                                  │
//!                                         ┌────────┴────────┐
//!                                         │ Hybrid retrieval │
//!                                         │ semantic+lexical │
//!                                         └─────────────────┘
//! ```
//!
//! ## Pipeline
//!
//! 1. An **upload** stores raw bytes in the object store and inserts a
//!    `DocumentVersion` in state `STORED` ([`document`]).
//! 2. The **chunking coordinator** ([`chunk_service`]) loads the bytes,
//!    selects a strategy ([`chunking`]: fixed, recursive, or structural
//!    markdown), and materializes chunks with content hashes.
//! 3. The **embedding worker** ([`embedding_worker`]) deduplicates by
//!    `(kb, content_hash, model)`, calls the external embedder
//!    ([`embedder`]) on misses, and persists vectors exactly once.
//! 4. **Activation** atomically makes the version the single active one for
//!    its document; only active versions are searchable.
//! 5. A **query** ([`retrieval`]) is classified into a retrieval profile,
//!    embedded, run through semantic and lexical candidate searches,
//!    max-normalized, fused as `w·semantic + (1-w)·lexical`, and hydrated
//!    into cited passages.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment configuration |
//! | [`models`] | Domain types and the version state machine |
//! | [`markdown`] | Block parser, token estimator, heading breadcrumbs |
//! | [`chunking`] | Fixed / recursive / markdown chunking strategies |
//! | [`objectstore`] | `file://` and `s3://` raw-content backends |
//! | [`embedder`] | External embedding model clients |
//! | [`embedding_worker`] | Single-consumer embed-and-persist pipeline |
//! | [`chunk_service`] | Per-version chunking coordinator |
//! | [`document`] | Document intake and version allocation |
//! | [`retrieval`] | Query classification, hybrid search, hydration |
//! | [`repository`] | Persistence traits |
//! | [`postgres`] | Postgres + pgvector implementation |
//! | [`cache`] | Pass-through cache layer over the repository |
//! | [`server`] | Axum HTTP surface |
//! | [`db`] | Connection pool |
//! | [`migrate`] | Idempotent schema migrations |

pub mod cache;
pub mod chunk_service;
pub mod chunking;
pub mod config;
pub mod db;
pub mod document;
pub mod embedder;
pub mod embedding_worker;
pub mod markdown;
pub mod migrate;
pub mod models;
pub mod objectstore;
pub mod postgres;
pub mod repository;
pub mod retrieval;
pub mod server;
