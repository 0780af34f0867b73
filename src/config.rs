use std::path::PathBuf;

use anyhow::{bail, Context, Result};

/// Application configuration assembled from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub object_store: ObjectStoreConfig,
    pub embedding: EmbeddingConfig,
    /// Default model id used by the embedding worker (EMBEDDING_MODEL_ID).
    pub default_model_id: String,
}

#[derive(Debug, Clone)]
pub enum ObjectStoreConfig {
    Local { root: PathBuf },
    S3(S3Config),
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub bucket: String,
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub force_path_style: bool,
}

/// Embedding provider selection.
///
/// `EMBEDDING_PROVIDER` is `fastapi` (default; also accepts `http`/`local`)
/// or `openai`.
#[derive(Debug, Clone)]
pub enum EmbeddingConfig {
    FastApi {
        base_url: String,
    },
    OpenAi {
        api_key: String,
        model: String,
        dimensions: usize,
    },
}

const DEFAULT_FASTAPI_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            object_store: object_store_from_env()?,
            embedding: embedding_from_env()?,
            default_model_id: optional_env("EMBEDDING_MODEL_ID").unwrap_or_default(),
        })
    }
}

fn object_store_from_env() -> Result<ObjectStoreConfig> {
    let store_type = optional_env("OBJECT_STORE_TYPE")
        .map(|v| v.to_ascii_lowercase())
        .unwrap_or_else(|| "s3".to_string());

    match store_type.as_str() {
        "local" => {
            let root = optional_env("OBJECT_STORE_ROOT")
                .unwrap_or_else(|| "/tmp/ragserve-objects".to_string());
            Ok(ObjectStoreConfig::Local { root: root.into() })
        }
        "s3" => Ok(ObjectStoreConfig::S3(S3Config {
            region: required_env("REGION")?,
            bucket: required_env("BUCKET_NAME")?,
            endpoint: required_env("ENDPOINT_URL")?,
            access_key_id: required_env("ACCESS_KEY_ID")?,
            secret_access_key: required_env("SECRET_ACCESS_KEY")?,
            force_path_style: optional_env("S3_FORCE_PATH_STYLE")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })),
        other => bail!("Unsupported OBJECT_STORE_TYPE: {}", other),
    }
}

fn embedding_from_env() -> Result<EmbeddingConfig> {
    let provider = optional_env("EMBEDDING_PROVIDER")
        .map(|v| v.to_ascii_lowercase())
        .unwrap_or_else(|| "fastapi".to_string());

    match provider.as_str() {
        "fastapi" | "http" | "local" => {
            let base_url = optional_env("EMBEDDING_BASE_URL")
                .or_else(|| optional_env("FASTAPI_EMBEDDINGS_URL"))
                .unwrap_or_else(|| DEFAULT_FASTAPI_BASE_URL.to_string());
            Ok(EmbeddingConfig::FastApi { base_url })
        }
        "openai" => {
            let api_key = required_env("OPENAI_API_KEY")?;
            let model = optional_env("OPENAI_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
            let dimensions = match optional_env("OPENAI_EMBEDDING_DIMENSIONS") {
                Some(raw) => raw
                    .parse::<usize>()
                    .with_context(|| format!("invalid OPENAI_EMBEDDING_DIMENSIONS: {}", raw))?,
                // The default model has a fixed dimension; others report it
                // per response.
                None if model == DEFAULT_OPENAI_MODEL => 1536,
                None => 0,
            };
            Ok(EmbeddingConfig::OpenAi {
                api_key,
                model,
                dimensions,
            })
        }
        other => bail!("unsupported EMBEDDING_PROVIDER: {}", other),
    }
}

fn required_env(key: &str) -> Result<String> {
    optional_env(key).with_context(|| format!("missing required environment variable {}", key))
}

fn optional_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}
