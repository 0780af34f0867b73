//! Object storage for raw document bytes.
//!
//! Two backends behind the [`ObjectStore`] trait:
//!
//! - **[`LocalStore`]** — files under a root directory, addressed by
//!   `file://<abs-path>` URIs. Development and tests.
//! - **[`S3Store`]** — any S3-compatible service, addressed by
//!   `s3://<bucket>/<key>` URIs. Requests are signed with AWS Signature V4
//!   using pure-Rust `hmac` + `sha2`, so custom endpoints (MinIO, LocalStack)
//!   work without any C dependencies.
//!
//! Object key layout: `kb/{kb_id}/documents/{doc_id}/versions/{version_id}/{file_name}`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::S3Config;

type HmacSha256 = Hmac<Sha256>;

/// Minimal object storage contract for raw document bytes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// The URI that `put(key, …)` would store under.
    fn uri_for_key(&self, key: &str) -> String;

    /// Store bytes under a key; returns the URI and the byte count written.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(String, u64)>;

    /// Fetch the bytes behind a URI previously produced by this store.
    async fn get(&self, uri: &str) -> Result<Vec<u8>>;
}

// ============ Local filesystem backend ============

/// Stores objects on the local filesystem for development.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in key.split('/') {
            path.push(part);
        }
        path
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn uri_for_key(&self, key: &str) -> String {
        format!("file://{}", self.path_for_key(key).display())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(String, u64)> {
        let path = self.path_for_key(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create object directory {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("write object {}", path.display()))?;
        Ok((format!("file://{}", path.display()), bytes.len() as u64))
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>> {
        let Some(path) = uri.strip_prefix("file://") else {
            bail!("unsupported local uri: {}", uri);
        };
        tokio::fs::read(Path::new(path))
            .await
            .with_context(|| format!("read object {}", path))
    }
}

// ============ S3-compatible backend ============

/// Stores objects in an S3-compatible bucket using the S3 REST API with
/// SigV4 request signing.
pub struct S3Store {
    config: S3Config,
    client: reqwest::Client,
}

impl S3Store {
    pub fn new(config: S3Config) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Hostname and canonical URI path for a key, honoring path-style
    /// addressing for endpoints that require it.
    fn host_and_path(&self, key: &str) -> (String, String) {
        let endpoint = self
            .config
            .endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');

        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        if self.config.force_path_style {
            (
                endpoint.to_string(),
                format!("/{}/{}", self.config.bucket, encoded_key),
            )
        } else {
            (
                format!("{}.{}", self.config.bucket, endpoint),
                format!("/{}", encoded_key),
            )
        }
    }

    fn scheme(&self) -> &'static str {
        if self.config.endpoint.starts_with("http://") {
            "http"
        } else {
            "https"
        }
    }

    fn key_for_uri(&self, uri: &str) -> Result<String> {
        let Some(rest) = uri.strip_prefix("s3://") else {
            bail!("unsupported s3 uri: {}", uri);
        };
        let Some((bucket, key)) = rest.split_once('/') else {
            bail!("malformed s3 uri: {}", uri);
        };
        if bucket != self.config.bucket {
            bail!(
                "uri bucket '{}' does not match configured bucket '{}'",
                bucket,
                self.config.bucket
            );
        }
        Ok(key.to_string())
    }

    /// Sign and issue a request with no query string.
    async fn signed_request(
        &self,
        method: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let (host, canonical_uri) = self.host_and_path(key);
        let url = format!("{}://{}{}", self.scheme(), host, canonical_uri);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(&body);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, canonical_uri, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.config.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.config.access_key_id, credential_scope, signed_headers, signature
        );

        let builder = match method {
            "PUT" => self.client.put(&url).body(body),
            _ => self.client.get(&url),
        };

        builder
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date)
            .send()
            .await
            .with_context(|| format!("s3 {} request for key '{}' failed", method, key))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn uri_for_key(&self, key: &str) -> String {
        format!("s3://{}/{}", self.config.bucket, key)
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(String, u64)> {
        let size = bytes.len() as u64;
        let resp = self.signed_request("PUT", key, bytes.to_vec()).await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok((self.uri_for_key(key), size))
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>> {
        let key = self.key_for_uri(uri)?;
        let resp = self.signed_request("GET", &key, Vec::new()).await?;
        if !resp.status().is_success() {
            bail!(
                "S3 GetObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            );
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

// ============ SigV4 helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// kDate = HMAC("AWS4" + secret, date); kRegion = HMAC(kDate, region);
/// kService = HMAC(kRegion, service); kSigning = HMAC(kService, "aws4_request").
fn derive_signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Percent-encode a URI component per the SigV4 rules (unreserved characters
/// pass through).
fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_put_get_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        let key = "kb/kb1/documents/doc1/versions/v1/readme.md";
        let (uri, size) = store.put(key, b"hello world").await.unwrap();
        assert!(uri.starts_with("file://"));
        assert_eq!(size, 11);
        assert_eq!(uri, store.uri_for_key(key));

        let bytes = store.get(&uri).await.unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn test_local_rejects_foreign_uri() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        assert!(store.get("s3://bucket/key").await.is_err());
    }

    #[test]
    fn test_s3_uri_layout() {
        let store = S3Store::new(S3Config {
            region: "us-east-1".into(),
            bucket: "docs".into(),
            endpoint: "https://s3.us-east-1.amazonaws.com".into(),
            access_key_id: "k".into(),
            secret_access_key: "s".into(),
            force_path_style: false,
        });
        assert_eq!(store.uri_for_key("kb/a/b"), "s3://docs/kb/a/b");
        assert_eq!(store.key_for_uri("s3://docs/kb/a/b").unwrap(), "kb/a/b");
        assert!(store.key_for_uri("s3://other/kb/a/b").is_err());
    }

    #[test]
    fn test_path_style_addressing() {
        let store = S3Store::new(S3Config {
            region: "us-east-1".into(),
            bucket: "docs".into(),
            endpoint: "http://localhost:9000".into(),
            access_key_id: "k".into(),
            secret_access_key: "s".into(),
            force_path_style: true,
        });
        let (host, path) = store.host_and_path("kb/x.md");
        assert_eq!(host, "localhost:9000");
        assert_eq!(path, "/docs/kb/x.md");
        assert_eq!(store.scheme(), "http");
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("safe-chars_1.ext~"), "safe-chars_1.ext~");
        assert_eq!(uri_encode("a b"), "a%20b");
        assert_eq!(uri_encode("a/b"), "a%2Fb");
    }

    #[test]
    fn test_signing_key_is_deterministic() {
        let a = derive_signing_key("secret", "20260802", "us-east-1", "s3");
        let b = derive_signing_key("secret", "20260802", "us-east-1", "s3");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
