use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageReader;
use mediaforge_contracts::context::present;
use mediaforge_contracts::PersistenceConfig;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::PersistError;
use crate::provider::{error_body_text, truncate_text};

/// Durable home for generated or uploaded bytes.
#[async_trait]
pub trait AssetStore: Send + Sync {
    fn describe(&self) -> String;

    /// Stores `bytes` under `key` and returns the public URL.
    async fn put(&self, key: &str, bytes: &[u8], mime_type: &str) -> Result<String, PersistError>;
}

/// Bucket-style object storage speaking `PUT /storage/v1/object/{bucket}/{key}`.
pub struct HttpObjectStore {
    base_url: String,
    bucket: String,
    api_key: Option<String>,
    http: Client,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>, bucket: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            bucket: bucket.into().trim().trim_matches('/').to_string(),
            api_key,
            http: Client::new(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, key)
    }

    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, key
        )
    }
}

#[async_trait]
impl AssetStore for HttpObjectStore {
    fn describe(&self) -> String {
        format!("bucket {} at {}", self.bucket, self.base_url)
    }

    async fn put(&self, key: &str, bytes: &[u8], mime_type: &str) -> Result<String, PersistError> {
        if !present(&self.api_key) {
            return Err(PersistError::MissingCredentials("STORAGE_API_KEY".to_string()));
        }
        let api_key = self.api_key.as_deref().unwrap_or_default().trim();
        let response = self
            .http
            .put(self.object_url(key))
            .bearer_auth(api_key)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .header("x-upsert", "true")
            .body(bytes.to_vec())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = error_body_text(response.text().await);
            return Err(PersistError::Api {
                status,
                body: truncate_text(body.trim(), 512),
            });
        }
        Ok(self.public_url(key))
    }
}

/// Writes under a directory and returns `file://` URLs.
pub struct LocalDirStore {
    dir: PathBuf,
}

impl LocalDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl AssetStore for LocalDirStore {
    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }

    async fn put(&self, key: &str, bytes: &[u8], _mime_type: &str) -> Result<String, PersistError> {
        let path = self.dir.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        let absolute = tokio::fs::canonicalize(&path).await?;
        Ok(format!("file://{}", absolute.display()))
    }
}

pub fn store_from_config(config: &PersistenceConfig) -> Option<Arc<dyn AssetStore>> {
    match config {
        PersistenceConfig::None => None,
        PersistenceConfig::Http {
            base_url,
            bucket,
            api_key,
        } => Some(Arc::new(HttpObjectStore::new(
            base_url.clone(),
            bucket.clone(),
            api_key.clone(),
        ))),
        PersistenceConfig::LocalDir { dir } => Some(Arc::new(LocalDirStore::new(dir.clone()))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub url: String,
    /// False when the URL is an ephemeral `data:` reference.
    pub stored: bool,
    pub warning: Option<String>,
}

/// Upload with degrade: storage failures never fail the operation.
#[derive(Clone, Default)]
pub struct AssetPersister {
    store: Option<Arc<dyn AssetStore>>,
}

impl AssetPersister {
    pub fn new(store: Option<Arc<dyn AssetStore>>) -> Self {
        Self { store }
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    pub async fn persist(&self, key: &str, bytes: &[u8], mime_type: &str) -> PersistOutcome {
        let result = match self.store.as_ref() {
            Some(store) => {
                debug!(store = %store.describe(), key, "persisting asset");
                store.put(key, bytes, mime_type).await
            }
            None => Err(PersistError::NotConfigured),
        };
        match result {
            Ok(url) => PersistOutcome {
                url,
                stored: true,
                warning: None,
            },
            Err(err) => {
                warn!(key, error = %err, "asset persistence failed; using ephemeral data URL");
                PersistOutcome {
                    url: ephemeral_url(bytes, mime_type),
                    stored: false,
                    warning: Some(format!(
                        "asset was not stored durably ({err}); the URL is temporary"
                    )),
                }
            }
        }
    }
}

pub fn ephemeral_url(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageProbe {
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Sniffs format and pixel size from the bytes themselves.
pub fn sniff_image(bytes: &[u8]) -> Option<ImageProbe> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    let format = reader.format()?;
    let (width, height) = reader.into_dimensions().ok()?;
    Some(ImageProbe {
        mime_type: format.to_mime_type(),
        width,
        height,
    })
}
