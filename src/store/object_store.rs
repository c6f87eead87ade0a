use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::normalize_base_url;
use crate::store::hash::content_digest;

/// Durable blob storage with publicly dereferenceable URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` at `key`. Existing objects are never overwritten.
    async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    fn public_url(&self, key: &str) -> String;

    /// Inverse of [`ObjectStore::public_url`] for URLs this store issued.
    fn key_for_url(&self, url: &str) -> Option<String>;
}

/// Sidecar written next to every uploaded object.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredObjectMetadata {
    pub key: String,
    pub content_type: String,
    pub size: usize,
    pub sha256: String,
    pub created_at: String,
}

/// Object store rooted in a local directory and served under `base_url`.
#[derive(Clone, Debug)]
pub struct LocalFileStorage {
    base_dir: PathBuf,
    base_url: String,
}

impl LocalFileStorage {
    pub fn new(base_dir: PathBuf, base_url: String) -> Self {
        Self {
            base_dir,
            base_url: normalize_base_url(&base_url),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve_path(key);
        match fs::metadata(path).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.resolve_path(key)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Keys of the files directly under `dir`, with the given extension.
    pub async fn list(&self, dir: &str, extension: &str) -> Result<Vec<String>> {
        let dir_path = self.resolve_path(dir);
        let mut entries = match fs::read_dir(&dir_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                keys.push(format!("{}/{}", dir.trim_end_matches('/'), name));
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub fn resolve_path(&self, key: &str) -> PathBuf {
        let normalized = key.trim_start_matches('/');
        self.base_dir.join(Path::new(normalized))
    }

    fn meta_key(key: &str) -> String {
        format!("{key}.meta.json")
    }
}

#[async_trait]
impl ObjectStore for LocalFileStorage {
    async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        if key.split('/').any(|part| part == "..") {
            return Err(anyhow!("invalid object key: {key}"));
        }
        if self.exists(key).await? {
            return Err(anyhow!("object already exists: {key}"));
        }
        self.put(key, bytes).await?;
        let metadata = StoredObjectMetadata {
            key: key.to_string(),
            content_type: content_type.to_string(),
            size: bytes.len(),
            sha256: content_digest(bytes),
            created_at: Utc::now().to_rfc3339(),
        };
        self.put(&Self::meta_key(key), &serde_json::to_vec_pretty(&metadata)?).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.delete(key).await?;
        self.delete(&Self::meta_key(key)).await?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        format!("{}/{key}", self.base_url)
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        let prefix = format!("{}/", self.base_url);
        url.strip_prefix(&prefix)
            .map(|key| key.split(['?', '#']).next().unwrap_or(key).to_string())
            .filter(|key| !key.is_empty())
    }
}
