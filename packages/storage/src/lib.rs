//! Object storage for processed analytics events.
//!
//! [`Storage`] scopes an `object_store` backend (S3, local filesystem or
//! in-memory) to a key prefix and stores JSON documents in it;
//! [`EventArchive`] lays event records out on top of it.

mod archive;
mod config;

use std::sync::Arc;

use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder, AmazonS3ConfigKey};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload};
use serde_json::Value;

pub use archive::EventArchive;
pub use config::{DEFAULT_FS_ROOT, S3Config, StorageBackendConfig, StorageConfig, StorageKind};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("invalid object key: {0:?}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON documents in an object store, under an optional root prefix.
#[derive(Clone)]
pub struct Storage {
    backend: StorageKind,
    store: Arc<dyn ObjectStore>,
    root: Path,
}

impl Storage {
    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let backend = cfg.backend.kind();
        let store: Arc<dyn ObjectStore> = match cfg.backend {
            StorageBackendConfig::S3(s3) => Arc::new(s3_store(s3)?),
            StorageBackendConfig::Filesystem { root } => {
                ensure_root(&root)?;
                Arc::new(LocalFileSystem::new_with_prefix(&root)?)
            }
            StorageBackendConfig::Memory => Arc::new(InMemory::new()),
        };
        let root = cfg.prefix.as_deref().map(Path::from).unwrap_or_default();

        tracing::info!(backend = %backend, root = %root, "Object storage ready");
        Ok(Self {
            backend,
            store,
            root,
        })
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?).await
    }

    pub fn backend(&self) -> StorageKind {
        self.backend
    }

    fn object_path(&self, key: &str) -> Result<Path, StorageError> {
        let key_path = Path::from(key);
        if key_path.as_ref().is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.parts().chain(key_path.parts()).collect())
    }

    /// Write `value` at `key`, replacing any previous document.
    pub async fn write_json(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        let body = Bytes::from(serde_json::to_vec(value)?);
        self.store.put(&path, PutPayload::from(body)).await?;
        Ok(())
    }

    pub async fn read_json(&self, key: &str) -> Result<Value, StorageError> {
        let path = self.object_path(key)?;
        let body = self.store.get(&path).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Keys of every document under `key_prefix`, relative to the root, sorted.
    pub async fn keys_under(&self, key_prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = self.object_path(key_prefix)?;
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;

        let mut keys: Vec<String> = objects
            .iter()
            .filter_map(|meta| meta.location.prefix_match(&self.root))
            .map(|rest| rest.collect::<Path>().to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

fn ensure_root(root: &std::path::Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn s3_store(cfg: S3Config) -> Result<AmazonS3, StorageError> {
    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region)
        .with_allow_http(cfg.allow_http)
        .with_virtual_hosted_style_request(cfg.virtual_hosted_style);

    let optional = [
        (AmazonS3ConfigKey::Endpoint, cfg.endpoint),
        (AmazonS3ConfigKey::AccessKeyId, cfg.access_key_id),
        (AmazonS3ConfigKey::SecretAccessKey, cfg.secret_access_key),
        (AmazonS3ConfigKey::Token, cfg.session_token),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            builder = builder.with_config(key, value);
        }
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn documents_round_trip_under_the_root() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory().with_prefix("tenant/")).await?;
        let doc = json!({"a": 1, "b": "two"});
        storage.write_json("events/a/1.json", &doc).await?;
        assert_eq!(storage.read_json("events/a/1.json").await?, doc);
        assert_eq!(storage.backend(), StorageKind::Memory);
        Ok(())
    }

    #[tokio::test]
    async fn listing_hides_the_root() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory().with_prefix("tenant")).await?;
        for key in ["events/a/1.json", "events/a/2.json", "events/b/3.json"] {
            storage.write_json(key, &json!({})).await?;
        }

        let keys = storage.keys_under("events/a").await?;
        assert_eq!(keys, ["events/a/1.json", "events/a/2.json"]);
        Ok(())
    }

    #[tokio::test]
    async fn empty_keys_are_rejected() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        let err = storage.write_json("/", &json!({})).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
        Ok(())
    }
}
