//! Storage backend selection.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::StorageError;

/// Directory used by the filesystem backend when none is configured.
pub const DEFAULT_FS_ROOT: &str = "./data/events";

const DEFAULT_S3_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        })
    }
}

impl FromStr for StorageKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(StorageKind::S3),
            "filesystem" | "fs" => Ok(StorageKind::Filesystem),
            "memory" | "mem" => Ok(StorageKind::Memory),
            other => Err(StorageError::InvalidConfig(format!(
                "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
            ))),
        }
    }
}

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

impl StorageBackendConfig {
    pub fn kind(&self) -> StorageKind {
        match self {
            StorageBackendConfig::S3(_) => StorageKind::S3,
            StorageBackendConfig::Filesystem { .. } => StorageKind::Filesystem,
            StorageBackendConfig::Memory => StorageKind::Memory,
        }
    }
}

/// Where archived events live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Key prefix every archived object is written under.
    pub prefix: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::with_backend(StorageBackendConfig::Memory)
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self::with_backend(StorageBackendConfig::Filesystem { root: root.into() })
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self::with_backend(StorageBackendConfig::S3(cfg))
    }

    fn with_backend(backend: StorageBackendConfig) -> Self {
        Self {
            backend,
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = trimmed(prefix.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// `STORAGE_BACKEND` picks `s3`, `filesystem` or `memory`; unset means
    /// filesystem under `STORAGE_FS_ROOT` (default [`DEFAULT_FS_ROOT`]).
    /// `STORAGE_PREFIX` is applied to every key.
    ///
    /// S3 reads `S3_BUCKET` (required), `AWS_REGION`, `S3_ENDPOINT`,
    /// `S3_ALLOW_HTTP` (defaults to true for `http://` endpoints),
    /// `S3_VIRTUAL_HOSTED_STYLE` and the `AWS_*` credential variables.
    pub fn from_env() -> Result<Self, StorageError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same rules as [`StorageConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StorageError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).and_then(trimmed);

        let kind = match var("STORAGE_BACKEND") {
            Some(name) => name.parse()?,
            None => StorageKind::Filesystem,
        };
        let backend = match kind {
            StorageKind::S3 => StorageBackendConfig::S3(s3_from(&var)?),
            StorageKind::Filesystem => StorageBackendConfig::Filesystem {
                root: var("STORAGE_FS_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FS_ROOT)),
            },
            StorageKind::Memory => StorageBackendConfig::Memory,
        };

        Ok(Self {
            backend,
            prefix: var("STORAGE_PREFIX"),
        })
    }
}

fn s3_from(var: &impl Fn(&str) -> Option<String>) -> Result<S3Config, StorageError> {
    let bucket = var("S3_BUCKET").ok_or_else(|| {
        StorageError::InvalidConfig("S3_BUCKET is required for s3 backend".into())
    })?;
    let endpoint = var("S3_ENDPOINT");
    let plain_http = endpoint
        .as_deref()
        .is_some_and(|e| e.to_ascii_lowercase().starts_with("http://"));

    Ok(S3Config {
        bucket,
        region: var("AWS_REGION").unwrap_or_else(|| DEFAULT_S3_REGION.to_string()),
        allow_http: flag(var, "S3_ALLOW_HTTP")?.unwrap_or(plain_http),
        virtual_hosted_style: flag(var, "S3_VIRTUAL_HOSTED_STYLE")?.unwrap_or(false),
        endpoint,
        access_key_id: var("AWS_ACCESS_KEY_ID"),
        secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
        session_token: var("AWS_SESSION_TOKEN"),
    })
}

fn flag(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<bool>, StorageError> {
    let Some(raw) = var(name) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(Some(true)),
        "0" | "false" | "no" | "n" => Ok(Some(false)),
        _ => Err(StorageError::InvalidConfig(format!(
            "invalid boolean for {name}={raw} (expected true/false)"
        ))),
    }
}

fn trimmed(s: String) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
