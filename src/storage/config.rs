//! Storage configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage backend type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// File-based storage (default)
    File,
    /// Memory storage (for testing)
    Memory,
    /// S3 storage (requires the `s3` feature)
    S3,
}

impl Default for BackendType {
    fn default() -> Self {
        Self::File
    }
}

/// Main storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend type
    #[serde(default)]
    pub backend: BackendType,

    /// Root directory for the file backend; one sub-directory per bucket
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Objects returned per listing page (memory and file backends)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// S3-specific settings
    #[serde(default)]
    pub s3: S3Config,
}

/// S3 storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    /// Custom endpoint (e.g. a local S3-compatible server)
    pub endpoint: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            base_dir: default_base_dir(),
            page_size: default_page_size(),
            s3: S3Config::default(),
        }
    }
}

impl StorageConfig {
    /// In-memory configuration for tests
    pub fn memory() -> Self {
        Self {
            backend: BackendType::Memory,
            ..Self::default()
        }
    }

    /// File-backed configuration rooted at `base_dir`
    pub fn file(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendType::File,
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".serverless-mr")
}

fn default_page_size() -> usize {
    1000
}
