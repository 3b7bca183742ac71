//! File-based object store
//!
//! Each bucket is a directory under the configured base directory and each
//! key maps to a relative path inside it. Writes go to a temporary sibling
//! and are renamed into place so readers never observe partial objects.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;
use walkdir::WalkDir;

use crate::storage::{
    error::{StorageError, StorageResult},
    traits::ObjectStore,
    types::{page_after, ListPage},
};

const TEMP_MARKER: &str = ".tmp-";

/// File-based object store
pub struct FileObjectStore {
    base_dir: PathBuf,
    page_size: usize,
}

impl FileObjectStore {
    /// Create a new file store rooted at `base_dir`
    pub async fn new(base_dir: impl Into<PathBuf>, page_size: usize) -> StorageResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self {
            base_dir,
            page_size,
        })
    }

    /// Root directory of this store
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let safe = !bucket.is_empty()
            && !bucket.contains(['/', '\\'])
            && bucket != ".."
            && !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::invalid_key(format!("{}/{}", bucket, key)));
        }
        Ok(self.base_dir.join(bucket).join(relative))
    }

    fn list_sorted(root: PathBuf, prefix: String) -> Vec<(String, u64)> {
        let mut keys: Vec<(String, u64)> = WalkDir::new(&root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&root).ok()?;
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.contains(TEMP_MARKER) || !key.starts_with(&prefix) {
                    return None;
                }
                let size = entry.metadata().ok()?.len();
                Some((key, size))
            })
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(format!("{}{}", TEMP_MARKER, uuid::Uuid::new_v4()));
        let temp_path = path.with_file_name(temp_name);

        fs::write(&temp_path, &body).await?;
        fs::rename(&temp_path, &path).await?;
        debug!(bucket, key, bytes = body.len(), "Wrote object");
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.object_path(bucket, key)?;
        match fs::read(&path).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        range: Range<u64>,
    ) -> StorageResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(format!("{}/{}", bucket, key)))
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let len = file.metadata().await?.len();
        if range.start > range.end || range.start > len {
            return Err(StorageError::invalid_range(format!(
                "{}..{} of {}/{} ({} bytes)",
                range.start, range.end, bucket, key, len
            )));
        }
        let end = range.end.min(len);

        file.seek(SeekFrom::Start(range.start)).await?;
        let mut body = vec![0u8; (end - range.start) as usize];
        file.read_exact(&mut body).await?;
        Ok(body)
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<u64>> {
        let path = self.object_path(bucket, key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> StorageResult<ListPage> {
        let root = self.base_dir.join(bucket);
        if !fs::try_exists(&root).await? {
            return Ok(ListPage::default());
        }

        let keys = tokio::task::spawn_blocking({
            let prefix = prefix.to_string();
            move || Self::list_sorted(root, prefix)
        })
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        Ok(page_after(
            bucket,
            keys,
            continuation.as_deref(),
            self.page_size,
        ))
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
