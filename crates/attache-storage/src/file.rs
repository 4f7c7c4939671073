//! Local filesystem storage backend.
//!
//! The reference backend: files are placed under the context's store
//! directory by a physical move (staged input) or copy (direct input), and
//! retrieval wraps a path without touching the filesystem until the handle is
//! queried.

use crate::traits::{Storage, StorageError, StorageResult, StoreContext, StoredFile};
use async_trait::async_trait;
use attache_core::SanitizedFile;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Local filesystem storage implementation
#[derive(Debug, Clone, Default)]
pub struct FileStore;

impl FileStore {
    pub fn new() -> Self {
        FileStore
    }

    /// Join a filename onto the store directory with traversal validation.
    ///
    /// Filenames here are single path components (sanitized identifiers);
    /// anything that could escape the store directory is rejected.
    fn resolve(&self, ctx: &StoreContext, filename: &str) -> StorageResult<PathBuf> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(StorageError::InvalidPath(filename.to_string()));
        }
        Ok(ctx.store_dir.join(filename))
    }
}

#[async_trait]
impl Storage for FileStore {
    async fn store(
        &self,
        ctx: &StoreContext,
        filename: &str,
        mut file: SanitizedFile,
    ) -> StorageResult<Box<dyn StoredFile>> {
        let path = self.resolve(ctx, filename)?;
        let start = std::time::Instant::now();

        if ctx.move_source {
            file.move_to(&path, ctx.permissions, false).await?;
        } else {
            file.copy_to(&path, ctx.permissions).await?;
        }

        let size = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);

        tracing::info!(
            path = %path.display(),
            identifier = %filename,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "File store successful"
        );

        Ok(Box::new(FileStoredFile {
            identifier: filename.to_string(),
            path,
            public_root: ctx.public_root.clone(),
        }))
    }

    async fn retrieve(
        &self,
        ctx: &StoreContext,
        identifier: &str,
    ) -> StorageResult<Box<dyn StoredFile>> {
        let path = self.resolve(ctx, identifier)?;

        Ok(Box::new(FileStoredFile {
            identifier: identifier.to_string(),
            path,
            public_root: ctx.public_root.clone(),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

/// A file stored on the local filesystem.
pub struct FileStoredFile {
    identifier: String,
    path: PathBuf,
    public_root: PathBuf,
}

#[async_trait]
impl StoredFile for FileStoredFile {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn url(&self) -> Option<String> {
        let relative = self.path.strip_prefix(&self.public_root).ok()?;
        Some(format!("/{}", relative.display()))
    }

    fn content_type(&self) -> String {
        SanitizedFile::from_file(&self.path).content_type()
    }

    async fn size(&self) -> u64 {
        fs::metadata(&self.path).await.map(|m| m.len()).unwrap_or(0)
    }

    async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    async fn read(&self) -> StorageResult<Bytes> {
        if !self.exists().await {
            return Err(StorageError::NotFound(self.identifier.clone()));
        }
        let start = std::time::Instant::now();
        let data = fs::read(&self.path).await.map_err(|e| {
            StorageError::RetrieveFailed(format!(
                "Failed to read file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        tracing::info!(
            path = %self.path.display(),
            identifier = %self.identifier,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "File retrieve successful"
        );

        Ok(Bytes::from(data))
    }

    async fn delete(&self) -> StorageResult<()> {
        if !self.exists().await {
            return Ok(());
        }
        fs::remove_file(&self.path).await.map_err(|e| {
            StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        tracing::info!(
            path = %self.path.display(),
            identifier = %self.identifier,
            "File delete successful"
        );

        Ok(())
    }
}
