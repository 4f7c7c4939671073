//! Storage abstraction traits
//!
//! This module defines the Storage trait every backend implements and the
//! StoredFile handle backends return for durable files.

use async_trait::async_trait;
use attache_core::{FileError, FilePermissions, SanitizedFile};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Store failed: {0}")]
    StoreFailed(String),

    #[error("Retrieve failed: {0}")]
    RetrieveFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<FileError> for StorageError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::Io(io) => StorageError::IoError(io),
            FileError::NoContent => StorageError::StoreFailed("file has no content".to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Path and policy context a backend needs to place or locate a file.
///
/// The uploader resolves directories against its configured root (including
/// any version segment) before calling into a backend, so backends only ever
/// join a filename onto `store_dir`.
#[derive(Debug, Clone)]
pub struct StoreContext {
    /// Fully resolved directory for durable files.
    pub store_dir: PathBuf,
    /// Base path stripped from file paths when computing URLs.
    pub public_root: PathBuf,
    /// Permission bits for physical placement.
    pub permissions: FilePermissions,
    /// Whether the input file is staged and may be consumed by a move. When
    /// false the backend must copy and leave the input in place.
    pub move_source: bool,
}

/// Storage abstraction trait
///
/// All storage backends (local filesystem, object stores, remote mounts)
/// implement this trait. The uploader resolves a backend once from the
/// registry at construction and never couples to implementation details.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Durably persist `file` as `filename` inside the context's store
    /// directory and return a handle to the stored copy.
    ///
    /// Storing to the same destination twice overwrites; retries are safe.
    async fn store(
        &self,
        ctx: &StoreContext,
        filename: &str,
        file: SanitizedFile,
    ) -> StorageResult<Box<dyn StoredFile>>;

    /// Return a handle for a previously stored identifier without eagerly
    /// fetching bytes.
    async fn retrieve(
        &self,
        ctx: &StoreContext,
        identifier: &str,
    ) -> StorageResult<Box<dyn StoredFile>>;

    /// The name this backend is registered under.
    fn backend_name(&self) -> &'static str;
}

/// A durable file handle returned by a storage backend.
///
/// Reads and existence checks are lazy; constructing a handle performs no
/// I/O.
#[async_trait]
pub trait StoredFile: Send + Sync {
    /// The identifier the file is addressed by.
    fn identifier(&self) -> &str;

    /// Filesystem path, for backends that have one.
    fn path(&self) -> Option<&Path>;

    /// Public URL, when the backend can compute one.
    fn url(&self) -> Option<String>;

    /// Content type, inferred from the stored name when not recorded.
    fn content_type(&self) -> String;

    /// Size in bytes; 0 when the file is missing.
    async fn size(&self) -> u64;

    async fn exists(&self) -> bool;

    /// Read the full content.
    async fn read(&self) -> StorageResult<Bytes>;

    /// Delete the stored file. Missing files are not an error.
    async fn delete(&self) -> StorageResult<()>;
}
