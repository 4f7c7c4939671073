//! File attachment handling for host applications.
//!
//! Uploads arrive as [`SanitizedFile`]s, get staged in a cache directory
//! under a generated [`CacheId`], optionally run through a processing
//! pipeline, and are then handed to a storage backend for durable keeping.
//! Derived versions (thumbnails and the like) mirror the primary file through
//! every transition. The mount layer ties uploaders to string columns on a
//! host record.
//!
//! Most hosts depend on this crate alone; the core primitives and the storage
//! abstraction are re-exported here.

pub mod cache;
pub mod definition;
pub mod error;
pub mod mount;
pub mod uploader;

// Re-export commonly used types
pub use attache_core::{
    sanitize, split_extension, FileError, FilePermissions, FileResult, HostRecord, MemoryRecord,
    SanitizedFile, Settings, UploadedFile, FALLBACK_CONTENT_TYPE, FALLBACK_FILENAME,
};
pub use attache_storage::{
    Storage, StorageError, StorageRegistry, StorageResult, StoreContext, StoredFile,
};
pub use cache::{clean_cache, CacheId};
pub use definition::{process_fn, Definition, Process, Processor, VersionSpec};
pub use error::{UploadError, UploadResult};
pub use mount::{MountTable, Mounter};
pub use uploader::Uploader;
