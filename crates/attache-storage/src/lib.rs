//! Attache Storage Library
//!
//! This crate provides the storage abstraction for the attachment layer: the
//! Storage trait backends implement, the lazy StoredFile handle they return,
//! and the registry uploaders resolve backends from.
//!
//! Backends receive a fully resolved [`StoreContext`](traits::StoreContext)
//! and only ever join a single sanitized filename onto its store directory;
//! path layout (roots, version segments, cache ids) is the uploader's
//! business.

#[cfg(feature = "storage-file")]
pub mod file;
pub mod registry;
pub mod traits;

// Re-export commonly used types
#[cfg(feature = "storage-file")]
pub use file::FileStore;
pub use registry::{StorageFactory, StorageRegistry};
pub use traits::{Storage, StorageError, StorageResult, StoreContext, StoredFile};
