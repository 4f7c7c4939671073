//! Attache Core Library
//!
//! This crate provides the primitives shared by the uploader and storage
//! crates: attachment settings, filename sanitization, the `SanitizedFile`
//! handle every raw input is wrapped in, and the host-record contract the
//! mount layer persists identifiers through.

pub mod config;
pub mod error;
pub mod host;
pub mod sanitized;

// Re-export commonly used types
pub use config::Settings;
pub use error::{FileError, FileResult};
pub use host::{HostRecord, MemoryRecord};
pub use sanitized::{
    sanitize, split_extension, FilePermissions, SanitizedFile, UploadedFile,
    FALLBACK_CONTENT_TYPE, FALLBACK_FILENAME,
};
