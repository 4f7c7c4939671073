//! Error types for the uploader lifecycle.
//!
//! Validation errors are raised at the point of invalid input (assigning a
//! cache id or identifier), never later at use. Backend errors pass through
//! transparently; the uploader only ever swallows `InvalidParameter`, and
//! only in the lenient `try_` methods.

use attache_core::FileError;
use attache_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// A bare path or string was assigned as though it were an upload. These
    /// are refused: a form post must not get to name server-side files.
    #[error("Form input is not a multipart upload: {0}")]
    NotMultipart(String),

    #[error("Invalid {kind}: {value:?}")]
    InvalidParameter { kind: &'static str, value: String },

    #[error("Processing step {processor:?} failed")]
    Processing {
        processor: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("No file to operate on")]
    NoFile,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    File(#[from] FileError),
}

impl UploadError {
    pub(crate) fn invalid(kind: &'static str, value: impl Into<String>) -> Self {
        UploadError::InvalidParameter {
            kind,
            value: value.into(),
        }
    }
}

pub type UploadResult<T> = Result<T, UploadError>;
