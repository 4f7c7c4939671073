//! Error types for the file primitives.
//!
//! Higher layers (the uploader, the storage backends) define their own error
//! enums and convert from `FileError` where they touch the primitives.

use std::io;

/// Errors raised by [`SanitizedFile`](crate::SanitizedFile) operations.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("file has no readable content")]
    NoContent,
}

pub type FileResult<T> = Result<T, FileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: FileError = io_err.into();
        assert!(matches!(err, FileError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_no_content_display() {
        assert_eq!(
            FileError::NoContent.to_string(),
            "file has no readable content"
        );
    }
}
