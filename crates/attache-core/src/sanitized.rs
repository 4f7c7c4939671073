//! Sanitized file primitives.
//!
//! [`SanitizedFile`] wraps every raw input an uploader can receive behind one
//! handle: an in-memory buffer, an existing path, or a multipart upload
//! record. It owns filename sanitization and the physical move, copy and
//! delete operations the cache and store layers are built from.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use bytes::Bytes;
use regex::Regex;
use tokio::fs;

use crate::error::{FileError, FileResult};

static COMPOUND_EXTENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)\.([a-z0-9]{1,3}\.[a-z0-9]{1,4})$").expect("pattern compiles")
});
static SIMPLE_EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)\.([^.]+)$").expect("pattern compiles"));

pub const FALLBACK_FILENAME: &str = "unnamed";
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Normalize a user-supplied filename into something safe to place on disk.
///
/// Backslashes become forward slashes (browsers on Windows send full paths),
/// the basename is taken, every character outside `[A-Za-z0-9._+-]` becomes
/// an underscore, all-dot names get an underscore prefix, empty names become
/// `"unnamed"`, and the result is lowercased.
pub fn sanitize(name: &str) -> String {
    let name = name.replace('\\', "/");
    let base = basename(&name);

    let mut safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if !safe.is_empty() && safe.chars().all(|c| c == '.') {
        safe.insert(0, '_');
    }
    if safe.is_empty() {
        safe.push_str(FALLBACK_FILENAME);
    }

    safe.to_lowercase()
}

/// Split a sanitized filename into `(basename, extension)`.
///
/// Compound extensions like `archive.tar.gz` are recognized first (a short
/// dual suffix, up to 3 then 4 characters); otherwise everything after the
/// last dot is the extension. Names with no dot have an empty extension.
pub fn split_extension(filename: &str) -> (&str, &str) {
    for pattern in [&*COMPOUND_EXTENSION, &*SIMPLE_EXTENSION] {
        if let Some(caps) = pattern.captures(filename) {
            if let (Some(base), Some(ext)) = (caps.get(1), caps.get(2)) {
                return (base.as_str(), ext.as_str());
            }
        }
    }
    (filename, "")
}

// Ruby File.basename semantics: trailing slashes are ignored, a string of
// only slashes yields "/".
fn basename(name: &str) -> &str {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() {
        if name.is_empty() {
            ""
        } else {
            "/"
        }
    } else {
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }
}

/// Permission bits applied during physical moves and copies (Unix only).
#[derive(Debug, Clone, Copy, Default)]
pub struct FilePermissions {
    pub file: Option<u32>,
    pub directory: Option<u32>,
}

/// A multipart upload record: the browser-sent filename and content type plus
/// either a spooled tempfile or the raw bytes.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub tempfile: Option<PathBuf>,
    pub data: Option<Bytes>,
}

impl UploadedFile {
    pub fn from_bytes(
        filename: impl Into<String>,
        content_type: Option<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        UploadedFile {
            filename: filename.into(),
            content_type,
            tempfile: None,
            data: Some(data.into()),
        }
    }

    pub fn from_tempfile(
        filename: impl Into<String>,
        content_type: Option<String>,
        tempfile: impl Into<PathBuf>,
    ) -> Self {
        UploadedFile {
            filename: filename.into(),
            content_type,
            tempfile: Some(tempfile.into()),
            data: None,
        }
    }
}

#[derive(Debug, Clone)]
enum Source {
    Empty,
    /// Raw bytes with no name attached.
    Memory(Bytes),
    /// A bare path or string assignment. Untrusted: uploaders refuse these.
    BarePath(PathBuf),
    /// A file this layer placed, or was explicitly told to trust.
    File(PathBuf),
    Upload(UploadedFile),
}

/// A single file moving through the attachment lifecycle.
///
/// Cloning is cheap: byte payloads are reference-counted and path sources are
/// plain buffers. A clone observes the same physical file.
#[derive(Debug, Clone)]
pub struct SanitizedFile {
    source: Source,
    original_filename: Option<String>,
    declared_content_type: Option<String>,
}

impl SanitizedFile {
    pub fn empty() -> Self {
        SanitizedFile {
            source: Source::Empty,
            original_filename: None,
            declared_content_type: None,
        }
    }

    /// Wrap raw bytes. The file has no name until one is assigned by a move.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        SanitizedFile {
            source: Source::Memory(data.into()),
            original_filename: None,
            declared_content_type: None,
        }
    }

    /// Wrap a bare path or string assignment. These are refused by uploaders
    /// as they would let a form post name arbitrary server files.
    pub fn from_bare_path(path: impl Into<PathBuf>) -> Self {
        SanitizedFile {
            source: Source::BarePath(path.into()),
            original_filename: None,
            declared_content_type: None,
        }
    }

    /// Wrap a path this layer controls (a staged cache entry, a stored file).
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        SanitizedFile {
            source: Source::File(path.into()),
            original_filename: None,
            declared_content_type: None,
        }
    }

    pub fn from_upload(upload: UploadedFile) -> Self {
        let declared = upload.content_type.clone();
        SanitizedFile {
            source: Source::Upload(upload),
            original_filename: None,
            declared_content_type: declared,
        }
    }

    /// The name the file arrived with, before sanitization.
    pub fn original_filename(&self) -> Option<String> {
        if let Some(name) = &self.original_filename {
            return Some(name.clone());
        }
        match &self.source {
            Source::Upload(upload) => Some(upload.filename.clone()),
            _ => self
                .path()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .map(|n| n.to_string()),
        }
    }

    /// The sanitized filename, or `None` when the source carries no name.
    pub fn filename(&self) -> Option<String> {
        self.original_filename().map(|name| sanitize(&name))
    }

    /// The sanitized filename without its extension.
    pub fn basename(&self) -> Option<String> {
        self.filename()
            .map(|name| split_extension(&name).0.to_string())
    }

    /// The sanitized filename's extension, empty when there is none.
    pub fn extension(&self) -> Option<String> {
        self.filename()
            .map(|name| split_extension(&name).1.to_string())
    }

    /// The backing path, when the source has one. In-memory sources have no
    /// path until they are moved somewhere.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            Source::BarePath(path) | Source::File(path) => Some(path),
            Source::Upload(upload) => upload.tempfile.as_deref(),
            Source::Empty | Source::Memory(_) => None,
        }
    }

    /// True when the source was assigned as a bare path or string rather than
    /// an upload object or in-memory data.
    pub fn is_bare_path(&self) -> bool {
        matches!(self.source, Source::BarePath(_))
    }

    /// The declared content type, or one inferred from the filename
    /// extension, falling back to `application/octet-stream`.
    pub fn content_type(&self) -> String {
        if let Some(declared) = &self.declared_content_type {
            return declared.clone();
        }
        self.filename()
            .and_then(|name| mime_guess::from_path(&name).first_raw())
            .unwrap_or(FALLBACK_CONTENT_TYPE)
            .to_string()
    }

    /// Byte length. 0 for sources that cannot report a size and for
    /// filesystem sources that do not exist.
    pub async fn size(&self) -> u64 {
        match &self.source {
            Source::Empty => 0,
            Source::Memory(data) => data.len() as u64,
            Source::Upload(upload) => match (&upload.data, &upload.tempfile) {
                (Some(data), _) => data.len() as u64,
                (None, Some(path)) => file_size(path).await,
                (None, None) => 0,
            },
            Source::BarePath(path) | Source::File(path) => file_size(path).await,
        }
    }

    /// True when the backing path exists on disk. In-memory sources never
    /// exist in this sense.
    pub async fn exists(&self) -> bool {
        match self.path() {
            Some(path) => fs::try_exists(path).await.unwrap_or(false),
            None => false,
        }
    }

    /// True when there is nothing to work with: no source at all, or a
    /// zero-size source with no file on disk. A zero-byte file that exists is
    /// not empty.
    pub async fn is_empty(&self) -> bool {
        if matches!(self.source, Source::Empty) {
            return true;
        }
        self.size().await == 0 && !self.exists().await
    }

    /// Read the full content.
    pub async fn read(&self) -> FileResult<Bytes> {
        match &self.source {
            Source::Empty => Err(FileError::NoContent),
            Source::Memory(data) => Ok(data.clone()),
            Source::Upload(upload) => match (&upload.data, &upload.tempfile) {
                (Some(data), _) => Ok(data.clone()),
                (None, Some(path)) => Ok(Bytes::from(fs::read(path).await?)),
                (None, None) => Err(FileError::NoContent),
            },
            Source::BarePath(path) | Source::File(path) => {
                Ok(Bytes::from(fs::read(path).await?))
            }
        }
    }

    /// Move the file to `new_path`, creating parent directories and applying
    /// permission bits. The source location is consumed: a file on disk is
    /// renamed away, an in-memory payload is written out. No-op when empty.
    ///
    /// After the move this handle points at `new_path`. The original filename
    /// is kept when `keep_original_name` is set, otherwise the name derives
    /// from `new_path` from here on.
    pub async fn move_to(
        &mut self,
        new_path: impl AsRef<Path>,
        permissions: FilePermissions,
        keep_original_name: bool,
    ) -> FileResult<()> {
        if self.is_empty().await {
            return Ok(());
        }
        let new_path = new_path.as_ref();
        ensure_parent_dir(new_path, permissions.directory).await?;

        match self.path() {
            Some(current) if current == new_path => {}
            Some(current) if fs::try_exists(current).await.unwrap_or(false) => {
                rename_or_copy(current, new_path).await?;
            }
            _ => {
                fs::write(new_path, self.read().await?).await?;
            }
        }
        apply_mode(new_path, permissions.file).await?;

        tracing::debug!(to = %new_path.display(), "file moved");

        self.original_filename = if keep_original_name {
            self.original_filename()
        } else {
            None
        };
        self.source = Source::File(new_path.to_path_buf());
        Ok(())
    }

    /// Copy the file to `new_path` and return a new handle pointing at the
    /// copy. This handle is untouched. Copying an empty file yields an empty
    /// handle.
    pub async fn copy_to(
        &self,
        new_path: impl AsRef<Path>,
        permissions: FilePermissions,
    ) -> FileResult<SanitizedFile> {
        if self.is_empty().await {
            return Ok(SanitizedFile::empty());
        }
        let new_path = new_path.as_ref();
        ensure_parent_dir(new_path, permissions.directory).await?;

        match self.path() {
            Some(current) if current == new_path => {}
            Some(current) if fs::try_exists(current).await.unwrap_or(false) => {
                fs::copy(current, new_path).await?;
            }
            _ => {
                fs::write(new_path, self.read().await?).await?;
            }
        }
        apply_mode(new_path, permissions.file).await?;

        tracing::debug!(to = %new_path.display(), "file copied");

        let mut copy = SanitizedFile::from_file(new_path);
        copy.declared_content_type = self.declared_content_type.clone();
        Ok(copy)
    }

    /// Delete the backing file if it exists. Missing files are not an error.
    pub async fn delete(&self) -> FileResult<()> {
        if let Some(path) = self.path() {
            if fs::try_exists(path).await.unwrap_or(false) {
                fs::remove_file(path).await?;
                tracing::debug!(path = %path.display(), "file deleted");
            }
        }
        Ok(())
    }
}

async fn file_size(path: &Path) -> u64 {
    match fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    }
}

async fn ensure_parent_dir(path: &Path, mode: Option<u32>) -> FileResult<()> {
    if let Some(parent) = path.parent() {
        if !fs::try_exists(parent).await.unwrap_or(false) {
            fs::create_dir_all(parent).await?;
            apply_mode(parent, mode).await?;
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn apply_mode(path: &Path, mode: Option<u32>) -> FileResult<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn apply_mode(_path: &Path, _mode: Option<u32>) -> FileResult<()> {
    Ok(())
}

// Rename when source and destination share a filesystem, otherwise fall back
// to copy plus delete. The fallback is not atomic.
async fn rename_or_copy(from: &Path, to: &Path) -> FileResult<()> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    fs::copy(from, to).await?;
    fs::remove_file(from).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize("test.jpg"), "test.jpg");
        assert_eq!(sanitize("My Résumé.PDF"), "my_r_sum_.pdf");
        assert_eq!(sanitize("a b/c d.txt"), "c_d.txt");
        assert_eq!(sanitize("spaces and (parens).png"), "spaces_and__parens_.png");
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize("/etc/passwd"), "passwd");
        assert_eq!(sanitize("path/to/file.txt"), "file.txt");
        assert_eq!(sanitize("C:\\fakepath\\photo.jpg"), "photo.jpg");
        assert_eq!(sanitize("trailing/"), "trailing");
    }

    #[test]
    fn test_sanitize_empty_and_dot_names() {
        assert_eq!(sanitize(""), "unnamed");
        assert_eq!(sanitize("."), "_.");
        assert_eq!(sanitize(".."), "_..");
        assert_eq!(sanitize("..."), "_...");
        assert_eq!(sanitize(".hidden"), ".hidden");
    }

    #[test]
    fn test_sanitize_output_alphabet() {
        for name in ["weird\u{202e}name.txt", "a\tb\nc.png", "płik żółty.gif", "☃.txt"] {
            let safe = sanitize(name);
            assert!(
                safe.chars()
                    .all(|c| c.is_ascii_alphanumeric() && !c.is_ascii_uppercase()
                        || matches!(c, '.' | '-' | '+' | '_')),
                "unsafe output {:?} for input {:?}",
                safe,
                name
            );
        }
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("photo.jpg"), ("photo", "jpg"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive", "tar.gz"));
        assert_eq!(split_extension("backup.tar.bz2"), ("backup", "tar.bz2"));
        assert_eq!(split_extension("noext"), ("noext", ""));
        assert_eq!(split_extension("some.file.name.txt"), ("some.file.name", "txt"));
    }

    #[test]
    fn test_filename_from_upload() {
        let file = SanitizedFile::from_upload(UploadedFile::from_bytes(
            "Strange Name!.dat",
            Some("application/x-test".to_string()),
            &b"abc"[..],
        ));
        assert_eq!(file.filename().as_deref(), Some("strange_name_.dat"));
        assert_eq!(file.original_filename().as_deref(), Some("Strange Name!.dat"));
        assert_eq!(file.basename().as_deref(), Some("strange_name_"));
        assert_eq!(file.extension().as_deref(), Some("dat"));
        assert_eq!(file.content_type(), "application/x-test");
    }

    #[test]
    fn test_memory_source_has_no_name_or_path() {
        let file = SanitizedFile::from_bytes(&b"data"[..]);
        assert!(file.filename().is_none());
        assert!(file.path().is_none());
        assert!(!file.is_bare_path());
    }

    #[test]
    fn test_content_type_inference() {
        let file = SanitizedFile::from_upload(UploadedFile::from_bytes(
            "photo.jpg",
            None,
            &b"fake"[..],
        ));
        assert_eq!(file.content_type(), "image/jpeg");

        let unknown = SanitizedFile::from_upload(UploadedFile::from_bytes(
            "mystery.zzz9",
            None,
            &b"fake"[..],
        ));
        assert_eq!(unknown.content_type(), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_empty_checks() {
        assert!(SanitizedFile::empty().is_empty().await);
        assert!(SanitizedFile::from_bytes(&b""[..]).is_empty().await);
        assert!(!SanitizedFile::from_bytes(&b"x"[..]).is_empty().await);

        let dir = tempdir().expect("tempdir");
        let zero = dir.path().join("zero.bin");
        std::fs::write(&zero, b"").expect("write");
        let file = SanitizedFile::from_file(&zero);
        assert_eq!(file.size().await, 0);
        assert!(!file.is_empty().await, "existing zero-byte file is not empty");
    }

    #[tokio::test]
    async fn test_size_of_missing_file_is_zero() {
        let file = SanitizedFile::from_file("/definitely/not/here.bin");
        assert_eq!(file.size().await, 0);
        assert!(!file.exists().await);
    }

    #[tokio::test]
    async fn test_move_to_consumes_source() {
        let dir = tempdir().expect("tempdir");
        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"payload").expect("write");

        let mut file = SanitizedFile::from_file(&src);
        let dest = dir.path().join("nested/dest.txt");
        file.move_to(&dest, FilePermissions::default(), false)
            .await
            .expect("move");

        assert!(!std::path::Path::new(&src).exists());
        assert!(dest.exists());
        assert_eq!(file.path(), Some(dest.as_path()));
        assert_eq!(file.filename().as_deref(), Some("dest.txt"));
        assert_eq!(file.read().await.expect("read").as_ref(), b"payload");
    }

    #[tokio::test]
    async fn test_move_to_writes_out_memory_sources() {
        let dir = tempdir().expect("tempdir");
        let dest = dir.path().join("out.bin");

        let mut file = SanitizedFile::from_bytes(&b"in memory"[..]);
        file.move_to(&dest, FilePermissions::default(), false)
            .await
            .expect("move");

        assert_eq!(std::fs::read(&dest).expect("read"), b"in memory");
        assert_eq!(file.size().await, 9);
    }

    #[tokio::test]
    async fn test_move_to_keeps_original_name_when_asked() {
        let dir = tempdir().expect("tempdir");
        let file = UploadedFile::from_bytes("Original Name.txt", None, &b"x"[..]);
        let mut file = SanitizedFile::from_upload(file);

        let dest = dir.path().join("renamed.txt");
        file.move_to(&dest, FilePermissions::default(), true)
            .await
            .expect("move");

        assert_eq!(file.original_filename().as_deref(), Some("Original Name.txt"));
        assert_eq!(file.filename().as_deref(), Some("original_name.txt"));
    }

    #[tokio::test]
    async fn test_copy_to_leaves_original_in_place() {
        let dir = tempdir().expect("tempdir");
        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"copied content").expect("write");

        let file = SanitizedFile::from_file(&src);
        let copy = file
            .copy_to(dir.path().join("copy.txt"), FilePermissions::default())
            .await
            .expect("copy");

        assert!(src.exists());
        assert!(file.exists().await);
        assert_eq!(copy.read().await.expect("read").as_ref(), b"copied content");
        assert_eq!(file.read().await.expect("read"), copy.read().await.expect("read"));
    }

    #[tokio::test]
    async fn test_copy_of_empty_is_empty() {
        let copy = SanitizedFile::empty()
            .copy_to("/nowhere/at/all", FilePermissions::default())
            .await
            .expect("copy");
        assert!(copy.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("doomed.txt");
        std::fs::write(&path, b"x").expect("write");

        let file = SanitizedFile::from_file(&path);
        file.delete().await.expect("delete");
        assert!(!path.exists());
        file.delete().await.expect("second delete is a no-op");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_move_applies_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("tempdir");
        let mut file = SanitizedFile::from_bytes(&b"mode"[..]);
        let dest = dir.path().join("mode.bin");
        let permissions = FilePermissions {
            file: Some(0o640),
            directory: None,
        };
        file.move_to(&dest, permissions, false).await.expect("move");

        let mode = std::fs::metadata(&dest).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }
}
