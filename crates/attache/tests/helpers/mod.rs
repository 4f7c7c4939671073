//! Test helpers: settings, uploads and processors for integration tests.
//!
//! Run from workspace root: `cargo test -p attache --test lifecycle_test` or
//! `cargo test -p attache`.

#![allow(dead_code)]

use std::path::Path;

use attache::{process_fn, Processor, SanitizedFile, Settings, StorageRegistry, UploadedFile};
use tempfile::TempDir;

/// A throwaway directory tree with default settings rooted inside it.
pub struct TestEnv {
    pub root: TempDir,
    pub settings: Settings,
    pub registry: StorageRegistry,
}

impl TestEnv {
    pub fn path(&self) -> &Path {
        self.root.path()
    }
}

pub fn setup() -> TestEnv {
    let root = TempDir::new().expect("tempdir");
    let settings = Settings {
        root: root.path().to_path_buf(),
        ..Settings::default()
    };
    TestEnv {
        root,
        settings,
        registry: StorageRegistry::default(),
    }
}

/// A multipart-style upload carried in memory.
pub fn upload(filename: &str, content: &'static [u8]) -> SanitizedFile {
    SanitizedFile::from_upload(UploadedFile::from_bytes(filename, None, content))
}

/// Rewrites the staged file to its first `limit` bytes. Stands in for real
/// transformation steps, which work the same way: edit the file in place.
pub fn truncate_processor(limit: usize) -> Processor {
    process_fn("truncate", move |file| {
        let path = file
            .path()
            .ok_or_else(|| anyhow::anyhow!("no staged file to truncate"))?;
        let content = std::fs::read(path)?;
        let cut = content.len().min(limit);
        std::fs::write(path, &content[..cut])?;
        Ok(())
    })
}
