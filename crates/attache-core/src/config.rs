//! Configuration module
//!
//! This module provides the attachment settings shared by every uploader
//! instance. Hosts build a [`Settings`] value once, from their own config file
//! or from the environment, and hand it to each uploader at construction; it
//! is never mutated after uploaders exist.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::sanitized::FilePermissions;

const DEFAULT_STORAGE: &str = "file";
const DEFAULT_STORE_DIR: &str = "uploads";
const DEFAULT_CACHE_DIR: &str = "uploads/tmp";

/// Attachment configuration.
///
/// `store_dir` and `cache_dir` may be absolute or relative to `root`. A
/// `{mounted_as}` placeholder in either expands to the mounted column name
/// when the uploader is mounted on a host record.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Name of the storage backend to resolve from the registry.
    pub storage: String,
    /// When false, `store` bypasses the cache directory and persists the
    /// input directly. Processing callbacks only run for cached files.
    pub use_cache: bool,
    /// Directory for durable files.
    pub store_dir: String,
    /// Directory for staged files, keyed by cache id underneath.
    pub cache_dir: String,
    /// File mode bits applied after moves and copies (Unix only).
    pub permissions: Option<u32>,
    /// Mode bits applied to parent directories this layer creates (Unix only).
    pub directory_permissions: Option<u32>,
    /// Base path against which relative store and cache directories resolve.
    pub root: PathBuf,
    /// Base path stripped from file paths when computing URLs; defaults to
    /// `root` when unset.
    pub public: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            storage: DEFAULT_STORAGE.to_string(),
            use_cache: true,
            store_dir: DEFAULT_STORE_DIR.to_string(),
            cache_dir: DEFAULT_CACHE_DIR.to_string(),
            permissions: None,
            directory_permissions: None,
            root: PathBuf::from("."),
            public: None,
        }
    }
}

impl Settings {
    /// Load settings from `ATTACHE_`-prefixed environment variables, falling
    /// back to the defaults for anything unset.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let defaults = Settings::default();

        let use_cache = env::var("ATTACHE_USE_CACHE")
            .map(|v| {
                let v = v.trim().to_lowercase();
                v != "false" && v != "0" && v != "off"
            })
            .unwrap_or(true);

        Ok(Settings {
            storage: env::var("ATTACHE_STORAGE").unwrap_or(defaults.storage),
            use_cache,
            store_dir: env::var("ATTACHE_STORE_DIR").unwrap_or(defaults.store_dir),
            cache_dir: env::var("ATTACHE_CACHE_DIR").unwrap_or(defaults.cache_dir),
            permissions: parse_mode("ATTACHE_PERMISSIONS")?,
            directory_permissions: parse_mode("ATTACHE_DIRECTORY_PERMISSIONS")?,
            root: env::var("ATTACHE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.root),
            public: env::var("ATTACHE_PUBLIC").ok().map(PathBuf::from),
        })
    }

    /// The base path URLs are computed against.
    pub fn public_root(&self) -> &Path {
        self.public.as_deref().unwrap_or(&self.root)
    }

    /// Resolve a store or cache directory against `root` unless absolute.
    pub fn resolve_dir(&self, dir: impl AsRef<Path>) -> PathBuf {
        let dir = dir.as_ref();
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.root.join(dir)
        }
    }

    /// The permission bits handed to file moves and copies.
    pub fn file_permissions(&self) -> FilePermissions {
        FilePermissions {
            file: self.permissions,
            directory: self.directory_permissions,
        }
    }
}

fn parse_mode(var: &str) -> Result<Option<u32>, anyhow::Error> {
    match env::var(var) {
        Ok(v) => {
            let digits = v.trim().trim_start_matches("0o");
            let mode = u32::from_str_radix(digits, 8)
                .map_err(|_| anyhow::anyhow!("{} must be an octal file mode, got {:?}", var, v))?;
            Ok(Some(mode))
        }
        Err(_) => Ok(None),
    }
}
