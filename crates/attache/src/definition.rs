//! Uploader definitions.
//!
//! A [`Definition`] is the declarative template an uploader is built from:
//! directory overrides, the processing pipeline, and the version tree. One
//! definition typically exists per attachment kind (avatars, documents) and
//! is bound to host columns through the mount table.

use std::sync::Arc;

use async_trait::async_trait;
use attache_core::SanitizedFile;

/// A processing step applied to a freshly cached file.
///
/// Steps read and rewrite the file in place (the handle points at the staged
/// cache location when they run). Failures abort the remaining pipeline for
/// that cache call.
#[async_trait]
pub trait Process: Send + Sync {
    async fn apply(&self, file: &mut SanitizedFile) -> anyhow::Result<()>;
}

/// A named processing step.
#[derive(Clone)]
pub struct Processor {
    name: String,
    op: Arc<dyn Process>,
}

impl Processor {
    pub fn new(name: impl Into<String>, op: Arc<dyn Process>) -> Self {
        Processor {
            name: name.into(),
            op,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn apply(&self, file: &mut SanitizedFile) -> anyhow::Result<()> {
        self.op.apply(file).await
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor").field("name", &self.name).finish()
    }
}

/// Build a processor from a synchronous closure.
///
/// Steps needing to await something implement [`Process`] on their own type
/// instead.
pub fn process_fn<F>(name: impl Into<String>, f: F) -> Processor
where
    F: Fn(&mut SanitizedFile) -> anyhow::Result<()> + Send + Sync + 'static,
{
    struct FnProcess<F>(F);

    #[async_trait]
    impl<F> Process for FnProcess<F>
    where
        F: Fn(&mut SanitizedFile) -> anyhow::Result<()> + Send + Sync,
    {
        async fn apply(&self, file: &mut SanitizedFile) -> anyhow::Result<()> {
            (self.0)(file)
        }
    }

    Processor::new(name, Arc::new(FnProcess(f)))
}

///// A derived rendition of the primary file: a name, optional directory
/// overrides, its own processing pipeline, and nested versions.
///
/// Without a directory override a version's files live in a subdirectory
/// named after it, under its parent's directory. An override replaces that
/// whole computed directory for the version's subtree.
#[derive(Debug, Clone)]
pub struct VersionSpec {
    pub name: String,
    pub store_dir: Option<String>,
    pub cache_dir: Option<String>,
    pub processors: Vec<Processor>,
    pub versions: Vec<VersionSpec>,
}

impl VersionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        VersionSpec {
            name: name.into(),
            store_dir: None,
            cache_dir: None,
            processors: Vec::new(),
            versions: Vec::new(),
        }
    }

    pub fn store_dir(mut self, dir: impl Into<String>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<String>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn processor(mut self, processor: Processor) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn version(mut self, version: VersionSpec) -> Self {
        self.versions.push(version);
        self
    }
}

/// The template an uploader is built from.
///
/// Unset directories fall back to the attachment settings; `storage` selects
/// a backend from the registry by name, overriding the settings' default.
#[derive(Debug, Clone, Default)]
pub struct Definition {
    pub store_dir: Option<String>,
    pub cache_dir: Option<String>,
    pub storage: Option<String>,
    pub processors: Vec<Processor>,
    pub versions: Vec<VersionSpec>,
}

impl Definition {
    pub fn new() -> Self {
        Definition::default()
    }

    pub fn store_dir(mut self, dir: impl Into<String>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<String>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn storage(mut self, backend: impl Into<String>) -> Self {
        self.storage = Some(backend.into());
        self
    }

    pub fn processor(mut self, processor: Processor) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn version(mut self, version: VersionSpec) -> Self {
        self.versions.push(version);
        self
    }
}
