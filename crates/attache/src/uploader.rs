//! The uploader state machine.
//!
//! An uploader tracks one logical file through three states: empty, cached
//! (staged under a cache id, not yet durable) and stored (handed to the
//! storage backend). Strict methods (`cache`, `store`, `retrieve_from_cache`,
//! `retrieve_from_store`) fail loudly; their `try_` counterparts are no-ops
//! when a file is already present and swallow invalid-parameter errors, which
//! is what read paths fed from persisted data want.
//!
//! Versions are child uploaders mirroring every transition of their parent in
//! declaration order. All work inside a call is sequential; callers serialize
//! access to an uploader themselves.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, LazyLock};

use attache_core::{SanitizedFile, Settings, FALLBACK_FILENAME};
use attache_storage::{Storage, StorageRegistry, StoreContext, StoredFile};
use bytes::Bytes;
use regex::Regex;

use crate::cache::CacheId;
use crate::definition::{Definition, Processor, VersionSpec};
use crate::error::{UploadError, UploadResult};

static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.\-+_]+$").expect("pattern compiles"));

enum FileState {
    Empty,
    Cached(SanitizedFile),
    Stored(Box<dyn StoredFile>),
}

impl FileState {
    fn label(&self) -> &'static str {
        match self {
            FileState::Empty => "empty",
            FileState::Cached(_) => "cached",
            FileState::Stored(_) => "stored",
        }
    }
}

/// One mounted attachment: the primary uploader or a named version.
pub struct Uploader {
    settings: Settings,
    storage: Arc<dyn Storage>,
    mounted_as: Option<String>,
    version_name: Option<String>,
    store_base: String,
    store_segments: Vec<String>,
    cache_base: String,
    cache_segments: Vec<String>,
    processors: Vec<Processor>,
    versions: Vec<Uploader>,
    state: FileState,
    identifier: Option<String>,
    cache_id: Option<CacheId>,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("mounted_as", &self.mounted_as)
            .field("version", &self.version_name)
            .field("state", &self.state.label())
            .field("identifier", &self.identifier)
            .field("cache_id", &self.cache_id)
            .field("versions", &self.versions.len())
            .finish()
    }
}

impl Uploader {
    /// Build an unmounted uploader. The storage backend is resolved from the
    /// registry here, once; construction fails if the selected backend is
    /// unknown.
    pub fn new(
        definition: &Definition,
        settings: Settings,
        registry: &StorageRegistry,
    ) -> UploadResult<Self> {
        Self::build(definition, settings, registry, None)
    }

    /// Build an uploader serving one mounted column. The column name feeds
    /// `{mounted_as}` expansion in directory templates.
    pub fn mounted(
        definition: &Definition,
        settings: Settings,
        registry: &StorageRegistry,
        column: &str,
    ) -> UploadResult<Self> {
        Self::build(definition, settings, registry, Some(column.to_string()))
    }

    fn build(
        definition: &Definition,
        settings: Settings,
        registry: &StorageRegistry,
        mounted_as: Option<String>,
    ) -> UploadResult<Self> {
        let backend = definition.storage.as_deref().unwrap_or(&settings.storage);
        let storage = registry.resolve_name(backend, &settings)?;

        let store_base = definition
            .store_dir
            .clone()
            .unwrap_or_else(|| settings.store_dir.clone());
        let cache_base = definition
            .cache_dir
            .clone()
            .unwrap_or_else(|| settings.cache_dir.clone());

        let mut uploader = Uploader {
            settings,
            storage,
            mounted_as,
            version_name: None,
            store_base,
            store_segments: Vec::new(),
            cache_base,
            cache_segments: Vec::new(),
            processors: definition.processors.clone(),
            versions: Vec::new(),
            state: FileState::Empty,
            identifier: None,
            cache_id: None,
        };
        uploader.versions = definition
            .versions
            .iter()
            .map(|spec| uploader.build_version(spec))
            .collect();
        Ok(uploader)
    }

    // A version inherits its parent's directories with its own name appended
    // as a segment; a directory override replaces that whole computation for
    // the version's subtree.
    fn build_version(&self, spec: &VersionSpec) -> Uploader {
        let (store_base, store_segments) = match &spec.store_dir {
            Some(dir) => (dir.clone(), Vec::new()),
            None => {
                let mut segments = self.store_segments.clone();
                segments.push(spec.name.clone());
                (self.store_base.clone(), segments)
            }
        };
        let (cache_base, cache_segments) = match &spec.cache_dir {
            Some(dir) => (dir.clone(), Vec::new()),
            None => {
                let mut segments = self.cache_segments.clone();
                segments.push(spec.name.clone());
                (self.cache_base.clone(), segments)
            }
        };

        let mut version = Uploader {
            settings: self.settings.clone(),
            storage: Arc::clone(&self.storage),
            mounted_as: self.mounted_as.clone(),
            version_name: Some(spec.name.clone()),
            store_base,
            store_segments,
            cache_base,
            cache_segments,
            processors: spec.processors.clone(),
            versions: Vec::new(),
            state: FileState::Empty,
            identifier: None,
            cache_id: None,
        };
        version.versions = spec
            .versions
            .iter()
            .map(|nested| version.build_version(nested))
            .collect();
        version
    }

    // ---- accessors -------------------------------------------------------

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn cache_id(&self) -> Option<&CacheId> {
        self.cache_id.as_ref()
    }

    /// The `<cache_id>/<identifier>` token a host round-trips through forms
    /// to re-display a pending upload. Present only while cached.
    pub fn cache_name(&self) -> Option<String> {
        Some(format!(
            "{}/{}",
            self.cache_id.as_ref()?,
            self.identifier.as_ref()?
        ))
    }

    pub fn mounted_as(&self) -> Option<&str> {
        self.mounted_as.as_deref()
    }

    pub fn version_name(&self) -> Option<&str> {
        self.version_name.as_deref()
    }

    pub fn versions(&self) -> &[Uploader] {
        &self.versions
    }

    /// Look up a direct child version by name.
    pub fn version(&self, name: &str) -> Option<&Uploader> {
        self.versions
            .iter()
            .find(|v| v.version_name.as_deref() == Some(name))
    }

    pub fn has_file(&self) -> bool {
        !matches!(self.state, FileState::Empty)
    }

    pub fn is_cached(&self) -> bool {
        matches!(self.state, FileState::Cached(_))
    }

    pub fn is_stored(&self) -> bool {
        matches!(self.state, FileState::Stored(_))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ---- path computation ------------------------------------------------

    /// The resolved directory durable files land in, version segments
    /// included.
    pub fn store_dir(&self) -> PathBuf {
        let mut dir = self.expand_dir(&self.store_base);
        for segment in &self.store_segments {
            dir.push(segment);
        }
        dir
    }

    /// The resolved cache root. Entries live at
    /// `cache_dir/<cache_id>/<version segments>/<filename>`.
    pub fn cache_dir(&self) -> PathBuf {
        self.expand_dir(&self.cache_base)
    }

    /// Where the current file would be stored, once an identifier exists.
    pub fn store_path(&self) -> Option<PathBuf> {
        Some(self.store_dir().join(self.identifier.as_ref()?))
    }

    /// Where the current file is staged, while cached.
    pub fn cache_path(&self) -> Option<PathBuf> {
        let entry = self.cache_entry_dir(self.cache_id.as_ref()?);
        Some(entry.join(self.identifier.as_ref()?))
    }

    /// The path of whatever the uploader currently points at.
    pub fn current_path(&self) -> Option<PathBuf> {
        match &self.state {
            FileState::Empty => None,
            FileState::Cached(file) => file.path().map(Path::to_path_buf),
            FileState::Stored(stored) => stored.path().map(Path::to_path_buf),
        }
    }

    /// The backend-reported URL, or the current path relative to the public
    /// root.
    pub fn url(&self) -> Option<String> {
        match &self.state {
            FileState::Empty => None,
            FileState::Cached(file) => file.path().and_then(|p| self.relativize(p)),
            FileState::Stored(stored) => stored
                .url()
                .or_else(|| stored.path().and_then(|p| self.relativize(p))),
        }
    }

    /// Read the current file's content.
    pub async fn read(&self) -> UploadResult<Bytes> {
        match &self.state {
            FileState::Empty => Err(UploadError::NoFile),
            FileState::Cached(file) => Ok(file.read().await?),
            FileState::Stored(stored) => Ok(stored.read().await?),
        }
    }

    fn expand_dir(&self, template: &str) -> PathBuf {
        let column = self.mounted_as.as_deref().unwrap_or_default();
        let expanded = template.replace("{mounted_as}", column);
        // components() drops the empty segment a blank expansion leaves
        let cleaned: PathBuf = Path::new(&expanded).components().collect();
        self.settings.resolve_dir(cleaned)
    }

    fn cache_entry_dir(&self, cache_id: &CacheId) -> PathBuf {
        let mut dir = self.cache_dir();
        dir.push(cache_id.as_str());
        for segment in &self.cache_segments {
            dir.push(segment);
        }
        dir
    }

    fn relativize(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(self.settings.public_root()).ok()?;
        Some(format!("/{}", relative.display()))
    }

    fn store_context(&self, move_source: bool) -> StoreContext {
        StoreContext {
            store_dir: self.store_dir(),
            public_root: self.settings.public_root().to_path_buf(),
            permissions: self.settings.file_permissions(),
            move_source,
        }
    }

    fn set_identifier(&mut self, identifier: &str) -> UploadResult<()> {
        if !IDENTIFIER_PATTERN.is_match(identifier) {
            return Err(UploadError::invalid("identifier", identifier));
        }
        self.identifier = Some(identifier.to_string());
        Ok(())
    }

    // ---- transitions -----------------------------------------------------

    /// Stage `file` under a cache id: move it into the cache directory, run
    /// the processing pipeline, and mirror the whole operation into every
    /// version (versions copy the staged file, they never consume it).
    ///
    /// Fails with [`UploadError::NotMultipart`] for bare path assignments,
    /// before anything is touched. A processing failure aborts the remaining
    /// pipeline and version propagation but leaves the file staged; the
    /// uploader still reports it as cached.
    pub async fn cache(&mut self, file: SanitizedFile) -> UploadResult<CacheId> {
        let cache_id = match &self.cache_id {
            Some(existing) => existing.clone(),
            None => CacheId::generate(),
        };
        self.cache_primary(file, &cache_id).await?;
        Ok(cache_id)
    }

    async fn cache_primary(&mut self, mut file: SanitizedFile, cache_id: &CacheId) -> UploadResult<()> {
        if file.is_bare_path() {
            let shown = file
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            return Err(UploadError::NotMultipart(shown));
        }

        let identifier = file
            .filename()
            .unwrap_or_else(|| FALLBACK_FILENAME.to_string());
        self.set_identifier(&identifier)?;
        self.cache_id = Some(cache_id.clone());

        let destination = self.cache_entry_dir(cache_id).join(&identifier);
        file.move_to(&destination, self.settings.file_permissions(), true)
            .await?;

        tracing::debug!(
            cache_id = %cache_id,
            identifier = %identifier,
            path = %destination.display(),
            "file cached"
        );

        self.state = FileState::Cached(file);
        self.run_processors().await?;
        self.propagate_cache(cache_id).await
    }

    async fn run_processors(&mut self) -> UploadResult<()> {
        let FileState::Cached(file) = &mut self.state else {
            return Ok(());
        };
        for processor in &self.processors {
            processor
                .apply(file)
                .await
                .map_err(|source| UploadError::Processing {
                    processor: processor.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    fn propagate_cache<'a>(
        &'a mut self,
        cache_id: &'a CacheId,
    ) -> Pin<Box<dyn Future<Output = UploadResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let FileState::Cached(file) = &self.state else {
                return Ok(());
            };
            for version in &mut self.versions {
                version.cache_version(file, cache_id).await?;
            }
            Ok(())
        })
    }

    // Versions copy their parent's staged (and already processed) file, then
    // process their own copy and recurse.
    async fn cache_version(
        &mut self,
        parent_file: &SanitizedFile,
        cache_id: &CacheId,
    ) -> UploadResult<()> {
        let identifier = parent_file
            .filename()
            .unwrap_or_else(|| FALLBACK_FILENAME.to_string());
        self.set_identifier(&identifier)?;
        self.cache_id = Some(cache_id.clone());

        let destination = self.cache_entry_dir(cache_id).join(&identifier);
        let copy = parent_file
            .copy_to(&destination, self.settings.file_permissions())
            .await?;

        self.state = FileState::Cached(copy);
        self.run_processors().await?;
        self.propagate_cache(cache_id).await
    }

    /// Rehydrate from a `<cache_id>/<identifier>` token without touching the
    /// filesystem. Both components are validated; versions recompute their
    /// own staged paths from the same token.
    pub fn retrieve_from_cache(&mut self, cache_name: &str) -> UploadResult<()> {
        let (cache_id, identifier) = cache_name
            .split_once('/')
            .ok_or_else(|| UploadError::invalid("cache name", cache_name))?;
        let cache_id: CacheId = cache_id.parse()?;
        self.hydrate_cached(&cache_id, identifier)
    }

    fn hydrate_cached(&mut self, cache_id: &CacheId, identifier: &str) -> UploadResult<()> {
        self.set_identifier(identifier)?;
        self.cache_id = Some(cache_id.clone());

        let path = self.cache_entry_dir(cache_id).join(identifier);
        self.state = FileState::Cached(SanitizedFile::from_file(path));

        for version in &mut self.versions {
            version.hydrate_cached(cache_id, identifier)?;
        }
        Ok(())
    }

    /// Persist the current file durably.
    ///
    /// With the cache layer enabled (the default) a supplied file is cached
    /// first, processors and all, then the staged file is handed to the
    /// backend as a move. With `use_cache` off a supplied file goes straight
    /// to the backend as a copy, unprocessed, and the input stays in place.
    ///
    /// Storing with nothing present fails with [`UploadError::NoFile`];
    /// storing an already stored file is a no-op.
    pub async fn store(&mut self, new_file: Option<SanitizedFile>) -> UploadResult<()> {
        match new_file {
            Some(file) if !self.settings.use_cache => self.store_direct(file).await,
            Some(file) => {
                self.cache(file).await?;
                self.store_staged().await
            }
            None => self.store_staged().await,
        }
    }

    fn store_staged<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = UploadResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let staged = match &self.state {
                FileState::Cached(file) => file.clone(),
                FileState::Stored(_) => return Ok(()),
                FileState::Empty => return Err(UploadError::NoFile),
            };
            let identifier = self.identifier.clone().ok_or(UploadError::NoFile)?;

            let ctx = self.store_context(true);
            let stored = self.storage.store(&ctx, &identifier, staged).await?;

            tracing::debug!(
                identifier = %identifier,
                backend = self.storage.backend_name(),
                "file stored"
            );

            self.state = FileState::Stored(stored);
            self.cache_id = None;

            for version in &mut self.versions {
                version.store_staged().await?;
            }
            Ok(())
        })
    }

    fn store_direct<'a>(
        &'a mut self,
        file: SanitizedFile,
    ) -> Pin<Box<dyn Future<Output = UploadResult<()>> + Send + 'a>> {
        Box::pin(async move {
            if file.is_bare_path() {
                let shown = file
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                return Err(UploadError::NotMultipart(shown));
            }

            let identifier = file
                .filename()
                .unwrap_or_else(|| FALLBACK_FILENAME.to_string());
            self.set_identifier(&identifier)?;

            let ctx = self.store_context(false);
            let stored = self.storage.store(&ctx, &identifier, file.clone()).await?;

            self.state = FileState::Stored(stored);
            self.cache_id = None;

            for version in &mut self.versions {
                version.store_direct(file.clone()).await?;
            }
            Ok(())
        })
    }

    /// Rehydrate from a persisted identifier. The backend hands back a lazy
    /// handle; nothing is read until the caller asks.
    pub async fn retrieve_from_store(&mut self, identifier: &str) -> UploadResult<()> {
        self.hydrate_stored(identifier).await
    }

    fn hydrate_stored<'a>(
        &'a mut self,
        identifier: &'a str,
    ) -> Pin<Box<dyn Future<Output = UploadResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.set_identifier(identifier)?;

            let ctx = self.store_context(false);
            let stored = self.storage.retrieve(&ctx, identifier).await?;

            self.state = FileState::Stored(stored);
            self.cache_id = None;

            for version in &mut self.versions {
                version.hydrate_stored(identifier).await?;
            }
            Ok(())
        })
    }

    /// Delete the current file (staged or stored), blank identifier and cache
    /// id, and return to empty. Versions follow. Removing an empty uploader
    /// is a no-op.
    pub async fn remove(&mut self) -> UploadResult<()> {
        self.remove_inner().await
    }

    fn remove_inner<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = UploadResult<()>> + Send + 'a>> {
        Box::pin(async move {
            match &self.state {
                FileState::Cached(file) => file.delete().await?,
                FileState::Stored(stored) => stored.delete().await?,
                FileState::Empty => {}
            }
            self.state = FileState::Empty;
            self.identifier = None;
            self.cache_id = None;

            for version in &mut self.versions {
                version.remove_inner().await?;
            }
            Ok(())
        })
    }

    // ---- lenient variants ------------------------------------------------

    /// [`cache`](Self::cache), except a no-op when a file is already present,
    /// and invalid parameters are logged and swallowed. Returns whether the
    /// transition ran.
    pub async fn try_cache(&mut self, file: SanitizedFile) -> UploadResult<bool> {
        if self.has_file() {
            return Ok(false);
        }
        swallow_invalid(self.cache(file).await.map(|_| ()))
    }

    /// Lenient [`retrieve_from_cache`](Self::retrieve_from_cache): a no-op
    /// when a file is present, and a malformed token read back from a form or
    /// a database must not crash the read path.
    pub fn try_retrieve_from_cache(&mut self, cache_name: &str) -> UploadResult<bool> {
        if self.has_file() {
            return Ok(false);
        }
        swallow_invalid(self.retrieve_from_cache(cache_name))
    }

    /// Lenient [`store`](Self::store): a no-op when any file is already
    /// present (the strict call replaces it, this one never does) or when
    /// there is nothing to store.
    pub async fn try_store(&mut self, new_file: Option<SanitizedFile>) -> UploadResult<bool> {
        if self.has_file() {
            return Ok(false);
        }
        let Some(file) = new_file else {
            return Ok(false);
        };
        swallow_invalid(self.store(Some(file)).await)
    }

    /// Lenient [`retrieve_from_store`](Self::retrieve_from_store): a no-op
    /// when a file is present or the identifier is missing or blank.
    pub async fn try_retrieve_from_store(
        &mut self,
        identifier: Option<&str>,
    ) -> UploadResult<bool> {
        if self.has_file() {
            return Ok(false);
        }
        let Some(identifier) = identifier.filter(|i| !i.is_empty()) else {
            return Ok(false);
        };
        swallow_invalid(self.retrieve_from_store(identifier).await)
    }
}

fn swallow_invalid(result: UploadResult<()>) -> UploadResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(UploadError::InvalidParameter { kind, value }) => {
            tracing::debug!(kind, value_len = value.len(), "invalid parameter ignored");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}
