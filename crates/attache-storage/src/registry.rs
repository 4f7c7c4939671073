//! Storage backend registry.
//!
//! Backends are registered by name against a factory and resolved once, at
//! uploader construction time. The `file` backend is pre-registered; hosts
//! register their own engines next to it.

use crate::traits::{Storage, StorageError, StorageResult};
use attache_core::Settings;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "storage-file")]
use crate::FileStore;

/// Builds a backend from the attachment settings.
///
/// Factories are synchronous; a backend needing async setup (a client
/// handshake, say) should be constructed ahead of time and captured by its
/// factory closure.
pub type StorageFactory = Arc<dyn Fn(&Settings) -> StorageResult<Arc<dyn Storage>> + Send + Sync>;

/// Name-to-factory table for storage backends.
#[derive(Clone)]
pub struct StorageRegistry {
    factories: HashMap<String, StorageFactory>,
}

impl StorageRegistry {
    /// An empty registry with no backends.
    pub fn empty() -> Self {
        StorageRegistry {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Settings) -> StorageResult<Arc<dyn Storage>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// The registered backend names, unordered.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|name| name.as_str())
    }

    /// Build the backend the settings select.
    pub fn resolve(&self, settings: &Settings) -> StorageResult<Arc<dyn Storage>> {
        self.resolve_name(&settings.storage, settings)
    }

    /// Build the backend registered under `name`.
    pub fn resolve_name(&self, name: &str, settings: &Settings) -> StorageResult<Arc<dyn Storage>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            StorageError::ConfigError(format!("unknown storage backend {:?}", name))
        })?;
        factory(settings)
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        #[allow(unused_mut)]
        let mut registry = StorageRegistry::empty();
        #[cfg(feature = "storage-file")]
        registry.register("file", |_settings| {
            let store: Arc<dyn Storage> = Arc::new(FileStore::new());
            Ok(store)
        });
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "storage-file")]
    #[test]
    fn test_default_registry_resolves_file_backend() {
        let registry = StorageRegistry::default();
        let settings = Settings::default();
        let backend = registry.resolve(&settings).expect("file backend resolves");
        assert_eq!(backend.backend_name(), "file");
    }

    #[test]
    fn test_unknown_backend_is_config_error() {
        let registry = StorageRegistry::default();
        let settings = Settings {
            storage: "antigravity".to_string(),
            ..Settings::default()
        };
        assert!(matches!(
            registry.resolve(&settings),
            Err(StorageError::ConfigError(_))
        ));
    }

    #[cfg(feature = "storage-file")]
    #[test]
    fn test_custom_registration_overrides() {
        let mut registry = StorageRegistry::default();
        registry.register("file", |_settings| {
            Err(StorageError::ConfigError("disabled".to_string()))
        });
        let settings = Settings::default();
        assert!(registry.resolve(&settings).is_err());
    }
}
