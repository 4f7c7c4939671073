//! Host record integration.
//!
//! A [`MountTable`] is built once at startup and maps record columns to
//! attachment definitions. Per record, a [`Mounter`] lazily instantiates one
//! uploader per touched column, rehydrating it from the identifier the record
//! already carries, and writes identifiers back after stores and removals.

use std::collections::HashMap;

use attache_core::{HostRecord, SanitizedFile, Settings};
use attache_storage::StorageRegistry;

use crate::cache::CacheId;
use crate::definition::Definition;
use crate::error::{UploadError, UploadResult};
use crate::uploader::Uploader;

/// Column-to-definition bindings shared by every record of a host type.
#[derive(Clone)]
pub struct MountTable {
    settings: Settings,
    registry: StorageRegistry,
    bindings: Vec<(String, Definition)>,
}

impl MountTable {
    pub fn new(settings: Settings, registry: StorageRegistry) -> Self {
        MountTable {
            settings,
            registry,
            bindings: Vec::new(),
        }
    }

    /// Bind `column` to `definition`. Mounting a column twice replaces the
    /// earlier binding.
    pub fn mount(mut self, column: &str, definition: Definition) -> Self {
        match self.bindings.iter_mut().find(|(c, _)| c == column) {
            Some(binding) => binding.1 = definition,
            None => self.bindings.push((column.to_string(), definition)),
        }
        self
    }

    /// Mounted columns, in mount order.
    pub fn columns(&self) -> impl Iterator<Item = &str> + '_ {
        self.bindings.iter().map(|(column, _)| column.as_str())
    }

    pub fn definition(&self, column: &str) -> Option<&Definition> {
        self.bindings
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, definition)| definition)
    }

    /// Build a fresh uploader for `column`, unattached to any record.
    pub fn uploader_for(&self, column: &str) -> UploadResult<Uploader> {
        let definition = self
            .definition(column)
            .ok_or_else(|| UploadError::invalid("mount column", column))?;
        Uploader::mounted(definition, self.settings.clone(), &self.registry, column)
    }

    /// Attach the table to one record for a unit of work.
    pub fn mounter<'a>(&'a self, record: &'a mut dyn HostRecord) -> Mounter<'a> {
        Mounter {
            table: self,
            record,
            uploaders: HashMap::new(),
        }
    }
}

/// One record's view of its attachments.
///
/// Uploaders come into being on first access per column and live for the
/// mounter's lifetime, so repeated calls see the same state. Reads from
/// persisted identifiers are lenient; assigning a new file is strict.
pub struct Mounter<'a> {
    table: &'a MountTable,
    record: &'a mut dyn HostRecord,
    uploaders: HashMap<String, Uploader>,
}

impl<'a> Mounter<'a> {
    async fn entry(&mut self, column: &str) -> UploadResult<&mut Uploader> {
        if !self.uploaders.contains_key(column) {
            let mut uploader = self.table.uploader_for(column)?;
            let identifier = self.record.read_identifier(column);
            uploader
                .try_retrieve_from_store(identifier.as_deref())
                .await?;
            self.uploaders.insert(column.to_string(), uploader);
        }
        self.uploaders
            .get_mut(column)
            .ok_or_else(|| UploadError::invalid("mount column", column))
    }

    /// The uploader for `column`, rehydrated from the record's identifier on
    /// first access.
    pub async fn get(&mut self, column: &str) -> UploadResult<&Uploader> {
        self.entry(column).await.map(|uploader| &*uploader)
    }

    pub async fn get_mut(&mut self, column: &str) -> UploadResult<&mut Uploader> {
        self.entry(column).await
    }

    /// Assign a new file: stage it in the cache, replacing whatever the
    /// column currently points at. The record's identifier is untouched until
    /// [`store_all`](Self::store_all).
    pub async fn set(&mut self, column: &str, file: SanitizedFile) -> UploadResult<CacheId> {
        self.entry(column).await?.cache(file).await
    }

    /// Re-adopt a pending upload from a form-supplied cache name. A no-op
    /// when the column already holds a file, so a freshly assigned file wins
    /// over the stale token accompanying it.
    pub async fn retrieve(&mut self, column: &str, cache_name: &str) -> UploadResult<bool> {
        self.entry(column).await?.try_retrieve_from_cache(cache_name)
    }

    /// Current URL for `column`, if it holds a file.
    pub async fn url(&mut self, column: &str) -> UploadResult<Option<String>> {
        Ok(self.entry(column).await?.url())
    }

    /// Store every pending upload and write the resulting identifiers back to
    /// the record. Columns never touched through this mounter are skipped.
    pub async fn store_all(&mut self) -> UploadResult<()> {
        let columns: Vec<String> = self
            .table
            .columns()
            .filter(|column| self.uploaders.contains_key(*column))
            .map(str::to_string)
            .collect();

        for column in columns {
            let Some(uploader) = self.uploaders.get_mut(&column) else {
                continue;
            };
            if uploader.is_cached() {
                uploader.store(None).await?;
            }
            if uploader.is_stored() {
                let identifier = uploader.identifier().map(str::to_string);
                self.record.write_identifier(&column, identifier.as_deref());
            }
        }
        Ok(())
    }

    /// Delete the column's file and blank its identifier on the record.
    pub async fn remove(&mut self, column: &str) -> UploadResult<()> {
        self.entry(column).await?.remove().await?;
        self.record.write_identifier(column, None);
        Ok(())
    }

    /// `(column, cache_name)` pairs for every pending upload, in mount
    /// order. Hosts round-trip these through forms.
    pub fn cache_names(&self) -> Vec<(String, String)> {
        self.table
            .columns()
            .filter_map(|column| {
                let uploader = self.uploaders.get(column)?;
                Some((column.to_string(), uploader.cache_name()?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attache_core::{MemoryRecord, UploadedFile};
    use tempfile::tempdir;

    fn table(root: &std::path::Path) -> MountTable {
        let settings = Settings {
            root: root.to_path_buf(),
            ..Settings::default()
        };
        MountTable::new(settings, StorageRegistry::default())
            .mount("avatar", Definition::new().store_dir("uploads/{mounted_as}"))
    }

    fn upload(name: &str, content: &'static [u8]) -> SanitizedFile {
        SanitizedFile::from_upload(UploadedFile::from_bytes(name, None, content))
    }

    #[tokio::test]
    async fn test_unknown_column_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let table = table(dir.path());
        let mut record = MemoryRecord::default();
        let mut mounter = table.mounter(&mut record);

        assert!(matches!(
            mounter.get("signature").await,
            Err(UploadError::InvalidParameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_then_store_all_writes_identifier_back() {
        let dir = tempdir().expect("tempdir");
        let table = table(dir.path());
        let mut record = MemoryRecord::default();

        let mut mounter = table.mounter(&mut record);
        mounter
            .set("avatar", upload("Portrait.PNG", b"png bytes"))
            .await
            .expect("caches");
        assert_eq!(mounter.cache_names().len(), 1);

        mounter.store_all().await.expect("stores");
        assert!(dir.path().join("uploads/avatar/portrait.png").exists());
        drop(mounter);

        assert_eq!(
            record.read_identifier("avatar").as_deref(),
            Some("portrait.png")
        );
    }

    #[tokio::test]
    async fn test_get_rehydrates_from_record() {
        let dir = tempdir().expect("tempdir");
        let table = table(dir.path());

        let mut record = MemoryRecord::default();
        {
            let mut mounter = table.mounter(&mut record);
            mounter
                .set("avatar", upload("face.jpg", b"jpeg"))
                .await
                .expect("caches");
            mounter.store_all().await.expect("stores");
        }

        let mut mounter = table.mounter(&mut record);
        let uploader = mounter.get("avatar").await.expect("hydrates");
        assert!(uploader.is_stored());
        assert_eq!(uploader.identifier(), Some("face.jpg"));
        assert_eq!(uploader.url().as_deref(), Some("/uploads/avatar/face.jpg"));
    }

    #[tokio::test]
    async fn test_retrieve_does_not_clobber_fresh_assignment() {
        let dir = tempdir().expect("tempdir");
        let table = table(dir.path());
        let mut record = MemoryRecord::default();
        let mut mounter = table.mounter(&mut record);

        let cache_id = mounter
            .set("avatar", upload("new.txt", b"new"))
            .await
            .expect("caches");
        let stale = format!("{}/old.txt", cache_id);
        let ran = mounter
            .retrieve("avatar", &stale)
            .await
            .expect("lenient retrieve");

        assert!(!ran);
        let uploader = mounter.get("avatar").await.expect("uploader");
        assert_eq!(uploader.identifier(), Some("new.txt"));
    }

    #[tokio::test]
    async fn test_remove_blanks_identifier() {
        let dir = tempdir().expect("tempdir");
        let table = table(dir.path());
        let mut record = MemoryRecord::default();
        record.write_identifier("avatar", Some("face.jpg"));

        let mut mounter = table.mounter(&mut record);
        mounter
            .set("avatar", upload("face.jpg", b"jpeg"))
            .await
            .expect("caches");
        mounter.store_all().await.expect("stores");
        mounter.remove("avatar").await.expect("removes");
        drop(mounter);

        assert_eq!(record.read_identifier("avatar"), None);
        assert!(!dir.path().join("uploads/avatar/face.jpg").exists());
    }

    #[tokio::test]
    async fn test_store_all_skips_untouched_columns() {
        let dir = tempdir().expect("tempdir");
        let table = table(dir.path()).mount("cover", Definition::new());
        let mut record = MemoryRecord::default();
        record.write_identifier("cover", Some("untouched.pdf"));

        let mut mounter = table.mounter(&mut record);
        mounter
            .set("avatar", upload("a.txt", b"a"))
            .await
            .expect("caches");
        mounter.store_all().await.expect("stores");
        drop(mounter);

        assert_eq!(
            record.read_identifier("cover").as_deref(),
            Some("untouched.pdf")
        );
    }
}
