//! Content-addressed blob store. Blobs are global and shared across
//! repositories; a per-repository link record is what scopes visibility.
//! `open` and `stat` are keyed by digest only — link checks happen at the
//! HTTP boundary through the layer service.

use std::sync::Arc;

use crate::digest::Digest;
use crate::error::{NotFoundExt, RegistryError};
use crate::storage::driver::{FileInfo, Reader, StorageDriver};
use crate::storage::paths::PathManager;

#[derive(Clone)]
pub struct BlobStore {
    driver: Arc<dyn StorageDriver>,
    paths: PathManager,
}

impl BlobStore {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        BlobStore {
            driver,
            paths: PathManager::new(),
        }
    }

    pub async fn exists(&self, digest: &Digest) -> Result<bool, RegistryError> {
        match self.driver.stat(&self.paths.blob_data_path(digest)).await {
            Ok(info) => Ok(!info.is_dir),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn stat(&self, digest: &Digest) -> Result<FileInfo, RegistryError> {
        self.driver
            .stat(&self.paths.blob_data_path(digest))
            .await
            .or_not_found(RegistryError::BlobUnknown(digest.clone()))
    }

    /// Stream of the blob's bytes from the start.
    pub async fn open(&self, digest: &Digest) -> Result<Reader, RegistryError> {
        self.driver
            .read_stream(&self.paths.blob_data_path(digest), 0)
            .await
            .or_not_found(RegistryError::BlobUnknown(digest.clone()))
    }

    /// Records that `name` may serve `digest`. The link file holds the
    /// textual digest.
    pub(crate) async fn link(&self, name: &str, digest: &Digest) -> Result<(), RegistryError> {
        let path = self.paths.layer_link_path(name, digest);
        self.driver
            .put_content(&path, digest.to_string().as_bytes())
            .await?;
        Ok(())
    }

    /// Whether `name` holds a link for `digest`. Absence means "unknown
    /// layer in this repository" even if the blob exists globally.
    pub(crate) async fn linked(&self, name: &str, digest: &Digest) -> Result<bool, RegistryError> {
        let path = self.paths.layer_link_path(name, digest);
        match self.driver.get_content(&path).await {
            Ok(content) => Ok(content == digest.to_string().as_bytes()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Algorithm;
    use crate::storage::driver::filesystem::FilesystemDriver;

    fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FilesystemDriver::new(dir.path()));
        (dir, BlobStore::new(driver))
    }

    async fn seed(store: &BlobStore, bytes: &[u8]) -> Digest {
        let digest = Digest::from_bytes(Algorithm::Sha256, bytes);
        store
            .driver
            .put_content(&store.paths.blob_data_path(&digest), bytes)
            .await
            .unwrap();
        digest
    }

    #[tokio::test]
    async fn exists_and_stat_after_seed() {
        let (_dir, store) = store();
        let digest = seed(&store, b"layer bytes").await;
        assert!(store.exists(&digest).await.unwrap());
        assert_eq!(store.stat(&digest).await.unwrap().size, 11);
    }

    #[tokio::test]
    async fn missing_blob_maps_to_blob_unknown() {
        let (_dir, store) = store();
        let digest = Digest::from_bytes(Algorithm::Sha256, b"never stored");
        assert!(!store.exists(&digest).await.unwrap());
        let err = store.stat(&digest).await.unwrap_err();
        assert!(matches!(err, RegistryError::BlobUnknown(_)));
    }

    #[tokio::test]
    async fn link_scopes_visibility_per_repository() {
        let (_dir, store) = store();
        let digest = seed(&store, b"shared").await;
        store.link("a/x", &digest).await.unwrap();
        assert!(store.linked("a/x", &digest).await.unwrap());
        assert!(!store.linked("b/y", &digest).await.unwrap());
    }

    #[tokio::test]
    async fn link_file_contains_textual_digest() {
        let (_dir, store) = store();
        let digest = seed(&store, b"content").await;
        store.link("a/x", &digest).await.unwrap();
        let content = store
            .driver
            .get_content(&store.paths.layer_link_path("a/x", &digest))
            .await
            .unwrap();
        assert_eq!(content, digest.to_string().as_bytes());
    }
}
