//! Manifest store and tag index. Manifest bytes live in the global blob
//! store under their canonical digest; a repository-scoped revision link
//! marks them as belonging to the repository, and the mutable tag pointer
//! names the current revision. Tag pointer updates rely on `put_content`'s
//! whole-object semantics, so readers observe either the old or the new
//! digest, never a mixture.

use std::sync::Arc;

use crate::digest::Digest;
use crate::error::{NotFoundExt, RegistryError};
use crate::manifest::SignedManifest;
use crate::storage::driver::StorageDriver;
use crate::storage::layer::LayerService;
use crate::storage::paths::PathManager;

#[derive(Clone)]
pub struct ManifestStore {
    driver: Arc<dyn StorageDriver>,
    paths: PathManager,
    layers: LayerService,
}

impl ManifestStore {
    pub fn new(driver: Arc<dyn StorageDriver>, layers: LayerService) -> Self {
        ManifestStore {
            driver,
            paths: PathManager::new(),
            layers,
        }
    }

    /// Validates and commits a manifest, updating the tag pointer. Every
    /// referenced layer must already be linked into `name`; missing layers
    /// fail the whole put, enumerated in the error.
    pub async fn put(
        &self,
        name: &str,
        tag: &str,
        raw: &[u8],
    ) -> Result<Digest, RegistryError> {
        let manifest = SignedManifest::parse(raw)?;
        let digest = manifest.digest(raw)?;

        let mut missing = Vec::new();
        for layer in manifest.layer_digests() {
            if !self.layers.exists(name, layer).await? {
                missing.push(layer.clone());
            }
        }
        if !missing.is_empty() {
            return Err(RegistryError::ManifestUnverified { missing });
        }

        self.driver
            .put_content(&self.paths.blob_data_path(&digest), raw)
            .await?;
        self.driver
            .put_content(
                &self.paths.manifest_revision_link_path(name, &digest),
                digest.to_string().as_bytes(),
            )
            .await?;
        self.driver
            .put_content(
                &self.paths.manifest_tag_link_path(name, tag),
                digest.to_string().as_bytes(),
            )
            .await?;

        tracing::info!(repository = name, tag, %digest, "manifest committed");
        Ok(digest)
    }

    /// Resolves `tag` to its current manifest digest.
    pub async fn resolve_tag(&self, name: &str, tag: &str) -> Result<Digest, RegistryError> {
        let raw = self
            .driver
            .get_content(&self.paths.manifest_tag_link_path(name, tag))
            .await
            .or_not_found(RegistryError::ManifestUnknown(tag.to_string()))?;
        let text = std::str::from_utf8(&raw)
            .map_err(|_| RegistryError::ManifestUnknown(tag.to_string()))?;
        Ok(Digest::parse(text.trim())?)
    }

    /// Manifest bytes for `tag`, exactly as stored.
    pub async fn get(&self, name: &str, tag: &str) -> Result<(Digest, Vec<u8>), RegistryError> {
        let digest = self.resolve_tag(name, tag).await?;
        let raw = self.get_by_digest(name, &digest).await?;
        Ok((digest, raw))
    }

    /// Manifest bytes by revision digest. The revision link scopes the
    /// lookup to the repository.
    pub async fn get_by_digest(
        &self,
        name: &str,
        digest: &Digest,
    ) -> Result<Vec<u8>, RegistryError> {
        self.driver
            .get_content(&self.paths.manifest_revision_link_path(name, digest))
            .await
            .or_not_found(RegistryError::ManifestUnknown(digest.to_string()))?;
        self.driver
            .get_content(&self.paths.blob_data_path(digest))
            .await
            .or_not_found(RegistryError::ManifestUnknown(digest.to_string()))
    }

    /// Tag names in the repository, sorted.
    pub async fn tags(&self, name: &str) -> Result<Vec<String>, RegistryError> {
        let children = self
            .driver
            .list(&self.paths.manifest_tags_path(name))
            .await
            .or_not_found(RegistryError::NameUnknown(name.to_string()))?;
        Ok(children
            .iter()
            .filter_map(|p| p.rsplit('/').next())
            .map(str::to_string)
            .collect())
    }

    /// Removes the tag pointer only; revisions are preserved, so lookups
    /// by digest keep working.
    pub async fn delete_tag(&self, name: &str, tag: &str) -> Result<(), RegistryError> {
        self.driver
            .delete(&self.paths.manifest_tag_path(name, tag))
            .await
            .or_not_found(RegistryError::ManifestUnknown(tag.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Algorithm;
    use crate::storage::driver::filesystem::FilesystemDriver;
    use chrono::Duration;

    fn store() -> (tempfile::TempDir, LayerService, ManifestStore) {
        let dir = tempfile::tempdir().unwrap();
        let driver: Arc<dyn StorageDriver> = Arc::new(FilesystemDriver::new(dir.path()));
        let layers = LayerService::new(driver.clone(), Duration::seconds(604_800));
        let manifests = ManifestStore::new(driver, layers.clone());
        (dir, layers, manifests)
    }

    async fn push_layer(layers: &LayerService, name: &str, bytes: &[u8]) -> Digest {
        let digest = Digest::from_bytes(Algorithm::Sha256, bytes);
        let mut session = layers.start_upload(name).await.unwrap();
        session.append(&mut &bytes[..]).await.unwrap();
        layers.finish(session, None, &digest).await.unwrap();
        digest
    }

    fn manifest_body(name: &str, tag: &str, layers: &[&Digest], note: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 1,
            "name": name,
            "tag": tag,
            "fsLayers": layers
                .iter()
                .map(|d| serde_json::json!({"blobSum": d.to_string()}))
                .collect::<Vec<_>>(),
            "history": [{"v1Compatibility": note}],
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let (_dir, layers, manifests) = store();
        let layer = push_layer(&layers, "foo/bar", b"layer one").await;
        let raw = manifest_body("foo/bar", "v1", &[&layer], "{}");

        let digest = manifests.put("foo/bar", "v1", &raw).await.unwrap();
        let (resolved, bytes) = manifests.get("foo/bar", "v1").await.unwrap();
        assert_eq!(resolved, digest);
        assert_eq!(bytes, raw);
        assert_eq!(
            manifests.get_by_digest("foo/bar", &digest).await.unwrap(),
            raw
        );
    }

    #[tokio::test]
    async fn put_rejects_missing_layers_and_writes_nothing() {
        let (_dir, layers, manifests) = store();
        let present = push_layer(&layers, "foo/bar", b"present").await;
        let absent = Digest::from_bytes(Algorithm::Sha256, b"never pushed");
        let raw = manifest_body("foo/bar", "v1", &[&present, &absent], "{}");

        let err = manifests.put("foo/bar", "v1", &raw).await.unwrap_err();
        match err {
            RegistryError::ManifestUnverified { missing } => {
                assert_eq!(missing, vec![absent]);
            }
            other => panic!("expected ManifestUnverified, got {other}"),
        }
        // no tag pointer was written
        assert!(manifests.get("foo/bar", "v1").await.is_err());
    }

    #[tokio::test]
    async fn tag_overwrite_is_last_writer_wins_and_keeps_revisions() {
        let (_dir, layers, manifests) = store();
        let layer = push_layer(&layers, "foo/bar", b"layer").await;
        let m1 = manifest_body("foo/bar", "v1", &[&layer], "{\"id\":\"one\"}");
        let m2 = manifest_body("foo/bar", "v1", &[&layer], "{\"id\":\"two\"}");

        let d1 = manifests.put("foo/bar", "v1", &m1).await.unwrap();
        let d2 = manifests.put("foo/bar", "v1", &m2).await.unwrap();
        assert_ne!(d1, d2);

        let (current, bytes) = manifests.get("foo/bar", "v1").await.unwrap();
        assert_eq!(current, d2);
        assert_eq!(bytes, m2);
        // the displaced revision is still addressable
        assert_eq!(manifests.get_by_digest("foo/bar", &d1).await.unwrap(), m1);
    }

    #[tokio::test]
    async fn tags_lists_all_tags() {
        let (_dir, layers, manifests) = store();
        let layer = push_layer(&layers, "foo/bar", b"layer").await;
        for tag in ["latest", "v1", "v2"] {
            let raw = manifest_body("foo/bar", tag, &[&layer], "{}");
            manifests.put("foo/bar", tag, &raw).await.unwrap();
        }
        assert_eq!(
            manifests.tags("foo/bar").await.unwrap(),
            vec!["latest", "v1", "v2"]
        );
    }

    #[tokio::test]
    async fn tags_on_unknown_repository_is_name_unknown() {
        let (_dir, _layers, manifests) = store();
        let err = manifests.tags("no/such").await.unwrap_err();
        assert!(matches!(err, RegistryError::NameUnknown(_)));
    }

    #[tokio::test]
    async fn delete_tag_preserves_revision() {
        let (_dir, layers, manifests) = store();
        let layer = push_layer(&layers, "foo/bar", b"layer").await;
        let raw = manifest_body("foo/bar", "v1", &[&layer], "{}");
        let digest = manifests.put("foo/bar", "v1", &raw).await.unwrap();

        manifests.delete_tag("foo/bar", "v1").await.unwrap();
        assert!(matches!(
            manifests.get("foo/bar", "v1").await.unwrap_err(),
            RegistryError::ManifestUnknown(_)
        ));
        assert_eq!(
            manifests.get_by_digest("foo/bar", &digest).await.unwrap(),
            raw
        );
    }

    #[tokio::test]
    async fn delete_unknown_tag_is_manifest_unknown() {
        let (_dir, _layers, manifests) = store();
        let err = manifests.delete_tag("foo/bar", "ghost").await.unwrap_err();
        assert!(matches!(err, RegistryError::ManifestUnknown(_)));
    }
}
