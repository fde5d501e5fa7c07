//! Layer service: composes the blob store and upload sessions for the HTTP
//! boundary. Owns the finalize path — digest verification over the staging
//! bytes, promotion into the global blob store, and the repository link.

use std::sync::Arc;

use chrono::Duration;
use tokio::io::AsyncReadExt;

use crate::digest::Digest;
use crate::error::RegistryError;
use crate::storage::blob::BlobStore;
use crate::storage::driver::{DriverError, FileInfo, Reader, StorageDriver};
use crate::storage::paths::PathManager;
use crate::storage::upload::UploadSession;

// Hash buffer for streaming verification.
const VERIFY_BUF_SIZE: usize = 32 * 1024;

// Bounded retries for the promotion rename; transient I/O only.
const MOVE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct LayerService {
    driver: Arc<dyn StorageDriver>,
    paths: PathManager,
    blobs: BlobStore,
    upload_ttl: Duration,
}

impl LayerService {
    pub fn new(driver: Arc<dyn StorageDriver>, upload_ttl: Duration) -> Self {
        LayerService {
            blobs: BlobStore::new(driver.clone()),
            paths: PathManager::new(),
            driver,
            upload_ttl,
        }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Opens a new upload session against `name`.
    pub async fn start_upload(&self, name: &str) -> Result<UploadSession, RegistryError> {
        UploadSession::start(self.driver.clone(), name).await
    }

    /// Reconstructs the OPEN session identified by `uuid`.
    pub async fn resume(&self, name: &str, uuid: &str) -> Result<UploadSession, RegistryError> {
        UploadSession::resume(self.driver.clone(), name, uuid, self.upload_ttl).await
    }

    /// A layer is visible in `name` iff the blob exists globally and the
    /// repository link is present.
    pub async fn exists(&self, name: &str, digest: &Digest) -> Result<bool, RegistryError> {
        Ok(self.blobs.exists(digest).await? && self.blobs.linked(name, digest).await?)
    }

    /// Opens the layer for reading, honoring repository scoping.
    pub async fn open(
        &self,
        name: &str,
        digest: &Digest,
    ) -> Result<(FileInfo, Reader), RegistryError> {
        if !self.blobs.linked(name, digest).await? {
            return Err(RegistryError::BlobUnknown(digest.clone()));
        }
        let info = self.blobs.stat(digest).await?;
        let reader = self.blobs.open(digest).await?;
        Ok((info, reader))
    }

    /// Finalizes an upload: verifies length and digest over the staged
    /// bytes, promotes them to the canonical blob path, and links the blob
    /// into the repository. Verification failure is terminal — the staging
    /// data is removed and the error surfaced.
    pub async fn finish(
        &self,
        session: UploadSession,
        declared_size: Option<u64>,
        digest: &Digest,
    ) -> Result<(), RegistryError> {
        let actual = session.offset();
        if let Some(declared) = declared_size
            && declared != actual
        {
            session.remove().await?;
            return Err(RegistryError::SizeInvalid { declared, actual });
        }

        if !self.verify(&session, digest).await? {
            session.remove().await?;
            return Err(RegistryError::DigestMismatch(digest.clone()));
        }

        // Another upload of the same content may have won the race; the
        // blob path is content-addressed, so observing it existing is as
        // good as moving onto it.
        if self.blobs.exists(digest).await? {
            tracing::debug!(%digest, "blob already present, discarding staging data");
        } else {
            self.promote(&session, digest).await?;
        }

        self.blobs.link(session.name(), digest).await?;
        session.remove().await?;
        tracing::info!(repository = session.name(), %digest, size = actual, "layer committed");
        Ok(())
    }

    /// Streams the staging bytes through a digest verifier with a fixed
    /// buffer; never loads the upload into memory.
    async fn verify(
        &self,
        session: &UploadSession,
        digest: &Digest,
    ) -> Result<bool, RegistryError> {
        let mut reader = self.driver.read_stream(&session.data_path(), 0).await?;
        let mut verifier = digest.verifier();
        let mut buf = vec![0u8; VERIFY_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            verifier.update(&buf[..n]);
        }
        Ok(verifier.verified())
    }

    async fn promote(
        &self,
        session: &UploadSession,
        digest: &Digest,
    ) -> Result<(), RegistryError> {
        let src = session.data_path();
        let dst = self.paths.blob_data_path(digest);
        let mut last = None;
        for attempt in 1..=MOVE_ATTEMPTS {
            match self.driver.rename(&src, &dst).await {
                Ok(()) => return Ok(()),
                Err(DriverError::PathNotFound(path)) => {
                    // the concurrent-upload race: someone moved our source
                    // or filled the destination first
                    if self.blobs.exists(digest).await? {
                        return Ok(());
                    }
                    return Err(DriverError::PathNotFound(path).into());
                }
                Err(DriverError::Io(e)) => {
                    tracing::warn!(attempt, error = %e, "blob promotion failed, retrying");
                    last = Some(DriverError::Io(e));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last.expect("retry loop exited without an error").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Algorithm;
    use crate::storage::driver::filesystem::FilesystemDriver;

    fn service() -> (tempfile::TempDir, LayerService) {
        let dir = tempfile::tempdir().unwrap();
        let driver: Arc<dyn StorageDriver> = Arc::new(FilesystemDriver::new(dir.path()));
        (dir, LayerService::new(driver, Duration::seconds(604_800)))
    }

    async fn push(layers: &LayerService, name: &str, bytes: &[u8]) -> Digest {
        let digest = Digest::from_bytes(Algorithm::Sha256, bytes);
        let mut session = layers.start_upload(name).await.unwrap();
        session.append(&mut &bytes[..]).await.unwrap();
        layers
            .finish(session, Some(bytes.len() as u64), &digest)
            .await
            .unwrap();
        digest
    }

    #[tokio::test]
    async fn push_then_open_round_trips() {
        let (_dir, layers) = service();
        let digest = push(&layers, "foo/bar", b"hello world").await;

        assert!(layers.exists("foo/bar", &digest).await.unwrap());
        let (info, mut reader) = layers.open("foo/bar", &digest).await.unwrap();
        assert_eq!(info.size, 11);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn finish_rejects_size_mismatch_and_removes_staging() {
        let (_dir, layers) = service();
        let digest = Digest::from_bytes(Algorithm::Sha256, b"hello");
        let mut session = layers.start_upload("foo/bar").await.unwrap();
        session.append(&mut &b"hello"[..]).await.unwrap();
        let uuid = session.uuid().to_string();

        let err = layers.finish(session, Some(999), &digest).await.unwrap_err();
        assert!(matches!(err, RegistryError::SizeInvalid { declared: 999, actual: 5 }));
        assert!(layers.resume("foo/bar", &uuid).await.is_err());
        assert!(!layers.blobs().exists(&digest).await.unwrap());
    }

    #[tokio::test]
    async fn finish_rejects_digest_mismatch_and_removes_staging() {
        let (_dir, layers) = service();
        let wrong = Digest::from_bytes(Algorithm::Sha256, b"other content");
        let mut session = layers.start_upload("foo/bar").await.unwrap();
        session.append(&mut &b"hello"[..]).await.unwrap();
        let uuid = session.uuid().to_string();

        let err = layers.finish(session, Some(5), &wrong).await.unwrap_err();
        assert!(matches!(err, RegistryError::DigestMismatch(_)));
        assert!(layers.resume("foo/bar", &uuid).await.is_err());
        assert!(!layers.blobs().exists(&wrong).await.unwrap());
    }

    #[tokio::test]
    async fn finish_without_declared_size_uses_offset() {
        let (_dir, layers) = service();
        let digest = Digest::from_bytes(Algorithm::Sha256, b"content");
        let mut session = layers.start_upload("foo/bar").await.unwrap();
        session.append(&mut &b"content"[..]).await.unwrap();
        layers.finish(session, None, &digest).await.unwrap();
        assert!(layers.exists("foo/bar", &digest).await.unwrap());
    }

    #[tokio::test]
    async fn same_content_from_two_repositories_shares_one_blob() {
        let (_dir, layers) = service();
        let d1 = push(&layers, "a/x", b"dedup me").await;
        let d2 = push(&layers, "b/y", b"dedup me").await;
        assert_eq!(d1, d2);

        assert!(layers.exists("a/x", &d1).await.unwrap());
        assert!(layers.exists("b/y", &d1).await.unwrap());
        // blob is global; visibility is per-repository
        assert!(layers.blobs().exists(&d1).await.unwrap());
        let (info_a, _) = layers.open("a/x", &d1).await.unwrap();
        let (info_b, _) = layers.open("b/y", &d1).await.unwrap();
        assert_eq!(info_a.size, info_b.size);
    }

    #[tokio::test]
    async fn unlinked_repository_cannot_open_existing_blob() {
        let (_dir, layers) = service();
        let digest = push(&layers, "a/x", b"private bytes").await;
        assert!(!layers.exists("b/y", &digest).await.unwrap());
        let result = layers.open("b/y", &digest).await;
        assert!(matches!(result, Err(RegistryError::BlobUnknown(_))));
    }

    #[tokio::test]
    async fn identical_bytes_collapse_to_one_path_different_bytes_do_not() {
        let (_dir, layers) = service();
        let d1 = push(&layers, "a/x", b"same").await;
        let d2 = push(&layers, "a/x", b"same").await;
        let d3 = push(&layers, "a/x", b"different").await;
        assert_eq!(d1, d2);
        assert_ne!(d1, d3);
    }

    #[tokio::test]
    async fn tarsum_digest_verifies_a_tar_layer() {
        let (_dir, layers) = service();
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_path("etc/motd").unwrap();
        header.set_size(5);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &b"hello"[..]).unwrap();
        let archive = builder.into_inner().unwrap();

        let mut ts = crate::digest::TarSumV1::new();
        ts.update(&archive);
        let digest = Digest::parse(&format!("tarsum.v1+sha256:{}", ts.finalize())).unwrap();

        let mut session = layers.start_upload("foo/bar").await.unwrap();
        session.append(&mut &archive[..]).await.unwrap();
        layers
            .finish(session, Some(archive.len() as u64), &digest)
            .await
            .unwrap();
        assert!(layers.exists("foo/bar", &digest).await.unwrap());
    }
}
