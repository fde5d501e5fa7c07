//! Resumable upload sessions. A session is an append-only staging area in
//! the backend; all of its state (bytes, offset, start time) lives there,
//! so any server process can resume it. The confirmed offset is always
//! derived from `stat(data).size` — there is no sidecar counter to drift
//! after a crash.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::error::{NotFoundExt, RegistryError};
use crate::storage::driver::StorageDriver;
use crate::storage::paths::PathManager;

/// An OPEN upload session. Consumed by `finish` or `cancel`; dropped
/// sessions simply stay resumable in the backend until they expire.
#[derive(Debug)]
pub struct UploadSession {
    driver: Arc<dyn StorageDriver>,
    paths: PathManager,
    name: String,
    uuid: String,
    offset: u64,
    started_at: DateTime<Utc>,
}

impl UploadSession {
    /// Allocates a new session for `name`: fresh UUID, empty `data` file,
    /// `startedat` record with the current time.
    pub(crate) async fn start(
        driver: Arc<dyn StorageDriver>,
        name: &str,
    ) -> Result<Self, RegistryError> {
        let paths = PathManager::new();
        let uuid = Uuid::new_v4().to_string();
        let started_at = Utc::now();

        driver
            .put_content(
                &paths.upload_startedat_path(name, &uuid),
                started_at.to_rfc3339().as_bytes(),
            )
            .await?;
        // data exists from the start so that offset == stat(data).size
        // holds over the whole lifetime
        driver
            .put_content(&paths.upload_data_path(name, &uuid), &[])
            .await?;

        tracing::debug!(repository = name, uuid = %uuid, "started upload");
        Ok(UploadSession {
            driver,
            paths,
            name: name.to_string(),
            uuid,
            offset: 0,
            started_at,
        })
    }

    /// Reconstructs an OPEN session from the backend. Fails with
    /// `BlobUploadUnknown` when the session directory, its `startedat`
    /// record, or its `data` file is missing or malformed, or when the
    /// session has outlived `ttl`.
    pub(crate) async fn resume(
        driver: Arc<dyn StorageDriver>,
        name: &str,
        uuid: &str,
        ttl: Duration,
    ) -> Result<Self, RegistryError> {
        let paths = PathManager::new();
        let unknown = || RegistryError::BlobUploadUnknown(uuid.to_string());

        let raw = driver
            .get_content(&paths.upload_startedat_path(name, uuid))
            .await
            .or_not_found(unknown())?;
        let started_at = std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(unknown)?;
        if Utc::now() - started_at > ttl {
            return Err(unknown());
        }

        let info = driver
            .stat(&paths.upload_data_path(name, uuid))
            .await
            .or_not_found(unknown())?;

        Ok(UploadSession {
            driver,
            paths,
            name: name.to_string(),
            uuid: uuid.to_string(),
            offset: info.size,
            started_at,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Current confirmed write offset: bytes `[0, offset)` are durable.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn data_path(&self) -> String {
        self.paths.upload_data_path(&self.name, &self.uuid)
    }

    /// Streams `reader` onto the end of the staging file and returns the
    /// new offset. On a partial write (client disconnect) the offset
    /// advances only to the durably flushed size and the session remains
    /// OPEN and resumable.
    pub async fn append(
        &mut self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, RegistryError> {
        let path = self.data_path();
        let result = self.driver.write_stream(&path, self.offset, reader).await;

        // the durably flushed size is authoritative either way
        self.offset = self.driver.stat(&path).await?.size;
        match result {
            Ok(_) => Ok(self.offset),
            Err(e) => {
                tracing::debug!(
                    uuid = %self.uuid,
                    offset = self.offset,
                    error = %e,
                    "short write, upload stays resumable"
                );
                Ok(self.offset)
            }
        }
    }

    /// Removes the staging area. Terminal.
    pub async fn cancel(self) -> Result<(), RegistryError> {
        self.remove().await
    }

    pub(crate) async fn remove(&self) -> Result<(), RegistryError> {
        self.driver
            .delete(&self.paths.upload_path(&self.name, &self.uuid))
            .await
            .or_not_found(RegistryError::BlobUploadUnknown(self.uuid.clone()))
    }
}
