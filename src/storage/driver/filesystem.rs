//! Local-filesystem storage driver. All provided paths become subpaths of
//! the configured root directory. Staging and blob trees share this root,
//! so promotion by rename never crosses a device boundary.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{self, AsyncRead, AsyncSeekExt, BufWriter};

use super::{DriverError, DriverParameters, FileInfo, Reader, StorageDriver};
use crate::storage::paths::is_valid_path;

const DEFAULT_ROOT_DIRECTORY: &str = "/tmp/registry/storage";

pub struct FilesystemDriver {
    root: PathBuf,
}

impl FilesystemDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemDriver { root: root.into() }
    }

    /// Factory entry for the driver table. Optional parameter:
    /// `rootdirectory`.
    pub fn from_parameters(parameters: &DriverParameters) -> Self {
        let root = parameters
            .get("rootdirectory")
            .map(String::as_str)
            .unwrap_or(DEFAULT_ROOT_DIRECTORY);
        FilesystemDriver::new(root)
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    async fn create_parent(&self, full: &Path) -> Result<(), DriverError> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

fn validate(path: &str) -> Result<(), DriverError> {
    if is_valid_path(path) {
        Ok(())
    } else {
        Err(DriverError::InvalidPath(path.to_string()))
    }
}

fn map_not_found(err: io::Error, path: &str) -> DriverError {
    match err.kind() {
        io::ErrorKind::NotFound => DriverError::PathNotFound(path.to_string()),
        _ => DriverError::Io(err),
    }
}

#[async_trait::async_trait]
impl StorageDriver for FilesystemDriver {
    async fn get_content(&self, path: &str) -> Result<Vec<u8>, DriverError> {
        validate(path)?;
        fs::read(self.full_path(path))
            .await
            .map_err(|e| map_not_found(e, path))
    }

    async fn put_content(&self, path: &str, content: &[u8]) -> Result<(), DriverError> {
        validate(path)?;
        let full = self.full_path(path);
        self.create_parent(&full).await?;
        fs::write(full, content).await?;
        Ok(())
    }

    async fn read_stream(&self, path: &str, offset: u64) -> Result<Reader, DriverError> {
        validate(path)?;
        let mut file = File::open(self.full_path(path))
            .await
            .map_err(|e| map_not_found(e, path))?;
        let len = file.metadata().await?.len();
        if offset > len {
            return Err(DriverError::InvalidOffset {
                path: path.to_string(),
                offset,
            });
        }
        file.seek(io::SeekFrom::Start(offset)).await?;
        Ok(Box::pin(file))
    }

    async fn write_stream(
        &self,
        path: &str,
        offset: u64,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, DriverError> {
        validate(path)?;
        let full = self.full_path(path);
        self.create_parent(&full).await?;

        let current = match fs::metadata(&full).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        if offset != current {
            return Err(DriverError::InvalidOffset {
                path: path.to_string(),
                offset,
            });
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .await?;
        let mut writer = BufWriter::new(file);
        let written = io::copy(reader, &mut writer).await?;
        io::AsyncWriteExt::flush(&mut writer).await?;
        Ok(written)
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, DriverError> {
        validate(path)?;
        let meta = fs::metadata(self.full_path(path))
            .await
            .map_err(|e| map_not_found(e, path))?;
        let modtime = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(FileInfo {
            path: path.to_string(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            modtime,
            is_dir: meta.is_dir(),
        })
    }

    async fn list(&self, path: &str) -> Result<Vec<String>, DriverError> {
        validate(path)?;
        let mut read_dir = fs::read_dir(self.full_path(path)).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotADirectory {
                DriverError::InvalidPath(path.to_string())
            } else {
                map_not_found(e, path)
            }
        })?;

        let prefix = if path == "/" { "" } else { path };
        let mut children = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                children.push(format!("{prefix}/{name}"));
            }
        }
        children.sort();
        Ok(children)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), DriverError> {
        validate(from)?;
        validate(to)?;
        let src = self.full_path(from);
        let dst = self.full_path(to);
        if fs::metadata(&src).await.is_err() {
            return Err(DriverError::PathNotFound(from.to_string()));
        }
        self.create_parent(&dst).await?;
        fs::rename(src, dst).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), DriverError> {
        validate(path)?;
        let full = self.full_path(path);
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| map_not_found(e, path))?;
        if meta.is_dir() {
            fs::remove_dir_all(full).await?;
        } else {
            fs::remove_file(full).await?;
        }
        Ok(())
    }
}

pub fn factory(
    parameters: &DriverParameters,
) -> Result<std::sync::Arc<dyn StorageDriver>, DriverError> {
    Ok(std::sync::Arc::new(FilesystemDriver::from_parameters(
        parameters,
    )))
}
