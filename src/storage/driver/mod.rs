//! Storage driver abstraction: a narrow byte/stream capability set that any
//! backend must implement. The core consumes only this trait; the concrete
//! backend is selected by name through an explicit factory table built at
//! startup.

pub mod filesystem;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncRead;

/// Errors are tagged so upper layers can map them to protocol responses
/// without inspecting backend error strings.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("invalid offset {offset} for path {path}")]
    InvalidOffset { path: String, offset: u64 },

    #[error("unsupported storage driver: {0}")]
    UnsupportedDriver(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::PathNotFound(_))
    }
}

/// Metadata for a stored object. `size` of a directory is 0.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub modtime: DateTime<Utc>,
    pub is_dir: bool,
}

pub type Reader = Pin<Box<dyn AsyncRead + Send>>;

impl std::fmt::Debug for dyn StorageDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageDriver").finish()
    }
}

/// Capability set the core consumes. All operations validate their paths
/// against the central path expression before touching the backend; every
/// operation may block on I/O, and these are the only suspension points in
/// the storage subsystem.
#[async_trait::async_trait]
pub trait StorageDriver: Send + Sync {
    /// Full contents of the object at `path`.
    async fn get_content(&self, path: &str) -> Result<Vec<u8>, DriverError>;

    /// Replace (or create) the whole object at `path`, truncating to the
    /// provided length.
    async fn put_content(&self, path: &str, content: &[u8]) -> Result<(), DriverError>;

    /// Lazy byte stream starting at `offset`. `InvalidOffset` when the
    /// offset exceeds the current size.
    async fn read_stream(&self, path: &str, offset: u64) -> Result<Reader, DriverError>;

    /// Write `reader` into `path` starting at `offset`, creating parent
    /// directories. Appends must be contiguous: `offset` must equal the
    /// current size (0 for an absent object) or the driver returns
    /// `InvalidOffset`. Returns the number of bytes written.
    async fn write_stream(
        &self,
        path: &str,
        offset: u64,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, DriverError>;

    /// Metadata for `path`.
    async fn stat(&self, path: &str) -> Result<FileInfo, DriverError>;

    /// Direct children of the directory at `path`, as full paths.
    async fn list(&self, path: &str) -> Result<Vec<String>, DriverError>;

    /// Atomic rename within the backend namespace, creating the parent of
    /// `to`. The core relies on `to` being absent.
    async fn rename(&self, from: &str, to: &str) -> Result<(), DriverError>;

    /// Recursive removal of `path`.
    async fn delete(&self, path: &str) -> Result<(), DriverError>;
}

pub type DriverParameters = HashMap<String, String>;
pub type DriverFactory = fn(&DriverParameters) -> Result<Arc<dyn StorageDriver>, DriverError>;

/// Explicit driver factory table, passed into the service constructor at
/// startup instead of a process-wide registry.
pub struct DriverFactories {
    factories: HashMap<&'static str, DriverFactory>,
}

impl DriverFactories {
    pub fn empty() -> Self {
        DriverFactories {
            factories: HashMap::new(),
        }
    }

    /// Table with all built-in drivers registered.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.register("filesystem", filesystem::factory);
        table
    }

    pub fn register(&mut self, name: &'static str, factory: DriverFactory) {
        self.factories.insert(name, factory);
    }

    pub fn create(
        &self,
        name: &str,
        parameters: &DriverParameters,
    ) -> Result<Arc<dyn StorageDriver>, DriverError> {
        match self.factories.get(name) {
            Some(factory) => factory(parameters),
            None => Err(DriverError::UnsupportedDriver(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_table_resolves_builtin_filesystem() {
        let table = DriverFactories::builtin();
        let dir = tempfile::tempdir().unwrap();
        let mut params = DriverParameters::new();
        params.insert(
            "rootdirectory".to_string(),
            dir.path().to_str().unwrap().to_string(),
        );
        assert!(table.create("filesystem", &params).is_ok());
    }

    #[test]
    fn factory_table_rejects_unknown_driver() {
        let table = DriverFactories::builtin();
        let err = table.create("s3", &DriverParameters::new()).unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedDriver(_)));
    }
}
