//! File storage for uploaded manuscripts, reports and production papers.
//!
//! The workflow only ever holds [`FileRef`]s. [`LocalFileStorage`] keeps
//! files under a root directory; the reference is the path relative to it.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use editorial_core::FileRef;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage path {0:?}")]
    InvalidPath(String),

    #[error("file storage I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store `bytes` under `logical_path` (e.g. `manuscripts/PMSL-24-0001/R0/paper.pdf`).
    /// The returned reference is unique even if the same path is stored twice.
    async fn store(&self, bytes: Vec<u8>, logical_path: &str) -> Result<FileRef, StorageError>;

    async fn exists(&self, file: &FileRef) -> Result<bool, StorageError>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, file: &FileRef) -> Result<bool, StorageError>;
}

/// Reject absolute paths and anything that climbs out of the root.
fn relative(path: &str) -> Result<&Path, StorageError> {
    let p = Path::new(path);
    let ok = !path.is_empty()
        && p.components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok {
        Ok(p)
    } else {
        Err(StorageError::InvalidPath(path.to_string()))
    }
}

pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, file: &FileRef) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(relative(&file.0)?))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn store(&self, bytes: Vec<u8>, logical_path: &str) -> Result<FileRef, StorageError> {
        let logical = relative(logical_path)?;
        let file_name = logical
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidPath(logical_path.to_string()))?;
        let unique = format!("{}-{}", Uuid::new_v4().simple(), file_name);
        let stored = match logical.parent() {
            Some(dir) => dir.join(unique),
            None => PathBuf::from(unique),
        };

        let target = self.root.join(&stored);
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(io_error(dir))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(io_error(&target))?;

        let reference = stored
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect::<Vec<_>>()
            .join("/");
        debug!("Stored {}", reference);
        Ok(FileRef(reference))
    }

    async fn exists(&self, file: &FileRef) -> Result<bool, StorageError> {
        let path = self.resolve(file)?;
        tokio::fs::try_exists(&path).await.map_err(io_error(&path))
    }

    async fn delete(&self, file: &FileRef) -> Result<bool, StorageError> {
        let path = self.resolve(file)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path)(e)),
        }
    }
}
