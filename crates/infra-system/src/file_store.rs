// Local file storage
//
// Locations: `file:///abs/path`, `s3://bucket/key` (not supported here),
// or a path relative to the storage root.

use async_trait::async_trait;
use fakturace_core::error::{AppError, Result};
use fakturace_core::port::FileStore;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a location to a filesystem path
    pub fn resolve(&self, location: &str) -> Result<PathBuf> {
        if let Some(path) = location.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        if location.starts_with("s3://") {
            return Err(AppError::Config("object storage is not configured".to_string()));
        }

        let relative = Path::new(location);
        let escapes_root = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if location.is_empty() || escapes_root {
            return Err(AppError::Validation(format!(
                "Storage location {:?} is outside the storage root",
                location
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read(&self, location: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(location)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(path = %path.display(), bytes = bytes.len(), "File read");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}
