//! Upload storage. Validates incoming documents and keeps them on disk until printed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{DEFAULT_MAX_FILE_SIZE, StorageConfig};
use crate::error::StorageError;
use crate::jobs::model::MediaType;

/// Where print payloads live between upload and retirement.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persist an uploaded document and return its location.
    async fn store(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, StorageError>;

    /// Whether the file at `path` still exists.
    async fn exists(&self, path: &Path) -> bool;

    /// Remove a stored document. Removing a missing file is not an error.
    async fn delete(&self, path: &Path) -> Result<(), StorageError>;
}

/// Map a filename to the document kind it holds.
pub fn media_type_for(filename: &str) -> Option<MediaType> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MediaType::Pdf),
        "doc" | "docx" => Some(MediaType::Word),
        _ => None,
    }
}

/// Keep only characters that are safe in a file name.
fn sanitize_filename(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// File store rooted at a local directory.
pub struct LocalFileStore {
    base_dir: PathBuf,
    max_file_size: u64,
}

impl LocalFileStore {
    /// Create a store rooted at `base_dir` with the default size limit.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.upload_dir.clone()).with_max_file_size(config.max_file_size)
    }

    /// Set the upload size limit in bytes.
    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = max;
        self
    }

    /// Check name and size of an upload before anything touches the disk.
    pub fn validate(&self, filename: &str, size: u64) -> Result<MediaType, StorageError> {
        if filename.trim().is_empty() || size == 0 {
            return Err(StorageError::Empty);
        }

        let Some(media_type) = media_type_for(filename) else {
            warn!(filename, "Invalid file format");
            return Err(StorageError::UnsupportedFormat {
                filename: filename.to_string(),
            });
        };

        if size > self.max_file_size {
            warn!(size, max = self.max_file_size, "File size exceeded limit");
            return Err(StorageError::TooLarge {
                size,
                max: self.max_file_size,
            });
        }

        Ok(media_type)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn store(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        self.validate(filename, bytes.len() as u64)?;

        if fs::metadata(&self.base_dir).await.is_err() {
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|source| StorageError::Io {
                    path: self.base_dir.clone(),
                    source,
                })?;
            info!(dir = %self.base_dir.display(), "Created upload directory");
        }

        let unique = format!("{}_{}", Uuid::new_v4(), sanitize_filename(filename));
        let path = self.base_dir.join(unique);

        fs::write(&path, bytes)
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;

        info!(path = %path.display(), size = bytes.len(), "File saved");
        Ok(path)
    }

    async fn exists(&self, path: &Path) -> bool {
        if path.as_os_str().is_empty() {
            return false;
        }
        match fs::metadata(path).await {
            Ok(meta) => meta.is_file(),
            Err(_) => {
                warn!(path = %path.display(), "File does not exist");
                false
            }
        }
    }

    async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path).await {
            Ok(()) => {
                info!(path = %path.display(), "Cleaned up print file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "File already cleaned up");
                Ok(())
            }
            Err(source) => Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}
