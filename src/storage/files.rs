//! Local filesystem storage for uploaded lecture files.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::FileStorage;
use crate::types::CourseId;
use crate::utils::sha256_hex;

/// Result of saving an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Path relative to the storage root, using `/` separators.
    pub locator: String,
    /// Hex SHA-256 of the content.
    pub checksum: String,
}

/// Stores files under `<root>/<course_id>/<uuid>-<file name>`.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    /// Open storage rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a locator inside the root. Absolute paths and `..` are rejected.
    fn resolve(&self, locator: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(locator);
        let mut resolved = self.root.clone();

        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidLocator(locator.to_string()));
                }
            }
        }

        if resolved == self.root {
            return Err(StorageError::InvalidLocator(locator.to_string()));
        }

        Ok(resolved)
    }
}

/// Keep only the final path component of an uploaded name.
fn base_name(file_name: &str) -> &str {
    Path::new(file_name)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
}

fn map_not_found(err: std::io::Error, locator: &str) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(locator.to_string())
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn save(
        &self,
        course_id: CourseId,
        file_name: &str,
        content: &[u8],
    ) -> StorageResult<StoredFile> {
        let course_dir = self.root.join(course_id.to_string());
        tokio::fs::create_dir_all(&course_dir).await?;

        let unique = format!("{}-{}", Uuid::new_v4(), base_name(file_name));
        tokio::fs::write(course_dir.join(&unique), content).await?;

        let locator = format!("{course_id}/{unique}");
        tracing::debug!(target: "storage", "saved {} bytes to {locator}", content.len());

        Ok(StoredFile {
            locator,
            checksum: sha256_hex(content),
        })
    }

    async fn get(&self, locator: &str) -> StorageResult<Vec<u8>> {
        let path = self.resolve(locator)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| map_not_found(e, locator))
    }

    async fn delete(&self, locator: &str) -> StorageResult<()> {
        let path = self.resolve(locator)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| map_not_found(e, locator))
    }
}
