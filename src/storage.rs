//! Blob storage: originals and derivatives addressed by relative path.

use crate::error::TransformError;
use anyhow::Context;
use path_clean::PathClean;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Read/write-by-path semantics over the blob store. Paths are always
/// relative to the store root.
pub trait BlobStorage: Send + Sync {
    fn read(&self, path: &str) -> Result<Vec<u8>, TransformError>;
    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), TransformError>;
    fn delete(&self, path: &str) -> Result<(), TransformError>;
}

/// Filesystem store rooted at a directory.
pub struct FsBlobStorage {
    root: PathBuf,
}

impl FsBlobStorage {
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create storage root {root:?}"))?;
        Ok(Self { root })
    }

    /// Clean the relative path and refuse anything that would escape the
    /// root (absolute paths, leading `..` after cleaning).
    fn resolve(&self, relative: &str) -> Result<PathBuf, TransformError> {
        let cleaned = Path::new(relative).clean();
        if cleaned.is_absolute()
            || cleaned
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(TransformError::Validation(format!(
                "storage path {relative:?} escapes the storage root"
            )));
        }
        Ok(self.root.join(cleaned))
    }
}

impl BlobStorage for FsBlobStorage {
    fn read(&self, path: &str) -> Result<Vec<u8>, TransformError> {
        let full = self.resolve(path)?;
        if !full.is_file() {
            return Err(TransformError::NotFound(format!("no file at {path:?}")));
        }
        fs::read(&full)
            .with_context(|| format!("failed to read blob {full:?}"))
            .map_err(TransformError::from)
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), TransformError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create blob directory {parent:?}"))?;
        }
        fs::write(&full, bytes)
            .with_context(|| format!("failed to write blob {full:?}"))
            .map_err(TransformError::from)
    }

    fn delete(&self, path: &str) -> Result<(), TransformError> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::Error::from(e)
                .context(format!("failed to delete blob {full:?}"))
                .into()),
        }
    }
}

/// Fresh storage-relative name for a derivative. Never collides with the
/// source, so the pipeline can never overwrite its input.
pub fn derived_name(image_id: &str, extension: &str) -> String {
    format!("derived/{image_id}/{}.{extension}", Uuid::new_v4())
}
