//! On-disk enrollment photos: `<root>/<student>/photo_<slot>.jpg`.

use rollcall_core::EncodedImage;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhotoStoreError {
    #[error("invalid student name: {0:?}")]
    InvalidName(String),
    #[error("photo storage failed: {0}")]
    Io(#[from] io::Error),
}

/// Validate a student name for use as a folder name. Returns the trimmed name.
pub fn validate_student_name(name: &str) -> Result<&str, PhotoStoreError> {
    let trimmed = name.trim();
    let bad = trimmed.is_empty()
        || trimmed.len() > 128
        || trimmed.starts_with('.')
        || trimmed.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if bad {
        return Err(PhotoStoreError::InvalidName(name.to_string()));
    }
    Ok(trimmed)
}

#[derive(Debug, Clone)]
pub struct PhotoStore {
    root: PathBuf,
}

impl PhotoStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn student_dir(&self, student: &str) -> Result<PathBuf, PhotoStoreError> {
        Ok(self.root.join(validate_student_name(student)?))
    }

    fn photo_path(&self, student: &str, slot: u32) -> Result<PathBuf, PhotoStoreError> {
        Ok(self.student_dir(student)?.join(format!("photo_{slot}.jpg")))
    }

    /// Write one slot, replacing whatever was there. Readers never see a
    /// partially written file.
    pub async fn store(
        &self,
        student: &str,
        slot: u32,
        image: &EncodedImage,
    ) -> Result<PathBuf, PhotoStoreError> {
        let path = self.photo_path(student, slot)?;
        let dir = path.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(dir).await?;

        let tmp = path.with_extension("jpg.tmp");
        tokio::fs::write(&tmp, image.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(path)
    }

    /// Read one slot; `None` when it was never stored.
    pub async fn load(
        &self,
        student: &str,
        slot: u32,
    ) -> Result<Option<EncodedImage>, PhotoStoreError> {
        let path = self.photo_path(student, slot)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(EncodedImage::new(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
