//! On-disk storage for attachment payloads.
//!
//! The database keeps the file name and parent reference; the bytes live
//! under `{root}/{attachment_id}/{file_name}`.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileVaultError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),
}

pub struct FileVault {
    root: PathBuf,
}

impl FileVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the vault root directory.
    pub fn init(&self) -> Result<(), FileVaultError> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Writes the payload for an attachment and returns the stored path.
    /// Returns the sanitized file name's path; the caller records that name
    /// in the database.
    pub fn store(
        &self,
        attachment_id: i64,
        file_name: &str,
        data: &[u8],
    ) -> Result<PathBuf, FileVaultError> {
        let safe_name = sanitize_file_name(file_name)?;
        let dir = self.root.join(attachment_id.to_string());
        fs::create_dir_all(&dir)?;
        let path = dir.join(safe_name);
        fs::write(&path, data)?;
        Ok(path)
    }

    /// The path a stored payload lives at. Does not check existence.
    pub fn path_of(&self, attachment_id: i64, file_name: &str) -> Result<PathBuf, FileVaultError> {
        let safe_name = sanitize_file_name(file_name)?;
        Ok(self.root.join(attachment_id.to_string()).join(safe_name))
    }

    /// Removes an attachment's payload directory, if present.
    pub fn remove(&self, attachment_id: i64) -> Result<(), FileVaultError> {
        let dir = self.root.join(attachment_id.to_string());
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Sanitize a file name to prevent path traversal.
fn sanitize_file_name(file_name: &str) -> Result<String, FileVaultError> {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FileVaultError::InvalidFileName(file_name.to_string()))?;

    if name.contains('\0') || name.starts_with('.') || name == ".." {
        return Err(FileVaultError::InvalidFileName(file_name.to_string()));
    }

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    if sanitized.is_empty() {
        return Err(FileVaultError::InvalidFileName(file_name.to_string()));
    }

    Ok(sanitized)
}
