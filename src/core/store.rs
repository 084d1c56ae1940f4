//! Scan storage: resolving identifiers against an explicit storage root.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::Serialize;
use thiserror::Error;

/// File extensions recognised as scan artifacts.
const SCAN_EXTENSIONS: &[&str] = &["ply", "splat"];

/// Errors that can occur while resolving or reading a stored scan.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Scan not found: {0}")]
    NotFound(String),

    #[error("Invalid scan identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Failed to read scan '{identifier}': {source}")]
    Read {
        identifier: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage directory not found: {0}")]
    DirectoryNotFound(PathBuf),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Listing entry for one stored scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanEntry {
    pub name: String,
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modified: f64,
}

/// A directory of scan artifacts addressed by relative file name.
#[derive(Debug, Clone)]
pub struct ScanStore {
    root: PathBuf,
}

impl ScanStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an identifier to a path inside the storage root.
    ///
    /// Identifiers must be relative and may not climb out of the root.
    pub fn resolve(&self, identifier: &str) -> Result<PathBuf> {
        let trimmed = identifier.trim();
        if trimmed.is_empty() {
            return Err(StoreError::InvalidIdentifier("empty identifier".to_string()));
        }

        let relative = Path::new(trimmed);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(StoreError::InvalidIdentifier(identifier.to_string()));
        }

        let path = self.root.join(relative);
        if !path.is_file() {
            return Err(StoreError::NotFound(identifier.to_string()));
        }
        Ok(path)
    }

    /// Read the raw bytes of a stored scan.
    pub fn read(&self, identifier: &str) -> Result<(PathBuf, Vec<u8>)> {
        let path = self.resolve(identifier)?;
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(identifier.to_string()),
            _ => StoreError::Read {
                identifier: identifier.to_string(),
                source: e,
            },
        })?;
        Ok((path, bytes))
    }

    /// List stored scans, newest first.
    pub fn list(&self) -> Result<Vec<ScanEntry>> {
        if !self.root.is_dir() {
            return Err(StoreError::DirectoryNotFound(self.root.clone()));
        }

        let mut entries: Vec<ScanEntry> = fs::read_dir(&self.root)
            .map_err(|e| StoreError::Read {
                identifier: self.root.display().to_string(),
                source: e,
            })?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| SCAN_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)))
                    .unwrap_or(false)
            })
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                let modified = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                Some(ScanEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size: meta.len(),
                    modified,
                })
            })
            .collect();

        entries.sort_by(|a, b| {
            b.modified
                .total_cmp(&a.modified)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(entries)
    }
}
