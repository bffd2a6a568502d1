//! Path derivation for the archive input tree and the sync output tree.
//!
//! Every path is derived from explicit `(content, parameter, date_id,
//! interval)` arguments. Nothing here holds mutable state between calls.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::store::Interval;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    EmptyComponent { field: &'static str },
    InvalidComponent { field: &'static str, value: String },
    InvalidDateId { value: String },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::EmptyComponent { field } => {
                write!(f, "empty path component: {field}")
            }
            LayoutError::InvalidComponent { field, value } => {
                write!(f, "invalid path component for {field}: {value}")
            }
            LayoutError::InvalidDateId { value } => {
                write!(f, "invalid date id (expected YYYY-MM-DDTHHMMz): {value}")
            }
        }
    }
}

impl std::error::Error for LayoutError {}

type Result<T> = std::result::Result<T, LayoutError>;

/// Read-only archive tree: entry feed, parameter list and the raw/rollup
/// tables, all under `<root>/data/<content>/`.
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    root: PathBuf,
}

impl ArchiveLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn content_dir(&self, content: &str) -> Result<PathBuf> {
        validate_component("content", content)?;
        Ok(self.data_dir().join(content))
    }

    pub fn archfiles_path(&self, content: &str) -> Result<PathBuf> {
        Ok(self.content_dir(content)?.join("archfiles.jsonl"))
    }

    pub fn colnames_path(&self, content: &str) -> Result<PathBuf> {
        Ok(self.content_dir(content)?.join("colnames.json"))
    }

    pub fn raw_table_path(&self, content: &str, parameter: &str) -> Result<PathBuf> {
        validate_component("parameter", parameter)?;
        Ok(self
            .content_dir(content)?
            .join("full")
            .join(table_file_name(parameter)))
    }

    pub fn stat_table_path(
        &self,
        content: &str,
        parameter: &str,
        interval: Interval,
    ) -> Result<PathBuf> {
        validate_component("parameter", parameter)?;
        Ok(self
            .content_dir(content)?
            .join(interval.label())
            .join(table_file_name(parameter)))
    }
}

/// Sync output tree owned by this engine: per-content index table, one
/// directory of sync units per batch, and the content catalog.
#[derive(Debug, Clone)]
pub struct SyncLayout {
    root: PathBuf,
}

impl SyncLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn content_dir(&self, content: &str) -> Result<PathBuf> {
        validate_component("content", content)?;
        Ok(self.root.join("sync").join(content))
    }

    pub fn index_path(&self, content: &str) -> Result<PathBuf> {
        Ok(self.content_dir(content)?.join("index.csv"))
    }

    pub fn sync_unit_path(
        &self,
        content: &str,
        date_id: &str,
        resolution: &str,
    ) -> Result<PathBuf> {
        validate_date_id(date_id)?;
        validate_component("resolution", resolution)?;
        Ok(self
            .content_dir(content)?
            .join(date_id)
            .join(format!("{resolution}.json.gz")))
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join("sync").join("content_catalog.json.gz")
    }
}

fn table_file_name(parameter: &str) -> String {
    format!("{parameter}.dat")
}

fn validate_component(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(LayoutError::EmptyComponent { field });
    }
    if value == "." || value == ".." || value.contains('/') || value.contains('\\') {
        return Err(LayoutError::InvalidComponent {
            field,
            value: value.to_string(),
        });
    }
    if value.contains('\0') {
        return Err(LayoutError::InvalidComponent {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

// Date ids look like 2019-02-20T2109z: minute resolution, no colons so the
// same name works on every filesystem.
fn validate_date_id(value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    let bad = || LayoutError::InvalidDateId {
        value: value.to_string(),
    };
    if bytes.len() != 16 {
        return Err(bad());
    }
    if bytes[4] != b'-' || bytes[7] != b'-' || bytes[10] != b'T' || bytes[15] != b'z' {
        return Err(bad());
    }
    for (idx, byte) in bytes.iter().enumerate() {
        if matches!(idx, 4 | 7 | 10 | 15) {
            continue;
        }
        if !byte.is_ascii_digit() {
            return Err(bad());
        }
    }
    Ok(())
}
