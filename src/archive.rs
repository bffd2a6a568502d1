//! Archive entry feed: the append log of ingested raw-data files.
//!
//! One JSON object per line, in ingest order. The log is re-read on every
//! query; the engine keeps no cache across batches.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Descriptor of one ingested raw-data file: its time window on the archive
/// timeline and the row range it occupies in the raw store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub filename: String,
    pub filetime_start: i64,
    pub filetime_stop: i64,
    pub rowstart: u64,
    pub rowstop: u64,
}

#[derive(Debug, Clone)]
pub struct ArchiveLog {
    path: PathBuf,
}

impl ArchiveLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries with `filetime_stop` in `(a, b]`, ordered by
    /// `filetime_stop`. Keyed on the stop tick so that resuming from a
    /// published batch's end tick picks up an entry that begins exactly
    /// there.
    pub fn entries_in(&self, a: i64, b: i64) -> Result<Vec<ArchiveEntry>> {
        let mut entries: Vec<ArchiveEntry> = self
            .read_all()?
            .into_iter()
            .filter(|entry| entry.filetime_stop > a && entry.filetime_stop <= b)
            .collect();
        entries.sort_by_key(|entry| entry.filetime_stop);
        Ok(entries)
    }

    /// All entries whose time window falls within `[t0, t1]`, ordered by
    /// `filetime_stop`. Used to embed file metadata in full-resolution sync
    /// units.
    pub fn entries_within(&self, t0: i64, t1: i64) -> Result<Vec<ArchiveEntry>> {
        let mut entries: Vec<ArchiveEntry> = self
            .read_all()?
            .into_iter()
            .filter(|entry| entry.filetime_start >= t0 && entry.filetime_stop <= t1)
            .collect();
        entries.sort_by_key(|entry| entry.filetime_stop);
        Ok(entries)
    }

    fn read_all(&self) -> Result<Vec<ArchiveEntry>> {
        let file = File::open(&self.path)
            .with_context(|| format!("open archive log {}", self.path.display()))?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ArchiveEntry = serde_json::from_str(&line)
                .with_context(|| format!("parse archive log {}", self.path.display()))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
