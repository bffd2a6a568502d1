//! The persisted ledger of published batches for one content group.
//!
//! The index is the authority for "what has already been synced". It only
//! ever grows, and a refresh persists nothing unless the whole extended
//! table still satisfies the ordering and contiguity invariants.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::archive::ArchiveLog;
use crate::error::SyncError;
use crate::window::{build_batches, Batch};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexTable {
    rows: Vec<Batch>,
}

/// Outcome of one index refresh.
#[derive(Debug)]
pub enum IndexRefresh {
    /// First run and no entries in the query window: no index yet.
    Absent,
    /// No new entries; the persisted table is returned untouched.
    Unchanged(IndexTable),
    /// New batches were appended, validated and persisted.
    Extended { table: IndexTable, new: Vec<Batch> },
}

impl IndexTable {
    pub fn rows(&self) -> &[Batch] {
        &self.rows
    }

    pub fn last(&self) -> Option<&Batch> {
        self.rows.last()
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("open index {}", path.display()))?;
        let mut rows = Vec::new();
        for record in reader.deserialize() {
            let batch: Batch =
                record.with_context(|| format!("parse index {}", path.display()))?;
            rows.push(batch);
        }
        Ok(Some(Self { rows }))
    }

    fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("csv.tmp");
        let _ = std::fs::remove_file(&tmp);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .with_context(|| format!("create {}", tmp.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|err| anyhow!("finish index write: {err}"))?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Returns a description of the first violated invariant, or None.
    fn check_consistency(&self) -> Option<String> {
        for batch in &self.rows {
            if batch.filetime0 >= batch.filetime1 {
                return Some(format!(
                    "batch {} spans no time ({}..{})",
                    batch.date_id, batch.filetime0, batch.filetime1
                ));
            }
        }
        for pair in self.rows.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.filetime0 < prev.filetime1 {
                return Some(format!(
                    "time ranges overlap at date_id={}",
                    next.date_id
                ));
            }
            if next.filetime0 <= prev.filetime0 {
                return Some(format!(
                    "filetime values not increasing at date_id={}",
                    next.date_id
                ));
            }
            if prev.row1 != next.row0 {
                return Some(format!("rows not contiguous at date_id={}", prev.date_id));
            }
        }
        None
    }

    /// Render the table for the inconsistency diagnostic.
    fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{:>12} {:>12} {:>16} {:>10} {:>10}",
            "filetime0", "filetime1", "date_id", "row0", "row1");
        for row in &self.rows {
            let _ = writeln!(
                out,
                "{:>12} {:>12} {:>16} {:>10} {:>10}",
                row.filetime0, row.filetime1, row.date_id, row.row0, row.row1
            );
        }
        out
    }
}

/// Refresh the index for one content group: window the entries not yet
/// represented, append them, validate the full table and persist it.
///
/// The starting bound is the last published batch's end tick, clamped to
/// look back at most `max_lookback` days from `time_stop`; on first run it
/// is `date_start`. An invariant violation aborts without persisting and
/// surfaces as [`SyncError::IndexInconsistency`].
pub fn refresh_index(
    index_path: &Path,
    log: &ArchiveLog,
    content: &str,
    date_start: i64,
    time_stop: i64,
    max_days: f64,
    max_lookback: f64,
) -> Result<IndexRefresh> {
    let existing = IndexTable::load(index_path)?;
    let lookback_floor = time_stop - (max_lookback * 86400.0) as i64;
    let filetime0 = match &existing {
        // Relevant for rarely sampled content: never re-scan more than the
        // lookback window even if the index is far behind.
        Some(table) => match table.last() {
            Some(last) => last.filetime1.max(lookback_floor),
            None => lookback_floor,
        },
        None => date_start,
    };

    let new = build_batches(log, filetime0, time_stop, max_days)?;
    if new.is_empty() {
        return Ok(match existing {
            Some(table) => IndexRefresh::Unchanged(table),
            None => IndexRefresh::Absent,
        });
    }

    let mut table = existing.unwrap_or_default();
    table.rows.extend(new.iter().cloned());

    if let Some(msg) = table.check_consistency() {
        return Err(SyncError::IndexInconsistency {
            content: content.to_string(),
            detail: format!("{msg}\n{}", table.render()),
        }
        .into());
    }

    log::info!(
        "writing {} new row(s) to index file {}",
        new.len(),
        index_path.display()
    );
    table.persist(index_path)?;

    Ok(IndexRefresh::Extended { table, new })
}
