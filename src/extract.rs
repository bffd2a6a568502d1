//! Sync-unit extraction: full-resolution raw slices and statistical rollup
//! slices for one published batch.
//!
//! Units are write-once. If the target file exists the extraction is
//! skipped entirely, which is what makes re-running after a partial failure
//! safe. A unit is either complete on disk or absent; writes go through a
//! temp file and rename.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::archive::{ArchiveEntry, ArchiveLog};
use crate::layout::{ArchiveLayout, SyncLayout};
use crate::resolve::stat_rows_for_window;
use crate::store::{Interval, RawTable, StatRow, StatTable};
use crate::window::Batch;

pub const SYNC_UNIT_VERSION: u32 = 1;

/// The implicit time parameter carried by every content group.
pub const TIME_PARAMETER: &str = "TIME";

/// One packaged extraction: one batch at one resolution, self-describing
/// and readable without this crate.
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncUnit {
    pub version: u32,
    pub content: String,
    pub date_id: String,
    pub interval: String,
    /// Raw archive-entry metadata; full resolution only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archfiles: Option<Vec<ArchiveEntry>>,
    pub columns: Vec<ColumnSlice>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ColumnSlice {
    pub parameter: String,
    pub row0: u64,
    pub row1: u64,
    pub data: ColumnData,
    /// Quality flags; full resolution only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnData {
    Samples(Vec<f64>),
    Stats(Vec<StatRow>),
}

/// Write the full-resolution sync unit for `batch`: data and quality for
/// rows `[row0, row1)` of every parameter plus TIME, read straight at the
/// batch's row bounds, along with the archive entries inside its window.
/// Returns whether a unit was written (false means it already existed).
pub fn update_sync_full(
    archive: &ArchiveLayout,
    sync: &SyncLayout,
    content: &str,
    colnames: &[String],
    batch: &Batch,
) -> Result<bool> {
    let outfile = sync.sync_unit_path(content, &batch.date_id, "full")?;
    if outfile.exists() {
        log::debug!("skipping {}, already exists", outfile.display());
        return Ok(false);
    }

    let log = ArchiveLog::new(archive.archfiles_path(content)?);
    let archfiles = log.entries_within(batch.filetime0, batch.filetime1)?;

    let mut parameters: Vec<&str> = colnames.iter().map(String::as_str).collect();
    if !parameters.contains(&TIME_PARAMETER) {
        parameters.push(TIME_PARAMETER);
    }

    // Resolve every parameter's store up front; absence is an expected
    // outcome, not an error.
    let mut stores: Vec<(String, Option<RawTable>)> = Vec::with_capacity(parameters.len());
    for parameter in &parameters {
        let path = archive.raw_table_path(content, parameter)?;
        let table = if path.exists() {
            Some(RawTable::open(&path)?)
        } else {
            None
        };
        stores.push((parameter.to_string(), table));
    }

    let mut columns = Vec::new();
    for (parameter, table) in &mut stores {
        let table = match table {
            Some(table) => table,
            None => {
                log::debug!("no data file for {parameter} - skipping");
                continue;
            }
        };
        let (data, quality) = table.read_rows(batch.row0, batch.row1)?;
        columns.push(ColumnSlice {
            parameter: parameter.clone(),
            row0: batch.row0,
            row1: batch.row1,
            data: ColumnData::Samples(data),
            quality: Some(quality),
        });
    }

    let unit = SyncUnit {
        version: SYNC_UNIT_VERSION,
        content: content.to_string(),
        date_id: batch.date_id.clone(),
        interval: "full".to_string(),
        archfiles: Some(archfiles),
        columns: unit_columns(columns),
    };

    log::info!(
        "writing {} with {} rows of data and {} parameters",
        outfile.display(),
        batch.row1 - batch.row0,
        parameters.len()
    );
    write_unit(&outfile, &unit)?;
    Ok(true)
}

/// Write the statistical sync unit for `batch` at `interval`. The batch's
/// row bounds are translated to a time window through the raw TIME table,
/// then each parameter's rollup store is searched independently. Returns
/// whether a unit was written.
pub fn update_sync_stat(
    archive: &ArchiveLayout,
    sync: &SyncLayout,
    content: &str,
    colnames: &[String],
    ignore: &[String],
    batch: &Batch,
    interval: Interval,
) -> Result<bool> {
    let outfile = sync.sync_unit_path(content, &batch.date_id, interval.label())?;
    if outfile.exists() {
        log::debug!("skipping {}, already exists", outfile.display());
        return Ok(false);
    }

    let time_path = archive.raw_table_path(content, TIME_PARAMETER)?;
    let mut time_table = RawTable::open(&time_path)
        .with_context(|| format!("open time table for {content}"))?;
    let tstart = time_table.read_value_at(batch.row0)?;
    // The final index row has row1 equal to the table length; clamp so the
    // stop time read stays inside the table.
    let last_row = batch.row1.min(time_table.len().saturating_sub(1));
    let tstop = time_table.read_value_at(last_row)?;

    let mut stores: Vec<(String, Option<StatTable>)> = Vec::new();
    for parameter in colnames {
        if ignore.contains(parameter) {
            continue;
        }
        let path = archive.stat_table_path(content, parameter, interval)?;
        let table = if path.exists() {
            Some(StatTable::open(&path)?)
        } else {
            None
        };
        stores.push((parameter.clone(), table));
    }

    let mut columns = Vec::new();
    let mut n_rows_set: BTreeSet<u64> = BTreeSet::new();
    for (parameter, table) in &mut stores {
        let table = match table {
            Some(table) => table,
            None => {
                log::debug!("no {} stat data for {parameter} - skipping", interval.label());
                continue;
            }
        };
        let slice = stat_rows_for_window(table, interval.dt(), tstart, tstop)?;
        log::debug!(
            "got stat rows {}..{} for {} {parameter}",
            slice.range.row0,
            slice.range.row1,
            interval.label()
        );
        n_rows_set.insert(slice.range.len());
        if !slice.range.is_empty() {
            columns.push(ColumnSlice {
                parameter: parameter.clone(),
                row0: slice.range.row0,
                row1: slice.range.row1,
                data: ColumnData::Stats(slice.rows),
                quality: None,
            });
        }
    }

    // Rollup stores can drift apart per parameter; report it but still
    // publish what was extracted.
    if n_rows_set.len() > 1 {
        log::warn!("unexpected difference in number of rows: {n_rows_set:?}");
    }

    let unit = SyncUnit {
        version: SYNC_UNIT_VERSION,
        content: content.to_string(),
        date_id: batch.date_id.clone(),
        interval: interval.label().to_string(),
        archfiles: None,
        columns: unit_columns(columns),
    };

    log::info!(
        "writing {} with {} column(s)",
        outfile.display(),
        unit.columns.len()
    );
    write_unit(&outfile, &unit)?;
    Ok(true)
}

// Columns sort by parameter so a unit's bytes do not depend on the listing
// order of the parameter catalog.
fn unit_columns(mut columns: Vec<ColumnSlice>) -> Vec<ColumnSlice> {
    columns.sort_by(|a, b| a.parameter.cmp(&b.parameter));
    columns
}

fn write_unit(path: &Path, unit: &SyncUnit) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path_for(path)?;
    let _ = std::fs::remove_file(&tmp);

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .with_context(|| format!("create {}", tmp.display()))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    serde_json::to_writer(&mut encoder, unit)?;
    let file = encoder.finish()?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a sync unit back. Not used by the engine itself; mirrors and tests
/// read units through this.
pub fn read_sync_unit(path: &Path) -> Result<SyncUnit> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("open sync unit {}", path.display()))?;
    let mut decoder = GzDecoder::new(file);
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    let unit: SyncUnit = serde_json::from_slice(&buf)
        .with_context(|| format!("parse sync unit {}", path.display()))?;
    Ok(unit)
}

fn tmp_path_for(path: &Path) -> Result<std::path::PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("missing filename for {}", path.display()))?
        .to_string_lossy();
    Ok(path.with_file_name(format!("{name}.tmp")))
}
