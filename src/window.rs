//! Batch windower: groups newly-available archive entries into consecutive,
//! bounded-duration batches whose boundaries fall on entry boundaries.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::archive::{ArchiveEntry, ArchiveLog};

/// One published batch: the unit of synchronization. `row1` is exclusive.
///
/// Field order matches the index table columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub filetime0: i64,
    pub filetime1: i64,
    pub date_id: String,
    pub row0: u64,
    pub row1: u64,
}

/// Derive the batch identifier from its start tick: `2019-02-20T2109z`,
/// minute resolution, no colons. Deterministic, so re-running the windower
/// on the same entries reproduces identical ids.
pub fn date_id(tick: i64) -> Result<String> {
    let dt = OffsetDateTime::from_unix_timestamp(tick)
        .map_err(|err| anyhow!("tick out of range: {err}"))?;
    Ok(format!(
        "{:04}-{:02}-{:02}T{:02}{:02}z",
        dt.year(),
        dt.month() as u8,
        dt.day(),
        dt.hour(),
        dt.minute()
    ))
}

/// Step through the entry feed in query windows of at most `max_days`,
/// collecting each non-empty window into one batch. Stops at the first
/// empty window or once `time_stop` is reached.
///
/// A batch's bounds come from its entries, and entries are selected by
/// their stop tick, so an entry straddling `filetime0` pulls the batch
/// start back to the entry's own start. The span bound is therefore
/// `max_days` plus at most one entry's duration. On resumes `filetime0`
/// is a previous entry boundary and the bound is exact.
pub fn build_batches(
    log: &ArchiveLog,
    mut filetime0: i64,
    time_stop: i64,
    max_days: f64,
) -> Result<Vec<Batch>> {
    let max_secs = (max_days * 86400.0) as i64;
    let mut batches = Vec::new();

    loop {
        let filetime1 = (filetime0 + max_secs).min(time_stop);
        log::debug!("select archive entries with filetime in ({filetime0}, {filetime1}]");
        let entries = log.entries_in(filetime0, filetime1)?;
        if entries.is_empty() {
            break;
        }
        log::debug!(
            "got {} entries spanning [{}, {}]",
            entries.len(),
            entries[0].filetime_start,
            entries[entries.len() - 1].filetime_stop
        );
        batches.push(batch_from_entries(&entries)?);
        filetime0 = filetime1;

        if filetime1 >= time_stop {
            break;
        }
    }

    Ok(batches)
}

fn batch_from_entries(entries: &[ArchiveEntry]) -> Result<Batch> {
    let first = &entries[0];
    let last = &entries[entries.len() - 1];
    Ok(Batch {
        filetime0: first.filetime_start,
        filetime1: last.filetime_stop,
        date_id: date_id(first.filetime_start)?,
        row0: first.rowstart,
        row1: last.rowstop,
    })
}
