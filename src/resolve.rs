//! Row-range resolution for fixed-cadence rollup tables.
//!
//! A rollup table nominally holds one row every `dt` seconds, but rows are
//! missing wherever no samples existed, so row offset cannot be computed as
//! `(time - t0) / dt`. Instead: estimate how far back from the end of the
//! table `tstart` can be, pad the estimate so missing rows cannot push the
//! true boundary out of the slice, then binary-search the slice's stored
//! times for both boundaries. Scans a bounded tail, never the whole table.

use anyhow::Result;

use crate::store::{StatRow, StatTable};

// Extra rows read beyond the cadence estimate. Missing rows make the table
// shorter than the nominal cadence predicts, so backing up by the estimate
// plus this pad always reaches at least the row holding tstart.
const SEARCH_PAD: u64 = 10;

/// Half-open row interval `[row0, row1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub row0: u64,
    pub row1: u64,
}

impl RowRange {
    pub fn len(&self) -> u64 {
        self.row1 - self.row0
    }

    pub fn is_empty(&self) -> bool {
        self.row0 == self.row1
    }
}

/// The rows of `table` whose nominal time lies in `[tstart, tstop)`, plus
/// the resolved interval. A window entirely past the last stored row gives
/// an empty interval at the table end, not an error.
pub fn stat_rows_for_window(
    table: &mut StatTable,
    dt: f64,
    tstart: f64,
    tstop: f64,
) -> Result<StatSlice> {
    let len = table.len();
    let last = match table.last_row()? {
        Some(row) => row,
        None => {
            return Ok(StatSlice {
                rows: Vec::new(),
                range: RowRange { row0: 0, row1: 0 },
            })
        }
    };

    let last_time = row_time(&last, dt);
    if tstart > last_time {
        return Ok(StatSlice {
            rows: Vec::new(),
            range: RowRange {
                row0: len,
                row1: len,
            },
        });
    }

    let delta_rows = (((last_time - tstart) / dt) as u64 + SEARCH_PAD).min(len);
    let offset = len - delta_rows;
    let tail = table.read_rows(offset, len)?;

    // Left insertion points, so the result is exactly the rows with
    // tstart <= time < tstop.
    let sub0 = tail.partition_point(|row| row_time(row, dt) < tstart);
    let sub1 = tail.partition_point(|row| row_time(row, dt) < tstop);

    Ok(StatSlice {
        rows: tail[sub0..sub1].to_vec(),
        range: RowRange {
            row0: offset + sub0 as u64,
            row1: offset + sub1 as u64,
        },
    })
}

/// Resolver output: the slice contents and the absolute row interval they
/// came from.
#[derive(Debug, Clone)]
pub struct StatSlice {
    pub rows: Vec<StatRow>,
    pub range: RowRange,
}

fn row_time(row: &StatRow, dt: f64) -> f64 {
    (row.index as f64 + 0.5) * dt
}
