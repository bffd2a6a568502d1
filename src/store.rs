//! Row-addressable stores underneath the sync engine.
//!
//! Two table shapes exist per parameter: a raw sample table (parallel data
//! and quality arrays, one row per sample) and a fixed-cadence rollup table
//! (one structured row nominally every `dt`, rows missing where no samples
//! existed). The engine only ever needs "read rows [a, b)" and "read scalar
//! row r"; everything else stays behind this module.
//!
//! File layout, little-endian throughout:
//!
//! ```text
//! raw:    magic u32 | version u32 | n_rows u64 | data f64 * n | quality u8 * n
//! rollup: magic u32 | version u32 | n_rows u64 | StatRow * n
//! ```

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub const RAW_MAGIC: u32 = 0x5452_4154;
pub const STAT_MAGIC: u32 = 0x5441_5453;
pub const TABLE_VERSION: u32 = 1;

const HEADER_LEN: u64 = 16;
const STAT_ROW_LEN: u64 = 36;

/// Statistical rollup granularities and their nominal cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    FiveMin,
    Daily,
}

impl Interval {
    pub const ALL: [Interval; 2] = [Interval::FiveMin, Interval::Daily];

    pub fn label(&self) -> &'static str {
        match self {
            Interval::FiveMin => "5min",
            Interval::Daily => "daily",
        }
    }

    /// Nominal seconds between rows. The 5-minute cadence is 328 s, the
    /// historical sampling interval of the source telemetry, not 300.
    pub fn dt(&self) -> f64 {
        match self {
            Interval::FiveMin => 328.0,
            Interval::Daily => 86400.0,
        }
    }
}

/// One rollup table row. Nominal row time is `(index + 0.5) * dt`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatRow {
    pub index: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub n_samples: u32,
}

/// Raw sample table: parallel data/quality arrays.
#[derive(Debug)]
pub struct RawTable {
    file: File,
    n_rows: u64,
}

impl RawTable {
    pub fn open(path: &Path) -> Result<Self> {
        let (file, n_rows) = open_table(path, RAW_MAGIC)?;
        Ok(Self { file, n_rows })
    }

    pub fn len(&self) -> u64 {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    /// Read data and quality for rows `[row0, row1)`.
    pub fn read_rows(&mut self, row0: u64, row1: u64) -> Result<(Vec<f64>, Vec<u8>)> {
        check_range(row0, row1, self.n_rows)?;
        let count = (row1 - row0) as usize;

        self.file.seek(SeekFrom::Start(HEADER_LEN + row0 * 8))?;
        let mut buf = vec![0u8; count * 8];
        self.file.read_exact(&mut buf)?;
        let data = buf
            .chunks_exact(8)
            .map(|chunk| f64::from_le_bytes(chunk.try_into().expect("slice length")))
            .collect();

        self.file
            .seek(SeekFrom::Start(HEADER_LEN + self.n_rows * 8 + row0))?;
        let mut quality = vec![0u8; count];
        self.file.read_exact(&mut quality)?;

        Ok((data, quality))
    }

    /// Read the data value at a single row.
    pub fn read_value_at(&mut self, row: u64) -> Result<f64> {
        if row >= self.n_rows {
            return Err(anyhow!("row {row} out of bounds (len {})", self.n_rows));
        }
        self.file.seek(SeekFrom::Start(HEADER_LEN + row * 8))?;
        let mut buf = [0u8; 8];
        self.file.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }
}

/// Fixed-cadence rollup table.
pub struct StatTable {
    file: File,
    n_rows: u64,
}

impl StatTable {
    pub fn open(path: &Path) -> Result<Self> {
        let (file, n_rows) = open_table(path, STAT_MAGIC)?;
        Ok(Self { file, n_rows })
    }

    pub fn len(&self) -> u64 {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    /// Read rows `[row0, row1)`.
    pub fn read_rows(&mut self, row0: u64, row1: u64) -> Result<Vec<StatRow>> {
        check_range(row0, row1, self.n_rows)?;
        let count = (row1 - row0) as usize;

        self.file
            .seek(SeekFrom::Start(HEADER_LEN + row0 * STAT_ROW_LEN))?;
        let mut buf = vec![0u8; count * STAT_ROW_LEN as usize];
        self.file.read_exact(&mut buf)?;

        Ok(buf
            .chunks_exact(STAT_ROW_LEN as usize)
            .map(decode_stat_row)
            .collect())
    }

    pub fn last_row(&mut self) -> Result<Option<StatRow>> {
        if self.n_rows == 0 {
            return Ok(None);
        }
        Ok(self.read_rows(self.n_rows - 1, self.n_rows)?.pop())
    }
}

fn open_table(path: &Path, magic: u32) -> Result<(File, u64)> {
    let mut file =
        File::open(path).with_context(|| format!("open table {}", path.display()))?;
    let mut buf = [0u8; HEADER_LEN as usize];
    file.read_exact(&mut buf)
        .with_context(|| format!("read table header {}", path.display()))?;
    let found_magic = u32::from_le_bytes(buf[0..4].try_into().expect("slice length"));
    let version = u32::from_le_bytes(buf[4..8].try_into().expect("slice length"));
    let n_rows = u64::from_le_bytes(buf[8..16].try_into().expect("slice length"));
    if found_magic != magic {
        return Err(SyncError::BadStoreHeader {
            path: path.to_path_buf(),
            detail: "magic mismatch",
        }
        .into());
    }
    if version != TABLE_VERSION {
        return Err(SyncError::BadStoreHeader {
            path: path.to_path_buf(),
            detail: "unsupported version",
        }
        .into());
    }
    Ok((file, n_rows))
}

fn check_range(row0: u64, row1: u64, n_rows: u64) -> Result<()> {
    if row0 > row1 || row1 > n_rows {
        return Err(anyhow!("row range {row0}..{row1} out of bounds (len {n_rows})"));
    }
    Ok(())
}

fn decode_stat_row(chunk: &[u8]) -> StatRow {
    StatRow {
        index: u64::from_le_bytes(chunk[0..8].try_into().expect("slice length")),
        mean: f64::from_le_bytes(chunk[8..16].try_into().expect("slice length")),
        min: f64::from_le_bytes(chunk[16..24].try_into().expect("slice length")),
        max: f64::from_le_bytes(chunk[24..32].try_into().expect("slice length")),
        n_samples: u32::from_le_bytes(chunk[32..36].try_into().expect("slice length")),
    }
}

/// Create a raw table file. Used by ingest tooling and test fixtures; the
/// sync engine itself never writes into the archive tree.
pub fn write_raw_table(path: &Path, data: &[f64], quality: &[u8]) -> Result<()> {
    if data.len() != quality.len() {
        return Err(anyhow!(
            "data/quality length mismatch: {} vs {}",
            data.len(),
            quality.len()
        ));
    }
    let mut bytes = Vec::with_capacity(HEADER_LEN as usize + data.len() * 9);
    write_header(&mut bytes, RAW_MAGIC, data.len() as u64);
    for value in data {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes.extend_from_slice(quality);
    write_atomic(path, &bytes)
}

/// Create a rollup table file.
pub fn write_stat_table(path: &Path, rows: &[StatRow]) -> Result<()> {
    let mut bytes =
        Vec::with_capacity(HEADER_LEN as usize + rows.len() * STAT_ROW_LEN as usize);
    write_header(&mut bytes, STAT_MAGIC, rows.len() as u64);
    for row in rows {
        bytes.extend_from_slice(&row.index.to_le_bytes());
        bytes.extend_from_slice(&row.mean.to_le_bytes());
        bytes.extend_from_slice(&row.min.to_le_bytes());
        bytes.extend_from_slice(&row.max.to_le_bytes());
        bytes.extend_from_slice(&row.n_samples.to_le_bytes());
    }
    write_atomic(path, &bytes)
}

fn write_header(bytes: &mut Vec<u8>, magic: u32, n_rows: u64) {
    bytes.extend_from_slice(&magic.to_le_bytes());
    bytes.extend_from_slice(&TABLE_VERSION.to_le_bytes());
    bytes.extend_from_slice(&n_rows.to_le_bytes());
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("dat.tmp");
    let _ = std::fs::remove_file(&tmp);
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .with_context(|| format!("create {}", tmp.display()))?;
    file.write_all(bytes)?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
