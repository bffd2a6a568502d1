use std::path::PathBuf;

/// Engine configuration. Dates are archive timeline ticks (seconds).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root of the sync output tree.
    pub sync_root: PathBuf,
    /// Root of the archive input tree.
    pub archive_root: PathBuf,
    /// Content groups to process (substring match); empty means all.
    pub content: Vec<String>,
    /// Max days of archive entries per batch.
    pub max_days: f64,
    /// Max days to look back from `date_stop` when resuming.
    pub max_lookback: f64,
    /// Start tick for initial index creation.
    pub date_start: Option<i64>,
    /// Stop tick; defaults to now.
    pub date_stop: Option<i64>,
    /// Parameters excluded from statistical extraction.
    pub ignore_colnames: Vec<String>,
}

impl SyncConfig {
    pub fn new(sync_root: impl Into<PathBuf>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            sync_root: sync_root.into(),
            archive_root: archive_root.into(),
            content: Vec::new(),
            max_days: 1.5,
            max_lookback: 30.0,
            date_start: None,
            date_stop: None,
            ignore_colnames: vec![crate::extract::TIME_PARAMETER.to_string()],
        }
    }
}
