//! Per-content orchestration: refresh the index, extract sync units for
//! every indexed batch that still lacks them, then publish the content
//! catalog.
//!
//! Content groups own disjoint index and store state, so a structural
//! failure in one never aborts the others.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::archive::ArchiveLog;
use crate::config::SyncConfig;
use crate::extract::{update_sync_full, update_sync_stat};
use crate::index::{refresh_index, IndexRefresh};
use crate::layout::{ArchiveLayout, SyncLayout};
use crate::store::Interval;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub contents_processed: usize,
    pub contents_failed: usize,
    pub batches_published: usize,
}

pub struct SyncDriver {
    config: SyncConfig,
    archive: ArchiveLayout,
    sync: SyncLayout,
}

impl SyncDriver {
    pub fn new(config: SyncConfig) -> Self {
        let archive = ArchiveLayout::new(&config.archive_root);
        let sync = SyncLayout::new(&config.sync_root);
        Self {
            config,
            archive,
            sync,
        }
    }

    /// One full pass over every selected content group.
    pub fn run_once(&self) -> Result<RunStats> {
        let time_stop = self.config.date_stop.unwrap_or_else(now_tick);
        let contents = self.discover_contents()?;
        let selected: Vec<&String> = contents
            .iter()
            .filter(|content| self.selected(content))
            .collect();

        let mut stats = RunStats::default();
        for content in selected {
            match self.update_content(content, time_stop) {
                Ok(published) => {
                    stats.contents_processed += 1;
                    stats.batches_published += published;
                }
                Err(err) => {
                    log::error!("content {content} failed: {err:#}");
                    stats.contents_failed += 1;
                }
            }
        }

        self.publish_catalog(&contents)?;
        Ok(stats)
    }

    /// Refresh one content group's index, then extract sync units for every
    /// indexed batch. Returns the number of batches with a newly written
    /// unit.
    ///
    /// Extraction walks the full table, not just the rows this refresh
    /// added: a run interrupted after the index write leaves indexed
    /// batches without units, and the next run must fill them in. The
    /// write-once existence check makes already-published batches free.
    fn update_content(&self, content: &str, time_stop: i64) -> Result<usize> {
        let log = ArchiveLog::new(self.archive.archfiles_path(content)?);
        let index_path = self.sync.index_path(content)?;
        let date_start = self
            .config
            .date_start
            .unwrap_or(time_stop - (self.config.max_lookback * 86400.0) as i64);

        let refresh = refresh_index(
            &index_path,
            &log,
            content,
            date_start,
            time_stop,
            self.config.max_days,
            self.config.max_lookback,
        )?;

        let table = match refresh {
            IndexRefresh::Absent => {
                log::warn!("no index table for {content}");
                return Ok(0);
            }
            IndexRefresh::Unchanged(table) => {
                log::info!("no updates available for content {content}");
                table
            }
            IndexRefresh::Extended { table, new } => {
                log::info!("index for {content} gained {} batch(es)", new.len());
                table
            }
        };

        let colnames = self.load_colnames(content)?;
        let mut published = 0;
        for batch in table.rows() {
            let mut wrote =
                update_sync_full(&self.archive, &self.sync, content, &colnames, batch)?;
            for interval in Interval::ALL {
                wrote |= update_sync_stat(
                    &self.archive,
                    &self.sync,
                    content,
                    &colnames,
                    &self.config.ignore_colnames,
                    batch,
                    interval,
                )?;
            }
            if wrote {
                published += 1;
            }
        }
        Ok(published)
    }

    /// Content groups are directories under the archive data root that
    /// carry an entry feed, processed in sorted order.
    fn discover_contents(&self) -> Result<Vec<String>> {
        let data_dir = self.archive.data_dir();
        let mut contents = Vec::new();
        if !data_dir.exists() {
            return Ok(contents);
        }
        for entry in std::fs::read_dir(&data_dir)
            .with_context(|| format!("read {}", data_dir.display()))?
        {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if self.archive.archfiles_path(&name)?.exists() {
                contents.push(name);
            }
        }
        contents.sort();
        Ok(contents)
    }

    fn selected(&self, content: &str) -> bool {
        self.config.content.is_empty()
            || self
                .config
                .content
                .iter()
                .any(|filter| content.contains(filter.as_str()))
    }

    fn load_colnames(&self, content: &str) -> Result<Vec<String>> {
        let path = self.archive.colnames_path(content)?;
        let data = std::fs::read(&path)
            .with_context(|| format!("read colnames {}", path.display()))?;
        let colnames: Vec<String> = serde_json::from_slice(&data)
            .with_context(|| format!("parse colnames {}", path.display()))?;
        Ok(colnames)
    }

    /// Publish the parameter -> content catalog, rewriting only if the
    /// decoded value changed since the last run.
    fn publish_catalog(&self, contents: &[String]) -> Result<()> {
        let mut catalog: BTreeMap<String, String> = BTreeMap::new();
        for content in contents {
            let colnames = match self.load_colnames(content) {
                Ok(colnames) => colnames,
                Err(err) => {
                    log::warn!("skipping {content} in catalog: {err:#}");
                    continue;
                }
            };
            for parameter in colnames {
                catalog.insert(parameter, content.clone());
            }
        }

        let path = self.sync.catalog_path();
        if path.exists() {
            let existing = read_catalog(&path)?;
            if existing == catalog {
                return Ok(());
            }
        }

        log::info!("writing content catalog {}", path.display());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("gz.tmp");
        let _ = std::fs::remove_file(&tmp);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .with_context(|| format!("create {}", tmp.display()))?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        serde_json::to_writer(&mut encoder, &catalog)?;
        let file = encoder.finish()?;
        file.sync_all()?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

pub fn read_catalog(path: &std::path::Path) -> Result<BTreeMap<String, String>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("open catalog {}", path.display()))?;
    let mut decoder = GzDecoder::new(file);
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    serde_json::from_slice(&buf)
        .with_context(|| format!("parse catalog {}", path.display()))
}

fn now_tick() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
