use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use tempfile::tempdir;

use telsync::archive::{ArchiveEntry, ArchiveLog};
use telsync::extract::{read_sync_unit, ColumnData};
use telsync::index::{refresh_index, IndexRefresh, IndexTable};
use telsync::layout::{ArchiveLayout, SyncLayout};
use telsync::store::{write_raw_table, write_stat_table, StatRow};
use telsync::{SyncConfig, SyncDriver};

const CONTENT: &str = "thermal";
const N_ROWS: usize = 130;

/// Archive fixture matching the two-entry scenario: entries covering ticks
/// [1000, 1100) rows [0, 50) and [1100, 1250) rows [50, 130), sample times
/// spaced 10 s apart, plus a 5min rollup table for TEPHIN.
fn build_archive(root: &Path) -> Result<()> {
    let content_dir = root.join("data").join(CONTENT);
    std::fs::create_dir_all(&content_dir)?;

    let entries = [
        ArchiveEntry {
            filename: "f1000.dat".to_string(),
            filetime_start: 1000,
            filetime_stop: 1100,
            rowstart: 0,
            rowstop: 50,
        },
        ArchiveEntry {
            filename: "f1100.dat".to_string(),
            filetime_start: 1100,
            filetime_stop: 1250,
            rowstart: 50,
            rowstop: 130,
        },
    ];
    let mut log = File::create(content_dir.join("archfiles.jsonl"))?;
    for entry in &entries {
        writeln!(log, "{}", serde_json::to_string(entry)?)?;
    }

    std::fs::write(
        content_dir.join("colnames.json"),
        serde_json::to_vec(&["TEPHIN", "TCYLAFT6", "NOFILE"])?,
    )?;

    let times: Vec<f64> = (0..N_ROWS).map(|i| 1000.0 + i as f64 * 10.0).collect();
    let zeros = vec![0u8; N_ROWS];
    write_raw_table(&content_dir.join("full").join("TIME.dat"), &times, &zeros)?;

    for parameter in ["TEPHIN", "TCYLAFT6"] {
        let data: Vec<f64> = (0..N_ROWS).map(|i| i as f64 * 0.5).collect();
        let quality: Vec<u8> = (0..N_ROWS).map(|i| (i % 3 == 0) as u8).collect();
        write_raw_table(
            &content_dir.join("full").join(format!("{parameter}.dat")),
            &data,
            &quality,
        )?;
    }

    // 5min rollup for TEPHIN only; TCYLAFT6 has no rollup store.
    let stat_rows: Vec<StatRow> = (0..10)
        .map(|i| StatRow {
            index: i,
            mean: i as f64,
            min: i as f64 - 1.0,
            max: i as f64 + 1.0,
            n_samples: 30,
        })
        .collect();
    write_stat_table(
        &content_dir.join("5min").join("TEPHIN.dat"),
        &stat_rows,
    )?;

    Ok(())
}

fn config(archive_root: &Path, sync_root: &Path) -> SyncConfig {
    let mut config = SyncConfig::new(sync_root, archive_root);
    config.date_start = Some(999);
    config.date_stop = Some(10_000);
    config
}

#[test]
fn one_batch_full_extraction() -> Result<()> {
    let temp = tempdir()?;
    let archive_root = temp.path().join("archive");
    let sync_root = temp.path().join("out");
    build_archive(&archive_root)?;

    let driver = SyncDriver::new(config(&archive_root, &sync_root));
    let stats = driver.run_once()?;
    assert_eq!(stats.contents_processed, 1);
    assert_eq!(stats.contents_failed, 0);
    assert_eq!(stats.batches_published, 1);

    let layout = SyncLayout::new(&sync_root);
    let index = IndexTable::load(&layout.index_path(CONTENT)?)?.expect("index");
    assert_eq!(index.rows().len(), 1);
    let batch = &index.rows()[0];
    assert_eq!(batch.filetime0, 1000);
    assert_eq!(batch.filetime1, 1250);
    assert_eq!(batch.row0, 0);
    assert_eq!(batch.row1, 130);

    let unit = read_sync_unit(&layout.sync_unit_path(CONTENT, &batch.date_id, "full")?)?;
    assert_eq!(unit.version, 1);
    assert_eq!(unit.archfiles.as_ref().expect("archfiles").len(), 2);

    // NOFILE has no raw table and is skipped; TIME rides along implicitly.
    let parameters: Vec<&str> = unit
        .columns
        .iter()
        .map(|column| column.parameter.as_str())
        .collect();
    assert_eq!(parameters, ["TCYLAFT6", "TEPHIN", "TIME"]);
    for column in &unit.columns {
        assert_eq!(column.row0, 0);
        assert_eq!(column.row1, 130);
        match &column.data {
            ColumnData::Samples(values) => assert_eq!(values.len(), N_ROWS),
            other => panic!("unexpected column data {other:?}"),
        }
        assert_eq!(column.quality.as_ref().expect("quality").len(), N_ROWS);
    }
    Ok(())
}

#[test]
fn stat_extraction_resolves_time_window() -> Result<()> {
    let temp = tempdir()?;
    let archive_root = temp.path().join("archive");
    let sync_root = temp.path().join("out");
    build_archive(&archive_root)?;

    let driver = SyncDriver::new(config(&archive_root, &sync_root));
    driver.run_once()?;

    let layout = SyncLayout::new(&sync_root);
    let index = IndexTable::load(&layout.index_path(CONTENT)?)?.expect("index");
    let date_id = &index.rows()[0].date_id;

    // Sample times run 1000..2290; 5min rows (dt = 328) with nominal time
    // in [1000, 2290) are indexes 3..=6.
    let unit = read_sync_unit(&layout.sync_unit_path(CONTENT, date_id, "5min")?)?;
    assert!(unit.archfiles.is_none());
    assert_eq!(unit.columns.len(), 1);
    let column = &unit.columns[0];
    assert_eq!(column.parameter, "TEPHIN");
    assert_eq!((column.row0, column.row1), (3, 7));
    match &column.data {
        ColumnData::Stats(rows) => {
            let indexes: Vec<u64> = rows.iter().map(|row| row.index).collect();
            assert_eq!(indexes, [3, 4, 5, 6]);
        }
        other => panic!("unexpected column data {other:?}"),
    }
    assert!(column.quality.is_none());

    // No daily store exists; the unit is still published, just empty.
    let daily = read_sync_unit(&layout.sync_unit_path(CONTENT, date_id, "daily")?)?;
    assert!(daily.columns.is_empty());
    Ok(())
}

#[test]
fn second_run_writes_nothing() -> Result<()> {
    let temp = tempdir()?;
    let archive_root = temp.path().join("archive");
    let sync_root = temp.path().join("out");
    build_archive(&archive_root)?;

    let driver = SyncDriver::new(config(&archive_root, &sync_root));
    driver.run_once()?;

    let layout = SyncLayout::new(&sync_root);
    let index_path = layout.index_path(CONTENT)?;
    let index_bytes = std::fs::read(&index_path)?;
    let date_id = IndexTable::load(&index_path)?.expect("index").rows()[0]
        .date_id
        .clone();
    let unit_path = layout.sync_unit_path(CONTENT, &date_id, "full")?;
    let unit_mtime = std::fs::metadata(&unit_path)?.modified()?;
    let index_mtime = std::fs::metadata(&index_path)?.modified()?;

    let stats = driver.run_once()?;
    assert_eq!(stats.contents_processed, 1);
    assert_eq!(stats.batches_published, 0);

    assert_eq!(std::fs::read(&index_path)?, index_bytes);
    assert_eq!(std::fs::metadata(&index_path)?.modified()?, index_mtime);
    assert_eq!(std::fs::metadata(&unit_path)?.modified()?, unit_mtime);
    Ok(())
}

#[test]
fn indexed_batches_recovered_after_interrupted_run() -> Result<()> {
    let temp = tempdir()?;
    let archive_root = temp.path().join("archive");
    let sync_root = temp.path().join("out");
    build_archive(&archive_root)?;

    // Persist the index without extracting anything, which is the state a
    // run interrupted between the index write and extraction leaves behind.
    let archive = ArchiveLayout::new(&archive_root);
    let layout = SyncLayout::new(&sync_root);
    let log = ArchiveLog::new(archive.archfiles_path(CONTENT)?);
    let refresh = refresh_index(
        &layout.index_path(CONTENT)?,
        &log,
        CONTENT,
        999,
        10_000,
        1.5,
        30.0,
    )?;
    assert!(matches!(refresh, IndexRefresh::Extended { .. }));

    // The next run finds no new entries but must still fill in the units
    // for the already-indexed batch.
    let driver = SyncDriver::new(config(&archive_root, &sync_root));
    let stats = driver.run_once()?;
    assert_eq!(stats.contents_processed, 1);
    assert_eq!(stats.batches_published, 1);

    let date_id = IndexTable::load(&layout.index_path(CONTENT)?)?.expect("index").rows()[0]
        .date_id
        .clone();
    let unit = read_sync_unit(&layout.sync_unit_path(CONTENT, &date_id, "full")?)?;
    assert_eq!(unit.columns.len(), 3);
    assert!(layout.sync_unit_path(CONTENT, &date_id, "5min")?.exists());
    assert!(layout.sync_unit_path(CONTENT, &date_id, "daily")?.exists());
    Ok(())
}

#[test]
fn stat_unit_spans_diverging_rollup_stores() -> Result<()> {
    let temp = tempdir()?;
    let archive_root = temp.path().join("archive");
    let sync_root = temp.path().join("out");
    build_archive(&archive_root)?;

    // A second 5min store that ends early: 5 rows against TEPHIN's 10. The
    // per-parameter search lands on different row counts and the unit is
    // still published with both columns.
    let stat_rows: Vec<StatRow> = (0..5)
        .map(|i| StatRow {
            index: i,
            mean: i as f64,
            min: i as f64 - 1.0,
            max: i as f64 + 1.0,
            n_samples: 30,
        })
        .collect();
    write_stat_table(
        &archive_root
            .join("data")
            .join(CONTENT)
            .join("5min")
            .join("TCYLAFT6.dat"),
        &stat_rows,
    )?;

    let driver = SyncDriver::new(config(&archive_root, &sync_root));
    driver.run_once()?;

    let layout = SyncLayout::new(&sync_root);
    let date_id = IndexTable::load(&layout.index_path(CONTENT)?)?.expect("index").rows()[0]
        .date_id
        .clone();
    let unit = read_sync_unit(&layout.sync_unit_path(CONTENT, &date_id, "5min")?)?;
    let parameters: Vec<&str> = unit
        .columns
        .iter()
        .map(|column| column.parameter.as_str())
        .collect();
    assert_eq!(parameters, ["TCYLAFT6", "TEPHIN"]);

    // TCYLAFT6's store stops at nominal time 1476, inside the batch window,
    // so its slice is shorter: rows [3, 5) against TEPHIN's [3, 7).
    assert_eq!((unit.columns[0].row0, unit.columns[0].row1), (3, 5));
    assert_eq!((unit.columns[1].row0, unit.columns[1].row1), (3, 7));
    match &unit.columns[0].data {
        ColumnData::Stats(rows) => {
            let indexes: Vec<u64> = rows.iter().map(|row| row.index).collect();
            assert_eq!(indexes, [3, 4]);
        }
        other => panic!("unexpected column data {other:?}"),
    }
    Ok(())
}

#[test]
fn catalog_published_once_until_changed() -> Result<()> {
    let temp = tempdir()?;
    let archive_root = temp.path().join("archive");
    let sync_root = temp.path().join("out");
    build_archive(&archive_root)?;

    let driver = SyncDriver::new(config(&archive_root, &sync_root));
    driver.run_once()?;

    let layout = SyncLayout::new(&sync_root);
    let catalog_path = layout.catalog_path();
    let catalog = telsync::driver::read_catalog(&catalog_path)?;
    assert_eq!(catalog.get("TEPHIN").map(String::as_str), Some(CONTENT));

    let mtime = std::fs::metadata(&catalog_path)?.modified()?;
    driver.run_once()?;
    assert_eq!(std::fs::metadata(&catalog_path)?.modified()?, mtime);

    // A new parameter in the content group changes the catalog value.
    std::fs::write(
        archive_root.join("data").join(CONTENT).join("colnames.json"),
        serde_json::to_vec(&["TEPHIN", "TCYLAFT6", "NOFILE", "NEWPARAM"])?,
    )?;
    driver.run_once()?;
    let catalog = telsync::driver::read_catalog(&catalog_path)?;
    assert_eq!(catalog.get("NEWPARAM").map(String::as_str), Some(CONTENT));
    Ok(())
}

#[test]
fn content_filter_selects_groups() -> Result<()> {
    let temp = tempdir()?;
    let archive_root = temp.path().join("archive");
    let sync_root = temp.path().join("out");
    build_archive(&archive_root)?;

    let mut cfg = config(&archive_root, &sync_root);
    cfg.content = vec!["propulsion".to_string()];
    let stats = SyncDriver::new(cfg).run_once()?;
    assert_eq!(stats.contents_processed, 0);
    assert!(!SyncLayout::new(&sync_root)
        .index_path(CONTENT)?
        .exists());
    Ok(())
}
