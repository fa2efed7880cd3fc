use std::{fs, path::Path};

use chrono::{TimeZone, Utc};
use filetime::{set_file_mtime, FileTime};
use photo_import::{
    GlobalConfig, ImportResult, RunOptions, Selection, Session, SqliteWatermarkStore, Watermark,
    WatermarkStore,
};
use tempfile::TempDir;

fn create_file(dir: &Path, name: &str, mtime: i64) {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, format!("content of {}", name)).unwrap();
    set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
}

fn write_config(root: &Path) -> GlobalConfig {
    let path = root.join("user.yml");
    fs::write(
        &path,
        format!(
            "target_root: {target}\n\
             include: [jpg, mp4]\n\
             exclude: []\n\
             scenarios:\n  \
               fz300:\n    \
                 source: FZ300\n",
            target = root.join("archive").display(),
        ),
    )
    .unwrap();
    GlobalConfig::load(&path).unwrap()
}

fn import_all(
    config: &GlobalConfig,
    store: &mut SqliteWatermarkStore,
    device: &Path,
) -> ImportResult {
    let options = RunOptions {
        device: Some(device.to_path_buf()),
        ..Default::default()
    };
    let mut reports = Session::new(config, store, options)
        .import_selection(&Selection::All)
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_success(), "{:?}", reports[0]);
    reports.remove(0).outcome.unwrap()
}

#[test]
fn test_first_import_then_nothing_new() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let card = dir.path().join("cards");
    create_file(&card.join("FZ300"), "a.jpg", 100);
    create_file(&card.join("FZ300"), "b.mp4", 200);
    create_file(&card.join("FZ300"), "c.png", 300);

    let db_path = dir.path().join("data").join("watermarks.db");
    let mut store = SqliteWatermarkStore::open(&db_path).unwrap();
    let first = import_all(&config, &mut store, &card);
    assert_eq!(first.copied, 2);
    assert_eq!(first.skipped, 0);
    // c.png is dropped by the extension filter
    assert_eq!(first.filtered, 1);

    let archive = dir.path().join("archive").join("fz300");
    assert!(archive.join("a.jpg").exists());
    assert!(archive.join("b.mp4").exists());
    assert!(!archive.join("c.png").exists());
    assert_eq!(
        store.load("fz300").unwrap().map(|w| w.newest),
        Some(Utc.timestamp_opt(200, 0).unwrap())
    );

    // the watermark survives reopening the store
    drop(store);
    let mut store = SqliteWatermarkStore::open(&db_path).unwrap();
    assert_eq!(import_all(&config, &mut store, &card).copied, 0);
}

#[test]
fn test_crash_recovery_skips_what_is_already_there() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let card = dir.path().join("cards");
    create_file(&card.join("FZ300"), "a.jpg", 100);
    create_file(&card.join("FZ300"), "b.jpg", 200);
    create_file(&card.join("FZ300"), "c.jpg", 300);

    // a previous run copied a.jpg, left a stale partial of b.jpg and died
    let archive = dir.path().join("archive").join("fz300");
    fs::create_dir_all(&archive).unwrap();
    fs::copy(card.join("FZ300").join("a.jpg"), archive.join("a.jpg")).unwrap();
    fs::write(archive.join(".b.jpg.part"), "half").unwrap();

    let mut store = SqliteWatermarkStore::open_in_memory().unwrap();
    let options = RunOptions {
        device: Some(card.clone()),
        ..Default::default()
    };
    let reports = Session::new(&config, &mut store, options)
        .import_selection(&Selection::Named(vec!["fz300".to_string()]))
        .unwrap();
    let result = reports[0].outcome.as_ref().unwrap();
    assert_eq!(result.copied, 2);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.failed, 0);
    assert_eq!(
        fs::read_to_string(archive.join("b.jpg")).unwrap(),
        "content of b.jpg"
    );
    assert!(!archive.join(".b.jpg.part").exists());
    assert_eq!(
        store.load("fz300").unwrap(),
        Some(Watermark::new(
            Utc.timestamp_opt(200, 0).unwrap(),
            Utc.timestamp_opt(300, 0).unwrap()
        ))
    );
}
