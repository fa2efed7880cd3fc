use std::{fs, path::Path, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::error::StoreError;

/// Bounds of the last import window for one scenario.
///
/// Files are new when strictly newer than `newest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    pub oldest: DateTime<Utc>,
    pub newest: DateTime<Utc>,
}

impl Watermark {
    pub fn new(oldest: DateTime<Utc>, newest: DateTime<Utc>) -> Self {
        Watermark { oldest, newest }
    }

    pub fn at(t: DateTime<Utc>) -> Self {
        Watermark::new(t, t)
    }
}

pub trait WatermarkStore {
    /// `None` means the scenario was never imported.
    fn load(&self, scenario: &str) -> Result<Option<Watermark>, StoreError>;

    /// Returns `false` when the stored watermark is already at or past `watermark.newest`.
    fn save(&mut self, scenario: &str, watermark: &Watermark) -> Result<bool, StoreError>;

    fn list(&self) -> Result<Vec<(String, Watermark)>, StoreError>;
}

/// Watermarks in a small SQLite file, one row per scenario.
pub struct SqliteWatermarkStore {
    conn: Connection,
}

impl SqliteWatermarkStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        // a second import running against the same file waits instead of failing
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let sql = "CREATE TABLE IF NOT EXISTS tbl_watermark (
            scenario     TEXT PRIMARY KEY,
            oldest       TEXT NOT NULL,
            newest       TEXT NOT NULL,
            update_time  INTEGER NOT NULL
        )";
        conn.execute(sql, ())?;
        Ok(SqliteWatermarkStore { conn })
    }
}

fn select_watermark(conn: &Connection, scenario: &str) -> Result<Option<Watermark>, StoreError> {
    let sql = "SELECT oldest, newest FROM tbl_watermark WHERE scenario = ?1";
    let row: Option<(String, String)> = conn
        .query_row(sql, (scenario,), |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;
    match row {
        Some((oldest, newest)) => Ok(Some(Watermark::new(
            parse_stored(&oldest)?,
            parse_stored(&newest)?,
        ))),
        None => Ok(None),
    }
}

impl WatermarkStore for SqliteWatermarkStore {
    fn load(&self, scenario: &str) -> Result<Option<Watermark>, StoreError> {
        select_watermark(&self.conn, scenario)
    }

    fn save(&mut self, scenario: &str, watermark: &Watermark) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        if let Some(stored) = select_watermark(&tx, scenario)? {
            if stored.newest >= watermark.newest {
                log::warn!(
                    "watermark for {} stays at {}, refusing to move back to {}",
                    scenario,
                    format_stored(&stored.newest),
                    format_stored(&watermark.newest)
                );
                return Ok(false);
            }
        }
        let sql = "INSERT INTO tbl_watermark (
                scenario, oldest, newest, update_time
            ) VALUES (
                ?1, ?2, ?3, ?4
            )
            ON CONFLICT(scenario) DO UPDATE SET
                oldest = excluded.oldest,
                newest = excluded.newest,
                update_time = excluded.update_time";
        tx.execute(
            sql,
            (
                scenario,
                format_stored(&watermark.oldest),
                format_stored(&watermark.newest),
                Utc::now().timestamp_millis(),
            ),
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<(String, Watermark)>, StoreError> {
        let sql = "SELECT scenario, oldest, newest FROM tbl_watermark ORDER BY scenario";
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut watermarks = Vec::new();
        for row in rows {
            let (scenario, oldest, newest) = row?;
            let watermark = Watermark::new(parse_stored(&oldest)?, parse_stored(&newest)?);
            watermarks.push((scenario, watermark));
        }
        Ok(watermarks)
    }
}

/// ISO-8601 in UTC with nanoseconds, so stored values compare exactly with scanned ones.
pub fn format_stored(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_stored(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|source| StoreError::Timestamp {
            value: value.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    use super::{format_stored, SqliteWatermarkStore, Watermark, WatermarkStore};

    #[test]
    fn test_load_missing_is_none() {
        let store = SqliteWatermarkStore::open_in_memory().unwrap();
        assert_eq!(store.load("fz300").unwrap(), None);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_keeps_nanoseconds() {
        let mut store = SqliteWatermarkStore::open_in_memory().unwrap();
        let watermark = Watermark::new(
            Utc.timestamp_opt(100, 1).unwrap(),
            Utc.timestamp_opt(200, 123_456_789).unwrap(),
        );
        assert!(store.save("fz300", &watermark).unwrap());
        assert_eq!(store.load("fz300").unwrap(), Some(watermark));
        assert_eq!(store.load("phone").unwrap(), None);
        assert_eq!(
            format_stored(&watermark.newest),
            "1970-01-01T00:03:20.123456789Z"
        );
    }

    #[test]
    fn test_save_never_moves_back() {
        let mut store = SqliteWatermarkStore::open_in_memory().unwrap();
        let later = Watermark::at(Utc.timestamp_opt(300, 0).unwrap());
        let earlier = Watermark::at(Utc.timestamp_opt(200, 0).unwrap());
        assert!(store.save("fz300", &later).unwrap());
        assert!(!store.save("fz300", &earlier).unwrap());
        assert!(!store.save("fz300", &later).unwrap());
        assert_eq!(store.load("fz300").unwrap(), Some(later));

        let newer = Watermark::new(
            Utc.timestamp_opt(350, 0).unwrap(),
            Utc.timestamp_opt(400, 0).unwrap(),
        );
        assert!(store.save("fz300", &newer).unwrap());
        assert_eq!(store.load("fz300").unwrap(), Some(newer));
    }

    #[test]
    fn test_list_and_reopen_file() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("state").join("watermarks.db");
        {
            let mut store = SqliteWatermarkStore::open(&db_path).unwrap();
            store
                .save("phone", &Watermark::at(Utc.timestamp_opt(20, 0).unwrap()))
                .unwrap();
            store
                .save("fz300", &Watermark::at(Utc.timestamp_opt(10, 0).unwrap()))
                .unwrap();
        }
        let store = SqliteWatermarkStore::open(&db_path).unwrap();
        let names: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["fz300", "phone"]);
        assert_eq!(
            store.load("phone").unwrap(),
            Some(Watermark::at(Utc.timestamp_opt(20, 0).unwrap()))
        );
    }
}
