use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};
use rusqlite::{params, Connection};

use crate::models::{DbStats, StationRecord};

pub type DbResult<T> = Result<T, rusqlite::Error>;

#[derive(Debug, PartialEq)]
pub enum AddOutcome {
    Added(i64),
    AlreadyExists,
}

/// Embedded catalog store. Cloning shares the underlying connection, which
/// is what the worker pool needs; every write is a single statement, there
/// is no cross-row transaction (each row is its own atomic unit).
#[derive(Clone)]
pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
}

impl Catalog {
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Catalog> {
        let conn = Connection::open(path)?;
        // journal_mode returns a result row, query_row swallows it
        let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS stations (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                name          TEXT NOT NULL,
                url           TEXT NOT NULL UNIQUE,
                genre         TEXT NOT NULL DEFAULT 'Unknown',
                content_type  TEXT NOT NULL DEFAULT '',
                bitrate       INTEGER NOT NULL DEFAULT 0,
                online        INTEGER NOT NULL DEFAULT 0,
                icon          TEXT NOT NULL DEFAULT 'Unknown',
                homepage      TEXT NOT NULL DEFAULT 'Unknown',
                error         TEXT NOT NULL DEFAULT '',
                duplicate     INTEGER NOT NULL DEFAULT 0,
                play_minutes  INTEGER NOT NULL DEFAULT 0,
                in_list       INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_stations_online ON stations(online);",
        )?;
        Ok(Catalog {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // a panicking worker must not take the whole run down with it, so a
    // poisoned mutex is recovered rather than propagated
    fn lock(&self) -> MutexGuard<Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn exists(&self, url: &str) -> DbResult<bool> {
        let conn = self.lock();
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM stations WHERE url = ?1",
            params![url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a new row. A unique-constraint hit on `url` is the expected
    /// outcome of two in-flight units racing on the same URL and is
    /// reported as `AlreadyExists`, not as an error.
    pub fn add_station(&self, record: &StationRecord) -> DbResult<AddOutcome> {
        let conn = self.lock();
        let result = conn.execute(
            "INSERT INTO stations
                (name, url, genre, content_type, bitrate, online, icon,
                 homepage, error, duplicate, play_minutes, in_list)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.name,
                record.url,
                record.genre,
                record.content_type,
                record.bitrate,
                record.online,
                record.icon,
                record.homepage,
                record.error,
                record.duplicate,
                record.play_minutes,
                record.in_list,
            ],
        );
        match result {
            Ok(_) => Ok(AddOutcome::Added(conn.last_insert_rowid())),
            Err(rusqlite::Error::SqliteFailure(err, msg))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                debug!("insert race on {}: {:?}", record.url, msg);
                Ok(AddOutcome::AlreadyExists)
            }
            Err(err) => Err(err),
        }
    }

    pub fn update_station(&self, record: &StationRecord) -> DbResult<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE stations SET
                name = ?1, url = ?2, genre = ?3, content_type = ?4,
                bitrate = ?5, online = ?6, icon = ?7, homepage = ?8,
                error = ?9, duplicate = ?10, play_minutes = ?11, in_list = ?12
             WHERE id = ?13",
            params![
                record.name,
                record.url,
                record.genre,
                record.content_type,
                record.bitrate,
                record.online,
                record.icon,
                record.homepage,
                record.error,
                record.duplicate,
                record.play_minutes,
                record.in_list,
                record.id,
            ],
        )?;
        if changed == 0 {
            warn!("update for id {} matched no row", record.id);
        }
        Ok(())
    }

    pub fn total_count(&self) -> DbResult<u32> {
        let conn = self.lock();
        conn.query_row("SELECT COUNT(*) FROM stations", [], |row| row.get(0))
    }

    pub fn get_page(&self, limit: u32, offset: u32) -> DbResult<Vec<StationRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, url, genre, content_type, bitrate, online,
                    icon, homepage, error, duplicate, play_minutes, in_list
             FROM stations ORDER BY id LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], row_to_station)?;
        rows.collect()
    }

    pub fn get_by_url(&self, url: &str) -> DbResult<Option<StationRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, url, genre, content_type, bitrate, online,
                    icon, homepage, error, duplicate, play_minutes, in_list
             FROM stations WHERE url = ?1",
        )?;
        let mut rows = stmt.query_map(params![url], row_to_station)?;
        rows.next().transpose()
    }

    pub fn stats(&self) -> DbResult<DbStats> {
        let conn = self.lock();
        let total: u32 = conn.query_row("SELECT COUNT(*) FROM stations", [], |row| row.get(0))?;
        let online: u32 = conn.query_row(
            "SELECT COUNT(*) FROM stations WHERE online = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(DbStats { total, online })
    }

    /// Close the connection when this is the last live handle. Clones held
    /// by in-flight workers keep it open until they finish.
    pub fn close(self) {
        if let Ok(mutex) = Arc::try_unwrap(self.conn) {
            if let Ok(conn) = mutex.into_inner() {
                if let Err((_, err)) = conn.close() {
                    warn!("closing catalog failed: {}", err);
                }
            }
        }
    }
}

fn row_to_station(row: &rusqlite::Row) -> rusqlite::Result<StationRecord> {
    Ok(StationRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        genre: row.get(3)?,
        content_type: row.get(4)?,
        bitrate: row.get(5)?,
        online: row.get(6)?,
        icon: row.get(7)?,
        homepage: row.get(8)?,
        error: row.get(9)?,
        duplicate: row.get(10)?,
        play_minutes: row.get(11)?,
        in_list: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StationRecord;
    use tempfile::NamedTempFile;

    fn open_temp() -> (NamedTempFile, Catalog) {
        let file = NamedTempFile::new().unwrap();
        let catalog = Catalog::open(file.path()).unwrap();
        (file, catalog)
    }

    fn sample(url: &str) -> StationRecord {
        let mut record = StationRecord::new(url);
        record.name = String::from("Sample FM");
        record.genre = String::from("Rock");
        record.bitrate = 128;
        record.online = true;
        record
    }

    #[test]
    fn add_then_exists_and_count() {
        let (_file, catalog) = open_temp();
        assert!(!catalog.exists("http://x.example/stream").unwrap());
        let outcome = catalog.add_station(&sample("http://x.example/stream")).unwrap();
        match outcome {
            AddOutcome::Added(id) => assert!(id > 0),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(catalog.exists("http://x.example/stream").unwrap());
        assert_eq!(catalog.total_count().unwrap(), 1);
    }

    #[test]
    fn duplicate_insert_is_not_an_error() {
        let (_file, catalog) = open_temp();
        catalog.add_station(&sample("http://x.example/stream")).unwrap();
        let outcome = catalog.add_station(&sample("http://x.example/stream")).unwrap();
        assert_eq!(outcome, AddOutcome::AlreadyExists);
        assert_eq!(catalog.total_count().unwrap(), 1);
    }

    #[test]
    fn update_round_trips_all_fields() {
        let (_file, catalog) = open_temp();
        let outcome = catalog.add_station(&sample("http://x.example/stream")).unwrap();
        let id = match outcome {
            AddOutcome::Added(id) => id,
            other => panic!("unexpected outcome {:?}", other),
        };
        let mut record = catalog.get_by_url("http://x.example/stream").unwrap().unwrap();
        assert_eq!(record.id, id);
        record.online = false;
        record.bitrate = 64;
        record.duplicate = true;
        record.play_minutes = 42;
        record.in_list = 7;
        catalog.update_station(&record).unwrap();
        let reread = catalog.get_by_url("http://x.example/stream").unwrap().unwrap();
        assert_eq!(reread, record);
    }

    #[test]
    fn pagination_is_ordered_and_bounded() {
        let (_file, catalog) = open_temp();
        for i in 0..7 {
            catalog
                .add_station(&sample(&format!("http://s{}.example/stream", i)))
                .unwrap();
        }
        let first = catalog.get_page(3, 0).unwrap();
        let second = catalog.get_page(3, 3).unwrap();
        let last = catalog.get_page(3, 6).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 3);
        assert_eq!(last.len(), 1);
        assert!(first[0].id < first[2].id);
        assert!(first[2].id < second[0].id);
    }

    #[test]
    fn stats_count_online_rows() {
        let (_file, catalog) = open_temp();
        let mut offline = sample("http://a.example/stream");
        offline.online = false;
        catalog.add_station(&offline).unwrap();
        catalog.add_station(&sample("http://b.example/stream")).unwrap();
        let stats = catalog.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.online, 1);
    }
}
