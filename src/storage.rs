//! Storage contract used by camera pipelines.
//!
//! - `SqliteStorage`: rusqlite, one connection behind a mutex, WAL journal.
//! - `InMemoryStorage`: same semantics in plain collections, with failure
//!   injection for batch writes. Used by tests and embedders.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;

use crate::frame::BoundingBox;
use crate::stabilize::ConfirmedPlate;
use crate::{CameraId, CameraStatus, OwnerId};

/// Persistence operations a pipeline needs. Implementations are shared across
/// every pipeline thread.
pub trait Storage: Send + Sync {
    fn get_camera(&self, id: CameraId) -> Result<Option<CameraRecord>>;

    fn list_cameras(&self) -> Result<Vec<CameraRecord>>;

    fn update_camera_status(&self, id: CameraId, status: CameraStatus, last_seen_ms: u64)
        -> Result<()>;

    /// Write a whole batch as plate log rows in one transaction.
    fn save_detection_batch(&self, events: &[ConfirmedPlate], owner_id: OwnerId) -> Result<usize>;

    fn get_watchlist(&self, owner_id: OwnerId) -> Result<Vec<WatchlistEntry>>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CameraRecord {
    pub id: CameraId,
    pub name: String,
    pub source_uri: Option<String>,
    pub status: CameraStatus,
    pub last_seen_ms: Option<u64>,
    pub owner_id: Option<OwnerId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WatchlistEntry {
    pub owner_id: OwnerId,
    pub plate_text: String,
    pub description: Option<String>,
    pub notify_email: bool,
    pub notify_sms: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlateLogRecord {
    pub id: i64,
    pub camera_id: CameraId,
    pub owner_id: OwnerId,
    pub plate_text: String,
    pub timestamp_ms: u64,
    /// Detector confidence as integer percent, 0..=100.
    pub confidence: u8,
    pub bbox: BoundingBox,
}

/// Integer percent stored for a 0.0..=1.0 confidence. Truncates.
pub fn confidence_percent(confidence: f32) -> u8 {
    (confidence * 100.0).clamp(0.0, 100.0) as u8
}

/// A fresh shared-cache in-memory database URI. Every connection opened with
/// the same URI sees the same database.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:plate_watch_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

fn to_sql_ms(ms: u64) -> Result<i64> {
    i64::try_from(ms).map_err(|_| anyhow!("timestamp {} exceeds i64 range", ms))
}

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) the database at `db_path`. `file:` URIs are opened
    /// with URI semantics, so `shared_memory_uri()` works here.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .with_context(|| format!("failed to open database {}", db_path))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(&shared_memory_uri())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("storage connection lock poisoned"))
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS cameras (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL,
              source_uri TEXT,
              status TEXT NOT NULL DEFAULT 'offline',
              last_seen_ms INTEGER,
              owner_id INTEGER
            );

            CREATE TABLE IF NOT EXISTS plate_logs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              camera_id INTEGER NOT NULL,
              owner_id INTEGER NOT NULL,
              plate_text TEXT NOT NULL,
              timestamp_ms INTEGER NOT NULL,
              confidence INTEGER NOT NULL,
              bbox_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS watchlists (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              owner_id INTEGER NOT NULL,
              plate_text TEXT NOT NULL,
              description TEXT,
              notify_email INTEGER NOT NULL DEFAULT 0,
              notify_sms INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_plate_logs_camera ON plate_logs(camera_id, timestamp_ms);
            CREATE INDEX IF NOT EXISTS idx_watchlists_owner ON watchlists(owner_id);
            "#,
        )?;
        Ok(())
    }

    pub fn add_camera(
        &self,
        name: &str,
        source_uri: Option<&str>,
        owner_id: Option<OwnerId>,
    ) -> Result<CameraId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cameras (name, source_uri, status, owner_id) VALUES (?1, ?2, 'offline', ?3)",
            params![name, source_uri, owner_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_watchlist_entry(&self, entry: &WatchlistEntry) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO watchlists (owner_id, plate_text, description, notify_email, notify_sms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.owner_id,
                entry.plate_text,
                entry.description,
                entry.notify_email,
                entry.notify_sms
            ],
        )?;
        Ok(())
    }

    pub fn plate_logs_for_camera(&self, camera_id: CameraId) -> Result<Vec<PlateLogRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, camera_id, owner_id, plate_text, timestamp_ms, confidence, bbox_json
             FROM plate_logs WHERE camera_id = ?1 ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![camera_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let timestamp_ms: i64 = row.get(4)?;
            let confidence: i64 = row.get(5)?;
            let bbox_json: String = row.get(6)?;
            out.push(PlateLogRecord {
                id: row.get(0)?,
                camera_id: row.get(1)?,
                owner_id: row.get(2)?,
                plate_text: row.get(3)?,
                timestamp_ms: u64::try_from(timestamp_ms)
                    .map_err(|_| anyhow!("corrupt plate log: negative timestamp"))?,
                confidence: u8::try_from(confidence)
                    .map_err(|_| anyhow!("corrupt plate log: confidence out of range"))?,
                bbox: serde_json::from_str(&bbox_json).context("corrupt plate log: bbox_json")?,
            });
        }
        Ok(out)
    }

    fn camera_from_row(row: &rusqlite::Row<'_>) -> Result<CameraRecord> {
        let status: String = row.get(3)?;
        let last_seen: Option<i64> = row.get(4)?;
        Ok(CameraRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            source_uri: row.get(2)?,
            status: CameraStatus::parse(&status),
            last_seen_ms: last_seen.and_then(|v| u64::try_from(v).ok()),
            owner_id: row.get(5)?,
        })
    }
}

impl Storage for SqliteStorage {
    fn get_camera(&self, id: CameraId) -> Result<Option<CameraRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, source_uri, status, last_seen_ms, owner_id FROM cameras WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::camera_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_cameras(&self) -> Result<Vec<CameraRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, source_uri, status, last_seen_ms, owner_id FROM cameras ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Self::camera_from_row(row)?);
        }
        Ok(out)
    }

    fn update_camera_status(
        &self,
        id: CameraId,
        status: CameraStatus,
        last_seen_ms: u64,
    ) -> Result<()> {
        let changed = self.conn()?.execute(
            "UPDATE cameras SET status = ?1, last_seen_ms = ?2 WHERE id = ?3",
            params![status.as_str(), to_sql_ms(last_seen_ms)?, id],
        )?;
        if changed == 0 {
            return Err(anyhow!("unknown camera {}", id));
        }
        Ok(())
    }

    fn save_detection_batch(&self, events: &[ConfirmedPlate], owner_id: OwnerId) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO plate_logs (camera_id, owner_id, plate_text, timestamp_ms, confidence, bbox_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for event in events {
                stmt.execute(params![
                    event.camera_id,
                    owner_id,
                    event.plate_text,
                    to_sql_ms(event.timestamp_ms)?,
                    confidence_percent(event.confidence),
                    serde_json::to_string(&event.bbox)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    fn get_watchlist(&self, owner_id: OwnerId) -> Result<Vec<WatchlistEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT owner_id, plate_text, description, notify_email, notify_sms
             FROM watchlists WHERE owner_id = ?1 ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![owner_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(WatchlistEntry {
                owner_id: row.get(0)?,
                plate_text: row.get(1)?,
                description: row.get(2)?,
                notify_email: row.get(3)?,
                notify_sms: row.get(4)?,
            });
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    cameras: BTreeMap<CameraId, CameraRecord>,
    watchlist: Vec<WatchlistEntry>,
    plate_logs: Vec<PlateLogRecord>,
    status_history: Vec<(CameraId, CameraStatus)>,
    failing_batches: usize,
    failing_lookups: usize,
    batch_writes: usize,
}

#[derive(Default)]
pub struct InMemoryStorage {
    state: Mutex<MemoryState>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_camera(
        &self,
        name: &str,
        source_uri: Option<&str>,
        owner_id: Option<OwnerId>,
    ) -> CameraId {
        let mut state = self.state();
        let id = state.cameras.keys().next_back().copied().unwrap_or(0) + 1;
        state.cameras.insert(
            id,
            CameraRecord {
                id,
                name: name.to_string(),
                source_uri: source_uri.map(str::to_string),
                status: CameraStatus::Offline,
                last_seen_ms: None,
                owner_id,
            },
        );
        id
    }

    pub fn add_watchlist_entry(&self, entry: WatchlistEntry) {
        self.state().watchlist.push(entry);
    }

    /// Fail the next `count` calls to `save_detection_batch`.
    pub fn fail_next_batches(&self, count: usize) {
        self.state().failing_batches = count;
    }

    /// Fail the next `count` calls to `get_camera`.
    pub fn fail_next_camera_lookups(&self, count: usize) {
        self.state().failing_lookups = count;
    }

    /// Number of successful batch writes.
    pub fn batch_writes(&self) -> usize {
        self.state().batch_writes
    }

    pub fn plate_logs(&self) -> Vec<PlateLogRecord> {
        self.state().plate_logs.clone()
    }

    pub fn plate_logs_for_camera(&self, camera_id: CameraId) -> Vec<PlateLogRecord> {
        self.state()
            .plate_logs
            .iter()
            .filter(|log| log.camera_id == camera_id)
            .cloned()
            .collect()
    }

    /// Every status written for `camera_id`, oldest first.
    pub fn status_history(&self, camera_id: CameraId) -> Vec<CameraStatus> {
        self.state()
            .status_history
            .iter()
            .filter(|(id, _)| *id == camera_id)
            .map(|(_, status)| *status)
            .collect()
    }
}

impl Storage for InMemoryStorage {
    fn get_camera(&self, id: CameraId) -> Result<Option<CameraRecord>> {
        let mut state = self.state();
        if state.failing_lookups > 0 {
            state.failing_lookups -= 1;
            return Err(anyhow!("injected camera lookup failure"));
        }
        Ok(state.cameras.get(&id).cloned())
    }

    fn list_cameras(&self) -> Result<Vec<CameraRecord>> {
        Ok(self.state().cameras.values().cloned().collect())
    }

    fn update_camera_status(
        &self,
        id: CameraId,
        status: CameraStatus,
        last_seen_ms: u64,
    ) -> Result<()> {
        let mut state = self.state();
        let camera = state
            .cameras
            .get_mut(&id)
            .ok_or_else(|| anyhow!("unknown camera {}", id))?;
        camera.status = status;
        camera.last_seen_ms = Some(last_seen_ms);
        state.status_history.push((id, status));
        Ok(())
    }

    fn save_detection_batch(&self, events: &[ConfirmedPlate], owner_id: OwnerId) -> Result<usize> {
        let mut state = self.state();
        if state.failing_batches > 0 {
            state.failing_batches -= 1;
            return Err(anyhow!("injected batch write failure"));
        }
        for event in events {
            let id = state.plate_logs.len() as i64 + 1;
            state.plate_logs.push(PlateLogRecord {
                id,
                camera_id: event.camera_id,
                owner_id,
                plate_text: event.plate_text.clone(),
                timestamp_ms: event.timestamp_ms,
                confidence: confidence_percent(event.confidence),
                bbox: event.bbox,
            });
        }
        state.batch_writes += 1;
        Ok(events.len())
    }

    fn get_watchlist(&self, owner_id: OwnerId) -> Result<Vec<WatchlistEntry>> {
        Ok(self
            .state()
            .watchlist
            .iter()
            .filter(|entry| entry.owner_id == owner_id)
            .cloned()
            .collect())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn event(camera_id: CameraId, text: &str, confidence: f32) -> ConfirmedPlate {
        ConfirmedPlate {
            camera_id,
            plate_text: text.to_string(),
            confidence,
            bbox: BoundingBox::new(1, 2, 30, 12),
            frame_index: 3,
            timestamp_ms: 1_700_000_000_000,
        }
    }

    fn entry(owner_id: OwnerId, text: &str) -> WatchlistEntry {
        WatchlistEntry {
            owner_id,
            plate_text: text.to_string(),
            description: Some("stolen".to_string()),
            notify_email: true,
            notify_sms: false,
        }
    }

    #[test]
    fn confidence_is_stored_as_integer_percent() {
        assert_eq!(confidence_percent(0.804), 80);
        assert_eq!(confidence_percent(0.806), 80);
        assert_eq!(confidence_percent(0.999), 99);
        assert_eq!(confidence_percent(0.9), 90);
        assert_eq!(confidence_percent(1.0), 100);
        assert_eq!(confidence_percent(1.7), 100);
        assert_eq!(confidence_percent(-0.2), 0);
    }

    #[test]
    fn sqlite_camera_status_round_trip() -> Result<()> {
        let store = SqliteStorage::open_in_memory()?;
        let id = store.add_camera("gate", Some("stub://gate"), Some(42))?;

        let camera = store.get_camera(id)?.expect("camera");
        assert_eq!(camera.status, CameraStatus::Offline);
        assert_eq!(camera.last_seen_ms, None);
        assert_eq!(camera.owner_id, Some(42));

        store.update_camera_status(id, CameraStatus::Online, 1234)?;
        let camera = store.get_camera(id)?.expect("camera");
        assert_eq!(camera.status, CameraStatus::Online);
        assert_eq!(camera.last_seen_ms, Some(1234));

        assert!(store.get_camera(id + 100)?.is_none());
        assert!(store.update_camera_status(id + 100, CameraStatus::Online, 1).is_err());
        Ok(())
    }

    #[test]
    fn sqlite_batch_writes_plate_logs() -> Result<()> {
        let store = SqliteStorage::open_in_memory()?;
        let cam = store.add_camera("lot", Some("stub://lot"), Some(9))?;
        let written =
            store.save_detection_batch(&[event(cam, "ABC123", 0.87), event(cam, "XYZ9", 0.75)], 9)?;
        assert_eq!(written, 2);

        let logs = store.plate_logs_for_camera(cam)?;
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].plate_text, "ABC123");
        assert_eq!(logs[0].confidence, 87);
        assert_eq!(logs[0].owner_id, 9);
        assert_eq!(logs[0].bbox, BoundingBox::new(1, 2, 30, 12));
        assert_eq!(logs[1].confidence, 75);
        Ok(())
    }

    #[test]
    fn sqlite_watchlist_is_scoped_to_owner() -> Result<()> {
        let store = SqliteStorage::open_in_memory()?;
        store.add_watchlist_entry(&entry(1, "ABC123"))?;
        store.add_watchlist_entry(&entry(2, "XYZ9"))?;

        let list = store.get_watchlist(1)?;
        assert_eq!(list, vec![entry(1, "ABC123")]);
        assert!(store.get_watchlist(3)?.is_empty());
        Ok(())
    }

    #[test]
    fn sqlite_file_database_persists_across_opens() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("plates.db");
        let path = path.to_str().expect("utf8 path");
        let id = {
            let store = SqliteStorage::open(path)?;
            store.add_camera("door", None, None)?
        };
        let store = SqliteStorage::open(path)?;
        let cameras = store.list_cameras()?;
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].id, id);
        assert_eq!(cameras[0].source_uri, None);
        Ok(())
    }

    #[test]
    fn in_memory_batch_failures_are_injected() -> Result<()> {
        let store = InMemoryStorage::new();
        let cam = store.add_camera("gate", Some("stub://gate"), Some(1));
        store.fail_next_batches(1);

        assert!(store.save_detection_batch(&[event(cam, "AAA1", 0.9)], 1).is_err());
        assert_eq!(store.save_detection_batch(&[event(cam, "BBB2", 0.9)], 1)?, 1);

        let logs = store.plate_logs_for_camera(cam);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].plate_text, "BBB2");
        assert_eq!(store.batch_writes(), 1);
        Ok(())
    }

    #[test]
    fn in_memory_records_status_history() -> Result<()> {
        let store = InMemoryStorage::new();
        let cam = store.add_camera("gate", Some("stub://gate"), None);
        store.update_camera_status(cam, CameraStatus::Online, 1)?;
        store.update_camera_status(cam, CameraStatus::Offline, 2)?;
        assert_eq!(
            store.status_history(cam),
            vec![CameraStatus::Online, CameraStatus::Offline]
        );
        assert_eq!(store.get_camera(cam)?.and_then(|c| c.last_seen_ms), Some(2));
        Ok(())
    }
}
