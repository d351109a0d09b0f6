use crate::booking::{BookingRecord, Flag};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no record for booking {0}")]
    NotFound(String),
    #[error("record for booking {0} already exists")]
    Conflict(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Persisted booking records; the notification flags on them are the only
/// shared mutable state the rule pass touches.
///
/// Implementations may retry transient failures internally. Whatever they
/// return is final as far as the engine is concerned.
pub trait BookingStore: Send + Sync {
    fn get_record(&self, booking_id: &str) -> Result<Option<BookingRecord>, StoreError>;

    fn create_record(&self, record: &BookingRecord) -> Result<(), StoreError>;

    fn update_flag(&self, booking_id: &str, flag: Flag, value: bool) -> Result<(), StoreError>;
}

/// In-process store used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, BookingRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = BookingRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.booking_id.clone(), record))
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, BookingRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Backend("record map lock poisoned".to_string()))
    }
}

impl BookingStore for MemoryStore {
    fn get_record(&self, booking_id: &str) -> Result<Option<BookingRecord>, StoreError> {
        Ok(self.lock()?.get(booking_id).cloned())
    }

    fn create_record(&self, record: &BookingRecord) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        if records.contains_key(&record.booking_id) {
            return Err(StoreError::Conflict(record.booking_id.clone()));
        }
        records.insert(record.booking_id.clone(), record.clone());
        Ok(())
    }

    fn update_flag(&self, booking_id: &str, flag: Flag, value: bool) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        let record = records
            .get_mut(booking_id)
            .ok_or_else(|| StoreError::NotFound(booking_id.to_string()))?;
        record.set_flag(flag, value);
        Ok(())
    }
}

/// Reads through to a backing store and keeps every write in memory.
///
/// A record is copied into memory the first time it is read or written, so a
/// dry run sees the real history while the backing store stays untouched.
pub struct OverlayStore {
    backing: Arc<dyn BookingStore>,
    overlay: MemoryStore,
}

impl OverlayStore {
    pub fn new(backing: Arc<dyn BookingStore>) -> Self {
        Self {
            backing,
            overlay: MemoryStore::new(),
        }
    }

    fn seed(&self, booking_id: &str) -> Result<Option<BookingRecord>, StoreError> {
        if let Some(record) = self.overlay.get_record(booking_id)? {
            return Ok(Some(record));
        }
        let Some(record) = self.backing.get_record(booking_id)? else {
            return Ok(None);
        };
        match self.overlay.create_record(&record) {
            Ok(()) | Err(StoreError::Conflict(_)) => Ok(Some(record)),
            Err(e) => Err(e),
        }
    }
}

impl BookingStore for OverlayStore {
    fn get_record(&self, booking_id: &str) -> Result<Option<BookingRecord>, StoreError> {
        self.seed(booking_id)
    }

    fn create_record(&self, record: &BookingRecord) -> Result<(), StoreError> {
        self.seed(&record.booking_id)?;
        self.overlay.create_record(record)
    }

    fn update_flag(&self, booking_id: &str, flag: Flag, value: bool) -> Result<(), StoreError> {
        self.seed(booking_id)?;
        self.overlay.update_flag(booking_id, flag, value)
    }
}

/// SQLite-backed store, one row per booking.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create storage directory: {}", parent.display())
                    })?;
                }
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open booking database: {db_path}"))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS booking_records (
                booking_id TEXT PRIMARY KEY,
                confirm_sms INTEGER NOT NULL DEFAULT 0,
                remind_sms INTEGER NOT NULL DEFAULT 0,
                option_sms INTEGER NOT NULL DEFAULT 0,
                created_at TEXT
            )",
            [],
        )?;

        log::debug!("Opened booking database: {db_path}");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("database connection lock poisoned".to_string()))
    }
}

impl BookingStore for SqliteStore {
    fn get_record(&self, booking_id: &str) -> Result<Option<BookingRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT booking_id, confirm_sms, remind_sms, option_sms, created_at
             FROM booking_records WHERE booking_id = ?",
        )?;

        let record = stmt
            .query_row(params![booking_id], |row| {
                let created_at: Option<String> = row.get(4)?;
                Ok(BookingRecord {
                    booking_id: row.get(0)?,
                    confirm_sms: row.get(1)?,
                    remind_sms: row.get(2)?,
                    option_sms: row.get(3)?,
                    created_at: created_at.and_then(|s| {
                        NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).ok()
                    }),
                })
            })
            .optional()?;

        Ok(record)
    }

    fn create_record(&self, record: &BookingRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO booking_records
                (booking_id, confirm_sms, remind_sms, option_sms, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                record.booking_id,
                record.confirm_sms,
                record.remind_sms,
                record.option_sms,
                record
                    .created_at
                    .map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
            ],
        )?;

        if inserted == 0 {
            return Err(StoreError::Conflict(record.booking_id.clone()));
        }
        Ok(())
    }

    fn update_flag(&self, booking_id: &str, flag: Flag, value: bool) -> Result<(), StoreError> {
        let conn = self.lock()?;
        // column name comes from the closed Flag enum, never from input
        let sql = format!(
            "UPDATE booking_records SET {} = ? WHERE booking_id = ?",
            flag.as_str()
        );
        let updated = conn.execute(&sql, params![value, booking_id])?;

        if updated == 0 {
            return Err(StoreError::NotFound(booking_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn exercise(store: &dyn BookingStore) {
        assert!(store.get_record("b1").unwrap().is_none());

        let mut record = BookingRecord::new("b1");
        record.created_at = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(9, 30, 0);
        store.create_record(&record).unwrap();
        assert!(matches!(
            store.create_record(&record),
            Err(StoreError::Conflict(_))
        ));

        store.update_flag("b1", Flag::ConfirmSms, true).unwrap();
        let loaded = store.get_record("b1").unwrap().unwrap();
        assert!(loaded.confirm_sms);
        assert!(!loaded.remind_sms);
        assert_eq!(loaded.created_at, record.created_at);

        store.update_flag("b1", Flag::ConfirmSms, false).unwrap();
        assert!(!store.get_record("b1").unwrap().unwrap().confirm_sms);

        assert!(matches!(
            store.update_flag("missing", Flag::RemindSms, true),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_sqlite_store_in_memory() {
        exercise(&SqliteStore::open(":memory:").unwrap());
    }

    #[test]
    fn test_sqlite_store_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bookings.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::open(path).unwrap();
            store.create_record(&BookingRecord::new("b9")).unwrap();
            store.update_flag("b9", Flag::OptionSms, true).unwrap();
        }

        let reopened = SqliteStore::open(path).unwrap();
        let record = reopened.get_record("b9").unwrap().unwrap();
        assert!(record.option_sms);
    }

    #[test]
    fn test_memory_store_seeded() {
        let store = MemoryStore::with_records(vec![
            BookingRecord::new("b1").with_flag(Flag::RemindSms, true)
        ]);
        assert!(store.get_record("b1").unwrap().unwrap().remind_sms);
    }

    #[test]
    fn test_overlay_store() {
        exercise(&OverlayStore::new(Arc::new(MemoryStore::new())));
    }

    #[test]
    fn test_overlay_reads_backing_and_never_writes_it() {
        let backing = Arc::new(MemoryStore::with_records([
            BookingRecord::new("b1").with_flag(Flag::ConfirmSms, true)
        ]));
        let store = OverlayStore::new(backing.clone());

        assert!(store.get_record("b1").unwrap().unwrap().confirm_sms);
        assert!(matches!(
            store.create_record(&BookingRecord::new("b1")),
            Err(StoreError::Conflict(_))
        ));

        store.update_flag("b1", Flag::ConfirmSms, false).unwrap();
        store.create_record(&BookingRecord::new("b2")).unwrap();
        assert!(!store.get_record("b1").unwrap().unwrap().confirm_sms);
        assert!(store.get_record("b2").unwrap().is_some());

        assert!(backing.get_record("b1").unwrap().unwrap().confirm_sms);
        assert!(backing.get_record("b2").unwrap().is_none());
    }
}
