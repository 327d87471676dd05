//! Attendance store over a single SQLite connection.
//!
//! The connection sits behind a mutex and every write runs in an IMMEDIATE
//! transaction, so the existence check and the insert of
//! [`AttendanceStore::record_attendance`] cannot interleave with another
//! caller in this process.

use crate::record::{AttendanceRecord, AttendanceStatus, ClassSummary, RecordOutcome, TIMESTAMP_FORMAT};
use chrono::Local;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

const TABLE_PREFIX: &str = "attendance_";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid class code {0:?}: must be non-empty and free of control characters")]
    InvalidClassCode(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("store connection lock poisoned")]
    LockPoisoned,
}

/// The attendance table of one class.
///
/// Formats as a quoted SQL identifier, so any class code (`IF-101`,
/// `Kelas A`) is usable in statement text.
struct ClassTable {
    name: String,
}

impl ClassTable {
    fn new(class_code: &str) -> Result<Self, StoreError> {
        if class_code.is_empty() || class_code.chars().any(char::is_control) {
            return Err(StoreError::InvalidClassCode(class_code.to_string()));
        }
        Ok(Self {
            name: format!("{TABLE_PREFIX}{class_code}"),
        })
    }

    fn index(&self) -> String {
        quote_ident(&format!("idx_{}_nim_meeting", self.name))
    }
}

impl fmt::Display for ClassTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote_ident(&self.name))
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn create_class_table(conn: &Connection, table: &ClassTable) -> rusqlite::Result<()> {
    let index = table.index();
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nim TEXT NOT NULL,
            name TEXT NOT NULL,
            meeting INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'success'))
        );
        CREATE INDEX IF NOT EXISTS {index} ON {table} (nim, meeting);"
    ))
}

fn table_exists(conn: &Connection, table: &ClassTable) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table.name],
        |_| Ok(()),
    )
    .optional()
    .map(|row| row.is_some())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: row.get(0)?,
        identity_id: row.get(1)?,
        display_name: row.get(2)?,
        meeting: row.get(3)?,
        timestamp: row.get(4)?,
        status: row.get(5)?,
    })
}

pub struct AttendanceStore {
    conn: Mutex<Connection>,
}

impl AttendanceStore {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        tracing::debug!(path = %path.display(), "opened attendance database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Create the class table and its (nim, meeting) index if missing.
    pub fn ensure_class(&self, class_code: &str) -> Result<(), StoreError> {
        let table = ClassTable::new(class_code)?;
        let conn = self.lock()?;
        create_class_table(&conn, &table)?;
        Ok(())
    }

    /// Record that `identity_id` attended `meeting` of `class_code`, once.
    ///
    /// Never fails to the caller: storage problems come back as
    /// [`RecordOutcome::Failed`].
    pub fn record_attendance(
        &self,
        class_code: &str,
        identity_id: &str,
        display_name: &str,
        meeting: u32,
    ) -> RecordOutcome {
        match self.try_record(class_code, identity_id, display_name, meeting) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    class = class_code,
                    identity = identity_id,
                    meeting,
                    error = %e,
                    "failed to record attendance"
                );
                RecordOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    fn try_record(
        &self,
        class_code: &str,
        identity_id: &str,
        display_name: &str,
        meeting: u32,
    ) -> Result<RecordOutcome, StoreError> {
        let table = ClassTable::new(class_code)?;
        let mut conn = self.lock()?;
        create_class_table(&conn, &table)?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<i64> = tx
            .query_row(
                &format!("SELECT id FROM {table} WHERE nim = ?1 AND meeting = ?2 LIMIT 1"),
                params![identity_id, meeting],
                |r| r.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            tx.commit()?;
            tracing::info!(
                class = class_code,
                identity = identity_id,
                meeting,
                id,
                "already recorded"
            );
            return Ok(RecordOutcome::AlreadyRecorded { id });
        }

        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        tx.execute(
            &format!(
                "INSERT INTO {table} (nim, name, meeting, timestamp, status) VALUES (?1, ?2, ?3, ?4, ?5)"
            ),
            params![identity_id, display_name, meeting, timestamp, AttendanceStatus::Pending],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::info!(
            class = class_code,
            identity = identity_id,
            name = display_name,
            meeting,
            id,
            "attendance recorded"
        );
        Ok(RecordOutcome::Recorded { id })
    }

    /// Records of a class, ordered by meeting then timestamp, or by
    /// timestamp within a single meeting. A class without a table has none.
    pub fn records(
        &self,
        class_code: &str,
        meeting: Option<u32>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let table = ClassTable::new(class_code)?;
        let conn = self.lock()?;
        if !table_exists(&conn, &table)? {
            return Ok(Vec::new());
        }

        let columns = "id, nim, name, meeting, timestamp, status";
        let records = match meeting {
            Some(m) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {columns} FROM {table} WHERE meeting = ?1 ORDER BY timestamp, id"
                ))?;
                let rows = stmt.query_map(params![m], row_to_record)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {columns} FROM {table} ORDER BY meeting, timestamp, id"
                ))?;
                let rows = stmt.query_map([], row_to_record)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(records)
    }

    /// Ids of records not yet synced.
    pub fn pending_ids(&self, class_code: &str) -> Result<Vec<i64>, StoreError> {
        let table = ClassTable::new(class_code)?;
        let conn = self.lock()?;
        if !table_exists(&conn, &table)? {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(&format!("SELECT id FROM {table} WHERE status = ?1 ORDER BY id"))?;
        let ids = stmt
            .query_map(params![AttendanceStatus::Pending], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Set status to success for exactly `ids` in one transaction. Returns
    /// the number of rows updated; unknown ids are ignored.
    pub fn mark_synced(&self, class_code: &str, ids: &[i64]) -> Result<usize, StoreError> {
        let table = ClassTable::new(class_code)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        if !table_exists(&conn, &table)? {
            return Ok(0);
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let updated = tx.execute(
            &format!(
                "UPDATE {table} SET status = '{}' WHERE id IN ({placeholders})",
                AttendanceStatus::Success
            ),
            params_from_iter(ids.iter()),
        )?;
        tx.commit()?;

        tracing::info!(class = class_code, updated, "marked records synced");
        Ok(updated)
    }

    /// Flip every pending record of a class to success.
    pub fn sync_pending(&self, class_code: &str) -> Result<usize, StoreError> {
        let table = ClassTable::new(class_code)?;
        let mut conn = self.lock()?;
        if !table_exists(&conn, &table)? {
            return Ok(0);
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let updated = tx.execute(
            &format!("UPDATE {table} SET status = ?1 WHERE status = ?2"),
            params![AttendanceStatus::Success, AttendanceStatus::Pending],
        )?;
        tx.commit()?;

        tracing::info!(class = class_code, updated, "synced pending records");
        Ok(updated)
    }

    /// Class codes that have an attendance table, sorted.
    pub fn classes(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'attendance\\_%' ESCAPE '\\' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names
            .into_iter()
            .filter_map(|n| n.strip_prefix(TABLE_PREFIX).map(str::to_string))
            .collect())
    }

    pub fn summary(&self, class_code: &str) -> Result<ClassSummary, StoreError> {
        let table = ClassTable::new(class_code)?;
        let conn = self.lock()?;
        let mut summary = ClassSummary {
            class_code: class_code.to_string(),
            ..ClassSummary::default()
        };
        if !table_exists(&conn, &table)? {
            return Ok(summary);
        }

        let (records, pending, synced, meetings, identities): (i64, i64, i64, i64, i64) = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*),
                            COALESCE(SUM(status = 'pending'), 0),
                            COALESCE(SUM(status = 'success'), 0),
                            COUNT(DISTINCT meeting),
                            COUNT(DISTINCT nim)
                     FROM {table}"
                ),
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )?;

        summary.records = records as u64;
        summary.pending = pending as u64;
        summary.synced = synced as u64;
        summary.meetings = meetings as u64;
        summary.identities = identities as u64;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_table_naming() {
        let table = ClassTable::new("IF101").unwrap();
        assert_eq!(table.name, "attendance_IF101");
        assert_eq!(table.to_string(), "\"attendance_IF101\"");
        assert_eq!(
            ClassTable::new("a\"b").unwrap().to_string(),
            "\"attendance_a\"\"b\""
        );
        assert!(matches!(ClassTable::new(""), Err(StoreError::InvalidClassCode(_))));
        assert!(ClassTable::new("IF\n101").is_err());
    }

    #[test]
    fn test_punctuated_class_codes() {
        let store = AttendanceStore::open_in_memory().unwrap();
        for code in ["IF-101", "Kelas A", "x\"; DROP TABLE y; --"] {
            assert!(store.record_attendance(code, "S1", "Ann", 1).is_success(), "{code}");
            assert!(matches!(
                store.record_attendance(code, "S1", "Ann", 1),
                RecordOutcome::AlreadyRecorded { .. }
            ));
            assert_eq!(store.records(code, Some(1)).unwrap().len(), 1);
            assert_eq!(store.sync_pending(code).unwrap(), 1);
        }
        assert_eq!(store.classes().unwrap(), vec!["IF-101", "Kelas A", "x\"; DROP TABLE y; --"]);
    }

    #[test]
    fn test_record_then_already_recorded() {
        let store = AttendanceStore::open_in_memory().unwrap();
        let first = store.record_attendance("C1", "S1", "Ann", 1);
        let RecordOutcome::Recorded { id } = &first else {
            panic!("expected Recorded, got {first:?}");
        };
        assert_eq!(
            store.record_attendance("C1", "S1", "Ann", 1),
            RecordOutcome::AlreadyRecorded { id: *id }
        );
        assert_eq!(store.records("C1", None).unwrap().len(), 1);
    }

    #[test]
    fn test_new_record_is_pending_with_timestamp() {
        let store = AttendanceStore::open_in_memory().unwrap();
        store.record_attendance("C1", "S1", "Ann", 1);
        let rec = &store.records("C1", Some(1)).unwrap()[0];
        assert_eq!(rec.identity_id, "S1");
        assert_eq!(rec.display_name, "Ann");
        assert_eq!(rec.status, AttendanceStatus::Pending);
        assert!(chrono::NaiveDateTime::parse_from_str(&rec.timestamp, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn test_invalid_class_code_fails_without_panicking() {
        let store = AttendanceStore::open_in_memory().unwrap();
        let outcome = store.record_attendance("", "S1", "Ann", 1);
        assert!(!outcome.is_success());
        assert!(outcome.message().contains("invalid class code"));
    }

    #[test]
    fn test_records_of_unknown_class_is_empty() {
        let store = AttendanceStore::open_in_memory().unwrap();
        assert!(store.records("NOPE", None).unwrap().is_empty());
        assert!(store.pending_ids("NOPE").unwrap().is_empty());
        assert_eq!(store.sync_pending("NOPE").unwrap(), 0);
        assert_eq!(store.summary("NOPE").unwrap().records, 0);
        // Reads do not create tables.
        assert!(store.classes().unwrap().is_empty());
    }

    #[test]
    fn test_status_check_constraint() {
        let store = AttendanceStore::open_in_memory().unwrap();
        store.ensure_class("C1").unwrap();
        let conn = store.lock().unwrap();
        let err = conn.execute(
            "INSERT INTO attendance_C1 (nim, name, meeting, timestamp, status) VALUES ('S1', 'Ann', 1, 'x', 'bogus')",
            [],
        );
        assert!(err.is_err());
    }
}
