//! SQLite queue store.

use super::Store;
use crate::{DeadLetter, Error, Event, EventId, QueueEntry, Result, Status};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;
use serde_rusqlite::from_rows;
use std::path::Path;
use tracing::debug;

const ENTRY_COLUMNS: &str = "seq, status, attempts, data";

/// SQLite-backed queue store.
pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Deserialize)]
struct EntryRow {
    seq: i64,
    status: String,
    attempts: u32,
    data: String,
}

impl EntryRow {
    fn into_entry(self) -> Result<QueueEntry> {
        Ok(QueueEntry {
            seq: self.seq,
            status: self.status.parse()?,
            attempts: self.attempts,
            event: serde_json::from_str(&self.data)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DeadLetterRow {
    attempts: u32,
    reason: String,
    failed_at: String,
    data: String,
}

impl DeadLetterRow {
    fn into_dead_letter(self) -> Result<DeadLetter> {
        let failed_at: DateTime<Utc> = self
            .failed_at
            .parse()
            .map_err(|e| Error::Corrupt(format!("bad failed_at '{}': {e}", self.failed_at)))?;
        Ok(DeadLetter {
            event: serde_json::from_str(&self.data)?,
            attempts: self.attempts,
            reason: self.reason,
            failed_at,
        })
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn to_count(n: i64) -> usize {
    usize::try_from(n).unwrap_or_default()
}

impl SqliteStore {
    /// Open or create a queue database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self { conn };
        store.init_schema()?;
        debug!(path = %path.as_ref().display(), "opened queue database");
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_queue_status
                ON queue(status, seq);

            CREATE TABLE IF NOT EXISTS dead_letters (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                reason TEXT NOT NULL,
                failed_at TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn query_entries(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<QueueEntry>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query(params)?;
        from_rows::<EntryRow>(rows)
            .map(|row| row?.into_entry())
            .collect()
    }

    fn update_each(&mut self, sql: &str, ids: &[EventId], status: Status) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare_cached(sql)?;
            for id in ids {
                updated += stmt.execute(params![status.as_str(), id.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }
}

impl Store for SqliteStore {
    fn append(&mut self, event: &Event) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO queue (id, status, attempts, created_at, kind, data)
             VALUES (?1, ?2, 0, ?3, ?4, ?5)",
            params![
                event.id.to_string(),
                Status::Pending.as_str(),
                event.timestamp.to_rfc3339(),
                event.kind.label(),
                serde_json::to_string(event)?,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn fetch(&self, ids: &[EventId]) -> Result<Vec<QueueEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM queue WHERE id = ?1");
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            entries.extend(self.query_entries(&sql, [id.to_string()])?);
        }
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    fn scan(&self, status: Status, limit: usize) -> Result<Vec<QueueEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM queue WHERE status = ?1 ORDER BY seq LIMIT ?2"
        );
        self.query_entries(&sql, params![status.as_str(), sql_limit(limit)])
    }

    fn set_status(&mut self, ids: &[EventId], status: Status) -> Result<usize> {
        self.update_each("UPDATE queue SET status = ?1 WHERE id = ?2", ids, status)
    }

    fn record_failure(&mut self, ids: &[EventId]) -> Result<usize> {
        self.update_each(
            "UPDATE queue SET status = ?1, attempts = attempts + 1 WHERE id = ?2",
            ids,
            Status::Pending,
        )
    }

    fn count(&self, status: Status) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM queue WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(to_count(n))
    }

    fn len(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
        Ok(to_count(n))
    }

    fn remove_status(&mut self, status: Status) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM queue WHERE status = ?1", [status.as_str()])?;
        Ok(removed)
    }

    fn reset_in_flight(&mut self) -> Result<usize> {
        let reset = self.conn.execute(
            "UPDATE queue SET status = ?1 WHERE status = ?2",
            [Status::Pending.as_str(), Status::InFlight.as_str()],
        )?;
        Ok(reset)
    }

    fn bury(&mut self, entries: &[QueueEntry], reason: &str) -> Result<()> {
        let failed_at = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO dead_letters (id, attempts, reason, failed_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut delete = tx.prepare_cached("DELETE FROM queue WHERE id = ?1")?;
            for entry in entries {
                let id = entry.id().to_string();
                insert.execute(params![
                    id,
                    entry.attempts,
                    reason,
                    failed_at,
                    serde_json::to_string(&entry.event)?,
                ])?;
                delete.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT attempts, reason, failed_at, data FROM dead_letters
             ORDER BY seq DESC LIMIT ?1",
        )?;
        let rows = stmt.query([sql_limit(limit)])?;
        from_rows::<DeadLetterRow>(rows)
            .map(|row| row?.into_dead_letter())
            .collect()
    }

    fn dead_letter_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
        Ok(to_count(n))
    }

    fn clear_dead_letters(&mut self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM dead_letters", [])?)
    }

    fn get_state(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM state WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put_state(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }
}
