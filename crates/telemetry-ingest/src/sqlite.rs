// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite record store
//!
//! One row per finalized record, committed before `append` returns.

use crate::record::{format_timestamp, parse_timestamp, Record};
use crate::store::{ReadingId, RecordStore, StoreError, StoredReading};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite record store
///
/// Not thread-safe on its own (`Connection` is not `Sync`); share it through
/// [`SharedStore`](crate::store::SharedStore).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE sensor_readings (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     event_time TEXT NOT NULL,
///     payload JSONB NOT NULL
/// );
/// CREATE INDEX idx_sensor_readings_event_time ON sensor_readings(event_time);
/// ```
///
/// `event_time` holds the reception time as `YYYY-MM-DDTHH:MM:SS.ffffff`,
/// which sorts lexically in time order.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a file-based database
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to create in-memory SQLite database")?;

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        // Every append must be on stable storage before it returns.
        self.conn
            .pragma_update(None, "synchronous", "FULL")
            .context("Failed to set synchronous mode")?;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS sensor_readings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    event_time TEXT NOT NULL,
                    payload JSONB NOT NULL
                )",
                [],
            )
            .context("Failed to create sensor_readings table")?;

        self.conn
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_sensor_readings_event_time
                 ON sensor_readings(event_time)",
                [],
            )
            .context("Failed to create event_time index")?;

        Ok(())
    }

    /// Close the connection, surfacing any error SQLite reports on close.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| e)
            .context("Failed to close SQLite database")
    }

    fn row_to_reading(row: &rusqlite::Row) -> rusqlite::Result<(ReadingId, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    }

    fn decode(
        (id, event_time, payload): (ReadingId, String, String),
    ) -> Result<StoredReading, StoreError> {
        let event_time =
            parse_timestamp(&event_time).map_err(|_| StoreError::Timestamp(event_time.clone()))?;

        Ok(StoredReading {
            id,
            event_time,
            payload,
        })
    }

    fn collect(
        rows: impl Iterator<Item = rusqlite::Result<(ReadingId, String, String)>>,
    ) -> Result<Vec<StoredReading>, StoreError> {
        rows.map(|row| Self::decode(row?)).collect()
    }
}

impl RecordStore for SqliteStore {
    fn append(&self, record: &Record) -> Result<ReadingId, StoreError> {
        let payload = record.to_payload()?;

        self.conn.execute(
            "INSERT INTO sensor_readings (event_time, payload) VALUES (?1, ?2)",
            params![format_timestamp(&record.received_at()), payload],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn get(&self, id: ReadingId) -> Result<Option<StoredReading>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, event_time, payload FROM sensor_readings WHERE id = ?1",
                [id],
                Self::row_to_reading,
            )
            .optional()?;

        row.map(Self::decode).transpose()
    }

    fn recent(&self, limit: usize) -> Result<Vec<StoredReading>, StoreError> {
        let limit = limit.min(i64::MAX as usize) as i64;
        let mut stmt = self.conn.prepare(
            "SELECT id, event_time, payload
             FROM sensor_readings
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit], Self::row_to_reading)?;
        Self::collect(rows)
    }

    fn query_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<StoredReading>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_time, payload
             FROM sensor_readings
             WHERE event_time BETWEEN ?1 AND ?2
             ORDER BY event_time ASC, id ASC",
        )?;

        let rows = stmt.query_map(
            params![format_timestamp(&start), format_timestamp(&end)],
            Self::row_to_reading,
        )?;
        Self::collect(rows)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM sensor_readings", [], |row| row.get(0))?;

        Ok(count as usize)
    }
}
