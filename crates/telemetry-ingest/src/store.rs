// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record store abstraction
//!
//! Defines the trait for storage backends and the [`SharedStore`] handle that
//! every connection task appends through. The backend is assumed unsafe for
//! concurrent writers; `SharedStore` serializes all access behind one lock.

use crate::record::Record;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Identifier assigned to a stored reading (monotonically increasing).
pub type ReadingId = i64;

/// A persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Store-assigned identifier
    pub id: ReadingId,

    /// Server reception time
    pub event_time: NaiveDateTime,

    /// JSON object with every field, including the reception timestamp
    pub payload: String,
}

impl StoredReading {
    /// Decode the payload into a JSON value.
    pub fn payload_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.payload)
    }
}

/// Storage backend errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Payload encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid stored timestamp '{0}'")]
    Timestamp(String),

    #[error("Store task failed: {0}")]
    Task(String),
}

/// An append that did not reach stable storage.
///
/// Carries the record back so the caller decides whether to drop or retry it.
#[derive(Debug, Error)]
#[error("failed to persist record: {source}")]
pub struct PersistenceFailure {
    pub record: Record,
    #[source]
    pub source: StoreError,
}

/// Record store trait
///
/// Backend-agnostic interface for appending and reading back readings.
/// Implementations need not be thread-safe; [`SharedStore`] provides the
/// single-writer discipline.
///
/// # Implementations
///
/// - `SqliteStore` -- Default
pub trait RecordStore {
    /// Durably append a record, returning its new identifier.
    ///
    /// Must not return before the reading is committed.
    fn append(&self, record: &Record) -> Result<ReadingId, StoreError>;

    /// Fetch one reading by identifier.
    fn get(&self, id: ReadingId) -> Result<Option<StoredReading>, StoreError>;

    /// Most recent `limit` readings, newest first.
    fn recent(&self, limit: usize) -> Result<Vec<StoredReading>, StoreError>;

    /// Readings with `start <= event_time <= end`, oldest first.
    fn query_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<StoredReading>, StoreError>;

    /// Total number of readings stored.
    fn count(&self) -> Result<usize, StoreError>;
}

/// Shared, serialized handle to a record store.
///
/// Cloned into every connection task. The lock is held for exactly one
/// append, and the blocking backend call runs off the async worker threads.
pub struct SharedStore<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: RecordStore + Send + 'static> SharedStore<S> {
    /// Wrap a backend.
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Append a record under the store lock.
    pub async fn append(&self, record: Record) -> Result<ReadingId, PersistenceFailure> {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        let owned = record.clone();

        let result = tokio::task::spawn_blocking(move || guard.append(&owned))
            .await
            .unwrap_or_else(|e| Err(StoreError::Task(e.to_string())));

        result.map_err(|source| PersistenceFailure { record, source })
    }

    /// Run a read-only query under the store lock.
    pub async fn read<T, F>(&self, query: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T, StoreError> + Send + 'static,
    {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        tokio::task::spawn_blocking(move || query(&*guard))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Take the backend back once every other handle is gone.
    ///
    /// Returns `None` while clones are still alive (e.g. a connection task
    /// has not finished yet).
    pub fn into_inner(self) -> Option<S> {
        Arc::try_unwrap(self.inner).ok().map(Mutex::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PendingRecord;
    use crate::value::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Backend that detects overlapping appends.
    #[derive(Default)]
    struct OverlapDetector {
        in_flight: AtomicUsize,
        overlaps: AtomicUsize,
        appended: AtomicUsize,
    }

    impl RecordStore for OverlapDetector {
        fn append(&self, _record: &Record) -> Result<ReadingId, StoreError> {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(2));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self.appended.fetch_add(1, Ordering::SeqCst) as ReadingId + 1)
        }

        fn get(&self, _id: ReadingId) -> Result<Option<StoredReading>, StoreError> {
            Ok(None)
        }

        fn recent(&self, _limit: usize) -> Result<Vec<StoredReading>, StoreError> {
            Ok(Vec::new())
        }

        fn query_range(
            &self,
            _start: NaiveDateTime,
            _end: NaiveDateTime,
        ) -> Result<Vec<StoredReading>, StoreError> {
            Ok(Vec::new())
        }

        fn count(&self) -> Result<usize, StoreError> {
            Ok(self.appended.load(Ordering::SeqCst))
        }
    }

    struct RejectingStore;

    impl RecordStore for RejectingStore {
        fn append(&self, _record: &Record) -> Result<ReadingId, StoreError> {
            Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
        }

        fn get(&self, _id: ReadingId) -> Result<Option<StoredReading>, StoreError> {
            Ok(None)
        }

        fn recent(&self, _limit: usize) -> Result<Vec<StoredReading>, StoreError> {
            Ok(Vec::new())
        }

        fn query_range(
            &self,
            _start: NaiveDateTime,
            _end: NaiveDateTime,
        ) -> Result<Vec<StoredReading>, StoreError> {
            Ok(Vec::new())
        }

        fn count(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    fn record(n: i64) -> Record {
        let mut pending = PendingRecord::new();
        pending.upsert("n", Value::Int(n));
        pending.finalize(chrono::Local::now().naive_local())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_appends_never_overlap() {
        let store = SharedStore::new(OverlapDetector::default());

        let mut handles = Vec::new();
        for n in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.append(record(n)).await }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 32);

        let backend = store.into_inner().unwrap();
        assert_eq!(backend.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(backend.count().unwrap(), 32);
    }

    #[tokio::test]
    async fn test_failure_returns_original_record() {
        let store = SharedStore::new(RejectingStore);

        let err = store.append(record(7)).await.unwrap_err();
        assert_eq!(err.record.get("n"), Some(&Value::Int(7)));
        assert!(matches!(err.source, StoreError::Sqlite(_)));
        assert!(err.to_string().contains("failed to persist"));
    }

    #[tokio::test]
    async fn test_into_inner_requires_last_handle() {
        let store = SharedStore::new(RejectingStore);
        let clone = store.clone();
        assert!(store.into_inner().is_none());
        assert!(clone.into_inner().is_some());
    }

    #[tokio::test]
    async fn test_read_runs_query() {
        let store = SharedStore::new(OverlapDetector::default());
        store.append(record(1)).await.unwrap();
        let count = store.read(|s| s.count()).await.unwrap();
        assert_eq!(count, 1);
    }
}
