// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor Telemetry Ingest
//!
//! Accepts long-lived TCP connections from remote sensors speaking a
//! line-oriented key/value protocol and durably records each completed
//! reading.
//!
//! # Wire protocol
//!
//! ```text
//! temp\t21\n        field line: <key> TAB <value>
//! unit\tC\n         (values become integers, floats or text)
//! end\n             finalize the record and store it
//! \n                end of session, the server closes the connection
//! ```
//!
//! # Architecture
//!
//! ```text
//! IngestServer
//! +-- connection task per sensor  (LineReader -> Session)
//! +-- SharedStore                 (single-writer lock)
//!     +-- SqliteStore             (sensor_readings table)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use telemetry_ingest::{IngestServer, ServerConfig, SharedStore, SqliteStore};
//!
//! let config = ServerConfig::new("0.0.0.0", 2000, "readings.db");
//! let store = SharedStore::new(SqliteStore::new(&config.db_path)?);
//! let server = IngestServer::bind(config, store).await?;
//! let store = server.run().await?;
//! ```

pub mod config;
pub mod record;
pub mod server;
pub mod session;
pub mod sqlite;
pub mod store;
pub mod value;

pub use config::{ConfigError, ServerConfig};
pub use record::{Field, PendingRecord, Record, RECEIVED_TIMESTAMP_FIELD};
pub use server::{IngestServer, IngestStats, IngestStatsSnapshot, ServerError, ShutdownHandle};
pub use session::{LineOutcome, MalformedLine, Session, SessionStats};
pub use sqlite::SqliteStore;
pub use store::{
    PersistenceFailure, ReadingId, RecordStore, SharedStore, StoreError, StoredReading,
};
pub use value::{coerce, Value};
