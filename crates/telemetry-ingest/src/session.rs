// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection session state machine
//!
//! A session sees every line of one sensor connection, in arrival order:
//!
//! ```text
//! <key>\t<value>   upsert field into the pending record
//! end              finalize the pending record, start a fresh one
//! <empty>          end of input, close the connection
//! ```
//!
//! The session performs no I/O. The connection loop feeds it lines and acts
//! on the returned [`LineOutcome`].

use crate::record::{PendingRecord, Record};
use crate::value::coerce;
use chrono::NaiveDateTime;
use std::net::SocketAddr;

/// Literal line that completes a record.
pub const TERMINATOR: &str = "end";

/// Field line key/value separator.
pub const FIELD_SEPARATOR: char = '\t';

/// Result of feeding one line to a [`Session`].
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Field upserted into the pending record.
    Accepted,
    /// Field line rejected; the pending record is unchanged.
    Malformed(MalformedLine),
    /// Terminator seen; the finalized record is ready to store.
    Completed(Record),
    /// Empty line; the peer has finished sending.
    Shutdown,
}

/// Why a field line was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedLine {
    /// No tab separator in the line.
    MissingSeparator,
}

impl std::fmt::Display for MalformedLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingSeparator => f.write_str("missing tab separator"),
        }
    }
}

/// Session counters, logged when the connection closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Field lines upserted.
    pub fields_accepted: u64,
    /// Field lines rejected.
    pub malformed_lines: u64,
    /// Records finalized.
    pub records_completed: u64,
}

/// Live state of one sensor connection.
#[derive(Debug)]
pub struct Session {
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    pending: PendingRecord,
    stats: SessionStats,
}

impl Session {
    /// Create a session with an empty pending record.
    pub fn new(peer_addr: SocketAddr, local_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            local_addr,
            pending: PendingRecord::new(),
            stats: SessionStats::default(),
        }
    }

    /// Remote sensor address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local listening address the sensor connected to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Record being accumulated.
    pub fn pending(&self) -> &PendingRecord {
        &self.pending
    }

    /// Counters for this session.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Process one line.
    ///
    /// Surrounding whitespace is trimmed here, so raw lines (with `\r\n`)
    /// may be passed directly. `received_at` is only read when the line is
    /// the terminator.
    pub fn handle_line(&mut self, line: &str, received_at: NaiveDateTime) -> LineOutcome {
        let line = line.trim();

        if line.is_empty() {
            return LineOutcome::Shutdown;
        }

        if line == TERMINATOR {
            let record = std::mem::take(&mut self.pending).finalize(received_at);
            self.stats.records_completed += 1;
            return LineOutcome::Completed(record);
        }

        match parse_field(line) {
            Ok((key, value)) => {
                self.pending.upsert(key, coerce(value));
                self.stats.fields_accepted += 1;
                LineOutcome::Accepted
            }
            Err(reason) => {
                self.stats.malformed_lines += 1;
                LineOutcome::Malformed(reason)
            }
        }
    }

    /// Consume the session, returning the number of fields that were never
    /// finalized.
    pub fn close(self) -> usize {
        self.pending.len()
    }
}

/// Split a field line at the first tab into trimmed key and value.
///
/// `line` is already trimmed, so a tab at either end is gone before the
/// split and neither half can come out empty.
fn parse_field(line: &str) -> Result<(&str, &str), MalformedLine> {
    let (key, value) = line
        .split_once(FIELD_SEPARATOR)
        .ok_or(MalformedLine::MissingSeparator)?;

    Ok((key.trim(), value.trim()))
}
