// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor connection line reading.
//!
//! Splits the byte stream on `\n`. Lines are capped at a configured length;
//! an oversized line is skipped up to its newline and reported instead of
//! ending the connection.

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// One line read from a sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Decoded line, without its `\n`.
    Text(String),
    /// Line exceeded the length limit; carries the number of bytes skipped.
    TooLong(usize),
    /// Line was not valid UTF-8.
    InvalidUtf8,
}

/// Buffered line reader over a sensor byte stream.
pub struct LineReader<R> {
    reader: BufReader<R>,
    max_line_length: usize,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Create a reader that accepts lines up to `max_line_length` bytes.
    pub fn new(stream: R, max_line_length: usize) -> Self {
        Self {
            reader: BufReader::new(stream),
            max_line_length,
            buffer: Vec::with_capacity(256),
        }
    }

    /// Read the next line.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream. A final line
    /// without a trailing `\n` is still returned.
    pub async fn read_line(&mut self) -> Result<Option<Line>, ConnectionError> {
        self.buffer.clear();

        let limit = self.max_line_length as u64 + 1;
        let n = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.buffer)
            .await?;

        if n == 0 {
            return Ok(None);
        }

        if self.buffer.last() == Some(&b'\n') {
            self.buffer.pop();
        } else if self.buffer.len() > self.max_line_length {
            let skipped = self.buffer.len() + self.skip_line().await?;
            return Ok(Some(Line::TooLong(skipped)));
        }

        match std::str::from_utf8(&self.buffer) {
            Ok(text) => Ok(Some(Line::Text(text.to_string()))),
            Err(_) => Ok(Some(Line::InvalidUtf8)),
        }
    }

    /// Discard input up to and including the next `\n` (or EOF).
    async fn skip_line(&mut self) -> Result<usize, ConnectionError> {
        let mut skipped = 0;
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(skipped);
            }

            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.reader.consume(pos + 1);
                    return Ok(skipped + pos + 1);
                }
                None => {
                    let len = available.len();
                    self.reader.consume(len);
                    skipped += len;
                }
            }
        }
    }
}

/// Caps malformed-line warnings per connection.
#[derive(Debug, Clone)]
pub struct DiagnosticLimiter {
    limit: Option<u32>,
    reported: u32,
}

/// Whether to emit a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    Emit,
    /// Emit, and note that later ones are suppressed.
    EmitLast,
    Suppress,
}

impl DiagnosticLimiter {
    /// `None` reports every malformed line.
    pub fn new(limit: Option<u32>) -> Self {
        Self { limit, reported: 0 }
    }

    /// Account for one malformed line.
    pub fn on_malformed(&mut self) -> Diagnostic {
        let Some(limit) = self.limit else {
            return Diagnostic::Emit;
        };

        if self.reported >= limit {
            return Diagnostic::Suppress;
        }

        self.reported += 1;
        if self.reported == limit {
            Diagnostic::EmitLast
        } else {
            Diagnostic::Emit
        }
    }
}

/// Connection error types.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
