// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listener and per-connection dispatch.
//!
//! Every accepted sensor connection gets its own task owning a [`Session`].
//! All tasks share one [`SharedStore`]; nothing else crosses connections.

use crate::config::ServerConfig;
use crate::record::Record;
use crate::session::{LineOutcome, MalformedLine, Session};
use crate::store::{RecordStore, SharedStore};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub mod connection;

pub use connection::{ConnectionError, Diagnostic, DiagnosticLimiter, Line, LineReader};

/// Ingest counters shared by all connection tasks.
#[derive(Debug, Default)]
pub struct IngestStats {
    /// Connections accepted.
    pub connections_accepted: AtomicU64,
    /// Connections closed (any reason).
    pub connections_closed: AtomicU64,
    /// Records committed to the store.
    pub records_stored: AtomicU64,
    /// Records lost to store failures.
    pub persistence_failures: AtomicU64,
    /// Field lines accepted into a record.
    pub fields_accepted: AtomicU64,
    /// Lines discarded as malformed.
    pub malformed_lines: AtomicU64,
    /// Partial records dropped at connection close.
    pub partial_records_discarded: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub records_stored: u64,
    pub persistence_failures: u64,
    pub fields_accepted: u64,
    pub malformed_lines: u64,
    pub partial_records_discarded: u64,
}

impl IngestStats {
    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            records_stored: self.records_stored.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            fields_accepted: self.fields_accepted.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            partial_records_discarded: self.partial_records_discarded.load(Ordering::Relaxed),
        }
    }
}

impl IngestStatsSnapshot {
    /// Connections still open.
    pub fn active_connections(&self) -> u64 {
        self.connections_accepted
            .saturating_sub(self.connections_closed)
    }
}

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause after `consecutive` failed accepts in a row (doubles, capped).
fn accept_backoff(consecutive: u32) -> Duration {
    let factor = 1u32 << consecutive.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_MIN
        .saturating_mul(factor)
        .min(ACCEPT_BACKOFF_MAX)
}

/// Stops a running [`IngestServer`].
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Stop accepting, end every session, and let `run` return.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Sensor ingest server.
pub struct IngestServer<S> {
    config: Arc<ServerConfig>,
    listener: TcpListener,
    store: SharedStore<S>,
    stats: Arc<IngestStats>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl<S: RecordStore + Send + 'static> IngestServer<S> {
    /// Validate the configuration and bind the listening socket.
    pub async fn bind(config: ServerConfig, store: SharedStore<S>) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.listen_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind(addr.clone(), e))?;

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            listener,
            store,
            stats: Arc::new(IngestStats::default()),
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for stopping the server from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Accept connections until shutdown, then wait for every session to end.
    ///
    /// Returns the store handle so the caller can release the backend.
    pub async fn run(self) -> Result<SharedStore<S>, ServerError> {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut sessions = JoinSet::new();
        let mut accept_failures = 0u32;

        if let Ok(addr) = self.listener.local_addr() {
            info!("Ingest server listening on {}", addr);
        }

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            accept_failures = 0;
                            self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);

                            let store = self.store.clone();
                            let config = Arc::clone(&self.config);
                            let stats = Arc::clone(&self.stats);
                            let shutdown = self.shutdown_tx.subscribe();

                            sessions.spawn(async move {
                                if let Err(e) = handle_connection(
                                    stream,
                                    peer_addr,
                                    store,
                                    config,
                                    Arc::clone(&stats),
                                    shutdown,
                                ).await {
                                    warn!("Connection error from {}: {}", peer_addr, e);
                                }
                                stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            // EMFILE and friends persist; don't spin on them.
                            accept_failures = accept_failures.saturating_add(1);
                            let pause = accept_backoff(accept_failures);
                            error!("Accept error: {} (retrying in {:?})", e, pause);
                            tokio::select! {
                                _ = tokio::time::sleep(pause) => {}
                                _ = shutdown.changed() => {}
                            }
                        }
                    }
                }
                Some(joined) = sessions.join_next() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("Shutdown signal received");
                }
            }
        }

        drop(self.listener);

        let open = sessions.len();
        if open > 0 {
            debug!("Waiting for {} connection tasks", open);
        }
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!("Connection task failed: {}", e);
            }
        }

        let stats = self.stats.snapshot();
        info!(
            connections = stats.connections_accepted,
            stored = stats.records_stored,
            failed = stats.persistence_failures,
            malformed = stats.malformed_lines,
            "Ingest server stopped"
        );

        Ok(self.store)
    }
}

/// Drive one sensor connection until it ends.
async fn handle_connection<S: RecordStore + Send + 'static>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    store: SharedStore<S>,
    config: Arc<ServerConfig>,
    stats: Arc<IngestStats>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let local_addr = stream.local_addr()?;
    info!(local = %local_addr, peer = %peer_addr, "Connection opened");

    let mut session = Session::new(peer_addr, local_addr);
    let mut lines = LineReader::new(stream, config.max_line_length);
    let mut diagnostics = DiagnosticLimiter::new(config.malformed_report_limit);

    let result = loop {
        if *shutdown.borrow_and_update() {
            break Ok(());
        }

        let line = tokio::select! {
            line = lines.read_line() => line,
            _ = shutdown.changed() => {
                debug!("Connection handler shutting down: {}", peer_addr);
                break Ok(());
            }
        };

        let text = match line {
            Ok(Some(Line::Text(text))) => text,
            Ok(Some(Line::TooLong(len))) => {
                stats.malformed_lines.fetch_add(1, Ordering::Relaxed);
                report_malformed(&mut diagnostics, peer_addr, || {
                    format!("line of {} bytes exceeds limit", len)
                });
                continue;
            }
            Ok(Some(Line::InvalidUtf8)) => {
                stats.malformed_lines.fetch_add(1, Ordering::Relaxed);
                report_malformed(&mut diagnostics, peer_addr, || "invalid UTF-8".to_string());
                continue;
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e.into()),
        };

        match session.handle_line(&text, chrono::Local::now().naive_local()) {
            LineOutcome::Accepted => {}
            LineOutcome::Malformed(reason) => {
                stats.malformed_lines.fetch_add(1, Ordering::Relaxed);
                report_malformed(&mut diagnostics, peer_addr, || describe(reason, &text));
            }
            LineOutcome::Completed(record) => {
                store_record(&store, record, peer_addr, &stats).await;
            }
            LineOutcome::Shutdown => break Ok(()),
        }
    };

    let session_stats = session.stats();
    stats
        .fields_accepted
        .fetch_add(session_stats.fields_accepted, Ordering::Relaxed);

    let discarded = session.close();
    if discarded > 0 {
        stats
            .partial_records_discarded
            .fetch_add(1, Ordering::Relaxed);
        debug!(
            peer = %peer_addr,
            fields = discarded,
            "Discarding unterminated record"
        );
    }

    info!(
        local = %local_addr,
        peer = %peer_addr,
        fields = session_stats.fields_accepted,
        malformed = session_stats.malformed_lines,
        records = session_stats.records_completed,
        "Connection closed"
    );
    result
}

/// Append a finalized record; failures are logged and the record dropped.
async fn store_record<S: RecordStore + Send + 'static>(
    store: &SharedStore<S>,
    record: Record,
    peer_addr: SocketAddr,
    stats: &IngestStats,
) {
    let fields = record.len();
    match store.append(record).await {
        Ok(id) => {
            stats.records_stored.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %peer_addr, id, fields, "Stored reading");
        }
        Err(failure) => {
            stats.persistence_failures.fetch_add(1, Ordering::Relaxed);
            let payload = failure.record.to_payload().unwrap_or_default();
            warn!(
                peer = %peer_addr,
                payload = %payload,
                "Dropping record: {}",
                failure.source
            );
        }
    }
}

fn describe(reason: MalformedLine, line: &str) -> String {
    format!("{}: '{}'", reason, line)
}

fn report_malformed(
    diagnostics: &mut DiagnosticLimiter,
    peer_addr: SocketAddr,
    detail: impl FnOnce() -> String,
) {
    match diagnostics.on_malformed() {
        Diagnostic::Emit => {
            warn!(peer = %peer_addr, "Discarding malformed line ({})", detail());
        }
        Diagnostic::EmitLast => {
            warn!(
                peer = %peer_addr,
                "Discarding malformed line ({}); suppressing further reports for this connection",
                detail()
            );
        }
        Diagnostic::Suppress => {}
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Bind error on {0}: {1}")]
    Bind(String, #[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}
