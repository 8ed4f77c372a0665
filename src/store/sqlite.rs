//! SQLite-backed sample store
//!
//! - WAL mode so window reads never wait on ingestion writes
//! - Separate writer and reader connections for file databases
//! - Every query runs on the blocking pool, never on a runtime worker
//! - Window reads are bounded by an index on the timestamp column

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{SampleStore, StoreError};
use crate::models::{
    from_millis, now_millis, NewSample, Sample, SampleStatus, TradeLog, TradeLogRecord,
};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS global_telemetry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    broker TEXT NOT NULL,
    latency_ms REAL NOT NULL,
    slippage REAL NOT NULL,
    status TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_global_telemetry_ts
    ON global_telemetry(timestamp_ms);

CREATE INDEX IF NOT EXISTS idx_global_telemetry_broker
    ON global_telemetry(broker, timestamp_ms);

CREATE TABLE IF NOT EXISTS trade_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    qty REAL NOT NULL,
    broker TEXT NOT NULL,
    latency_ms REAL NOT NULL,
    slippage REAL NOT NULL,
    status TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trade_logs_user_ts
    ON trade_logs(user_id, timestamp_ms DESC);
"#;

pub struct SqliteSampleStore {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
}

impl SqliteSampleStore {
    /// Open (or create) a file-backed store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let writer = Connection::open_with_flags(path, flags)?;
        writer.execute_batch(SCHEMA_SQL)?;

        let journal_mode: String = writer
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let count: i64 = writer
            .query_row("SELECT COUNT(*) FROM global_telemetry", [], |row| row.get(0))
            .unwrap_or(0);
        info!(path = %path.display(), samples = count, "Sample store opened");

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
        })
    }

    /// In-memory store (for testing). Reads and writes share one connection.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        let conn = Arc::new(Mutex::new(conn));
        Ok(Self {
            writer: conn.clone(),
            reader: conn,
        })
    }

    /// Run a closure against a connection on the blocking pool.
    async fn with_conn<T, F>(conn: &Arc<Mutex<Connection>>, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await?
    }

    pub async fn sample_count(&self) -> Result<i64, StoreError> {
        Self::with_conn(&self.reader, |conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM global_telemetry", [], |row| row.get(0))?)
        })
        .await
    }

    /// Append a trade journal entry for `user_id`, returning its id.
    pub async fn insert_trade_log(&self, user_id: &str, log: TradeLog) -> Result<i64, StoreError> {
        let user_id = user_id.to_string();
        Self::with_conn(&self.writer, move |conn| {
            conn.execute(
                "INSERT INTO trade_logs
                 (user_id, symbol, side, qty, broker, latency_ms, slippage, status, timestamp_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    user_id,
                    log.symbol,
                    log.side,
                    log.qty,
                    log.broker,
                    log.latency_ms,
                    log.slippage,
                    log.status,
                    now_millis().timestamp_millis(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Most recent journal entries for `user_id`, newest first.
    pub async fn trade_logs(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<TradeLogRecord>, StoreError> {
        let user_id = user_id.to_string();
        Self::with_conn(&self.reader, move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, user_id, symbol, side, qty, broker, latency_ms, slippage, status, timestamp_ms
                 FROM trade_logs
                 WHERE user_id = ?1
                 ORDER BY timestamp_ms DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, limit as i64], |row| {
                Ok(TradeLogRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    symbol: row.get(2)?,
                    side: row.get(3)?,
                    qty: row.get(4)?,
                    broker: row.get(5)?,
                    latency_ms: row.get(6)?,
                    slippage: row.get(7)?,
                    status: row.get(8)?,
                    timestamp: from_millis(row.get(9)?),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<Sample> {
    let status: String = row.get(4)?;
    Ok(Sample {
        id: row.get(0)?,
        source: row.get(1)?,
        latency_ms: row.get(2)?,
        slippage: row.get(3)?,
        // Unrecognized statuses read back as anomalies.
        status: status.parse().unwrap_or(SampleStatus::Anomaly),
        timestamp: from_millis(row.get(5)?),
    })
}

#[async_trait]
impl SampleStore for SqliteSampleStore {
    async fn record_sample(&self, sample: NewSample) -> Result<Sample, StoreError> {
        Self::with_conn(&self.writer, move |conn| {
            // Timestamp is taken under the writer lock so row order follows time order.
            let timestamp = now_millis();
            conn.execute(
                "INSERT INTO global_telemetry (broker, latency_ms, slippage, status, timestamp_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    &sample.source,
                    sample.latency_ms,
                    sample.slippage,
                    sample.status.as_str(),
                    timestamp.timestamp_millis(),
                ],
            )?;
            let id = conn.last_insert_rowid();
            debug!(id, "Telemetry row inserted");
            Ok(Sample {
                id,
                source: sample.source,
                latency_ms: sample.latency_ms,
                slippage: sample.slippage,
                status: sample.status,
                timestamp,
            })
        })
        .await
    }

    async fn samples_since(&self, since: DateTime<Utc>) -> Result<Vec<Sample>, StoreError> {
        let since_ms = since.timestamp_millis();
        Self::with_conn(&self.reader, move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, broker, latency_ms, slippage, status, timestamp_ms
                 FROM global_telemetry
                 WHERE timestamp_ms >= ?1
                 ORDER BY timestamp_ms ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![since_ms], sample_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}
