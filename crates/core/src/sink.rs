//! Durable destinations for generated samples.
//!
//! Every tick's sample is handed to a [`SampleSink`]; the read-back endpoint
//! later pulls the most recent ones out again in the same `GeoSample` shape.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use api_types::{GeoPosition, GeoSample};
use rusqlite::{Connection, params};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("store timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("sink lock poisoned")]
    Poisoned,

    #[error("sink writer has shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SinkError>;

pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Storage for generated samples.
pub trait SampleSink: Send + Sync {
    fn store<'a>(&'a self, sample: GeoSample) -> SinkFuture<'a, ()>;

    /// The last `limit` stored samples, oldest first.
    fn recent<'a>(&'a self, limit: usize) -> SinkFuture<'a, Vec<GeoSample>>;
}

// ============================================================================
// SQLite
// ============================================================================

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS geo_samples (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        latitude    REAL NOT NULL,
        longitude   REAL NOT NULL,
        distance    REAL NOT NULL,
        recorded_at TEXT NOT NULL
    )";

const INSERT_SAMPLE: &str =
    "INSERT INTO geo_samples (latitude, longitude, distance, recorded_at) VALUES (?1, ?2, ?3, ?4)";

const SELECT_RECENT: &str = "
    SELECT latitude, longitude, distance FROM (
        SELECT id, latitude, longitude, distance FROM geo_samples ORDER BY id DESC LIMIT ?1
    ) ORDER BY id ASC";

/// Samples persisted to a SQLite database.
///
/// rusqlite is blocking, so every call hops onto the blocking pool.
#[derive(Clone)]
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(CREATE_TABLE, ())?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| SinkError::Poisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| SinkError::Unavailable(e.to_string()))?
    }
}

impl SampleSink for SqliteSink {
    fn store<'a>(&'a self, sample: GeoSample) -> SinkFuture<'a, ()> {
        Box::pin(self.with_connection(move |conn| {
            let recorded_at = chrono::Utc::now().to_rfc3339();
            conn.execute(
                INSERT_SAMPLE,
                params![
                    sample.coords.latitude,
                    sample.coords.longitude,
                    sample.distance,
                    recorded_at
                ],
            )?;
            Ok(())
        }))
    }

    fn recent<'a>(&'a self, limit: usize) -> SinkFuture<'a, Vec<GeoSample>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        Box::pin(self.with_connection(move |conn| {
            let mut statement = conn.prepare(SELECT_RECENT)?;
            let rows = statement.query_map(params![limit], |row| {
                Ok(GeoSample {
                    coords: GeoPosition {
                        latitude: row.get(0)?,
                        longitude: row.get(1)?,
                    },
                    distance: row.get(2)?,
                })
            })?;

            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        }))
    }
}

// ============================================================================
// In-process
// ============================================================================

/// Keeps samples in memory. Useful when no database is wanted.
#[derive(Clone, Default)]
pub struct MemorySink {
    samples: Arc<Mutex<Vec<GeoSample>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SampleSink for MemorySink {
    fn store<'a>(&'a self, sample: GeoSample) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            self.samples
                .lock()
                .map_err(|_| SinkError::Poisoned)?
                .push(sample);
            Ok(())
        })
    }

    fn recent<'a>(&'a self, limit: usize) -> SinkFuture<'a, Vec<GeoSample>> {
        Box::pin(async move {
            let samples = self.samples.lock().map_err(|_| SinkError::Poisoned)?;
            let start = samples.len().saturating_sub(limit);
            Ok(samples[start..].to_vec())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: usize) -> GeoSample {
        GeoSample {
            coords: GeoPosition::new(i as f64, -(i as f64)),
            distance: i as f64 / 100.0,
        }
    }

    #[tokio::test]
    async fn test_sqlite_recent_in_insertion_order() {
        let sink = SqliteSink::open_in_memory().unwrap();
        for i in 0..15 {
            sink.store(sample(i)).await.unwrap();
        }

        let recent = sink.recent(10).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent, (5..15).map(sample).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_sqlite_recent_with_few_rows() {
        let sink = SqliteSink::open_in_memory().unwrap();
        assert!(sink.recent(10).await.unwrap().is_empty());

        sink.store(sample(1)).await.unwrap();
        assert_eq!(sink.recent(10).await.unwrap(), vec![sample(1)]);
        assert!(sink.recent(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let path = std::env::temp_dir().join(format!(
            "geotrace-sink-{}-{}.db",
            std::process::id(),
            rand::random::<u32>()
        ));

        {
            let sink = SqliteSink::open(&path).unwrap();
            sink.store(sample(3)).await.unwrap();
        }

        let reopened = SqliteSink::open(&path).unwrap();
        assert_eq!(reopened.recent(10).await.unwrap(), vec![sample(3)]);

        drop(reopened);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_tail() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());

        for i in 0..4 {
            sink.store(sample(i)).await.unwrap();
        }

        assert_eq!(sink.len(), 4);
        assert_eq!(sink.recent(2).await.unwrap(), vec![sample(2), sample(3)]);
        assert_eq!(sink.recent(100).await.unwrap().len(), 4);
    }
}
