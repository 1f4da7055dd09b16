//! Persistence sinks
//!
//! The engine hands status snapshots and log records to a
//! [`PersistenceSink`]. Implementations must return immediately; the
//! JSON-lines sink queues records on a channel drained by its own writer
//! task.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use telemon_core::LogRecord;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::Result;

/// Destination for persisted status snapshots and log records
pub trait PersistenceSink: Send + Sync {
    /// Store one aggregated status view; must not block
    fn append_status(&self, time: DateTime<Utc>, status: &serde_json::Value);

    /// Store one log record; must not block
    fn append_log(&self, record: &LogRecord);
}

// ----------------------------------------------------------------------------
// JSON Lines Sink
// ----------------------------------------------------------------------------

/// One persisted line
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkRecord {
    Status {
        time: DateTime<Utc>,
        status: serde_json::Value,
    },
    Log(LogRecord),
}

/// Appends one JSON object per line to a file
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
    records: mpsc::UnboundedSender<SinkRecord>,
}

impl JsonLinesSink {
    /// Open `path` for appending and start the writer task
    pub async fn open(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<()>)> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (records, mut rx) = mpsc::unbounded_channel::<SinkRecord>();
        let writer_path = path.clone();
        let handle = tokio::spawn(async move {
            let mut file = file;
            while let Some(record) = rx.recv().await {
                let mut line = match serde_json::to_string(&record) {
                    Ok(line) => line,
                    Err(e) => {
                        error!("Cannot serialize record for {}: {}", writer_path.display(), e);
                        continue;
                    }
                };
                line.push('\n');
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    error!("Cannot write {}: {}", writer_path.display(), e);
                    break;
                }
                let _ = file.flush().await;
            }
            debug!("Status log writer for {} stopped", writer_path.display());
        });

        Ok((Self { path, records }, handle))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn push(&self, record: SinkRecord) {
        if self.records.send(record).is_err() {
            debug!("Status log writer is gone, dropping record");
        }
    }
}

impl PersistenceSink for JsonLinesSink {
    fn append_status(&self, time: DateTime<Utc>, status: &serde_json::Value) {
        self.push(SinkRecord::Status {
            time,
            status: status.clone(),
        });
    }

    fn append_log(&self, record: &LogRecord) {
        self.push(SinkRecord::Log(record.clone()));
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
