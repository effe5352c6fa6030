//! Access logging
//!
//! One `AccessEvent` per handled request. Every event goes to tracing under
//! the `vestibule::access` target; when a log file is configured it is also
//! appended there as one JSON object per line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

/// Tracing target for access events
pub const ACCESS_TARGET: &str = "vestibule::access";

/// Record of one proxied request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEvent {
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    pub host: String,
    pub method: String,
    pub path: String,
    /// Origin URL the request mapped to, when routing succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_url: Option<String>,
    /// HIT, MISS, STALE or BYPASS; absent for failed requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
    pub status: u16,
    pub bytes: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AccessEvent {
    pub fn new(request_id: Uuid, host: &str, method: &str, path: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id,
            host: host.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            upstream_url: None,
            cache: None,
            status: 0,
            bytes: 0,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn with_status(mut self, status: u16, bytes: u64) -> Self {
        self.status = status;
        self.bytes = bytes;
        self
    }

    pub fn with_upstream(mut self, upstream_url: String, cache: &str) -> Self {
        self.upstream_url = Some(upstream_url);
        self.cache = Some(cache.to_string());
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Access logger with an optional JSONL sink
#[derive(Clone, Default)]
pub struct AccessLogger {
    inner: Arc<Mutex<AccessLoggerInner>>,
}

#[derive(Default)]
struct AccessLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl AccessLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append events to `path` from now on
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));
        inner.path = Some(path.clone());

        info!("Access logging to {}", path.display());
        Ok(())
    }

    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }

    pub async fn log(&self, event: AccessEvent) {
        info!(
            target: ACCESS_TARGET,
            request_id = %event.request_id,
            host = %event.host,
            method = %event.method,
            path = %event.path,
            upstream = event.upstream_url.as_deref().unwrap_or("-"),
            cache = event.cache.as_deref().unwrap_or("-"),
            status = event.status,
            bytes = event.bytes,
            elapsed_ms = event.duration_ms,
            "request"
        );

        let mut inner = self.inner.lock().await;
        let Some(writer) = inner.writer.as_mut() else {
            return;
        };

        let line = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize access event: {}", e);
                return;
            }
        };

        if let Err(e) = writeln!(writer, "{}", line) {
            error!("Failed to write access event: {}", e);
        }
        if let Err(e) = writer.flush() {
            error!("Failed to flush access log: {}", e);
        }
    }
}
