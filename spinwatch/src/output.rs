// spinwatch/src/output.rs
//
// Queued JSONL publisher used by the binary.
//
// `publish` only enqueues; a background flush loop appends each batch to
// `<output_dir>/<event_name>.jsonl`, one JSON object per line. The queue is
// bounded: when full the oldest message is dropped with a warning.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::engine::dispatcher::EventPublisher;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
    /// Maximum in-memory queue depth before dropping oldest.
    pub max_queue: usize,
    pub flush_interval_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir:        PathBuf::from("/tmp/spinwatch_output"),
            max_queue:         8192,
            flush_interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct QueuedEvent {
    event:   String,
    ts:      DateTime<Utc>,
    payload: Value,
}

// ── Publisher ─────────────────────────────────────────────────────────────────

pub struct QueuedPublisher {
    config:        OutputConfig,
    queue:         Mutex<VecDeque<QueuedEvent>>,
    pub published: AtomicU64,
    pub dropped:   AtomicU64,
}

impl QueuedPublisher {
    pub fn new(config: OutputConfig) -> Arc<Self> {
        info!("JSONL output configured, dir={}", config.output_dir.display());
        Arc::new(Self {
            config,
            queue:     Mutex::new(VecDeque::new()),
            published: AtomicU64::new(0),
            dropped:   AtomicU64::new(0),
        })
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Write everything queued so far. Returns the number of lines written.
    pub async fn flush_once(&self) -> Result<usize> {
        let batch: Vec<QueuedEvent> = self.queue.lock().drain(..).collect();
        if batch.is_empty() {
            return Ok(0);
        }
        tokio::fs::create_dir_all(&self.config.output_dir).await?;

        let mut by_event: Vec<(String, String)> = Vec::new();
        for msg in &batch {
            let mut line = serde_json::to_string(msg)?;
            line.push('\n');
            match by_event.iter_mut().find(|(e, _)| *e == msg.event) {
                Some((_, buf)) => buf.push_str(&line),
                None           => by_event.push((msg.event.clone(), line)),
            }
        }

        for (event, buf) in &by_event {
            let path = self.config.output_dir.join(format!("{}.jsonl", event));
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(buf.as_bytes()).await?;
            file.flush().await?;
            debug!(event = %event, path = %path.display(), "flushed");
        }

        self.published.fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(batch.len())
    }

    /// Background flush loop.
    pub async fn flush_loop(self: Arc<Self>) {
        let interval = tokio::time::Duration::from_millis(self.config.flush_interval_ms);
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = self.flush_once().await {
                warn!("output flush failed: {}", e);
            }
        }
    }
}

impl EventPublisher for QueuedPublisher {
    fn publish(&self, event_name: &str, payload: Value) -> Result<()> {
        let mut q = self.queue.lock();
        if q.len() >= self.config.max_queue {
            q.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("output queue full, dropped oldest message");
        }
        q.push_back(QueuedEvent {
            event: event_name.to_string(),
            ts:    Utc::now(),
            payload,
        });
        Ok(())
    }
}
