// spinwatch/src/engine/dispatcher.rs
//
// Hands finished reports to an injected event publisher. The core never
// constructs a publisher; it only needs `publish(event_name, payload)`.
// Publisher failures are logged and counted, never propagated into analysis.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, warn};

use crate::events::AnalysisReport;
use crate::mobile;

pub const ANOMALY_DETECTED: &str = "gameplay.anomaly.detected";

/// Narrow publishing capability supplied by the embedding service.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event_name: &str, payload: Value) -> Result<()>;
}

pub struct Dispatcher {
    publisher:     Arc<dyn EventPublisher>,
    pub published: AtomicU64,
    pub failed:    AtomicU64,
}

impl Dispatcher {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            publisher,
            published: AtomicU64::new(0),
            failed:    AtomicU64::new(0),
        }
    }

    /// Publish a report with at least one detection. In mobile mode the
    /// payload is the compact summary instead of the full report.
    /// Returns whether the publisher accepted it.
    pub fn dispatch(&self, report: &AnalysisReport, mobile_optimized: bool) -> bool {
        let payload = if mobile_optimized {
            serde_json::to_value(mobile::summary_from_report(report))
        } else {
            serde_json::to_value(report)
        };
        let payload = match payload {
            Ok(p) => p,
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(session = %report.session_key, "report serialization failed: {}", e);
                return false;
            }
        };

        match self.publisher.publish(ANOMALY_DETECTED, payload) {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                debug!(session = %report.session_key, score = report.overall_risk_score, "published {}", ANOMALY_DETECTED);
                true
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(session = %report.session_key, "publish {} failed: {}", ANOMALY_DETECTED, e);
                false
            }
        }
    }
}
