pub mod cluster;
pub mod drift;
pub mod pump;

use serde_json::Value;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::events::{AnomalyResult, AnomalyType};
use crate::state::window::WindowSnapshot;

/// One statistical detector. Implementations are pure functions of the
/// window snapshot and config; they never fail and never mutate state.
pub trait Detector: Send + Sync {
    fn kind(&self) -> AnomalyType;
    fn evaluate(&self, window: &WindowSnapshot, config: &DetectorConfig) -> AnomalyResult;
}

/// Results of the three detectors over the same snapshot.
#[derive(Debug, Clone)]
pub struct DetectorOutputs {
    pub pump:    AnomalyResult,
    pub cluster: AnomalyResult,
    pub drift:   AnomalyResult,
}

impl DetectorOutputs {
    pub fn iter(&self) -> impl Iterator<Item = &AnomalyResult> + Clone {
        [&self.pump, &self.cluster, &self.drift].into_iter()
    }
}

/// Run all detectors over one snapshot. Order does not matter: each reads
/// only the snapshot.
pub fn run_all(window: &WindowSnapshot, config: &DetectorConfig) -> DetectorOutputs {
    DetectorOutputs {
        pump:    run(&pump::PumpDetector, window, config),
        cluster: run(&cluster::ClusterDetector, window, config),
        drift:   run(&drift::DriftDetector, window, config),
    }
}

fn run(detector: &dyn Detector, window: &WindowSnapshot, config: &DetectorConfig) -> AnomalyResult {
    let result = detector.evaluate(window, config);
    debug_assert_eq!(result.anomaly_type, detector.kind());
    if result.detected {
        debug!(
            session = %window.session_key,
            detector = %detector.kind(),
            severity = %result.severity,
            confidence = result.confidence,
            "detector fired"
        );
    }
    result
}

/// Round for metadata so reports stay readable on the wire.
pub(crate) fn meta_f64(v: f64) -> Value {
    if v.is_finite() {
        serde_json::json!((v * 10_000.0).round() / 10_000.0)
    } else {
        Value::Null
    }
}
