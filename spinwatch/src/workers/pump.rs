// spinwatch/src/workers/pump.rs
//
// RTP pump detector: observed window RTP against the expected baseline.
//
// The baseline is the wager-weighted mean of each spin's game baseline (the
// per-game override when registered, else the global baseline), so a
// single-game window uses exactly that game's override.
//
//   ratio = observed RTP / baseline
//   ratio <  warn  (1.10)  → none
//   ratio <  crit  (1.25)  → warning
//   ratio >= crit          → critical
//
// RTP at or below baseline is never a pump: a casino paying out less than
// expected is a different risk category.

use std::collections::HashMap;

use serde_json::json;

use super::{meta_f64, Detector};
use crate::config::{DetectorConfig, DetectorThresholds};
use crate::events::{AnomalyResult, AnomalyType, Severity};
use crate::state::window::WindowSnapshot;

/// Aggregates the pump decision is made from.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpStats {
    pub observed_rtp:  f64,
    pub baseline_rtp:  f64,
    pub total_wagers:  f64,
    pub total_payouts: f64,
    pub spin_count:    usize,
    pub window_start:  Option<i64>,
    pub window_end:    Option<i64>,
}

impl PumpStats {
    pub fn from_window(window: &WindowSnapshot, config: &DetectorConfig) -> Self {
        let weighted: f64 = window.spins.iter()
            .map(|s| s.wager * config.baseline_for(&s.game_id))
            .sum();
        let baseline_rtp = if window.total_wager > 0.0 {
            weighted / window.total_wager
        } else {
            config.baseline_rtp
        };
        Self {
            observed_rtp:  window.session_rtp,
            baseline_rtp,
            total_wagers:  window.total_wager,
            total_payouts: window.total_payout,
            spin_count:    window.spin_count(),
            window_start:  window.window_start(),
            window_end:    window.window_end(),
        }
    }
}

/// Severity for a given observed/baseline ratio.
pub fn severity_for_ratio(ratio: f64, t: &DetectorThresholds) -> Severity {
    if ratio >= t.pump_critical_ratio {
        Severity::Critical
    } else if ratio >= t.pump_warning_ratio {
        Severity::Warning
    } else {
        Severity::None
    }
}

/// Classify precomputed stats. `window_size` scales confidence by how full
/// the window is.
pub fn classify(stats: &PumpStats, t: &DetectorThresholds, window_size: usize) -> AnomalyResult {
    if stats.total_wagers <= 0.0 || stats.spin_count == 0 {
        return AnomalyResult::insufficient(
            AnomalyType::RtpPump,
            "Insufficient wager volume for pump analysis",
        );
    }

    let ratio    = stats.observed_rtp / stats.baseline_rtp;
    let severity = severity_for_ratio(ratio, t);
    let detected = severity != Severity::None;

    let observed_pct = stats.observed_rtp * 100.0;
    let baseline_pct = stats.baseline_rtp * 100.0;
    let reason = match severity {
        Severity::Critical => format!(
            "Observed RTP {:.2}% is {:.2}x the {:.2}% baseline, a severe pumping signature",
            observed_pct, ratio, baseline_pct
        ),
        Severity::Warning => format!(
            "Observed RTP {:.2}% is {:.2}x the {:.2}% baseline: elevated returns",
            observed_pct, ratio, baseline_pct
        ),
        Severity::None if ratio <= 1.0 => format!(
            "Observed RTP {:.2}% is at or below the {:.2}% baseline",
            observed_pct, baseline_pct
        ),
        Severity::None => format!(
            "Observed RTP {:.2}% is within tolerance of the {:.2}% baseline",
            observed_pct, baseline_pct
        ),
    };

    let confidence = if detected {
        let strength = ((ratio - 1.0) / (t.pump_critical_ratio - 1.0)).clamp(0.0, 1.0);
        let fill     = (stats.spin_count as f64 / window_size.max(1) as f64).min(1.0);
        strength * (0.4 + 0.6 * fill)
    } else {
        0.0
    };

    let metadata: HashMap<String, serde_json::Value> = [
        ("observedRtp".to_string(),  meta_f64(stats.observed_rtp)),
        ("baselineRtp".to_string(),  meta_f64(stats.baseline_rtp)),
        ("ratio".to_string(),        meta_f64(ratio)),
        ("totalWagers".to_string(),  meta_f64(stats.total_wagers)),
        ("totalPayouts".to_string(), meta_f64(stats.total_payouts)),
        ("spinCount".to_string(),    json!(stats.spin_count)),
        ("windowStart".to_string(),  json!(stats.window_start)),
        ("windowEnd".to_string(),    json!(stats.window_end)),
    ]
    .into_iter()
    .collect();

    AnomalyResult {
        anomaly_type: AnomalyType::RtpPump,
        detected,
        severity,
        reason,
        confidence,
        metadata,
    }
}

pub struct PumpDetector;

impl Detector for PumpDetector {
    fn kind(&self) -> AnomalyType { AnomalyType::RtpPump }

    fn evaluate(&self, window: &WindowSnapshot, config: &DetectorConfig) -> AnomalyResult {
        let stats = PumpStats::from_window(window, config);
        classify(&stats, &config.thresholds, config.window_size)
    }
}
