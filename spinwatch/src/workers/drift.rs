// spinwatch/src/workers/drift.rs
//
// RTP drift detector: RTP rising between the first and second chronological
// half of the window, consistent with live pumping during a session.
//
// Per half: RTP = Σpayout / Σwager. Per-spin returns r = payout / wager give a
// pooled sample variance s²; the variance of a half's RTP is s² · Σw² / (Σw)².
//
//   delta = RTP(second) - RTP(first)
//   z     = delta / sqrt(var(first) + var(second))
//
// Only upward drift is reported. Detected when delta >= min_delta and
// z >= warn_sigma; critical from crit_sigma.

use std::collections::HashMap;

use serde_json::json;

use super::{meta_f64, Detector};
use crate::config::DetectorConfig;
use crate::events::{AnomalyResult, AnomalyType, Severity, SpinResult};
use crate::state::window::{rtp, WindowSnapshot};

/// z reported when both halves have zero variance but RTP still moved.
const MAX_Z: f64 = 99.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct HalfStats {
    spins:      usize,
    wager:      f64,
    payout:     f64,
    sum_sq_w:   f64, // Σ wager²
    ss_returns: f64, // Σ (r - mean r)² over spins with a wager
    n_returns:  usize,
}

impl HalfStats {
    fn of(spins: &[SpinResult]) -> Self {
        let returns: Vec<f64> = spins.iter()
            .filter(|s| s.wager > 0.0)
            .map(|s| s.payout / s.wager)
            .collect();
        let mean = if returns.is_empty() { 0.0 } else { returns.iter().sum::<f64>() / returns.len() as f64 };
        Self {
            spins:      spins.len(),
            wager:      spins.iter().map(|s| s.wager).sum(),
            payout:     spins.iter().map(|s| s.payout).sum(),
            sum_sq_w:   spins.iter().map(|s| s.wager * s.wager).sum(),
            ss_returns: returns.iter().map(|r| (r - mean).powi(2)).sum(),
            n_returns:  returns.len(),
        }
    }

    fn rtp(&self) -> f64 { rtp(self.payout, self.wager) }

    /// Variance of this half's RTP estimate given per-spin return variance.
    fn rtp_variance(&self, return_var: f64) -> f64 {
        if self.wager <= 0.0 { return 0.0; }
        return_var * self.sum_sq_w / (self.wager * self.wager)
    }
}

pub struct DriftDetector;

impl Detector for DriftDetector {
    fn kind(&self) -> AnomalyType { AnomalyType::RtpDrift }

    fn evaluate(&self, window: &WindowSnapshot, config: &DetectorConfig) -> AnomalyResult {
        let n    = window.spin_count();
        let half = n / 2;
        let need = config.min_spins_required;
        if half < need {
            return AnomalyResult::insufficient(
                AnomalyType::RtpDrift,
                format!(
                    "Insufficient spins for drift analysis (need {} per half, have {} spins)",
                    need, n
                ),
            );
        }

        let (early, late) = window.spins.split_at(half);
        let first  = HalfStats::of(early);
        let second = HalfStats::of(late);
        if first.wager <= 0.0 || second.wager <= 0.0 {
            return AnomalyResult::insufficient(
                AnomalyType::RtpDrift,
                "Insufficient wager volume for drift analysis",
            );
        }

        let first_rtp  = first.rtp();
        let second_rtp = second.rtp();
        let delta      = second_rtp - first_rtp;

        let dof = (first.n_returns + second.n_returns).saturating_sub(2).max(1);
        let pooled_var = (first.ss_returns + second.ss_returns) / dof as f64;
        let se = (first.rtp_variance(pooled_var) + second.rtp_variance(pooled_var)).sqrt();
        let z = if se > 0.0 {
            (delta / se).clamp(-MAX_Z, MAX_Z)
        } else if delta > 0.0 {
            MAX_Z
        } else if delta < 0.0 {
            -MAX_Z
        } else {
            0.0
        };

        let t = &config.thresholds;
        let severity = if delta < t.drift_min_delta || z < t.drift_warning_sigma {
            Severity::None
        } else if z >= t.drift_critical_sigma {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let detected = severity != Severity::None;

        let reason = if detected {
            format!(
                "RTP rose from {:.2}% to {:.2}% across the session ({:+.2} pts, {:.1} sigma)",
                first_rtp * 100.0, second_rtp * 100.0, delta * 100.0, z
            )
        } else if delta < 0.0 {
            format!(
                "RTP fell from {:.2}% to {:.2}%; only upward drift is flagged",
                first_rtp * 100.0, second_rtp * 100.0
            )
        } else {
            format!(
                "RTP stable across the session ({:.2}% to {:.2}%, {:.1} sigma)",
                first_rtp * 100.0, second_rtp * 100.0, z
            )
        };

        let direction = if delta > 0.0 { "up" } else if delta < 0.0 { "down" } else { "flat" };
        let metadata: HashMap<String, serde_json::Value> = [
            ("firstHalfRtp".to_string(),    meta_f64(first_rtp)),
            ("secondHalfRtp".to_string(),   meta_f64(second_rtp)),
            ("delta".to_string(),           meta_f64(delta)),
            ("zScore".to_string(),          meta_f64(z)),
            ("standardError".to_string(),   meta_f64(se)),
            ("firstHalfSpins".to_string(),  json!(first.spins)),
            ("secondHalfSpins".to_string(), json!(second.spins)),
            ("direction".to_string(),       json!(direction)),
        ]
        .into_iter()
        .collect();

        AnomalyResult {
            anomaly_type: AnomalyType::RtpDrift,
            detected,
            severity,
            reason,
            confidence: if detected { (z / t.drift_critical_sigma).min(1.0) } else { 0.0 },
            metadata,
        }
    }
}
