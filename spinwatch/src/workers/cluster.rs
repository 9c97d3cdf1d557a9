// spinwatch/src/workers/cluster.rs
//
// Win clustering detector: an implausibly long run of consecutive wins given
// the window's own win rate.
//
// Model: each spin is an independent Bernoulli(p) win, p = wins / n.
//   expected longest run  E ≈ log(n) / log(1/p)
//   tail probability      P(run >= k) ≈ 1 - exp(-p^k · (1 + (n - k)(1 - p)))
//
// Flagged when maxStreak >= warn_mult · E AND the tail probability is below
// the configured significance. Severity is critical from crit_mult · E.

use std::collections::HashMap;

use serde_json::json;

use super::{meta_f64, Detector};
use crate::config::DetectorConfig;
use crate::events::{AnomalyResult, AnomalyType, Severity, SpinResult};
use crate::state::window::WindowSnapshot;

/// Longest run of consecutive winning spins.
pub fn longest_win_streak(spins: &[SpinResult]) -> usize {
    let mut best = 0usize;
    let mut cur  = 0usize;
    for s in spins {
        if s.is_win() {
            cur += 1;
            best = best.max(cur);
        } else {
            cur = 0;
        }
    }
    best
}

/// Expected longest success run in `n` Bernoulli(p) trials.
pub fn expected_longest_run(n: usize, p: f64) -> f64 {
    if n == 0 || p <= 0.0 {
        return 0.0;
    }
    if p >= 1.0 {
        return n as f64;
    }
    ((n as f64).ln() / (1.0 / p).ln()).max(1.0)
}

/// Approximate probability that a fair Bernoulli(p) sequence of length `n`
/// contains a success run of at least `k`.
pub fn streak_tail_probability(n: usize, p: f64, k: usize) -> f64 {
    if k == 0 {
        return 1.0;
    }
    if k > n || p <= 0.0 {
        return 0.0;
    }
    if p >= 1.0 {
        return 1.0;
    }
    let starts = 1.0 + (n - k) as f64 * (1.0 - p);
    let lambda = p.powi(k as i32) * starts;
    (1.0 - (-lambda).exp()).clamp(0.0, 1.0)
}

pub struct ClusterDetector;

impl Detector for ClusterDetector {
    fn kind(&self) -> AnomalyType { AnomalyType::WinClustering }

    fn evaluate(&self, window: &WindowSnapshot, config: &DetectorConfig) -> AnomalyResult {
        let n = window.spin_count();
        if n < config.min_spins_required {
            return AnomalyResult::insufficient(
                AnomalyType::WinClustering,
                format!(
                    "Insufficient spins for cluster analysis ({} of {} required)",
                    n, config.min_spins_required
                ),
            );
        }

        let t          = &config.thresholds;
        let wins       = window.spins.iter().filter(|s| s.is_win()).count();
        let win_rate   = wins as f64 / n as f64;
        let max_streak = longest_win_streak(&window.spins);
        let expected   = expected_longest_run(n, win_rate);
        let ratio      = if expected > 0.0 { max_streak as f64 / expected } else { 0.0 };
        let p_value    = streak_tail_probability(n, win_rate, max_streak);

        let significant = p_value < t.cluster_significance;
        let severity = if !significant || ratio < t.cluster_warning_multiplier {
            Severity::None
        } else if ratio >= t.cluster_critical_multiplier {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let detected = severity != Severity::None;

        let reason = if wins == 0 {
            "No winning spins in window".to_string()
        } else if detected {
            format!(
                "Win streak of {} is {:.1}x the expected longest run of {:.1} at a {:.1}% win rate (p={:.2e})",
                max_streak, ratio, expected, win_rate * 100.0, p_value
            )
        } else {
            format!(
                "Longest win streak {} is consistent with a {:.1}% win rate (expected ~{:.1})",
                max_streak, win_rate * 100.0, expected
            )
        };

        let metadata: HashMap<String, serde_json::Value> = [
            ("maxStreak".to_string(),         json!(max_streak)),
            ("winRate".to_string(),           meta_f64(win_rate)),
            ("wins".to_string(),              json!(wins)),
            ("spinCount".to_string(),         json!(n)),
            ("expectedMaxStreak".to_string(), meta_f64(expected)),
            ("streakRatio".to_string(),       meta_f64(ratio)),
            ("pValue".to_string(),            json!(p_value)),
        ]
        .into_iter()
        .collect();

        AnomalyResult {
            anomaly_type: AnomalyType::WinClustering,
            detected,
            severity,
            reason,
            confidence: if detected { 1.0 - p_value } else { 0.0 },
            metadata,
        }
    }
}
