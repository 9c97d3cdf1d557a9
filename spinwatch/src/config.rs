// spinwatch/src/config.rs
//
// Detector configuration and the baseline registry.
//
// A `DetectorConfig` is immutable once published. `ConfigHandle` hands out
// `Arc` snapshots and swaps in a fully validated replacement on update, so an
// analysis never observes a half-applied change.
//
// Default thresholds are starting points to be tuned with `spinwatch --mode
// eval` against labeled fair/unfair sessions:
//   pump      warn ratio 1.10   crit ratio 1.25     (observed / baseline RTP)
//   cluster   warn 1.5×         crit 2.0×           (max streak / expected), p < 0.01
//   drift     warn 3.0σ         crit 4.5σ           (second-half minus first-half RTP), Δ ≥ 0.05
//
// Risk weights (warning / critical), capped at 100:
//   pump 20/40   cluster 15/30   drift 15/30

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SpinwatchError, SpinwatchResult};

pub const DEFAULT_BASELINE_RTP: f64 = 0.96;
pub const DEFAULT_MIN_SPINS:    usize = 10;
pub const DEFAULT_WINDOW_SIZE:  usize = 50;

// ── Thresholds ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectorThresholds {
    pub pump_warning_ratio:         f64,
    pub pump_critical_ratio:        f64,
    pub cluster_warning_multiplier: f64,
    pub cluster_critical_multiplier:f64,
    /// Max tail probability of the observed streak under a fair sequence.
    pub cluster_significance:       f64,
    pub drift_warning_sigma:        f64,
    pub drift_critical_sigma:       f64,
    /// Smallest upward RTP shift worth reporting, in RTP units.
    pub drift_min_delta:            f64,
}

impl Default for DetectorThresholds {
    fn default() -> Self {
        Self {
            pump_warning_ratio:          1.10,
            pump_critical_ratio:         1.25,
            cluster_warning_multiplier:  1.5,
            cluster_critical_multiplier: 2.0,
            cluster_significance:        0.01,
            drift_warning_sigma:         3.0,
            drift_critical_sigma:        4.5,
            drift_min_delta:             0.05,
        }
    }
}

/// Points a detector adds to the risk score at each severity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityWeights {
    pub warning:  u8,
    pub critical: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskWeights {
    pub pump:    SeverityWeights,
    pub cluster: SeverityWeights,
    pub drift:   SeverityWeights,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            pump:    SeverityWeights { warning: 20, critical: 40 },
            cluster: SeverityWeights { warning: 15, critical: 30 },
            drift:   SeverityWeights { warning: 15, critical: 30 },
        }
    }
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectorConfig {
    #[serde(rename = "baselineRTP", alias = "baselineRtp")]
    pub baseline_rtp:         f64,
    pub min_spins_required:   usize,
    pub window_size:          usize,
    pub auto_publish:         bool,
    pub mobile_optimized:     bool,
    /// Analyze a session automatically every N recorded spins. 0 disables.
    pub auto_analyze_every:   usize,
    /// Reports retained per user; the oldest are dropped past this.
    pub max_history_per_user: usize,
    pub baselines_by_game:    HashMap<String, f64>,
    pub thresholds:           DetectorThresholds,
    pub risk_weights:         RiskWeights,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            baseline_rtp:         DEFAULT_BASELINE_RTP,
            min_spins_required:   DEFAULT_MIN_SPINS,
            window_size:          DEFAULT_WINDOW_SIZE,
            auto_publish:         false,
            mobile_optimized:     false,
            auto_analyze_every:   0,
            max_history_per_user: 1_000,
            baselines_by_game:    HashMap::new(),
            thresholds:           DetectorThresholds::default(),
            risk_weights:         RiskWeights::default(),
        }
    }
}

fn check_baseline(what: &str, v: f64) -> SpinwatchResult<()> {
    if !v.is_finite() || v <= 0.0 {
        return Err(SpinwatchError::InvalidConfig(format!(
            "{} must be a positive finite RTP, got {}", what, v
        )));
    }
    Ok(())
}

fn check_ordered(what: &str, warning: f64, critical: f64) -> SpinwatchResult<()> {
    if !warning.is_finite() || !critical.is_finite() || warning <= 0.0 || warning > critical {
        return Err(SpinwatchError::InvalidConfig(format!(
            "{} thresholds must satisfy 0 < warning <= critical, got {} / {}",
            what, warning, critical
        )));
    }
    Ok(())
}

impl DetectorConfig {
    /// Effective RTP baseline for a game: its override if registered, else global.
    pub fn baseline_for(&self, game_id: &str) -> f64 {
        self.baselines_by_game.get(game_id).copied().unwrap_or(self.baseline_rtp)
    }

    pub fn validate(&self) -> SpinwatchResult<()> {
        if self.window_size == 0 {
            return Err(SpinwatchError::InvalidConfig("windowSize must be > 0".into()));
        }
        if self.min_spins_required == 0 {
            return Err(SpinwatchError::InvalidConfig("minSpinsRequired must be > 0".into()));
        }
        if self.min_spins_required > self.window_size {
            return Err(SpinwatchError::InvalidConfig(format!(
                "minSpinsRequired ({}) exceeds windowSize ({})",
                self.min_spins_required, self.window_size
            )));
        }
        if self.max_history_per_user == 0 {
            return Err(SpinwatchError::InvalidConfig("maxHistoryPerUser must be > 0".into()));
        }
        check_baseline("baselineRTP", self.baseline_rtp)?;
        for (game, b) in &self.baselines_by_game {
            check_baseline(&format!("baseline for game {}", game), *b)?;
        }

        let t = &self.thresholds;
        check_ordered("pump", t.pump_warning_ratio, t.pump_critical_ratio)?;
        check_ordered("cluster", t.cluster_warning_multiplier, t.cluster_critical_multiplier)?;
        check_ordered("drift", t.drift_warning_sigma, t.drift_critical_sigma)?;
        if !(t.cluster_significance > 0.0 && t.cluster_significance < 1.0) {
            return Err(SpinwatchError::InvalidConfig(format!(
                "clusterSignificance must be in (0, 1), got {}", t.cluster_significance
            )));
        }
        if !t.drift_min_delta.is_finite() || t.drift_min_delta < 0.0 {
            return Err(SpinwatchError::InvalidConfig(format!(
                "driftMinDelta must be >= 0, got {}", t.drift_min_delta
            )));
        }

        for (name, w) in [
            ("pump", self.risk_weights.pump),
            ("cluster", self.risk_weights.cluster),
            ("drift", self.risk_weights.drift),
        ] {
            if w.warning > w.critical {
                return Err(SpinwatchError::InvalidConfig(format!(
                    "{} risk weight: warning ({}) exceeds critical ({})",
                    name, w.warning, w.critical
                )));
            }
        }
        Ok(())
    }

    /// Load and validate a JSON config file. Missing fields take defaults.
    pub fn from_json_file(path: &std::path::Path) -> SpinwatchResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Partial config update. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigUpdate {
    #[serde(rename = "baselineRTP", alias = "baselineRtp")]
    pub baseline_rtp:         Option<f64>,
    pub min_spins_required:   Option<usize>,
    pub window_size:          Option<usize>,
    pub auto_publish:         Option<bool>,
    pub mobile_optimized:     Option<bool>,
    pub auto_analyze_every:   Option<usize>,
    pub max_history_per_user: Option<usize>,
    /// Merged into the existing table.
    pub baselines_by_game:    Option<HashMap<String, f64>>,
    pub thresholds:           Option<DetectorThresholds>,
    pub risk_weights:         Option<RiskWeights>,
}

impl ConfigUpdate {
    pub fn apply_to(self, base: &DetectorConfig) -> DetectorConfig {
        let mut next = base.clone();
        if let Some(v) = self.baseline_rtp         { next.baseline_rtp = v; }
        if let Some(v) = self.min_spins_required   { next.min_spins_required = v; }
        if let Some(v) = self.window_size          { next.window_size = v; }
        if let Some(v) = self.auto_publish         { next.auto_publish = v; }
        if let Some(v) = self.mobile_optimized     { next.mobile_optimized = v; }
        if let Some(v) = self.auto_analyze_every   { next.auto_analyze_every = v; }
        if let Some(v) = self.max_history_per_user { next.max_history_per_user = v; }
        if let Some(games) = self.baselines_by_game {
            next.baselines_by_game.extend(games);
        }
        if let Some(v) = self.thresholds           { next.thresholds = v; }
        if let Some(v) = self.risk_weights         { next.risk_weights = v; }
        next
    }
}

// ── Versioned snapshot handle ─────────────────────────────────────────────────

pub struct ConfigHandle {
    current: RwLock<Arc<DetectorConfig>>,
    version: AtomicU64,
}

impl ConfigHandle {
    pub fn new(config: DetectorConfig) -> SpinwatchResult<Self> {
        config.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
            version: AtomicU64::new(1),
        })
    }

    pub fn snapshot(&self) -> Arc<DetectorConfig> {
        Arc::clone(&self.current.read())
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Build the next config from the current one, validate, then publish it.
    /// On error the current config stays in force.
    pub fn update<F>(&self, f: F) -> SpinwatchResult<Arc<DetectorConfig>>
    where
        F: FnOnce(&DetectorConfig) -> DetectorConfig,
    {
        let mut slot = self.current.write();
        let next = f(&**slot);
        next.validate()?;
        let next = Arc::new(next);
        *slot = Arc::clone(&next);
        let v = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        info!(version = v, window = next.window_size, min_spins = next.min_spins_required,
              "config updated");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = DetectorConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.baseline_rtp, 0.96);
        assert_eq!(cfg.min_spins_required, 10);
        assert_eq!(cfg.window_size, 50);
    }

    #[test]
    fn zero_window_is_a_config_error() {
        let cfg = DetectorConfig { window_size: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(SpinwatchError::InvalidConfig(_))));
        assert!(ConfigHandle::new(cfg).is_err());
    }

    #[test]
    fn min_spins_cannot_exceed_window() {
        let cfg = DetectorConfig { window_size: 5, min_spins_required: 10, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unordered_thresholds_rejected() {
        let mut cfg = DetectorConfig::default();
        cfg.thresholds.pump_warning_ratio = 1.5;
        cfg.thresholds.pump_critical_ratio = 1.2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn game_override_wins_over_global() {
        let mut cfg = DetectorConfig::default();
        cfg.baselines_by_game.insert("blackjack".into(), 0.995);
        assert_eq!(cfg.baseline_for("blackjack"), 0.995);
        assert_eq!(cfg.baseline_for("slots"), 0.96);
    }

    #[test]
    fn failed_update_keeps_previous_snapshot() {
        let handle = ConfigHandle::new(DetectorConfig::default()).unwrap();
        let before = handle.version();
        let res = handle.update(|c| ConfigUpdate { window_size: Some(0), ..Default::default() }.apply_to(c));
        assert!(res.is_err());
        assert_eq!(handle.snapshot().window_size, 50);
        assert_eq!(handle.version(), before);
    }

    #[test]
    fn update_swaps_snapshot_and_bumps_version() {
        let handle = ConfigHandle::new(DetectorConfig::default()).unwrap();
        let old = handle.snapshot();
        handle
            .update(|c| ConfigUpdate { window_size: Some(100), ..Default::default() }.apply_to(c))
            .unwrap();
        assert_eq!(old.window_size, 50);
        assert_eq!(handle.snapshot().window_size, 100);
        assert_eq!(handle.version(), 2);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: DetectorConfig =
            serde_json::from_str(r#"{"baselineRTP":0.94,"windowSize":80}"#).unwrap();
        assert_eq!(cfg.baseline_rtp, 0.94);
        assert_eq!(cfg.window_size, 80);
        assert_eq!(cfg.min_spins_required, 10);
        assert_eq!(cfg.thresholds, DetectorThresholds::default());
    }
}
