// spinwatch/src/events.rs
//
// Shared domain types flowing through spinwatch: spins in, detector results
// and reports out. Wire names are camelCase to match the ingestion layer; the
// mobile summary keeps its shortened keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{SpinwatchError, SpinwatchResult};

/// Session key for a (user, casino) pair.
pub fn session_key(user_id: &str, casino_id: &str) -> String {
    format!("{}:{}", user_id, casino_id)
}

// ── Spins ─────────────────────────────────────────────────────────────────────

/// One settled spin. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpinResult {
    pub spin_id:   String,
    pub user_id:   String,
    pub casino_id: String,
    pub game_id:   String,
    pub wager:     f64,
    pub payout:    f64,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl SpinResult {
    pub fn session_key(&self) -> String {
        session_key(&self.user_id, &self.casino_id)
    }

    pub fn is_win(&self) -> bool {
        self.payout > 0.0
    }

    /// Reject spins the detectors cannot reason about.
    pub fn validate(&self) -> SpinwatchResult<()> {
        if self.user_id.is_empty() || self.casino_id.is_empty() {
            return Err(SpinwatchError::InvalidInput(format!(
                "spin {} is missing user or casino id", self.spin_id
            )));
        }
        if !self.wager.is_finite() || self.wager < 0.0 {
            return Err(SpinwatchError::InvalidInput(format!(
                "spin {} has invalid wager {}", self.spin_id, self.wager
            )));
        }
        if !self.payout.is_finite() || self.payout < 0.0 {
            return Err(SpinwatchError::InvalidInput(format!(
                "spin {} has invalid payout {}", self.spin_id, self.payout
            )));
        }
        Ok(())
    }
}

// ── Detector output ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    RtpPump,
    WinClustering,
    RtpDrift,
}

impl AnomalyType {
    /// Bit in the mobile summary's `af` mask.
    pub fn flag_bit(self) -> u8 {
        match self {
            Self::RtpPump       => 0b001,
            Self::WinClustering => 0b010,
            Self::RtpDrift      => 0b100,
        }
    }

    pub const ALL: [AnomalyType; 3] = [Self::RtpPump, Self::WinClustering, Self::RtpDrift];
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RtpPump       => write!(f, "rtp_pump"),
            Self::WinClustering => write!(f, "win_clustering"),
            Self::RtpDrift      => write!(f, "rtp_drift"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    None,
    Warning,
    Critical,
}

impl Severity {
    /// Compact code used by the mobile summary (`sv`).
    pub fn code(self) -> u8 {
        match self {
            Self::None     => 0,
            Self::Warning  => 1,
            Self::Critical => 2,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None     => write!(f, "none"),
            Self::Warning  => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyResult {
    pub anomaly_type: AnomalyType,
    pub detected:     bool,
    pub severity:     Severity,
    pub reason:       String,
    /// Strength of evidence for the anomaly, 0.0–1.0. Zero when not detected.
    pub confidence:   f64,
    pub metadata:     HashMap<String, Value>,
}

impl AnomalyResult {
    /// Not enough data to judge. `reason` must explain what is missing.
    pub fn insufficient(anomaly_type: AnomalyType, reason: impl Into<String>) -> Self {
        Self {
            anomaly_type,
            detected:   false,
            severity:   Severity::None,
            reason:     reason.into(),
            confidence: 0.0,
            metadata:   HashMap::new(),
        }
    }
}

// ── Reports ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn from_score(score: u8) -> Self {
        match score {
            70..=u8::MAX => Self::Critical,
            40..=69      => Self::High,
            15..=39      => Self::Medium,
            _            => Self::Low,
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low      => write!(f, "LOW"),
            Self::Medium   => write!(f, "MEDIUM"),
            Self::High     => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Output of one session analysis. Shared as `Arc` once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub session_key:        String,
    pub user_id:            String,
    pub casino_id:          String,
    pub spin_count:         usize,
    pub session_rtp:        f64,
    pub pump_analysis:      AnomalyResult,
    pub cluster_analysis:   AnomalyResult,
    pub drift_analysis:     AnomalyResult,
    pub overall_risk_score: u8,
    pub recommendations:    Vec<String>,
    pub generated_at:       DateTime<Utc>,
}

impl AnalysisReport {
    pub fn detectors(&self) -> [&AnomalyResult; 3] {
        [&self.pump_analysis, &self.cluster_analysis, &self.drift_analysis]
    }

    pub fn any_detected(&self) -> bool {
        self.detectors().iter().any(|r| r.detected)
    }

    pub fn max_severity(&self) -> Severity {
        self.detectors().iter().map(|r| r.severity).max().unwrap_or_default()
    }

    pub fn risk_tier(&self) -> RiskTier {
        RiskTier::from_score(self.overall_risk_score)
    }
}

// ── Mobile ────────────────────────────────────────────────────────────────────

/// Bandwidth-minimized projection of a session's current analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileAnomalySummary {
    /// Session key.
    pub sid: String,
    /// Generation time, Unix ms.
    pub ts:  i64,
    /// Detected-anomaly bitmask: bit0 pump, bit1 clustering, bit2 drift.
    pub af:  u8,
    /// Combined confidence, 0–100.
    pub cf:  u8,
    /// Session RTP as a percentage.
    pub rtp: f64,
    /// Spins in the window.
    pub sc:  usize,
    /// Max severity: 0 none, 1 warning, 2 critical.
    pub sv:  u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimalPayload {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<MobileAnomalySummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spin(wager: f64, payout: f64) -> SpinResult {
        SpinResult {
            spin_id:   "s1".into(),
            user_id:   "u1".into(),
            casino_id: "c1".into(),
            game_id:   "g1".into(),
            wager,
            payout,
            timestamp: 1_000,
        }
    }

    #[test]
    fn session_key_joins_user_and_casino() {
        assert_eq!(session_key("alice", "stake"), "alice:stake");
        assert_eq!(spin(1.0, 0.0).session_key(), "u1:c1");
    }

    #[test]
    fn negative_or_non_finite_amounts_are_rejected() {
        assert!(spin(10.0, 0.0).validate().is_ok());
        assert!(spin(-1.0, 0.0).validate().is_err());
        assert!(spin(1.0, -0.5).validate().is_err());
        assert!(spin(f64::NAN, 0.0).validate().is_err());
        assert!(spin(1.0, f64::INFINITY).validate().is_err());
    }

    #[test]
    fn severity_orders_none_warning_critical() {
        assert!(Severity::None < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
        assert_eq!(Severity::Critical.code(), 2);
    }

    #[test]
    fn anomaly_type_serializes_snake_case() {
        let json = serde_json::to_string(&AnomalyType::WinClustering).unwrap();
        assert_eq!(json, "\"win_clustering\"");
        assert_eq!(AnomalyType::RtpDrift.to_string(), "rtp_drift");
    }

    #[test]
    fn spin_wire_format_is_camel_case() {
        let v = serde_json::to_value(spin(10.0, 15.0)).unwrap();
        assert_eq!(v["spinId"], "s1");
        assert_eq!(v["casinoId"], "c1");
        assert_eq!(v["payout"], 15.0);
    }

    #[test]
    fn minimal_payload_omits_missing_data() {
        let p = MinimalPayload { ok: false, data: None };
        assert_eq!(serde_json::to_string(&p).unwrap(), "{\"ok\":false}");
    }

    #[test]
    fn risk_tier_bands() {
        assert_eq!(RiskTier::from_score(0), RiskTier::Low);
        assert_eq!(RiskTier::from_score(20), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(40), RiskTier::High);
        assert_eq!(RiskTier::from_score(100), RiskTier::Critical);
    }
}
