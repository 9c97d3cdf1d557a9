// spinwatch/src/engine/fusion.rs
//
// Risk scoring: fuse the three detector results into a 0–100 score plus
// recommendations.
//
// Each detector adds its configured weight for the severity it reported
// (`RiskWeights`, default pump 20/40, cluster 15/30, drift 15/30 for
// warning/critical) and the sum is capped at 100. Combined confidence for the
// mobile summary is a noisy-OR over detector confidences.

use crate::config::{RiskWeights, SeverityWeights};
use crate::events::{AnomalyResult, AnomalyType, Severity};
use crate::workers::DetectorOutputs;

pub const MAX_SCORE: u8 = 100;
const ESCALATE_AT:   u8 = 70;

fn points(result: &AnomalyResult, w: SeverityWeights) -> u16 {
    match result.severity {
        Severity::None     => 0,
        Severity::Warning  => w.warning as u16,
        Severity::Critical => w.critical as u16,
    }
}

pub fn risk_score(outputs: &DetectorOutputs, weights: &RiskWeights) -> u8 {
    let total = points(&outputs.pump, weights.pump)
        + points(&outputs.cluster, weights.cluster)
        + points(&outputs.drift, weights.drift);
    total.min(MAX_SCORE as u16) as u8
}

/// Probability that at least one detector is right, treating them as independent.
pub fn combined_confidence<'a>(results: impl IntoIterator<Item = &'a AnomalyResult>) -> f64 {
    let miss: f64 = results.into_iter()
        .map(|r| 1.0 - r.confidence.clamp(0.0, 1.0))
        .product();
    (1.0 - miss).clamp(0.0, 1.0)
}

fn recommendation(result: &AnomalyResult) -> Option<&'static str> {
    let text = match (result.anomaly_type, result.severity) {
        (_, Severity::None) => return None,
        (AnomalyType::RtpPump, Severity::Warning) =>
            "Returns are running above this game's expected RTP. Keep stakes small; elevated payouts often precede a reversal.",
        (AnomalyType::RtpPump, Severity::Critical) =>
            "Returns are far above the expected RTP, a common pumping pattern. Consider cashing out and avoid new deposits on this casino.",
        (AnomalyType::WinClustering, Severity::Warning) =>
            "Wins are arriving in an unusually tight cluster. Do not raise bet sizes because of a hot streak.",
        (AnomalyType::WinClustering, Severity::Critical) =>
            "This win streak is statistically implausible for the session's win rate. Treat it as a lure and avoid chasing it.",
        (AnomalyType::RtpDrift, Severity::Warning) =>
            "RTP has been climbing during this session. Be cautious about escalating bets.",
        (AnomalyType::RtpDrift, Severity::Critical) =>
            "RTP rose sharply mid-session, consistent with live manipulation. Consider ending the session.",
    };
    Some(text)
}

/// At least one entry per detected anomaly; never empty.
pub fn recommendations(outputs: &DetectorOutputs, score: u8) -> Vec<String> {
    let mut out: Vec<String> = outputs.iter()
        .filter(|r| r.detected)
        .filter_map(recommendation)
        .map(str::to_string)
        .collect();

    if out.is_empty() {
        out.push("No anomalies detected. Continue monitoring this session.".to_string());
        if outputs.iter().any(|r| r.reason.contains("Insufficient")) {
            out.push("Keep recording spins; some checks need a longer session to run.".to_string());
        }
    } else if score >= ESCALATE_AT {
        out.push(
            "Several manipulation signals fired together. Save this session's history and report it to the operator's licensing authority."
                .to_string(),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn result(kind: AnomalyType, severity: Severity, confidence: f64) -> AnomalyResult {
        AnomalyResult {
            anomaly_type: kind,
            detected:     severity != Severity::None,
            severity,
            reason:       "test".into(),
            confidence,
            metadata:     HashMap::new(),
        }
    }

    fn outputs(p: Severity, c: Severity, d: Severity) -> DetectorOutputs {
        DetectorOutputs {
            pump:    result(AnomalyType::RtpPump, p, if p == Severity::None { 0.0 } else { 0.8 }),
            cluster: result(AnomalyType::WinClustering, c, if c == Severity::None { 0.0 } else { 0.9 }),
            drift:   result(AnomalyType::RtpDrift, d, if d == Severity::None { 0.0 } else { 0.5 }),
        }
    }

    #[test]
    fn nothing_detected_scores_zero_with_monitoring_advice() {
        let o = outputs(Severity::None, Severity::None, Severity::None);
        let score = risk_score(&o, &RiskWeights::default());
        assert_eq!(score, 0);
        let recs = recommendations(&o, score);
        assert!(!recs.is_empty());
        assert!(recs[0].contains("Continue monitoring"));
    }

    #[test]
    fn critical_outweighs_warning() {
        let w = RiskWeights::default();
        let warn = risk_score(&outputs(Severity::Warning, Severity::None, Severity::None), &w);
        let crit = risk_score(&outputs(Severity::Critical, Severity::None, Severity::None), &w);
        assert!(crit > warn);
        assert_eq!(warn, 20);
        assert_eq!(crit, 40);
    }

    #[test]
    fn score_is_capped() {
        let w = RiskWeights {
            pump:    SeverityWeights { warning: 50, critical: 90 },
            cluster: SeverityWeights { warning: 50, critical: 90 },
            drift:   SeverityWeights { warning: 50, critical: 90 },
        };
        let o = outputs(Severity::Critical, Severity::Critical, Severity::Critical);
        assert_eq!(risk_score(&o, &w), MAX_SCORE);
        assert_eq!(risk_score(&o, &RiskWeights::default()), 100);
    }

    #[test]
    fn one_recommendation_per_detection_plus_escalation() {
        let o = outputs(Severity::Critical, Severity::Warning, Severity::None);
        let score = risk_score(&o, &RiskWeights::default());
        assert_eq!(score, 55);
        assert_eq!(recommendations(&o, score).len(), 2);

        let o = outputs(Severity::Critical, Severity::Critical, Severity::None);
        let score = risk_score(&o, &RiskWeights::default());
        let recs = recommendations(&o, score);
        assert_eq!(recs.len(), 3);
        assert!(recs.last().unwrap().contains("report"));
    }

    #[test]
    fn noisy_or_confidence() {
        let o = outputs(Severity::Warning, Severity::None, Severity::Warning);
        let c = combined_confidence(o.iter());
        assert!((c - 0.9).abs() < 1e-12); // 1 - (0.2 · 1.0 · 0.5)
        let none = outputs(Severity::None, Severity::None, Severity::None);
        assert_eq!(combined_confidence(none.iter()), 0.0);
    }
}
