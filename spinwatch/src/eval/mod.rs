// spinwatch/src/eval/mod.rs
//
// Labeled dataset evaluation.
//
//   1. Load a labeled JSONL dataset of spins
//   2. Feed every spin through a fresh `SpinAnalyzer` in file order
//   3. Analyze each session once at the end of the dataset
//   4. Score each detector per session against the labels
//
// Dataset format (one JSON object per line):
//   { ...SpinResult fields..., "labels": ["rtp_pump", "win_clustering"] }
//
// A session's label set is the union of its spins' labels. An empty set means
// a fair session (negative class for every detector).
//
// Run:
//   spinwatch --mode synth --path labeled.jsonl --sessions 50
//   spinwatch --mode eval  --path labeled.jsonl

pub mod report;
pub mod synthetic;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DetectorConfig;
use crate::engine::analyzer::SpinAnalyzer;
use crate::events::{AnomalyType, SpinResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledSpin {
    #[serde(flatten)]
    pub spin:   SpinResult,
    #[serde(default)]
    pub labels: Vec<AnomalyType>,
}

// ── Per-detector performance counters ─────────────────────────────────────────

#[derive(Debug, Default, Clone, Serialize)]
pub struct DetectorMetrics {
    pub tp:  u64,
    pub fp:  u64,
    pub tn:  u64,
    pub fn_: u64,
}

impl DetectorMetrics {
    fn record(&mut self, fired: bool, positive: bool) {
        match (fired, positive) {
            (true,  true)  => self.tp  += 1,
            (true,  false) => self.fp  += 1,
            (false, true)  => self.fn_ += 1,
            (false, false) => self.tn  += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.tp + self.fp + self.tn + self.fn_
    }

    pub fn precision(&self) -> f64 {
        let denom = self.tp + self.fp;
        if denom == 0 { 1.0 } else { self.tp as f64 / denom as f64 }
    }

    pub fn recall(&self) -> f64 {
        let denom = self.tp + self.fn_;
        if denom == 0 { 0.0 } else { self.tp as f64 / denom as f64 }
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
    }

    pub fn fpr(&self) -> f64 {
        let denom = self.fp + self.tn;
        if denom == 0 { 0.0 } else { self.fp as f64 / denom as f64 }
    }
}

// ── Aggregate evaluation result ───────────────────────────────────────────────

#[derive(Debug)]
pub struct EvalResult {
    pub n_spins:         usize,
    pub n_sessions:      usize,
    /// Sessions below the minimum spin count; not scored.
    pub n_skipped:       usize,
    pub n_positive:      usize,
    pub n_negative:      usize,
    pub global:          DetectorMetrics,
    pub per_detector:    HashMap<AnomalyType, DetectorMetrics>,
    pub tier_counts:     HashMap<String, u64>,
    /// (score_bin_lower, count), 10-point bins.
    pub score_histogram: Vec<(u8, usize)>,
}

impl EvalResult {
    pub fn print_report(&self) {
        println!("\n## Spinwatch Evaluation Report\n");
        println!("| Metric       | Value   |");
        println!("|--------------|---------|");
        println!("| Spins        | {}      |", self.n_spins);
        println!("| Sessions     | {}      |", self.n_sessions);
        println!("| Skipped      | {}      |", self.n_skipped);
        println!("| Positive     | {}      |", self.n_positive);
        println!("| Negative     | {}      |", self.n_negative);
        println!("| Precision    | {:.4}   |", self.global.precision());
        println!("| Recall       | {:.4}   |", self.global.recall());
        println!("| F1           | {:.4}   |", self.global.f1());
        println!("| FPR          | {:.4}   |", self.global.fpr());
        println!();

        println!("### Per-Detector Performance\n");
        println!("| Detector | P | R | F1 | FPR |");
        println!("|----------|---|---|----|-----|");
        for kind in AnomalyType::ALL {
            if let Some(m) = self.per_detector.get(&kind) {
                println!("| {:15} | {:.3} | {:.3} | {:.3} | {:.4} |",
                    kind, m.precision(), m.recall(), m.f1(), m.fpr());
            }
        }

        println!("\n### Risk Score Distribution\n");
        let scored = (self.n_sessions - self.n_skipped).max(1);
        for (lower, count) in &self.score_histogram {
            let bar: String = "#".repeat((*count as f64 / scored as f64 * 60.0) as usize);
            println!("{:3}-{:3} | {:5} | {}", lower, lower + 9, count, bar);
        }
    }
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

pub struct Evaluator {
    config: DetectorConfig,
}

impl Evaluator {
    pub fn new(config: DetectorConfig) -> Self { Self { config } }

    pub async fn run_dataset(&self, path: &Path) -> Result<EvalResult> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut spins: Vec<LabeledSpin> = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() { continue; }
            match serde_json::from_str::<LabeledSpin>(line) {
                Ok(s)  => spins.push(s),
                Err(e) => warn!("Eval dataset parse error: {}", e),
            }
        }

        info!("Loaded {} spins from {}", spins.len(), path.display());
        self.evaluate(spins)
    }

    pub fn evaluate(&self, spins: Vec<LabeledSpin>) -> Result<EvalResult> {
        let config = DetectorConfig { auto_publish: false, auto_analyze_every: 0, ..self.config.clone() };
        let analyzer = SpinAnalyzer::new(config)?;

        let n_spins = spins.len();
        let mut order: Vec<String> = Vec::new();
        let mut labels: HashMap<String, HashSet<AnomalyType>> = HashMap::new();

        for labeled in spins {
            let key = labeled.spin.session_key();
            let set = labels.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                HashSet::new()
            });
            set.extend(labeled.labels.iter().copied());
            if let Err(e) = analyzer.record_spin(labeled.spin) {
                warn!(session = %key, "skipping invalid spin: {}", e);
            }
        }

        let mut global       = DetectorMetrics::default();
        let mut per_detector: HashMap<AnomalyType, DetectorMetrics> = HashMap::new();
        let mut tier_counts:  HashMap<String, u64> = HashMap::new();
        let mut score_bins   = vec![0usize; 10];
        let mut n_skipped    = 0;
        let mut n_positive   = 0;

        for key in &order {
            let truth = &labels[key];
            let report = match analyzer.analyze_session(key) {
                Some(r) => r,
                None => {
                    n_skipped += 1;
                    continue;
                }
            };
            if !truth.is_empty() {
                n_positive += 1;
            }

            for result in report.detectors() {
                per_detector.entry(result.anomaly_type)
                    .or_default()
                    .record(result.detected, truth.contains(&result.anomaly_type));
            }
            global.record(report.any_detected(), !truth.is_empty());

            let bin = (report.overall_risk_score as usize / 10).min(9);
            score_bins[bin] += 1;
            *tier_counts.entry(report.risk_tier().to_string()).or_default() += 1;
        }

        let n_sessions = order.len();
        let score_histogram = score_bins.iter().enumerate()
            .map(|(i, &c)| ((i * 10) as u8, c))
            .collect();

        Ok(EvalResult {
            n_spins,
            n_sessions,
            n_skipped,
            n_positive,
            n_negative: n_sessions - n_skipped - n_positive,
            global,
            per_detector,
            tier_counts,
            score_histogram,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::synthetic::{generate, SyntheticConfig};
    use super::*;

    #[test]
    fn labeled_spin_reads_flat_json() {
        let line = r#"{"spinId":"s1","userId":"u","casinoId":"c","gameId":"g","wager":1.0,"payout":0.0,"timestamp":5,"labels":["rtp_pump"]}"#;
        let s: LabeledSpin = serde_json::from_str(line).unwrap();
        assert_eq!(s.spin.user_id, "u");
        assert_eq!(s.labels, vec![AnomalyType::RtpPump]);

        let unlabeled = r#"{"spinId":"s1","userId":"u","casinoId":"c","gameId":"g","wager":1.0,"payout":0.0,"timestamp":5}"#;
        assert!(serde_json::from_str::<LabeledSpin>(unlabeled).unwrap().labels.is_empty());
    }

    #[test]
    fn metrics_ratios() {
        let m = DetectorMetrics { tp: 8, fp: 2, tn: 18, fn_: 2 };
        assert!((m.precision() - 0.8).abs() < 1e-12);
        assert!((m.recall() - 0.8).abs() < 1e-12);
        assert!((m.fpr() - 0.1).abs() < 1e-12);
        assert_eq!(m.total(), 30);
    }

    #[test]
    fn synthetic_dataset_separates_every_profile() {
        let cfg = SyntheticConfig { sessions_per_profile: 100, seed: 7, ..Default::default() };
        let result = Evaluator::new(DetectorConfig::default()).evaluate(generate(&cfg)).unwrap();

        assert_eq!(result.n_sessions, 400);
        assert_eq!(result.n_skipped, 0);
        assert_eq!(result.n_positive, 300);
        for m in result.per_detector.values() {
            assert_eq!(m.total(), 400);
        }

        let pump    = &result.per_detector[&AnomalyType::RtpPump];
        let cluster = &result.per_detector[&AnomalyType::WinClustering];
        let drift   = &result.per_detector[&AnomalyType::RtpDrift];
        assert!(pump.recall() >= 0.8, "pump recall {}", pump.recall());
        assert!(cluster.recall() >= 0.8, "cluster recall {}", cluster.recall());
        assert!(cluster.fpr() <= 0.10, "cluster fpr {}", cluster.fpr());
        assert!(drift.recall() >= 0.6, "drift recall {}", drift.recall());
        assert!(drift.fpr() <= 0.15, "drift fpr {}", drift.fpr());
        assert_eq!(result.score_histogram.iter().map(|(_, c)| c).sum::<usize>(), 400);
    }

    #[test]
    fn short_sessions_are_skipped() {
        let cfg = SyntheticConfig { sessions_per_profile: 2, spins_per_session: 5, ..Default::default() };
        let result = Evaluator::new(DetectorConfig::default()).evaluate(generate(&cfg)).unwrap();
        assert_eq!(result.n_skipped, result.n_sessions);
        assert_eq!(result.global.total(), 0);
    }
}
