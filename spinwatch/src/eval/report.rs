// spinwatch/src/eval/report.rs
//
// Markdown and JSON output for the eval harness.

use serde_json::{json, Value};

use super::EvalResult;
use crate::events::AnomalyType;

/// Balanced accuracy over scored sessions: (TPR + TNR) / 2.
pub fn balanced_accuracy(result: &EvalResult) -> f64 {
    (result.global.recall() + (1.0 - result.global.fpr())) / 2.0
}

pub fn print_markdown(result: &EvalResult) {
    println!("# Spinwatch Evaluation Report");
    println!();
    println!(
        "**Sessions**: {}  **Positive**: {}  **Negative**: {}  **Skipped**: {}",
        result.n_sessions, result.n_positive, result.n_negative, result.n_skipped
    );
    println!();
    println!("| Metric            | Value  |");
    println!("|-------------------|--------|");
    println!("| Balanced accuracy | {:.4} |", balanced_accuracy(result));
    println!();
    result.print_report();
}

pub fn to_json(result: &EvalResult) -> String {
    let per_detector: serde_json::Map<String, Value> = AnomalyType::ALL
        .iter()
        .filter_map(|kind| {
            result.per_detector.get(kind).map(|m| {
                (kind.to_string(), json!({
                    "counts":    m,
                    "precision": m.precision(),
                    "recall":    m.recall(),
                    "f1":        m.f1(),
                    "fpr":       m.fpr(),
                }))
            })
        })
        .collect();

    json!({
        "n_spins":           result.n_spins,
        "n_sessions":        result.n_sessions,
        "n_skipped":         result.n_skipped,
        "n_positive":        result.n_positive,
        "n_negative":        result.n_negative,
        "precision":         result.global.precision(),
        "recall":            result.global.recall(),
        "f1":                result.global.f1(),
        "fpr":               result.global.fpr(),
        "balanced_accuracy": balanced_accuracy(result),
        "per_detector":      per_detector,
        "tier_counts":       result.tier_counts,
    })
    .to_string()
}
