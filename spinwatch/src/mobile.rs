// spinwatch/src/mobile.rs
//
// Bandwidth-constrained client support:
//   - compact anomaly summary (short keys, bitmask flags, integer codes)
//   - compressed spin batch codec: `wager|payout|timestamp` triples joined by `;`
//   - battery-aware poll interval for the offline client

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::engine::fusion::combined_confidence;
use crate::error::{SpinwatchError, SpinwatchResult};
use crate::events::{AnalysisReport, AnomalyResult, MobileAnomalySummary, SpinResult};

const FIELD_SEP: char = '|';
const SPIN_SEP:  char = ';';

pub const POLL_FAST_MS:   u64 = 30_000;
pub const POLL_MEDIUM_MS: u64 = 60_000;
pub const POLL_SLOW_MS:   u64 = 120_000;

// ── Summary ───────────────────────────────────────────────────────────────────

fn rtp_percent(rtp: f64) -> f64 {
    (rtp * 10_000.0).round() / 100.0
}

/// Build a summary from detector results. Pass no results when the window is
/// too small to judge: flags, confidence and severity are then zero.
pub fn summarize<'a>(
    session_key:  &str,
    session_rtp:  f64,
    spin_count:   usize,
    generated_at: DateTime<Utc>,
    results:      impl IntoIterator<Item = &'a AnomalyResult> + Clone,
) -> MobileAnomalySummary {
    let af = results.clone().into_iter()
        .filter(|r| r.detected)
        .fold(0u8, |acc, r| acc | r.anomaly_type.flag_bit());
    let sv = results.clone().into_iter()
        .map(|r| r.severity.code())
        .max()
        .unwrap_or(0);
    let cf = (combined_confidence(results) * 100.0).round() as u8;

    MobileAnomalySummary {
        sid: session_key.to_string(),
        ts:  generated_at.timestamp_millis(),
        af,
        cf,
        rtp: rtp_percent(session_rtp),
        sc:  spin_count,
        sv,
    }
}

pub fn summary_from_report(report: &AnalysisReport) -> MobileAnomalySummary {
    summarize(
        &report.session_key,
        report.session_rtp,
        report.spin_count,
        report.generated_at,
        report.detectors(),
    )
}

// ── Compressed spin batches ───────────────────────────────────────────────────

fn spin_id(user_id: &str, casino_id: &str, game_id: &str, timestamp: i64, index: usize) -> String {
    let mut h = Sha256::new();
    h.update(b"spin:");
    h.update(user_id.as_bytes());
    h.update(b":");
    h.update(casino_id.as_bytes());
    h.update(b":");
    h.update(game_id.as_bytes());
    h.update(timestamp.to_le_bytes());
    h.update((index as u64).to_le_bytes());
    hex::encode(&h.finalize()[..8])
}

fn parse_amount(field: &str, what: &str, entry: usize) -> SpinwatchResult<f64> {
    let v: f64 = field.trim().parse().map_err(|_| {
        SpinwatchError::InvalidInput(format!("spin {}: {} {:?} is not a number", entry, what, field))
    })?;
    if !v.is_finite() || v < 0.0 {
        return Err(SpinwatchError::InvalidInput(format!(
            "spin {}: {} must be a non-negative amount, got {}", entry, what, field
        )));
    }
    Ok(v)
}

/// Parse `wager|payout|timestamp;...` into spins for one session and game.
/// An empty string is an empty batch. Any malformed entry rejects the batch.
pub fn parse_compressed_spins(
    compressed: &str,
    user_id:    &str,
    casino_id:  &str,
    game_id:    &str,
) -> SpinwatchResult<Vec<SpinResult>> {
    let mut spins = Vec::new();
    for (i, entry) in compressed.split(SPIN_SEP).enumerate() {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let fields: Vec<&str> = entry.split(FIELD_SEP).collect();
        if fields.len() != 3 {
            return Err(SpinwatchError::InvalidInput(format!(
                "spin {}: expected wager|payout|timestamp, got {:?}", i, entry
            )));
        }
        let wager  = parse_amount(fields[0], "wager", i)?;
        let payout = parse_amount(fields[1], "payout", i)?;
        let timestamp: i64 = fields[2].trim().parse().map_err(|_| {
            SpinwatchError::InvalidInput(format!("spin {}: timestamp {:?} is not an integer", i, fields[2]))
        })?;

        spins.push(SpinResult {
            spin_id:   spin_id(user_id, casino_id, game_id, timestamp, i),
            user_id:   user_id.to_string(),
            casino_id: casino_id.to_string(),
            game_id:   game_id.to_string(),
            wager,
            payout,
            timestamp,
        });
    }
    Ok(spins)
}

/// Inverse of `parse_compressed_spins`, for clients batching spins offline.
pub fn encode_compressed_spins(spins: &[SpinResult]) -> String {
    spins.iter()
        .map(|s| format!("{}{}{}{}{}", s.wager, FIELD_SEP, s.payout, FIELD_SEP, s.timestamp))
        .collect::<Vec<_>>()
        .join(&SPIN_SEP.to_string())
}

// ── Poll interval ─────────────────────────────────────────────────────────────

/// How often a mobile client should poll, given its battery state.
pub fn mobile_poll_interval(battery_percent: u8, is_charging: bool) -> u64 {
    if is_charging {
        return POLL_FAST_MS;
    }
    match battery_percent {
        0..=19  => POLL_SLOW_MS,
        20..=49 => POLL_MEDIUM_MS,
        _       => POLL_FAST_MS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AnomalyType, Severity};
    use std::collections::HashMap;

    #[test]
    fn parses_three_spin_batch() {
        let spins = parse_compressed_spins("10|15|1000;10|0|2000;10|25|3000", "u", "c", "g").unwrap();
        assert_eq!(spins.len(), 3);
        assert!(spins.iter().all(|s| s.wager == 10.0));
        let payouts: Vec<f64> = spins.iter().map(|s| s.payout).collect();
        let stamps: Vec<i64> = spins.iter().map(|s| s.timestamp).collect();
        assert_eq!(payouts, vec![15.0, 0.0, 25.0]);
        assert_eq!(stamps, vec![1000, 2000, 3000]);
        assert_eq!(spins[0].user_id, "u");
        assert_eq!(spins[0].casino_id, "c");
        assert_eq!(spins[0].game_id, "g");
        assert_ne!(spins[0].spin_id, spins[1].spin_id);
    }

    #[test]
    fn empty_string_is_empty_batch() {
        assert!(parse_compressed_spins("", "u", "c", "g").unwrap().is_empty());
    }

    #[test]
    fn trailing_separator_is_tolerated() {
        let spins = parse_compressed_spins("1|0|5;", "u", "c", "g").unwrap();
        assert_eq!(spins.len(), 1);
    }

    #[test]
    fn malformed_input_is_rejected_not_coerced() {
        for bad in ["10|15", "10|x|1000", "-1|0|1000", "1|-2|1000", "1|2|3|4", "1|2|1.5e3x"] {
            assert!(
                matches!(parse_compressed_spins(bad, "u", "c", "g"), Err(SpinwatchError::InvalidInput(_))),
                "{:?} accepted", bad
            );
        }
    }

    #[test]
    fn spin_ids_are_stable() {
        let a = parse_compressed_spins("1|0|5", "u", "c", "g").unwrap();
        let b = parse_compressed_spins("1|0|5", "u", "c", "g").unwrap();
        assert_eq!(a[0].spin_id, b[0].spin_id);
        assert_eq!(a[0].spin_id.len(), 16);
    }

    #[test]
    fn encode_then_parse_preserves_amounts() {
        let spins = parse_compressed_spins("2.5|0|100;2.5|7.25|200", "u", "c", "g").unwrap();
        assert_eq!(encode_compressed_spins(&spins), "2.5|0|100;2.5|7.25|200");
    }

    #[test]
    fn poll_interval_policy() {
        assert_eq!(mobile_poll_interval(100, false), 30_000);
        assert_eq!(mobile_poll_interval(15, false), 120_000);
        assert_eq!(mobile_poll_interval(40, false), 60_000);
        assert_eq!(mobile_poll_interval(15, true), 30_000);
        assert_eq!(mobile_poll_interval(20, false), 60_000);
        assert_eq!(mobile_poll_interval(50, false), 30_000);
    }

    fn result(kind: AnomalyType, severity: Severity, confidence: f64) -> AnomalyResult {
        AnomalyResult {
            anomaly_type: kind,
            detected:     severity != Severity::None,
            severity,
            reason:       String::new(),
            confidence,
            metadata:     HashMap::new(),
        }
    }

    #[test]
    fn summary_flags_and_max_severity() {
        let results = [
            result(AnomalyType::RtpPump, Severity::Warning, 0.5),
            result(AnomalyType::WinClustering, Severity::None, 0.0),
            result(AnomalyType::RtpDrift, Severity::Critical, 0.5),
        ];
        let s = summarize("u:c", 1.234, 50, Utc::now(), results.iter());
        assert_eq!(s.af, 0b101);
        assert_eq!(s.sv, 2);
        assert_eq!(s.cf, 75);
        assert_eq!(s.rtp, 123.4);
        assert_eq!(s.sc, 50);
        assert_eq!(s.sid, "u:c");
    }

    #[test]
    fn summary_without_results_is_quiet() {
        let s = summarize("u:c", 0.5, 3, Utc::now(), std::iter::empty::<&AnomalyResult>());
        assert_eq!((s.af, s.cf, s.sv), (0, 0, 0));
        assert_eq!(s.rtp, 50.0);
    }
}
