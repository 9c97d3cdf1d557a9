use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use serde_json::Value;

use spinwatch::{
    AnomalyType, ConfigUpdate, DetectorConfig, EventPublisher, Severity, SpinAnalyzer, SpinResult,
    SpinwatchError, ANOMALY_DETECTED,
};

fn spin(user: &str, i: usize, wager: f64, payout: f64) -> SpinResult {
    SpinResult {
        spin_id:   format!("{}-{}", user, i),
        user_id:   user.to_string(),
        casino_id: "casino".to_string(),
        game_id:   "slots".to_string(),
        wager,
        payout,
        timestamp: 1_700_000_000_000 + 1_000 * i as i64,
    }
}

fn losses(user: &str, n: usize) -> Vec<SpinResult> {
    (0..n).map(|i| spin(user, i, 10.0, 0.0)).collect()
}

fn analyzer() -> SpinAnalyzer {
    SpinAnalyzer::new(DetectorConfig::default()).unwrap()
}

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<(String, Value)>>,
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event_name: &str, payload: Value) -> anyhow::Result<()> {
        self.events.lock().push((event_name.to_string(), payload));
        Ok(())
    }
}

#[test]
fn batch_of_twenty_is_kept_in_order() {
    let a = analyzer();
    a.record_spin_batch(losses("alice", 20)).unwrap();
    let s = a.get_session("alice:casino").unwrap();
    assert_eq!(s.spins.len(), 20);
    assert!(s.spins.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert!(s.is_active);
}

#[test]
fn window_caps_at_window_size_and_evicts_oldest() {
    let a = analyzer();
    a.record_spin_batch(losses("alice", 65)).unwrap();
    let s = a.get_session("alice:casino").unwrap();
    assert_eq!(s.spins.len(), 50);
    assert_eq!(s.spins[0].spin_id, "alice-15");
    assert_eq!(s.spins[49].spin_id, "alice-64");
}

#[test]
fn session_rtp_tracks_the_window() {
    let a = analyzer();
    a.record_spin(spin("bob", 0, 10.0, 0.0)).unwrap();
    a.record_spin(spin("bob", 1, 10.0, 25.0)).unwrap();
    let s = a.get_session("bob:casino").unwrap();
    assert!((s.session_rtp - 1.25).abs() < 1e-12);
}

#[test]
fn five_spins_cannot_be_analyzed() {
    let a = analyzer();
    a.record_spin_batch(losses("carol", 5)).unwrap();
    assert!(a.analyze_session("carol:casino").is_none());
    assert!(a.history("carol").is_empty());
}

#[test]
fn unknown_session_is_not_an_error() {
    let a = analyzer();
    assert!(a.get_session("nobody:casino").is_none());
    assert!(a.analyze_session("nobody:casino").is_none());
    assert!(a.end_session("nobody:casino").is_none());
    assert!(!a.clear_session("nobody:casino"));
    let payload = a.minimal_payload("nobody:casino");
    assert!(!payload.ok);
    assert_eq!(serde_json::to_value(&payload).unwrap(), serde_json::json!({ "ok": false }));
}

#[test]
fn end_session_returns_final_report_and_deactivates() {
    let a = analyzer();
    a.record_spin_batch(losses("dave", 12)).unwrap();
    let report = a.end_session("dave:casino").unwrap();
    assert_eq!(report.spin_count, 12);
    assert!(!a.get_session("dave:casino").unwrap().is_active);

    // Spins still append to an ended session; reactivation is explicit.
    a.record_spin(spin("dave", 12, 10.0, 0.0)).unwrap();
    let s = a.get_session("dave:casino").unwrap();
    assert_eq!(s.spins.len(), 13);
    assert!(!s.is_active);
    assert!(a.reactivate_session("dave:casino"));
    assert!(a.get_session("dave:casino").unwrap().is_active);
}

#[test]
fn clear_all_empties_sessions_and_history() {
    let a = analyzer();
    a.record_spin_batch(losses("erin", 15)).unwrap();
    a.record_spin_batch(losses("frank", 15)).unwrap();
    a.analyze_session("erin:casino").unwrap();
    a.analyze_session("frank:casino").unwrap();
    assert_eq!(a.session_count(), 2);

    a.clear_all();
    assert_eq!(a.session_count(), 0);
    assert!(a.history("erin").is_empty());
    assert!(a.history("frank").is_empty());
}

#[test]
fn repeated_analysis_is_pure_but_every_call_is_logged() {
    let a = analyzer();
    let spins = (0..30).map(|i| spin("gina", i, 10.0, if i % 3 == 0 { 30.0 } else { 0.0 })).collect();
    a.record_spin_batch(spins).unwrap();

    let first  = a.analyze_session("gina:casino").unwrap();
    let second = a.analyze_session("gina:casino").unwrap();
    for (x, y) in first.detectors().iter().zip(second.detectors().iter()) {
        assert_eq!(x.detected, y.detected);
        assert_eq!(x.severity, y.severity);
        assert_eq!(x.reason, y.reason);
        assert_eq!(x.metadata, y.metadata);
    }
    assert_eq!(first.overall_risk_score, second.overall_risk_score);
    assert_eq!(a.history("gina").len(), 2);

    a.mobile_summary("gina:casino").unwrap();
    assert_eq!(a.history("gina").len(), 2);
}

#[test]
fn history_is_capped_per_user() {
    let a = analyzer();
    a.update_config(ConfigUpdate { max_history_per_user: Some(3), ..Default::default() }).unwrap();
    a.record_spin_batch(losses("hank", 10)).unwrap();
    for _ in 0..5 {
        a.analyze_session("hank:casino").unwrap();
    }
    assert_eq!(a.history("hank").len(), 3);
}

#[test]
fn streak_session_is_flagged_end_to_end() {
    let a = analyzer();
    let spins = (0..50).map(|i| spin("ivan", i, 10.0, if i < 20 { 20.0 } else { 0.0 })).collect();
    a.record_spin_batch(spins).unwrap();

    let report = a.analyze_session("ivan:casino").unwrap();
    assert!(report.cluster_analysis.detected);
    assert_eq!(report.cluster_analysis.anomaly_type, AnomalyType::WinClustering);
    assert!(report.cluster_analysis.metadata["maxStreak"].as_u64().unwrap() >= 20);
    assert!(report.overall_risk_score > 0);
    assert!(!report.recommendations.is_empty());
}

#[test]
fn auto_publish_emits_one_event_per_detected_report() {
    let publisher = Arc::new(RecordingPublisher::default());
    let cfg = DetectorConfig { auto_publish: true, auto_analyze_every: 25, ..Default::default() };
    let a = SpinAnalyzer::with_publisher(cfg, publisher.clone()).unwrap();

    // RTP 2.0 throughout: every analysis flags a critical pump.
    let spins = (0..50).map(|i| spin("judy", i, 10.0, if i % 2 == 0 { 40.0 } else { 0.0 })).collect();
    let reports = a.record_spin_batch(spins).unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.pump_analysis.severity == Severity::Critical));

    let events = publisher.events.lock();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|(name, _)| name == ANOMALY_DETECTED));
    assert_eq!(events[1].1["sessionKey"], "judy:casino");
}

#[test]
fn invalid_config_update_keeps_previous_config() {
    let a = analyzer();
    let err = a.update_config(ConfigUpdate { window_size: Some(0), ..Default::default() });
    assert!(matches!(err, Err(SpinwatchError::InvalidConfig(_))));
    assert_eq!(a.config().window_size, 50);
}

#[test]
fn compressed_batch_feeds_the_same_session() {
    let a = analyzer();
    let spins = a.parse_compressed_spins("10|15|1000;10|0|2000;10|25|3000", "kim", "casino", "slots").unwrap();
    a.record_spin_batch(spins).unwrap();
    let s = a.get_session("kim:casino").unwrap();
    assert_eq!(s.spins.len(), 3);
    assert!((s.session_rtp - 40.0 / 30.0).abs() < 1e-12);

    let payload = a.minimal_payload("kim:casino");
    assert!(payload.ok);
    assert_eq!(payload.data.unwrap().sc, 3);
}

#[test]
fn concurrent_sessions_do_not_interfere() {
    let a = Arc::new(analyzer());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let a = Arc::clone(&a);
            thread::spawn(move || {
                let user = format!("user{}", t);
                for i in 0..40 {
                    a.record_spin(spin(&user, i, 1.0, 0.0)).unwrap();
                    if i % 10 == 9 {
                        a.analyze_session(&format!("{}:casino", user));
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(a.session_count(), 8);
    for t in 0..8 {
        let user = format!("user{}", t);
        assert_eq!(a.get_session(&format!("{}:casino", user)).unwrap().spins.len(), 40);
        assert_eq!(a.history(&user).len(), 4);
    }
}

#[test]
fn session_keys_list_every_open_session() {
    let a = analyzer();
    a.record_spin_batch(losses("lena", 3)).unwrap();
    a.record_spin_batch(losses("mike", 3)).unwrap();
    let mut keys = a.session_keys();
    keys.sort();
    assert_eq!(keys, vec!["lena:casino".to_string(), "mike:casino".to_string()]);

    a.clear_session("lena:casino");
    assert_eq!(a.session_keys(), vec!["mike:casino".to_string()]);
    assert_eq!(a.total_sessions(), 2);
}

#[test]
fn smaller_window_size_is_visible_without_new_spins() {
    let a = analyzer();
    a.record_spin_batch(losses("nina", 40)).unwrap();
    a.update_config(ConfigUpdate { window_size: Some(20), ..Default::default() }).unwrap();

    let s = a.get_session("nina:casino").unwrap();
    assert_eq!(s.spins.len(), 20);
    assert_eq!(s.spins[0].spin_id, "nina-20");
    assert_eq!(s.total_wager, 200.0);
    assert_eq!(a.analyze_session("nina:casino").unwrap().spin_count, 20);
}
