// spinwatch/src/state/history.rs
//
// Append-only per-user log of analysis reports. Appends for one user hold only
// that user's map shard entry, so different users never contend.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;

use crate::events::AnalysisReport;

pub struct AnalysisHistory {
    by_user: DashMap<String, VecDeque<Arc<AnalysisReport>>>,
}

impl AnalysisHistory {
    pub fn new() -> Self {
        Self { by_user: DashMap::new() }
    }

    /// Append a report, dropping the user's oldest entries beyond `max_per_user`.
    pub fn append(&self, report: Arc<AnalysisReport>, max_per_user: usize) {
        let mut log = self.by_user.entry(report.user_id.clone()).or_default();
        log.push_back(report);
        while log.len() > max_per_user.max(1) {
            log.pop_front();
        }
    }

    /// Oldest first. Empty for users with no reports.
    pub fn for_user(&self, user_id: &str) -> Vec<Arc<AnalysisReport>> {
        self.by_user
            .get(user_id)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len_for(&self, user_id: &str) -> usize {
        self.by_user.get(user_id).map(|log| log.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        self.by_user.clear();
    }
}

impl Default for AnalysisHistory { fn default() -> Self { Self::new() } }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AnomalyResult, AnomalyType};
    use chrono::Utc;

    fn report(user: &str, score: u8) -> Arc<AnalysisReport> {
        Arc::new(AnalysisReport {
            session_key:        format!("{}:c1", user),
            user_id:            user.to_string(),
            casino_id:          "c1".into(),
            spin_count:         0,
            session_rtp:        0.0,
            pump_analysis:      AnomalyResult::insufficient(AnomalyType::RtpPump, "Insufficient"),
            cluster_analysis:   AnomalyResult::insufficient(AnomalyType::WinClustering, "Insufficient"),
            drift_analysis:     AnomalyResult::insufficient(AnomalyType::RtpDrift, "Insufficient"),
            overall_risk_score: score,
            recommendations:    vec!["Continue monitoring".into()],
            generated_at:       Utc::now(),
        })
    }

    #[test]
    fn appends_are_kept_per_user_in_order() {
        let h = AnalysisHistory::new();
        h.append(report("alice", 1), 10);
        h.append(report("bob", 2), 10);
        h.append(report("alice", 3), 10);

        let alice: Vec<u8> = h.for_user("alice").iter().map(|r| r.overall_risk_score).collect();
        assert_eq!(alice, vec![1, 3]);
        assert_eq!(h.len_for("bob"), 1);
        assert!(h.for_user("carol").is_empty());
    }

    #[test]
    fn retention_drops_oldest() {
        let h = AnalysisHistory::new();
        for s in 0..5 {
            h.append(report("alice", s), 3);
        }
        let scores: Vec<u8> = h.for_user("alice").iter().map(|r| r.overall_risk_score).collect();
        assert_eq!(scores, vec![2, 3, 4]);
    }

    #[test]
    fn concurrent_appends_for_different_users() {
        let h = Arc::new(AnalysisHistory::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let h = Arc::clone(&h);
                std::thread::spawn(move || {
                    let user = format!("user{}", t);
                    for _ in 0..50 {
                        h.append(report(&user, 0), 1_000);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for t in 0..8 {
            assert_eq!(h.len_for(&format!("user{}", t)), 50);
        }
    }
}
