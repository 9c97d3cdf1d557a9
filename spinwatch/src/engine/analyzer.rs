// spinwatch/src/engine/analyzer.rs
//
// SpinAnalyzer: the core entry point. Owns the session store, the analysis
// history and the versioned config; optionally holds a dispatcher for the
// injected event publisher.
//
// Ingestion takes the per-session write lock. Reads fit the window to the
// current window size and copy it under that same lock; detectors run on the
// copy, so concurrent analyses never block ingestion for other sessions.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::config::{ConfigHandle, ConfigUpdate, DetectorConfig};
use crate::engine::dispatcher::{Dispatcher, EventPublisher};
use crate::engine::fusion;
use crate::error::{SpinwatchError, SpinwatchResult};
use crate::events::{AnalysisReport, MinimalPayload, MobileAnomalySummary, SpinResult};
use crate::mobile;
use crate::state::history::AnalysisHistory;
use crate::state::window::{SessionStore, WindowSnapshot};
use crate::workers::{self, DetectorOutputs};

pub struct SpinAnalyzer {
    config:     ConfigHandle,
    store:      SessionStore,
    history:    AnalysisHistory,
    dispatcher: Option<Dispatcher>,
}

impl SpinAnalyzer {
    pub fn new(config: DetectorConfig) -> SpinwatchResult<Self> {
        Ok(Self {
            config:     ConfigHandle::new(config)?,
            store:      SessionStore::new(),
            history:    AnalysisHistory::new(),
            dispatcher: None,
        })
    }

    pub fn with_publisher(config: DetectorConfig, publisher: Arc<dyn EventPublisher>) -> SpinwatchResult<Self> {
        let mut analyzer = Self::new(config)?;
        analyzer.dispatcher = Some(Dispatcher::new(publisher));
        Ok(analyzer)
    }

    // ── Ingestion ─────────────────────────────────────────────────────────────

    /// Record one spin. Returns a report when the spin triggered an automatic
    /// analysis (`autoAnalyzeEvery`).
    pub fn record_spin(&self, spin: SpinResult) -> SpinwatchResult<Option<Arc<AnalysisReport>>> {
        spin.validate()?;
        let cfg = self.config.snapshot();
        Ok(self.ingest(spin, &cfg))
    }

    /// Record spins in arrival order. The whole batch is validated before any
    /// spin is applied. Returns the automatically triggered reports.
    pub fn record_spin_batch(&self, spins: Vec<SpinResult>) -> SpinwatchResult<Vec<Arc<AnalysisReport>>> {
        for spin in &spins {
            spin.validate()?;
        }
        let cfg = self.config.snapshot();
        let n = spins.len();
        let reports: Vec<_> = spins.into_iter()
            .filter_map(|spin| self.ingest(spin, &cfg))
            .collect();
        debug!(spins = n, auto_reports = reports.len(), "batch recorded");
        Ok(reports)
    }

    fn ingest(&self, spin: SpinResult, cfg: &DetectorConfig) -> Option<Arc<AnalysisReport>> {
        let key = spin.session_key();
        let since = self.store.record(spin, cfg.window_size);
        if cfg.auto_analyze_every > 0 && since >= cfg.auto_analyze_every {
            return self.analyze_session(&key);
        }
        None
    }

    // ── Analysis ──────────────────────────────────────────────────────────────

    fn evaluate(window: &WindowSnapshot, cfg: &DetectorConfig) -> Option<DetectorOutputs> {
        if window.spin_count() < cfg.min_spins_required {
            return None;
        }
        Some(workers::run_all(window, cfg))
    }

    /// Analyze the current window. `None` for unknown sessions and windows
    /// below `minSpinsRequired`. Every returned report is appended to history.
    pub fn analyze_session(&self, key: &str) -> Option<Arc<AnalysisReport>> {
        let cfg     = self.config.snapshot();
        let window  = self.store.snapshot_for_analysis(key, cfg.window_size, cfg.min_spins_required)?;
        let outputs = match Self::evaluate(&window, &cfg) {
            Some(o) => o,
            None => {
                debug!(session = key, spins = window.spin_count(), "not enough spins to analyze");
                return None;
            }
        };

        let score = fusion::risk_score(&outputs, &cfg.risk_weights);
        let recommendations = fusion::recommendations(&outputs, score);
        let report = Arc::new(AnalysisReport {
            session_key:        window.session_key.clone(),
            user_id:            window.user_id.clone(),
            casino_id:          window.casino_id.clone(),
            spin_count:         window.spin_count(),
            session_rtp:        window.session_rtp,
            pump_analysis:      outputs.pump,
            cluster_analysis:   outputs.cluster,
            drift_analysis:     outputs.drift,
            overall_risk_score: score,
            recommendations,
            generated_at:       Utc::now(),
        });

        self.history.append(Arc::clone(&report), cfg.max_history_per_user);

        if report.any_detected() {
            info!(
                session = key,
                score = report.overall_risk_score,
                tier = %report.risk_tier(),
                severity = %report.max_severity(),
                "anomaly detected"
            );
            if cfg.auto_publish {
                if let Some(d) = &self.dispatcher {
                    d.dispatch(&report, cfg.mobile_optimized);
                }
            }
        } else {
            debug!(session = key, rtp = report.session_rtp, "session clean");
        }

        Some(report)
    }

    /// Mark the session inactive and return its final report.
    pub fn end_session(&self, key: &str) -> Option<Arc<AnalysisReport>> {
        if !self.store.set_active(key, false) {
            return None;
        }
        info!(session = key, "session ended");
        self.analyze_session(key)
    }

    pub fn reactivate_session(&self, key: &str) -> bool {
        self.store.set_active(key, true)
    }

    // ── Queries & housekeeping ────────────────────────────────────────────────

    pub fn get_session(&self, key: &str) -> Option<WindowSnapshot> {
        self.store.snapshot(key, self.config.snapshot().window_size)
    }

    pub fn history(&self, user_id: &str) -> Vec<Arc<AnalysisReport>> {
        self.history.for_user(user_id)
    }

    pub fn clear_session(&self, key: &str) -> bool {
        self.store.remove(key)
    }

    /// Drop every session and every user's history.
    pub fn clear_all(&self) {
        self.store.clear();
        self.history.clear();
        info!("all sessions and history cleared");
    }

    pub fn session_count(&self) -> usize {
        self.store.len()
    }

    pub fn session_keys(&self) -> Vec<String> {
        self.store.keys()
    }

    pub fn idle_sessions(&self, idle: Duration) -> Vec<String> {
        self.store.idle_keys(idle)
    }

    pub fn total_spins(&self) -> u64 {
        self.store.total_spins.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Sessions created since start, including ones since cleared.
    pub fn total_sessions(&self) -> u64 {
        self.store.total_sessions.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn dispatcher(&self) -> Option<&Dispatcher> {
        self.dispatcher.as_ref()
    }

    // ── Mobile ────────────────────────────────────────────────────────────────

    /// Compact view of the session's current state. Does not touch history.
    pub fn mobile_summary(&self, key: &str) -> Option<MobileAnomalySummary> {
        let cfg    = self.config.snapshot();
        let window = self.store.snapshot(key, cfg.window_size)?;
        let now    = Utc::now();
        let summary = match Self::evaluate(&window, &cfg) {
            Some(outputs) => mobile::summarize(
                key, window.session_rtp, window.spin_count(), now, outputs.iter(),
            ),
            None => mobile::summarize(
                key, window.session_rtp, window.spin_count(), now, std::iter::empty(),
            ),
        };
        Some(summary)
    }

    pub fn minimal_payload(&self, key: &str) -> MinimalPayload {
        match self.mobile_summary(key) {
            Some(data) => MinimalPayload { ok: true, data: Some(data) },
            None       => MinimalPayload { ok: false, data: None },
        }
    }

    pub fn parse_compressed_spins(
        &self,
        compressed: &str,
        user_id:    &str,
        casino_id:  &str,
        game_id:    &str,
    ) -> SpinwatchResult<Vec<SpinResult>> {
        mobile::parse_compressed_spins(compressed, user_id, casino_id, game_id)
    }

    // ── Config ────────────────────────────────────────────────────────────────

    pub fn config(&self) -> Arc<DetectorConfig> {
        self.config.snapshot()
    }

    pub fn config_version(&self) -> u64 {
        self.config.version()
    }

    pub fn update_config(&self, update: ConfigUpdate) -> SpinwatchResult<Arc<DetectorConfig>> {
        self.config.update(|c| update.apply_to(c))
    }

    pub fn enable_mobile_mode(&self) -> SpinwatchResult<Arc<DetectorConfig>> {
        self.update_config(ConfigUpdate { mobile_optimized: Some(true), ..Default::default() })
    }

    pub fn disable_mobile_mode(&self) -> SpinwatchResult<Arc<DetectorConfig>> {
        self.update_config(ConfigUpdate { mobile_optimized: Some(false), ..Default::default() })
    }

    pub fn set_game_baseline(&self, game_id: &str, baseline: f64) -> SpinwatchResult<Arc<DetectorConfig>> {
        if game_id.is_empty() {
            return Err(SpinwatchError::InvalidConfig("game id must not be empty".into()));
        }
        self.config.update(|c| {
            let mut next = c.clone();
            next.baselines_by_game.insert(game_id.to_string(), baseline);
            next
        })
    }

    pub fn clear_game_baseline(&self, game_id: &str) -> SpinwatchResult<Arc<DetectorConfig>> {
        self.config.update(|c| {
            let mut next = c.clone();
            next.baselines_by_game.remove(game_id);
            next
        })
    }
}
