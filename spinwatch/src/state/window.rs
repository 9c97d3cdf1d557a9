// spinwatch/src/state/window.rs
//
// Session-keyed sliding window store.
// DashMap = sharded concurrent HashMap; each session sits behind its own
// RwLock so writers to one (user, casino) key are serialized while unrelated
// keys proceed in parallel.
//
// Design:
//   - Per-session fixed-capacity spin ring (arena + head index, oldest evicted)
//   - Wager / payout totals and session RTP recomputed from the ring on every write
//   - No internal expiry; callers sweep idle sessions via `idle_keys`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::events::SpinResult;

/// `payout / wager`, 0.0 when nothing was wagered.
pub fn rtp(total_payout: f64, total_wager: f64) -> f64 {
    if total_wager > 0.0 { total_payout / total_wager } else { 0.0 }
}

// ── Spin ring ─────────────────────────────────────────────────────────────────

/// Fixed-capacity ring of spins. Storage is allocated once at capacity;
/// once full, each push overwrites the oldest slot in place.
#[derive(Debug)]
pub struct SpinRing {
    slots: Vec<SpinResult>,
    head:  usize, // index of the oldest spin once full
    cap:   usize,
}

impl SpinRing {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(1);
        Self { slots: Vec::with_capacity(cap), head: 0, cap }
    }

    pub fn len(&self) -> usize { self.slots.len() }
    pub fn is_empty(&self) -> bool { self.slots.is_empty() }
    pub fn capacity(&self) -> usize { self.cap }

    /// Append, returning the evicted spin when the ring was full.
    pub fn push(&mut self, spin: SpinResult) -> Option<SpinResult> {
        if self.slots.len() < self.cap {
            self.slots.push(spin);
            return None;
        }
        let evicted = std::mem::replace(&mut self.slots[self.head], spin);
        self.head = (self.head + 1) % self.cap;
        Some(evicted)
    }

    /// Oldest → newest.
    pub fn iter(&self) -> impl Iterator<Item = &SpinResult> + '_ {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    pub fn to_vec(&self) -> Vec<SpinResult> {
        self.iter().cloned().collect()
    }

    /// Change capacity, keeping the newest `min(len, new_cap)` spins in order.
    pub fn resize(&mut self, new_cap: usize) {
        let new_cap = new_cap.max(1);
        if new_cap == self.cap { return; }
        let skip = self.len().saturating_sub(new_cap);
        let mut slots = Vec::with_capacity(new_cap);
        slots.extend(self.iter().skip(skip).cloned());
        self.slots = slots;
        self.head  = 0;
        self.cap   = new_cap;
    }
}

// ── Per-session window ────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SessionWindow {
    pub session_key:    String,
    pub user_id:        String,
    pub casino_id:      String,
    pub spins:          SpinRing,
    pub total_wager:    f64,
    pub total_payout:   f64,
    pub session_rtp:    f64,
    pub is_active:      bool,
    pub created_at:     DateTime<Utc>,
    pub updated_at:     DateTime<Utc>,
    pub spins_seen:     u64,   // lifetime, including evicted spins
    pub since_analysis: usize, // spins recorded since the last analysis
}

impl SessionWindow {
    pub fn new(spin: &SpinResult, window_size: usize, now: DateTime<Utc>) -> Self {
        Self {
            session_key:    spin.session_key(),
            user_id:        spin.user_id.clone(),
            casino_id:      spin.casino_id.clone(),
            spins:          SpinRing::with_capacity(window_size),
            total_wager:    0.0,
            total_payout:   0.0,
            session_rtp:    0.0,
            is_active:      true,
            created_at:     now,
            updated_at:     now,
            spins_seen:     0,
            since_analysis: 0,
        }
    }

    /// Bring the ring to `window_size`, keeping the newest spins, and
    /// recompute totals if anything changed.
    pub fn fit(&mut self, window_size: usize) {
        if self.spins.capacity() != window_size.max(1) {
            self.spins.resize(window_size);
            self.recompute();
        }
    }

    pub fn ingest(&mut self, spin: SpinResult, window_size: usize) {
        self.fit(window_size);
        if let Some(old) = self.spins.push(spin) {
            debug!(session = %self.session_key, evicted = %old.spin_id, "window full, evicted oldest spin");
        }
        self.recompute();
        self.updated_at      = Utc::now();
        self.spins_seen     += 1;
        self.since_analysis += 1;
    }

    /// Totals come from the ring itself so they can never drift from the window.
    fn recompute(&mut self) {
        let (w, p) = self.spins.iter()
            .fold((0.0, 0.0), |(w, p), s| (w + s.wager, p + s.payout));
        self.total_wager  = w;
        self.total_payout = p;
        self.session_rtp  = rtp(p, w);
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            session_key:  self.session_key.clone(),
            user_id:      self.user_id.clone(),
            casino_id:    self.casino_id.clone(),
            spins:        self.spins.to_vec(),
            total_wager:  self.total_wager,
            total_payout: self.total_payout,
            session_rtp:  self.session_rtp,
            is_active:    self.is_active,
            created_at:   self.created_at,
            updated_at:   self.updated_at,
        }
    }
}

/// Point-in-time copy of one session, handed to the detectors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSnapshot {
    pub session_key:  String,
    pub user_id:      String,
    pub casino_id:    String,
    pub spins:        Vec<SpinResult>,
    pub total_wager:  f64,
    pub total_payout: f64,
    pub session_rtp:  f64,
    pub is_active:    bool,
    pub created_at:   DateTime<Utc>,
    pub updated_at:   DateTime<Utc>,
}

impl WindowSnapshot {
    /// Build a snapshot directly from chronologically ordered spins.
    pub fn from_spins(user_id: &str, casino_id: &str, spins: Vec<SpinResult>) -> Self {
        let total_wager:  f64 = spins.iter().map(|s| s.wager).sum();
        let total_payout: f64 = spins.iter().map(|s| s.payout).sum();
        let now = Utc::now();
        Self {
            session_key: crate::events::session_key(user_id, casino_id),
            user_id:     user_id.to_string(),
            casino_id:   casino_id.to_string(),
            spins,
            total_wager,
            total_payout,
            session_rtp: rtp(total_payout, total_wager),
            is_active:   true,
            created_at:  now,
            updated_at:  now,
        }
    }

    pub fn spin_count(&self) -> usize { self.spins.len() }

    pub fn window_start(&self) -> Option<i64> { self.spins.first().map(|s| s.timestamp) }
    pub fn window_end(&self)   -> Option<i64> { self.spins.last().map(|s| s.timestamp) }
}

// ── Session store ─────────────────────────────────────────────────────────────

pub struct SessionStore {
    sessions: DashMap<String, Arc<RwLock<SessionWindow>>>,

    pub total_spins:    AtomicU64,
    pub total_sessions: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions:       DashMap::new(),
            total_spins:    AtomicU64::new(0),
            total_sessions: AtomicU64::new(0),
        }
    }

    /// Create-or-append. Returns the number of spins recorded since the
    /// session was last analyzed.
    pub fn record(&self, spin: SpinResult, window_size: usize) -> usize {
        self.total_spins.fetch_add(1, Ordering::Relaxed);

        let key = spin.session_key();
        let window = self.sessions
            .entry(key)
            .or_insert_with(|| {
                self.total_sessions.fetch_add(1, Ordering::Relaxed);
                debug!(session = %spin.session_key(), "new session");
                Arc::new(RwLock::new(SessionWindow::new(&spin, window_size, Utc::now())))
            })
            .clone();

        let mut w = window.write();
        w.ingest(spin, window_size);
        w.since_analysis
    }

    pub fn get_window(&self, key: &str) -> Option<Arc<RwLock<SessionWindow>>> {
        self.sessions.get(key).map(|w| w.clone())
    }

    /// Snapshot fitted to `window_size`. A session still holding more spins
    /// than the current window size is trimmed before it is read.
    pub fn snapshot(&self, key: &str, window_size: usize) -> Option<WindowSnapshot> {
        let window = self.get_window(key)?;
        let mut w = window.write();
        w.fit(window_size);
        Some(w.snapshot())
    }

    /// Like `snapshot`, and resets the auto-analysis counter under the same
    /// lock when the window holds at least `min_spins`.
    pub fn snapshot_for_analysis(
        &self,
        key:         &str,
        window_size: usize,
        min_spins:   usize,
    ) -> Option<WindowSnapshot> {
        let window = self.get_window(key)?;
        let mut w = window.write();
        w.fit(window_size);
        if w.spins.len() >= min_spins {
            w.since_analysis = 0;
        }
        Some(w.snapshot())
    }

    /// Returns false for an unknown key.
    pub fn set_active(&self, key: &str, active: bool) -> bool {
        match self.get_window(key) {
            Some(w) => {
                let mut w = w.write();
                w.is_active  = active;
                w.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.sessions.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.sessions.clear();
    }

    pub fn len(&self) -> usize { self.sessions.len() }
    pub fn is_empty(&self) -> bool { self.sessions.is_empty() }

    pub fn keys(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Sessions with no spin recorded for at least `idle`.
    pub fn idle_keys(&self, idle: Duration) -> Vec<String> {
        let cutoff = Utc::now() - idle;
        self.sessions.iter()
            .filter(|e| e.value().read().updated_at < cutoff)
            .map(|e| e.key().clone())
            .collect()
    }
}

impl Default for SessionStore { fn default() -> Self { Self::new() } }
