// spinwatch/src/lib.rs
//
// Session-windowed anomaly detection over casino spin results: RTP pumping,
// implausible win clustering and mid-session RTP drift.

pub mod config;
pub mod engine;
pub mod error;
pub mod eval;
pub mod events;
pub mod mobile;
pub mod output;
pub mod state;
pub mod workers;

pub use config::{ConfigUpdate, DetectorConfig};
pub use engine::analyzer::SpinAnalyzer;
pub use engine::dispatcher::{EventPublisher, ANOMALY_DETECTED};
pub use error::{SpinwatchError, SpinwatchResult};
pub use events::{
    AnalysisReport, AnomalyResult, AnomalyType, MinimalPayload, MobileAnomalySummary, RiskTier,
    Severity, SpinResult,
};
pub use mobile::{encode_compressed_spins, mobile_poll_interval, parse_compressed_spins};
pub use state::window::WindowSnapshot;
