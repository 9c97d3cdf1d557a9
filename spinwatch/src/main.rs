// spinwatch/src/main.rs
//
// Spinwatch: session-windowed casino spin anomaly detection.
//
// Four operational modes:
//   tail    follow a JSONL spin feed (one SpinResult per line)
//   replay  replay a captured feed at scaled speed
//   eval    score the detectors against a labeled dataset
//   synth   write a labeled synthetic dataset for eval
//
// Usage:
//   spinwatch --mode tail   --path /var/log/casino/spins.jsonl
//   spinwatch --mode replay --path captured.jsonl --speed 10.0
//   spinwatch --mode synth  --path labeled.jsonl --sessions 50 --seed 7
//   spinwatch --mode eval   --path labeled.jsonl --json

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use spinwatch::eval::{self, synthetic::SyntheticConfig, Evaluator};
use spinwatch::output::{OutputConfig, QueuedPublisher};
use spinwatch::{AnalysisReport, DetectorConfig, RiskTier, SpinAnalyzer, SpinResult};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "spinwatch",
    about   = "Session-windowed casino spin anomaly detection",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "tail")]
    mode: Mode,

    #[arg(long, default_value = "/tmp/spinwatch_feed.jsonl",
          help = "JSONL spin feed (tail/replay), labeled dataset (eval/synth)")]
    path: PathBuf,

    #[arg(long, default_value = "1.0", help = "Replay speed multiplier")]
    speed: f64,

    #[arg(long, default_value = "/tmp/spinwatch_output",
          help = "Anomaly event output directory")]
    output: PathBuf,

    #[arg(long, help = "Detector config JSON file")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "10", help = "Analyze a session every N spins (0 disables)")]
    analyze_every: usize,

    #[arg(long, default_value = "900", help = "End sessions idle this many seconds (0 disables)")]
    idle_secs: u64,

    #[arg(long, help = "Publish compact mobile summaries instead of full reports")]
    mobile: bool,

    #[arg(long, default_value = "25", help = "Sessions per profile (synth mode)")]
    sessions: usize,

    #[arg(long, default_value = "50", help = "Spins per session (synth mode)")]
    spins: usize,

    #[arg(long, help = "RNG seed (synth mode)")]
    seed: Option<u64>,

    #[arg(long, help = "Print the eval report as JSON")]
    json: bool,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Tail,    // follow a live JSONL feed
    Replay,  // replay a static JSONL file at scaled speed
    Eval,    // labeled dataset → per-detector precision/recall
    Synth,   // write a labeled synthetic dataset
}

fn load_config(cli: &Cli) -> Result<DetectorConfig> {
    let mut cfg = match &cli.config {
        Some(path) => DetectorConfig::from_json_file(path)?,
        None       => DetectorConfig::default(),
    };
    cfg.auto_publish       = true;
    cfg.auto_analyze_every = cli.analyze_every;
    cfg.mobile_optimized  |= cli.mobile;
    cfg.validate()?;
    Ok(cfg)
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

struct Pipeline {
    analyzer: Arc<SpinAnalyzer>,
    output:   Arc<QueuedPublisher>,
}

impl Pipeline {
    fn new(config: DetectorConfig, output_dir: PathBuf) -> Result<Self> {
        let output = QueuedPublisher::new(OutputConfig { output_dir, ..Default::default() });
        let analyzer = SpinAnalyzer::with_publisher(config, output.clone())?;
        Ok(Self { analyzer: Arc::new(analyzer), output })
    }

    fn process(&self, spin: SpinResult) {
        match self.analyzer.record_spin(spin) {
            Ok(Some(report)) if report.any_detected() => print_alert(&report),
            Ok(_)  => {}
            Err(e) => warn!("Rejected spin: {}", e),
        }
    }

    /// End every open session once the source is exhausted.
    fn finish(&self) {
        let keys = self.analyzer.session_keys();
        for key in &keys {
            if let Some(report) = self.analyzer.end_session(key) {
                if report.any_detected() { print_alert(&report); }
            }
        }
        info!("Ended {} sessions at end of input", keys.len());
    }
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn print_banner() {
    println!("\x1b[1m");
    println!("  spinwatch v{}", env!("CARGO_PKG_VERSION"));
    println!("\x1b[0m");
    println!("  \x1b[90mRTP pump | win clustering | RTP drift\x1b[0m\n");
}

fn print_alert(report: &AnalysisReport) {
    let color = match report.risk_tier() {
        RiskTier::Critical => "\x1b[91;1m",
        RiskTier::High     => "\x1b[93;1m",
        RiskTier::Medium   => "\x1b[96m",
        RiskTier::Low      => "\x1b[92m",
    };
    let reset = "\x1b[0m";
    let fired = report.detectors().iter()
        .filter(|r| r.detected)
        .map(|r| format!("{}:{}", r.anomaly_type, r.severity))
        .collect::<Vec<_>>()
        .join(" | ");

    println!("\n{}{} score={}{}", color, report.risk_tier(), report.overall_risk_score, reset);
    println!("  Session : {}{}{}", color, report.session_key, reset);
    println!("  RTP     : {:.2}%  spins={}", report.session_rtp * 100.0, report.spin_count);
    println!("  Fired   : {}", fired);
    if let Some(first) = report.recommendations.first() {
        println!("  Advice  : \x1b[90m{}{}", first, reset);
    }
}

async fn print_stats_loop(pipeline: Arc<Pipeline>, start: Instant) {
    use std::sync::atomic::Ordering;
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        let elapsed  = start.elapsed().as_secs_f64();
        let spins    = pipeline.analyzer.total_spins();
        let (published, failed) = pipeline.analyzer.dispatcher()
            .map(|d| (d.published.load(Ordering::Relaxed), d.failed.load(Ordering::Relaxed)))
            .unwrap_or_default();
        println!(
            "\n\x1b[1m-- stats  uptime={:.0}s  spins={}  sps={:.1}  sessions={}/{}  alerts={}  failed={}  dropped={} --\x1b[0m",
            elapsed, spins, spins as f64 / elapsed,
            pipeline.analyzer.session_count(), pipeline.analyzer.total_sessions(), published, failed,
            pipeline.output.dropped.load(Ordering::Relaxed),
        );
    }
}

/// End and evict sessions that have gone quiet.
async fn idle_sweep_loop(analyzer: Arc<SpinAnalyzer>, idle_secs: u64) {
    let idle = chrono::Duration::seconds(idle_secs as i64);
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;
        let keys = analyzer.idle_sessions(idle);
        for key in &keys {
            if let Some(report) = analyzer.end_session(key) {
                if report.any_detected() { print_alert(&report); }
            }
            analyzer.clear_session(key);
        }
        if !keys.is_empty() {
            info!("Idle sweep ended {} sessions", keys.len());
        }
    }
}

// ── Spin sources ──────────────────────────────────────────────────────────────

async fn tail_jsonl(path: PathBuf, tx: mpsc::Sender<SpinResult>, seek_end: bool) -> Result<()> {
    let file   = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();

    if seek_end {
        while lines.next_line().await?.is_some() {}  // consume existing
    }

    info!("Tailing {}", path.display());
    loop {
        match lines.next_line().await? {
            Some(line) => {
                let line = line.trim().to_string();
                if line.is_empty() { continue; }
                match serde_json::from_str::<SpinResult>(&line) {
                    Ok(s)  => { if tx.send(s).await.is_err() { break; } }
                    Err(e) => warn!("Parse error: {}", e),
                }
            }
            None => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
        }
    }
    Ok(())
}

async fn replay_jsonl(path: PathBuf, tx: mpsc::Sender<SpinResult>, speed: f64) -> Result<()> {
    let content = tokio::fs::read_to_string(&path).await?;
    let mut spins: Vec<SpinResult> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() { continue; }
        match serde_json::from_str::<SpinResult>(line) {
            Ok(s)  => spins.push(s),
            Err(e) => warn!("Parse error: {}", e),
        }
    }

    if spins.is_empty() { return Ok(()); }
    spins.sort_by_key(|s| s.timestamp);

    let base_ts   = spins[0].timestamp;
    let base_wall = Instant::now();

    for spin in spins {
        // Offsets too large to represent are sent without waiting.
        if let Some(target) = replay_delay(spin.timestamp - base_ts, speed)
            .and_then(|d| base_wall.checked_add(d))
        {
            let now = Instant::now();
            if target > now {
                tokio::time::sleep(target - now).await;
            }
        }
        if tx.send(spin).await.is_err() { break; }
    }
    info!("Replay finished");
    Ok(())
}

fn check_replay_speed(speed: f64) -> Result<()> {
    if !(speed.is_finite() && speed > 0.0) {
        anyhow::bail!("--speed must be a positive number, got {}", speed);
    }
    Ok(())
}

/// Wall-clock offset of a spin `delta_ms` after the first one at `speed`x.
fn replay_delay(delta_ms: i64, speed: f64) -> Option<Duration> {
    if !(speed.is_finite() && speed > 0.0) || delta_ms < 0 {
        return None;
    }
    Duration::try_from_secs_f64(delta_ms as f64 / speed / 1000.0).ok()
}

// ── Offline modes ─────────────────────────────────────────────────────────────

async fn run_synth(cli: &Cli) -> Result<()> {
    let mut cfg = SyntheticConfig {
        sessions_per_profile: cli.sessions,
        spins_per_session:    cli.spins,
        ..Default::default()
    };
    if let Some(seed) = cli.seed { cfg.seed = seed; }

    let data = eval::synthetic::generate(&cfg);
    let mut buf = String::new();
    for spin in &data {
        buf.push_str(&serde_json::to_string(spin)?);
        buf.push('\n');
    }
    let mut file = tokio::fs::File::create(&cli.path).await?;
    file.write_all(buf.as_bytes()).await?;
    file.flush().await?;
    info!("Wrote {} labeled spins to {}", data.len(), cli.path.display());
    Ok(())
}

async fn run_eval(cli: &Cli) -> Result<()> {
    let cfg = match &cli.config {
        Some(path) => DetectorConfig::from_json_file(path)?,
        None       => DetectorConfig::default(),
    };
    let result = Evaluator::new(cfg).run_dataset(&cli.path).await?;
    if cli.json {
        println!("{}", eval::report::to_json(&result));
    } else {
        eval::report::print_markdown(&result);
    }
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("spinwatch=info".parse()?))
        .compact().init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Synth => return run_synth(&cli).await,
        Mode::Eval  => return run_eval(&cli).await,
        Mode::Tail | Mode::Replay => {}
    }
    if matches!(cli.mode, Mode::Replay) {
        check_replay_speed(cli.speed)?;
    }

    let pipeline = Arc::new(Pipeline::new(load_config(&cli)?, cli.output.clone())?);
    let start    = Instant::now();
    let (tx, mut rx) = mpsc::channel::<SpinResult>(16384);

    print_banner();

    tokio::spawn(print_stats_loop(Arc::clone(&pipeline), start));
    tokio::spawn(Arc::clone(&pipeline.output).flush_loop());
    if cli.idle_secs > 0 {
        tokio::spawn(idle_sweep_loop(Arc::clone(&pipeline.analyzer), cli.idle_secs));
    }

    let path = cli.path.clone();
    if matches!(cli.mode, Mode::Tail) {
        println!("  Mode: \x1b[96mTAIL\x1b[0m  |  {}", cli.path.display());
        println!("  Output: \x1b[90m{}\x1b[0m\n", cli.output.display());
        tokio::spawn(async move {
            if let Err(e) = tail_jsonl(path, tx, true).await { error!("Tail failed: {}", e); }
        });
    } else {
        println!("  Mode: \x1b[93mREPLAY\x1b[0m  |  {}  speed={:.1}x", cli.path.display(), cli.speed);
        println!("  Output: \x1b[90m{}\x1b[0m\n", cli.output.display());
        let speed = cli.speed;
        tokio::spawn(async move {
            if let Err(e) = replay_jsonl(path, tx, speed).await { error!("Replay failed: {}", e); }
        });
    }

    println!("  Press Ctrl+C to stop.\n");

    // Single consumer keeps each session's spins in arrival order.
    while let Some(spin) = rx.recv().await {
        pipeline.process(spin);
    }

    // Source closed (replay done): close out sessions, then flush.
    pipeline.finish();
    if let Err(e) = pipeline.output.flush_once().await {
        error!("Final flush failed: {}", e);
    }
    Ok(())
}
