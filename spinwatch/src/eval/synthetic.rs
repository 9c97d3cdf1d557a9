// spinwatch/src/eval/synthetic.rs
//
// Seeded synthetic session generator for the eval harness.
//
// Every profile plays an even-money-style game (wins pay 2x the wager) so a
// fair session sits at 96% RTP with a 48% win rate:
//   fair       48% wins throughout
//   pumped     75% wins throughout (RTP ~150%)
//   clustered  30% wins with one forced 15-win streak (RTP near baseline)
//   drifting   25% wins in the first half, 71% in the second (mean ~96%)

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

use super::LabeledSpin;
use crate::events::{AnomalyType, SpinResult};

const WIN_MULTIPLIER: f64 = 2.0;
const STREAK_LEN:     usize = 15;
const BASE_TS_MS:     i64 = 1_700_000_000_000;
const SPIN_GAP_MS:    i64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionProfile {
    Fair,
    Pumped,
    Clustered,
    Drifting,
}

impl SessionProfile {
    pub const ALL: [SessionProfile; 4] = [Self::Fair, Self::Pumped, Self::Clustered, Self::Drifting];

    fn name(self) -> &'static str {
        match self {
            Self::Fair      => "fair",
            Self::Pumped    => "pumped",
            Self::Clustered => "clustered",
            Self::Drifting  => "drifting",
        }
    }

    pub fn labels(self) -> Vec<AnomalyType> {
        match self {
            Self::Fair      => vec![],
            Self::Pumped    => vec![AnomalyType::RtpPump],
            Self::Clustered => vec![AnomalyType::WinClustering],
            Self::Drifting  => vec![AnomalyType::RtpDrift],
        }
    }

    fn outcomes(self, n: usize, rng: &mut Pcg64Mcg) -> Vec<bool> {
        match self {
            Self::Fair   => (0..n).map(|_| rng.gen_bool(0.48)).collect(),
            Self::Pumped => (0..n).map(|_| rng.gen_bool(0.75)).collect(),
            Self::Clustered => {
                let mut out: Vec<bool> = (0..n).map(|_| rng.gen_bool(0.30)).collect();
                if n > STREAK_LEN {
                    let start = rng.gen_range(0..=n - STREAK_LEN);
                    out[start..start + STREAK_LEN].iter_mut().for_each(|w| *w = true);
                }
                out
            }
            Self::Drifting => (0..n)
                .map(|i| rng.gen_bool(if i < n / 2 { 0.25 } else { 0.71 }))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub sessions_per_profile: usize,
    pub spins_per_session:    usize,
    pub wager:                f64,
    pub seed:                 u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            sessions_per_profile: 25,
            spins_per_session:    50,
            wager:                1.0,
            seed:                 0x5917_7a7c,
        }
    }
}

/// Labeled spins for every profile, session by session, in timestamp order
/// within each session. Same seed, same dataset.
pub fn generate(cfg: &SyntheticConfig) -> Vec<LabeledSpin> {
    let mut rng = Pcg64Mcg::seed_from_u64(cfg.seed);
    let mut out = Vec::with_capacity(4 * cfg.sessions_per_profile * cfg.spins_per_session);

    for profile in SessionProfile::ALL {
        let labels = profile.labels();
        for n in 0..cfg.sessions_per_profile {
            let user_id = format!("synth-{}-{}", profile.name(), n);
            for (i, won) in profile.outcomes(cfg.spins_per_session, &mut rng).into_iter().enumerate() {
                out.push(LabeledSpin {
                    spin: SpinResult {
                        spin_id:   format!("{}-{}", user_id, i),
                        user_id:   user_id.clone(),
                        casino_id: "casino-synth".to_string(),
                        game_id:   "slots".to_string(),
                        wager:     cfg.wager,
                        payout:    if won { cfg.wager * WIN_MULTIPLIER } else { 0.0 },
                        timestamp: BASE_TS_MS + SPIN_GAP_MS * i as i64,
                    },
                    labels: labels.clone(),
                });
            }
        }
    }
    out
}
