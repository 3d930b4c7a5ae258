//! Autonomous host agent.
//!
//! Keeps 2-5 arenas open by watching demand: every cycle it classifies the
//! moment (peak hours, weekend), reads fill rates per tier from the store,
//! picks a tier weighted toward what has been filling, and decides whether
//! to spawn a tournament. Tiers that keep failing to fill get benched for a
//! couple of cycles.

use crate::{
    domain::{
        arenas::{ArenaConfig, CreatedBy, GameType, Network, Orchestrator},
        scheduler::{Scheduler, TimerKey},
        Error,
    },
    infra::{clock::Clock, store::ArenaStore},
};
use anyhow::anyhow;
use arena_core::{Address, PayoutScheme, U256};
use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use time::{Duration, OffsetDateTime, Weekday};

const PEAK_START_HOUR: u8 = 14;
const PEAK_END_HOUR: u8 = 23;

/// Default registration window the agent gives its arenas.
const REGISTRATION_WINDOW_MINUTES: i64 = 15;

/// Fill rate assumed for a tier with no history yet.
const DEFAULT_FILL_RATE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Micro,
    Small,
    Medium,
    Large,
    Whale,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Micro,
        Tier::Small,
        Tier::Medium,
        Tier::Large,
        Tier::Whale,
    ];

    /// Entry fee bounds in the chain's smallest unit.
    pub fn entry_fee_range(&self) -> (u128, u128) {
        match self {
            Tier::Micro => (1_000_000_000_000_000, 10_000_000_000_000_000),
            Tier::Small => (10_000_000_000_000_000, 100_000_000_000_000_000),
            Tier::Medium => (100_000_000_000_000_000, 1_000_000_000_000_000_000),
            Tier::Large => (1_000_000_000_000_000_000, 10_000_000_000_000_000_000),
            Tier::Whale => (
                10_000_000_000_000_000_000,
                30_000_000_000_000_000_000,
            ),
        }
    }

    pub fn player_counts(&self) -> &'static [u32] {
        match self {
            Tier::Micro | Tier::Small => &[4, 8, 16],
            Tier::Medium | Tier::Large => &[4, 8],
            Tier::Whale => &[4],
        }
    }

    pub fn protocol_fee_bps(&self) -> u16 {
        match self {
            Tier::Micro => 200,
            Tier::Small | Tier::Medium => 250,
            Tier::Large | Tier::Whale => 300,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Micro => "MICRO",
            Tier::Small => "SMALL",
            Tier::Medium => "MEDIUM",
            Tier::Large => "LARGE",
            Tier::Whale => "WHALE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub enabled: bool,
    pub creation_interval: std::time::Duration,
    pub min_active: u32,
    pub max_active: u32,
    pub confidence_threshold: f64,
    /// Trailing window for fill-rate statistics.
    pub fill_window: Duration,
    /// Consecutive failed fills before a tier is benched.
    pub fail_threshold: usize,
    /// Cycles a benched tier sits out.
    pub pause_cycles: u32,
    pub retry_attempts: u32,
    pub retry_spacing: std::time::Duration,
    pub network: Network,
    pub treasury: Address,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            creation_interval: std::time::Duration::from_secs(30 * 60),
            min_active: 2,
            max_active: 5,
            confidence_threshold: 0.7,
            fill_window: Duration::hours(24),
            fail_threshold: 3,
            pause_cycles: 2,
            retry_attempts: 3,
            retry_spacing: std::time::Duration::from_secs(60),
            network: Network::Testnet,
            treasury: Address::ZERO,
        }
    }
}

struct MarketSnapshot {
    active_count: u32,
    peak: bool,
    weekend: bool,
    fill_rates: HashMap<Tier, Option<f64>>,
}

pub struct HostAgent {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn ArenaStore>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<Scheduler>,
    settings: AgentSettings,
    /// Benched tiers and how many cycles they have left on the bench.
    paused: Mutex<HashMap<Tier, u32>>,
}

impl HostAgent {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        store: Arc<dyn ArenaStore>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<Scheduler>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            orchestrator,
            store,
            clock,
            scheduler,
            settings,
            paused: Mutex::new(HashMap::new()),
        }
    }

    /// Arm the first cycle. Subsequent cycles self-schedule.
    pub fn start(&self) {
        self.scheduler
            .schedule(TimerKey::AgentCycle, self.clock.now());
        info!(
            "Host agent armed (interval {:?}, target {}..{} open arenas)",
            self.settings.creation_interval, self.settings.min_active, self.settings.max_active
        );
    }

    /// One demand-analysis cycle.
    pub async fn run_cycle(&self) -> Result<(), anyhow::Error> {
        let now = self.clock.now();
        // Re-arm first so a failed cycle never stalls the agent.
        let interval = Duration::try_from(self.settings.creation_interval)
            .unwrap_or_else(|_| Duration::minutes(30));
        self.scheduler.schedule(TimerKey::AgentCycle, now + interval);

        self.tick_pauses();
        self.bench_failing_tiers().await;

        let snapshot = self.read_market(now).await?;
        debug!(
            "Agent cycle: {} open, peak={}, weekend={}",
            snapshot.active_count, snapshot.peak, snapshot.weekend
        );

        let eligible = self.eligible_tiers(&snapshot);
        if eligible.is_empty() {
            debug!("Agent cycle: no eligible tiers this cycle");
            return Ok(());
        }

        let mut rng = cycle_rng(now);
        let tier = weighted_pick(&eligible, &snapshot.fill_rates, &mut rng);
        let confidence = snapshot
            .fill_rates
            .get(&tier)
            .copied()
            .flatten()
            .unwrap_or(DEFAULT_FILL_RATE);

        let decision = if snapshot.active_count < self.settings.min_active {
            Some("open arena count below minimum")
        } else if snapshot.peak && snapshot.active_count < self.settings.max_active - 1 {
            Some("peak hours with capacity to spare")
        } else if confidence >= self.settings.confidence_threshold
            && snapshot.active_count < self.settings.max_active
        {
            Some("tier has been filling reliably")
        } else {
            None
        };

        match decision {
            Some(reason) => {
                let config = self.sample_config(tier, reason, now, &mut rng);
                self.create_with_retries(config).await
            }
            None => {
                debug!(
                    "Agent cycle: holding ({} open, {} confidence {:.2})",
                    snapshot.active_count,
                    tier.label(),
                    confidence
                );
                Ok(())
            }
        }
    }

    async fn read_market(&self, now: OffsetDateTime) -> Result<MarketSnapshot, anyhow::Error> {
        let open = self.store.list_open().await?;
        let since = now - self.settings.fill_window;

        let mut fill_rates = HashMap::new();
        for tier in Tier::ALL {
            let stats = self.store.agent_fill_stats(tier, since).await?;
            fill_rates.insert(tier, stats.fill_rate());
        }

        let hour = now.hour();
        Ok(MarketSnapshot {
            active_count: open.len() as u32,
            peak: (PEAK_START_HOUR..PEAK_END_HOUR).contains(&hour),
            weekend: matches!(now.weekday(), Weekday::Saturday | Weekday::Sunday),
            fill_rates,
        })
    }

    fn eligible_tiers(&self, snapshot: &MarketSnapshot) -> Vec<Tier> {
        let paused = self.paused.lock().expect("agent pause lock");
        let rate = |tier: Tier| {
            snapshot
                .fill_rates
                .get(&tier)
                .copied()
                .flatten()
                .unwrap_or(0.0)
        };

        Tier::ALL
            .into_iter()
            .filter(|tier| !paused.contains_key(tier))
            .filter(|tier| match tier {
                Tier::Micro | Tier::Small => true,
                Tier::Medium => snapshot.peak,
                Tier::Large => snapshot.peak && rate(Tier::Small) >= 0.5,
                Tier::Whale => snapshot.weekend && snapshot.peak && rate(Tier::Large) >= 0.7,
            })
            .collect()
    }

    fn tick_pauses(&self) {
        let mut paused = self.paused.lock().expect("agent pause lock");
        paused.retain(|tier, remaining| {
            *remaining -= 1;
            if *remaining == 0 {
                info!("Tier {} back in rotation", tier.label());
                false
            } else {
                true
            }
        });
    }

    /// Bench any tier whose last three agent arenas all failed to fill.
    async fn bench_failing_tiers(&self) {
        for tier in Tier::ALL {
            let outcomes = match self
                .store
                .recent_agent_outcomes(tier, self.settings.fail_threshold)
                .await
            {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    warn!("Could not read outcomes for tier {}: {}", tier.label(), e);
                    continue;
                }
            };
            if outcomes.len() == self.settings.fail_threshold
                && outcomes.iter().all(|filled| !filled)
            {
                let mut paused = self.paused.lock().expect("agent pause lock");
                if !paused.contains_key(&tier) {
                    warn!(
                        "Tier {} benched for {} cycles after {} straight failed fills",
                        tier.label(),
                        self.settings.pause_cycles,
                        self.settings.fail_threshold
                    );
                    // +1 because the pause ticks down at the top of the next
                    // cycle before eligibility is checked.
                    paused.insert(tier, self.settings.pause_cycles + 1);
                }
            }
        }
    }

    fn sample_config(
        &self,
        tier: Tier,
        reason: &str,
        now: OffsetDateTime,
        rng: &mut ChaCha20Rng,
    ) -> ArenaConfig {
        let (low, high) = tier.entry_fee_range();
        let entry_fee = U256::from(rng.random_range(low..=high));
        let counts = tier.player_counts();
        let max_players = counts[rng.random_range(0..counts.len())];
        let game_type = match rng.random_range(0..4) {
            0 => GameType::Claw,
            1 => GameType::Prediction,
            2 => GameType::Speed,
            _ => GameType::Blackjack,
        };

        ArenaConfig {
            name: flair_name(tier, rng),
            entry_fee,
            max_players,
            protocol_fee_bps: tier.protocol_fee_bps(),
            treasury: self.settings.treasury,
            registration_deadline: Some(now + Duration::minutes(REGISTRATION_WINDOW_MINUTES)),
            game_type,
            network: self.settings.network,
            created_by: CreatedBy::Agent,
            creation_reason: Some(format!("{} ({} tier)", reason, tier.label())),
            payout_scheme: PayoutScheme::EqualSplit,
            tier: Some(tier),
        }
    }

    async fn create_with_retries(&self, config: ArenaConfig) -> Result<(), anyhow::Error> {
        let mut last_error: Option<Error> = None;
        for attempt in 1..=self.settings.retry_attempts {
            match self.orchestrator.create_arena(config.clone(), None).await {
                Ok(arena) => {
                    info!(
                        "Agent spawned arena {} \"{}\": {}",
                        arena.address,
                        arena.config.name,
                        arena
                            .config
                            .creation_reason
                            .as_deref()
                            .unwrap_or("no reason recorded")
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Agent arena creation failed (attempt {}/{}): {}",
                        attempt, self.settings.retry_attempts, e
                    );
                    last_error = Some(e);
                    if attempt < self.settings.retry_attempts {
                        tokio::time::sleep(self.settings.retry_spacing).await;
                    }
                }
            }
        }
        Err(anyhow!(
            "agent arena creation exhausted {} attempts: {}",
            self.settings.retry_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        ))
    }
}

/// Per-cycle deterministic RNG: seeded from the cycle instant so tests on a
/// virtual clock replay exactly.
fn cycle_rng(now: OffsetDateTime) -> ChaCha20Rng {
    let mut hasher = Sha256::new();
    hasher.update(b"agent-cycle");
    hasher.update(now.unix_timestamp_nanos().to_be_bytes());
    ChaCha20Rng::from_seed(hasher.finalize().into())
}

fn weighted_pick(
    eligible: &[Tier],
    fill_rates: &HashMap<Tier, Option<f64>>,
    rng: &mut ChaCha20Rng,
) -> Tier {
    let weights: Vec<f64> = eligible
        .iter()
        .map(|tier| {
            let rate = fill_rates
                .get(tier)
                .copied()
                .flatten()
                .unwrap_or(DEFAULT_FILL_RATE);
            1.0 + 2.0 * rate
        })
        .collect();
    let total: f64 = weights.iter().sum();
    let mut roll = rng.random_range(0.0..total);
    for (tier, weight) in eligible.iter().zip(weights.iter()) {
        if roll < *weight {
            return *tier;
        }
        roll -= weight;
    }
    eligible[eligible.len() - 1]
}

fn flair_name(tier: Tier, rng: &mut ChaCha20Rng) -> String {
    const MOODS: [&str; 8] = [
        "Neon", "Midnight", "Turbo", "Golden", "Savage", "Electric", "Cosmic", "Rogue",
    ];
    const EVENTS: [&str; 8] = [
        "Rumble", "Showdown", "Gauntlet", "Clash", "Scramble", "Royale", "Frenzy", "Derby",
    ];
    let mood = MOODS[rng.random_range(0..MOODS.len())];
    let event = EVENTS[rng.random_range(0..EVENTS.len())];
    format!("{} {} {}", mood, tier.label(), event)
}
