use crate::domain::{
    agent::AgentSettings,
    arenas::{Network, OrchestratorSettings},
    signer::SignerSettings,
};
use anyhow::anyhow;
use arena_core::{Address, PayoutScheme};
use clap::Parser;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};
use time::{format_description::well_known::Iso8601, Duration, OffsetDateTime};

// Lifecycle constants. These are part of the product contract, not tuning
// knobs: the escrow UI and the game clients count on them.
pub const COUNTDOWN_SECONDS: u64 = 10;
pub const LEARNING_SECONDS: u64 = 60;
pub const IDLE_REAP_SECONDS: u64 = 20;
pub const SCHEDULER_TICK_MS: u64 = 1_000;
pub const MOVE_TIMEOUT_DEFAULT_MS: u64 = 10_000;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a Settings.toml file holding configuration options
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level to run with the service (default: info)
    #[arg(short, long)]
    pub level: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Settings {
    pub level: Option<String>,
    pub orchestrator: OrchestratorConfig,
    pub agent: AgentConfig,
    pub signer: SignerConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub network: String,
    /// Protocol treasury address payouts deduct their fee toward.
    pub treasury: String,
    /// Ask the chain adapter to confirm entry fees before accepting joins.
    pub verify_onchain_join: bool,
    pub payout_scheme: String,
    pub scheduler_tick_ms: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            network: "testnet".to_string(),
            treasury: Address::ZERO.to_string(),
            verify_onchain_join: false,
            payout_scheme: "equal_split".to_string(),
            scheduler_tick_ms: SCHEDULER_TICK_MS,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    pub enabled: bool,
    pub creation_interval_secs: u64,
    pub min_active: u32,
    pub max_active: u32,
    pub retry_attempts: u32,
    pub retry_spacing_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            creation_interval_secs: 30 * 60,
            min_active: 2,
            max_active: 5,
            retry_attempts: 3,
            retry_spacing_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Hex-encoded operator key file for the in-process signer. Absent in
    /// production, where signing happens in the external service.
    pub operator_key_file: Option<String>,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            operator_key_file: None,
            max_attempts: 4,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
        }
    }
}

impl Settings {
    pub fn network(&self) -> Result<Network, anyhow::Error> {
        match self.orchestrator.network.as_str() {
            "testnet" => Ok(Network::Testnet),
            "mainnet" => Ok(Network::Mainnet),
            other => Err(anyhow!("unknown network: {}", other)),
        }
    }

    pub fn treasury(&self) -> Result<Address, anyhow::Error> {
        self.orchestrator
            .treasury
            .parse()
            .map_err(|e| anyhow!("invalid treasury address: {}", e))
    }

    pub fn payout_scheme(&self) -> Result<PayoutScheme, anyhow::Error> {
        match self.orchestrator.payout_scheme.as_str() {
            "equal_split" => Ok(PayoutScheme::EqualSplit),
            "rank_weighted" => Ok(PayoutScheme::RankWeighted),
            other => Err(anyhow!("unknown payout scheme: {}", other)),
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            countdown: Duration::seconds(COUNTDOWN_SECONDS as i64),
            learning: Duration::seconds(LEARNING_SECONDS as i64),
            idle_reap: Duration::seconds(IDLE_REAP_SECONDS as i64),
            verify_onchain_join: self.orchestrator.verify_onchain_join,
            agent_nudge: self.agent.enabled,
            ..OrchestratorSettings::default()
        }
    }

    pub fn agent_settings(&self) -> Result<AgentSettings, anyhow::Error> {
        Ok(AgentSettings {
            enabled: self.agent.enabled,
            creation_interval: std::time::Duration::from_secs(self.agent.creation_interval_secs),
            min_active: self.agent.min_active,
            max_active: self.agent.max_active,
            retry_attempts: self.agent.retry_attempts,
            retry_spacing: std::time::Duration::from_secs(self.agent.retry_spacing_secs),
            network: self.network()?,
            treasury: self.treasury()?,
            ..AgentSettings::default()
        })
    }

    pub fn signer_settings(&self) -> SignerSettings {
        SignerSettings {
            max_attempts: self.signer.max_attempts,
            backoff_base: std::time::Duration::from_millis(self.signer.backoff_base_ms),
            backoff_cap: std::time::Duration::from_millis(self.signer.backoff_cap_ms),
        }
    }
}

pub fn get_settings() -> Result<Settings, anyhow::Error> {
    let cli = Cli::parse();
    settings_from(cli.config.as_deref(), cli.level)
}

fn settings_from(path: Option<&str>, level: Option<String>) -> Result<Settings, anyhow::Error> {
    let path = path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./config/local.toml"));

    let mut settings = if path.exists() {
        let raw = fs::read_to_string(&path)
            .map_err(|e| anyhow!("failed to read config {}: {}", path.display(), e))?;
        toml::from_str(&raw)
            .map_err(|e| anyhow!("failed to parse config {}: {}", path.display(), e))?
    } else {
        Settings::default()
    };

    if level.is_some() {
        settings.level = level;
    }
    Ok(settings)
}

pub fn setup_logger(
    level: Option<String>,
    filter_targets: Vec<String>,
) -> Result<(), fern::InitError> {
    let rust_log = get_log_level(level);
    let colors = ColoredLevelConfig::new()
        .trace(Color::White)
        .debug(Color::Cyan)
        .info(Color::Blue)
        .warn(Color::Yellow)
        .error(Color::Magenta);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}: {}",
                OffsetDateTime::now_utc()
                    .format(&Iso8601::DEFAULT)
                    .unwrap_or_default(),
                colors.color(record.level()),
                record.target(),
                message
            ));
        })
        .level(rust_log)
        .filter(move |metadata| {
            !filter_targets
                .iter()
                .any(|filter| metadata.target().starts_with(filter))
        })
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

pub fn get_log_level(level: Option<String>) -> LevelFilter {
    let level = level.unwrap_or_else(|| env::var("RUST_LOG").unwrap_or_default());
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}
