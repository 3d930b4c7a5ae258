pub mod config;
pub mod domain;
pub mod infra;
pub mod startup;

pub use config::*;
pub use domain::{
    agent::{AgentSettings, HostAgent, Tier},
    arenas::{
        Arena, ArenaCommand, ArenaConfig, ArenaRuntime, ArenaState, CreatedBy, GameStatus,
        GameType, Network, Orchestrator, OrchestratorSettings,
    },
    games::{Challenge, Game, GamePhase, Move, MoveResult},
    scheduler::{Scheduler, TimerEvent, TimerKey, TimerKind},
    signer::{FinalizeSigner, SignerSettings},
    Error as OrchestratorError,
};
pub use infra::chain::{ChainAdapter, FinalizationReceipt, MockChainClient};
pub use infra::clock::{Clock, SystemClock, VirtualClock};
pub use infra::signing::{FlakySigner, LocalSigner, SigningService};
pub use infra::store::{
    ArenaStore, LeaderboardDelta, MemoryStore, PayoutRecord, RefundIntent, StoreError,
};
pub use startup::*;
