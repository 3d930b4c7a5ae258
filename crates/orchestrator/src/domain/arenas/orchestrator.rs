//! Arena event handling.
//!
//! Every mutation of an arena flows through here: joins, timer firings, move
//! submissions, and the finalize chain. Handlers load the arena, run the
//! typestate transition, and write back through the store's CAS update;
//! a conflict reloads and re-runs the transition. Events for one arena are
//! serialized by its mailbox, so these handlers never see interleaved
//! updates from their own fleet.

use super::{
    states::{ArenaStatus, HasArenaData},
    Arena, ArenaConfig, ArenaError, ArenaState, GameResults,
};
use crate::{
    domain::{
        games::{Game, Move, MoveResult, RoundOutcome},
        scheduler::{Scheduler, TimerKey, TimerKind},
        signer::FinalizeSigner,
        Error,
    },
    infra::{
        chain::ChainAdapter,
        clock::Clock,
        store::{ArenaStore, LeaderboardDelta, PayoutRecord, RefundIntent, StoreError},
    },
};
use arena_core::{split_pool, Address, U256};
use log::{debug, error, info, warn};
use rand::Rng;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// Peak window for the next-tournament countdown, UTC hours.
const PEAK_START_HOUR: u8 = 14;
const PEAK_END_HOUR: u8 = 23;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub countdown: Duration,
    pub learning: Duration,
    pub idle_reap: Duration,
    /// Check the escrow before accepting a join.
    pub verify_onchain_join: bool,
    /// Schedule an agent cycle as soon as an arena reaches a terminal state.
    pub agent_nudge: bool,
    pub cas_max_attempts: u32,
    pub cas_backoff: std::time::Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            countdown: Duration::seconds(crate::config::COUNTDOWN_SECONDS as i64),
            learning: Duration::seconds(crate::config::LEARNING_SECONDS as i64),
            idle_reap: Duration::seconds(crate::config::IDLE_REAP_SECONDS as i64),
            verify_onchain_join: false,
            agent_nudge: true,
            cas_max_attempts: 5,
            cas_backoff: std::time::Duration::from_millis(500),
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn ArenaStore>,
    chain: Arc<dyn ChainAdapter>,
    signer: FinalizeSigner,
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
}

enum ReapOutcome {
    /// Enough players: go straight to the start countdown.
    Closed { skip_wait: bool },
    Cancelled { refund: Option<Address> },
    Stale,
}

enum AdvanceOutcome {
    NextRound(Option<OffsetDateTime>),
    Finished,
    Stale,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ArenaStore>,
        chain: Arc<dyn ChainAdapter>,
        signer: FinalizeSigner,
        scheduler: Arc<Scheduler>,
        clock: Arc<dyn Clock>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            chain,
            signer,
            scheduler,
            clock,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ArenaStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    fn key(address: Address, kind: TimerKind) -> TimerKey {
        TimerKey::Arena { address, kind }
    }

    /// Create an arena and arm its registration timers. `address` is the
    /// escrow address for chain arenas; off-chain arenas get a synthesized
    /// one.
    pub async fn create_arena(
        &self,
        config: ArenaConfig,
        address: Option<Address>,
    ) -> Result<Arena, Error> {
        config.validate()?;
        let now = self.clock.now();
        let address = address
            .unwrap_or_else(|| Address::synthesize(&config.name, now.unix_timestamp_nanos()));

        let arena = Arena::new(address, config, now);
        self.store.insert_arena(arena.clone()).await?;

        // An empty arena reaps itself if nobody shows up.
        self.scheduler
            .schedule(Self::key(address, TimerKind::IdleReap), now + self.settings.idle_reap);
        if let Some(deadline) = arena.config.registration_deadline {
            self.scheduler
                .schedule(Self::key(address, TimerKind::RegistrationDeadline), deadline);
        }

        info!(
            "Created arena {} \"{}\" ({}, {} players max, fee {})",
            address,
            arena.config.name,
            arena.config.game_type,
            arena.config.max_players,
            arena.config.entry_fee
        );
        Ok(arena)
    }

    /// Player join. Filling the arena closes it on the spot and starts the
    /// countdown; a first or second player re-arms the idle reap.
    pub async fn join(&self, address: Address, player: Address) -> Result<(), Error> {
        if self.settings.verify_onchain_join
            && !self.chain.has_player_joined_onchain(&address, &player).await?
        {
            return Err(Error::NotPaidIn(player));
        }

        let now = self.clock.now();
        let (count, full) = self
            .transform_arena(&address, |arena| {
                let mut created = match ArenaStatus::from(arena) {
                    ArenaStatus::Created(created) => created,
                    status => {
                        let arena = status.into_arena();
                        if arena.frozen {
                            return Err(Error::Frozen(address));
                        }
                        // Losing the race for the last seat reads as a full
                        // arena, not a closed one.
                        if arena.is_full() {
                            return Err(Error::ArenaFull(address));
                        }
                        return Err(Error::RegistrationClosed(address));
                    }
                };
                created.arena().can_join(&player, now)?;
                created.arena_mut().players.push(player);

                let count = created.arena().player_count();
                if created.arena().is_full() {
                    Ok((created.close(now).into_arena(), (count, true)))
                } else {
                    Ok((created.into_arena(), (count, false)))
                }
            })
            .await?;

        if full {
            // The countdown supersedes both registration timers.
            self.scheduler.cancel(&Self::key(address, TimerKind::IdleReap));
            self.scheduler
                .cancel(&Self::key(address, TimerKind::RegistrationDeadline));
            self.scheduler.schedule(
                Self::key(address, TimerKind::GameStartCountdown),
                now + self.settings.countdown,
            );
            info!("Arena {} filled, start countdown armed", address);
        } else if count <= 1 {
            self.scheduler
                .schedule(Self::key(address, TimerKind::IdleReap), now + self.settings.idle_reap);
        }

        debug!("Player {} joined arena {} ({} in)", player, address, count);
        Ok(())
    }

    /// Timer event dispatch; the scheduler's events land here via the
    /// arena's mailbox.
    pub async fn handle_timer(&self, address: Address, kind: TimerKind) -> Result<(), Error> {
        debug!("Timer {:?} fired for arena {}", kind, address);
        match kind {
            TimerKind::IdleReap | TimerKind::RegistrationDeadline => {
                self.reap(address, kind).await
            }
            TimerKind::GameStartCountdown => self.begin_learning(address).await,
            TimerKind::LearningEnd => self.activate(address).await,
            TimerKind::RoundDeadline => self.advance_round(address, false).await,
        }
    }

    /// Idle reap / registration deadline: not enough players cancels (with a
    /// refund intent for a sole paid player); two or more short-circuit to
    /// the countdown.
    async fn reap(&self, address: Address, kind: TimerKind) -> Result<(), Error> {
        let now = self.clock.now();
        let outcome = self
            .transform_arena(&address, |arena| {
                let created = match ArenaStatus::from(arena) {
                    ArenaStatus::Created(created) => created,
                    // The arena moved on; a stale reap is a no-op.
                    status => return Ok((status.into_arena(), ReapOutcome::Stale)),
                };

                let count = created.arena().player_count();
                if count >= super::MIN_PLAYERS {
                    let outcome = ReapOutcome::Closed {
                        skip_wait: kind == TimerKind::IdleReap,
                    };
                    Ok((created.close(now).into_arena(), outcome))
                } else {
                    let refund = created.arena().players.first().copied();
                    let reason = match kind {
                        TimerKind::IdleReap => "idle reap: not enough players",
                        _ => "registration deadline: not enough players",
                    };
                    let cancelled = ArenaStatus::Created(created).cancel(reason.to_string(), now);
                    Ok((cancelled.into_arena(), ReapOutcome::Cancelled { refund }))
                }
            })
            .await?;

        match outcome {
            ReapOutcome::Closed { skip_wait } => {
                self.scheduler.cancel(&Self::key(address, TimerKind::IdleReap));
                self.scheduler
                    .cancel(&Self::key(address, TimerKind::RegistrationDeadline));
                let fires_at = if skip_wait {
                    now
                } else {
                    now + self.settings.countdown
                };
                self.scheduler
                    .schedule(Self::key(address, TimerKind::GameStartCountdown), fires_at);
                info!("Arena {} closed with a partial lobby", address);
            }
            ReapOutcome::Cancelled { refund } => {
                self.scheduler.cancel_arena(&address);
                if let Some(player) = refund {
                    self.issue_refund(address, player).await;
                }
                self.nudge_agent();
                info!("Arena {} cancelled before start", address);
            }
            ReapOutcome::Stale => {}
        }
        Ok(())
    }

    async fn issue_refund(&self, address: Address, player: Address) {
        let amount = match self.store.load_arena(&address).await {
            Ok(Some(versioned)) => versioned.arena.config.entry_fee,
            _ => U256::zero(),
        };
        let intent = RefundIntent {
            arena: address,
            player,
            amount,
            reason: "arena cancelled with a single paid player".to_string(),
            recorded_at: self.clock.now(),
        };
        if let Err(e) = self.store.append_refund_intent(intent).await {
            error!("Failed to record refund intent for arena {}: {}", address, e);
        }
        if let Err(e) = self.chain.request_refund(&address, &player, amount).await {
            // The intent record is the source of truth; the adapter call is
            // best-effort notification.
            warn!("Chain adapter refund request failed for arena {}: {}", address, e);
            let _ = self
                .record_arena_error(address, ArenaError::FailedChainAdapter(e.to_string()))
                .await;
        }
    }

    /// Countdown fired: create the game and open the learning window.
    async fn begin_learning(&self, address: Address) -> Result<(), Error> {
        let now = self.clock.now();
        let started = self
            .transform_arena(&address, |arena| {
                let closed = match ArenaStatus::from(arena) {
                    ArenaStatus::Closed(closed) => closed,
                    status => return Ok((status.into_arena(), false)),
                };
                let game = Game::new(
                    address,
                    closed.arena().config.game_type,
                    &closed.arena().players,
                    closed.arena().created_at,
                    now,
                );
                Ok((closed.begin_learning(game, now).into_arena(), true))
            })
            .await?;

        if started {
            self.scheduler.schedule(
                Self::key(address, TimerKind::LearningEnd),
                now + self.settings.learning,
            );
            info!("Arena {} entered the learning window", address);
        }
        Ok(())
    }

    /// Learning window over: open round one and arm its deadline.
    async fn activate(&self, address: Address) -> Result<(), Error> {
        let now = self.clock.now();
        let deadline = self
            .transform_arena(&address, |arena| {
                let mut learning = match ArenaStatus::from(arena) {
                    ArenaStatus::Learning(learning) => learning,
                    status => return Ok((status.into_arena(), None)),
                };
                let game = learning
                    .arena_mut()
                    .game
                    .as_mut()
                    .ok_or_else(|| {
                        Error::InvariantViolation("learning arena without a game".to_string())
                    })?;
                game.start_active(now)?;
                let deadline = game.round_deadline;
                Ok((learning.activate(now).into_arena(), deadline))
            })
            .await?;

        if let Some(deadline) = deadline {
            self.scheduler
                .schedule(Self::key(address, TimerKind::RoundDeadline), deadline);
            info!("Arena {} is live", address);
        }
        Ok(())
    }

    /// Move submission. Completing the round advances it immediately instead
    /// of waiting out the deadline.
    pub async fn submit_move(
        &self,
        address: Address,
        player: Address,
        mv: Move,
    ) -> Result<MoveResult, Error> {
        let now = self.clock.now();
        let result = self
            .transform_arena(&address, |arena| {
                let mut active = match ArenaStatus::from(arena) {
                    ArenaStatus::Active(active) => active,
                    status => {
                        let state = status.state_name();
                        return Err(Error::GameNotActive(format!("arena is {}", state)));
                    }
                };
                let game = active.arena_mut().game.as_mut().ok_or_else(|| {
                    Error::InvariantViolation("active arena without a game".to_string())
                })?;
                let result = game.submit_move(&player, &mv, now)?;
                Ok((ArenaStatus::Active(active).into_arena(), result))
            })
            .await?;

        if result.round_resolved {
            self.scheduler
                .cancel(&Self::key(address, TimerKind::RoundDeadline));
            self.advance_round(address, true).await?;
        }
        Ok(result)
    }

    /// Close the current round. `all_moves_in` skips the deadline staleness
    /// check used for timer-driven advances.
    async fn advance_round(&self, address: Address, all_moves_in: bool) -> Result<(), Error> {
        let now = self.clock.now();
        let outcome = self
            .transform_arena(&address, |arena| {
                let mut active = match ArenaStatus::from(arena) {
                    ArenaStatus::Active(active) => active,
                    status => return Ok((status.into_arena(), AdvanceOutcome::Stale)),
                };
                let game = active.arena_mut().game.as_mut().ok_or_else(|| {
                    Error::InvariantViolation("active arena without a game".to_string())
                })?;

                // A deadline event that was superseded by an all-moves-in
                // advance must not clip the round that replaced it.
                if !all_moves_in {
                    let due = game
                        .round_deadline
                        .map(|deadline| now >= deadline)
                        .unwrap_or(false);
                    if !due && !game.round_complete() {
                        return Ok((
                            ArenaStatus::Active(active).into_arena(),
                            AdvanceOutcome::Stale,
                        ));
                    }
                }

                match game.advance(now)? {
                    RoundOutcome::Advanced => {
                        let deadline = game.round_deadline;
                        Ok((
                            ArenaStatus::Active(active).into_arena(),
                            AdvanceOutcome::NextRound(deadline),
                        ))
                    }
                    RoundOutcome::Finished => {
                        let winners = game.winners.clone();
                        let results = GameResults {
                            rounds_played: game.max_rounds,
                            scores: game.ranked_scores(),
                        };
                        let arena = active.finish(winners, results, now).into_arena();
                        Ok((arena, AdvanceOutcome::Finished))
                    }
                }
            })
            .await?;

        match outcome {
            AdvanceOutcome::NextRound(Some(deadline)) => {
                self.scheduler
                    .schedule(Self::key(address, TimerKind::RoundDeadline), deadline);
            }
            AdvanceOutcome::NextRound(None) => {
                return Err(Error::InvariantViolation(
                    "advanced round without a deadline".to_string(),
                ));
            }
            AdvanceOutcome::Finished => {
                self.scheduler
                    .cancel(&Self::key(address, TimerKind::RoundDeadline));
                info!("Arena {} game finished, requesting finalize", address);
                if let Err(e) = self.finalize(address).await {
                    error!("Finalize failed for arena {}: {}", address, e);
                    self.quarantine_on_invariant(address, &e).await;
                    let _ = self
                        .record_arena_error(address, ArenaError::FailedSigning(e.to_string()))
                        .await;
                }
            }
            AdvanceOutcome::Stale => {}
        }
        Ok(())
    }

    /// Process winners: compute payouts, obtain the signed authorization,
    /// and mark the arena finalized. Exactly one finalize can succeed per
    /// arena; the store's CAS plus the nonce guard enforce it.
    pub async fn finalize(&self, address: Address) -> Result<(), Error> {
        let versioned = self
            .store
            .load_arena(&address)
            .await?
            .ok_or(Error::NotFound(address))?;
        let arena = versioned.arena;

        if arena.is_finalized {
            return Err(Error::AlreadyFinalized);
        }
        let winners = arena.winners.clone();
        if winners.is_empty() {
            return Err(Error::InvariantViolation(
                "finished game produced no winners".to_string(),
            ));
        }

        let split = split_pool(
            arena.config.entry_fee,
            arena.player_count(),
            arena.config.protocol_fee_bps,
            winners.len(),
            arena.config.payout_scheme,
        )?;
        let nonce = arena.used_nonce + 1;

        let signature = self
            .signer
            .sign_finalize(&arena, &winners, &split.payouts, nonce)
            .await?;

        let now = self.clock.now();
        let payouts = split.payouts.clone();
        let signature_bytes = signature.to_bytes().to_vec();
        self.transform_arena(&address, |arena| {
            let finished = match ArenaStatus::from(arena) {
                ArenaStatus::Finished(finished) => finished,
                ArenaStatus::Finalized(_) => return Err(Error::AlreadyFinalized),
                status => {
                    return Err(Error::InvalidTransition(format!(
                        "cannot finalize arena in state {}",
                        status.state_name()
                    )))
                }
            };
            let arena = finished
                .finalize(payouts.clone(), nonce, signature_bytes.clone(), now)
                .into_arena();
            Ok((arena, ()))
        })
        .await?;

        // Write-through records; failures here are logged, not fatal, the
        // signed arena document is the source of truth.
        for (rank, (winner, amount)) in winners.iter().zip(split.payouts.iter()).enumerate() {
            let record = PayoutRecord {
                arena: address,
                winner: *winner,
                amount: *amount,
                rank: rank as u32,
                recorded_at: now,
            };
            if let Err(e) = self.store.append_payout_record(record).await {
                error!("Failed to record payout for arena {}: {}", address, e);
            }
            let delta = LeaderboardDelta {
                wins: if rank == 0 { 1 } else { 0 },
                payouts: *amount,
                games: 1,
            };
            if let Err(e) = self.store.update_leaderboard(winner, delta).await {
                error!("Failed to update leaderboard for {}: {}", winner, e);
            }
        }

        self.publish_next_window(now).await;
        self.nudge_agent();

        // The authorization is submitted on-chain out of band; a first poll
        // here catches escrows that already saw it.
        match self.chain.observe_finalization(&address).await {
            Ok(Some(receipt)) => info!(
                "Arena {} finalize observed on-chain: tx {} (success: {})",
                address, receipt.tx_hash, receipt.success
            ),
            Ok(None) => debug!("Arena {} finalize not yet observed on-chain", address),
            Err(e) => warn!(
                "Could not poll finalization for arena {}: {}",
                address, e
            ),
        }

        info!(
            "Arena {} finalized: nonce {}, fee {}, {} winners",
            address,
            nonce,
            split.fee,
            winners.len()
        );
        Ok(())
    }

    /// Operator cancel. Valid until the game starts.
    pub async fn cancel_arena(&self, address: Address, reason: String) -> Result<(), Error> {
        let now = self.clock.now();
        let refund = self
            .transform_arena(&address, |arena| {
                if !matches!(arena.state(), ArenaState::Created | ArenaState::Closed) {
                    return Err(Error::InvalidTransition(format!(
                        "cannot cancel arena in state {}",
                        arena.state()
                    )));
                }
                let refund = if arena.players.len() == 1 {
                    arena.players.first().copied()
                } else {
                    None
                };
                let cancelled = ArenaStatus::from(arena).cancel(reason.clone(), now);
                Ok((cancelled.into_arena(), refund))
            })
            .await?;

        self.scheduler.cancel_arena(&address);
        if let Some(player) = refund {
            self.issue_refund(address, player).await;
        }
        self.nudge_agent();
        info!("Arena {} cancelled: {}", address, reason);
        Ok(())
    }

    /// Publish the display countdown for the next tournament: 5-15 minutes
    /// out during peak hours, 15-30 off-peak.
    async fn publish_next_window(&self, now: OffsetDateTime) {
        let minutes = {
            let mut rng = rand::rng();
            let hour = now.hour();
            if (PEAK_START_HOUR..PEAK_END_HOUR).contains(&hour) {
                rng.random_range(5..=15)
            } else {
                rng.random_range(15..=30)
            }
        };
        let at = now + Duration::minutes(minutes);
        if let Err(e) = self.store.set_next_tournament_at(at).await {
            warn!("Failed to publish next tournament window: {}", e);
        }
    }

    fn nudge_agent(&self) {
        if self.settings.agent_nudge {
            self.scheduler.schedule(TimerKey::AgentCycle, self.clock.now());
        }
    }

    /// Invariant violations freeze the arena rather than retry.
    async fn quarantine_on_invariant(&self, address: Address, error: &Error) {
        if !error.is_invariant_violation() {
            return;
        }
        let diagnostic = error.to_string();
        error!("Freezing arena {} after invariant violation: {}", address, diagnostic);
        let result = self
            .transform_arena(&address, |mut arena| {
                arena.freeze(diagnostic.clone());
                Ok((arena, ()))
            })
            .await;
        if let Err(e) = result {
            error!("Failed to persist freeze for arena {}: {}", address, e);
        }
        self.scheduler.cancel_arena(&address);
    }

    async fn record_arena_error(&self, address: Address, error: ArenaError) -> Result<(), Error> {
        self.transform_arena(&address, |mut arena| {
            arena.record_error(error.clone());
            Ok((arena, ()))
        })
        .await
    }

    /// Load-transform-CAS loop. The transform sees a fresh copy on every
    /// conflict retry; an error from the transform writes nothing.
    async fn transform_arena<T>(
        &self,
        address: &Address,
        mut f: impl FnMut(Arena) -> Result<(Arena, T), Error>,
    ) -> Result<T, Error> {
        let mut backoff = self.settings.cas_backoff;
        let mut attempt = 0;
        loop {
            let versioned = self
                .store
                .load_arena(address)
                .await?
                .ok_or(Error::NotFound(*address))?;
            let (arena, value) = f(versioned.arena)?;
            match self
                .store
                .update_arena(address, versioned.version, arena)
                .await
            {
                Ok(_) => return Ok(value),
                Err(StoreError::Conflict { .. }) if attempt + 1 < self.settings.cas_max_attempts => {
                    attempt += 1;
                    warn!(
                        "CAS conflict on arena {} (attempt {}), retrying",
                        address, attempt
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(std::time::Duration::from_secs(30));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
