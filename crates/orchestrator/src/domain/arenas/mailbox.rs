//! Per-arena actors.
//!
//! Each live arena gets a mailbox and a task that drains it, so events for
//! one arena are handled strictly in arrival order while the fleet runs in
//! parallel across worker threads. Timer events and external commands share
//! the mailbox; the scheduler never mutates an arena directly.

use super::Orchestrator;
use crate::domain::{
    agent::HostAgent,
    games::{Move, MoveResult},
    scheduler::{TimerEvent, TimerKey, TimerKind},
    Error,
};
use arena_core::Address;
use log::{debug, error, info, warn};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

const MAILBOX_DEPTH: usize = 64;

/// Everything that can land in an arena's mailbox.
#[derive(Debug)]
pub enum ArenaCommand {
    Join {
        player: Address,
        reply: Option<oneshot::Sender<Result<(), Error>>>,
    },
    SubmitMove {
        player: Address,
        mv: Move,
        reply: Option<oneshot::Sender<Result<MoveResult, Error>>>,
    },
    TimerFired {
        kind: TimerKind,
    },
    Finalize {
        reply: Option<oneshot::Sender<Result<(), Error>>>,
    },
}

/// Routes commands and timer events to per-arena actors.
pub struct ArenaRuntime {
    orchestrator: Arc<Orchestrator>,
    mailboxes: Mutex<HashMap<Address, mpsc::Sender<ArenaCommand>>>,
    tracker: TaskTracker,
    cancel_token: CancellationToken,
}

impl ArenaRuntime {
    pub fn new(orchestrator: Arc<Orchestrator>, cancel_token: CancellationToken) -> Self {
        Self {
            orchestrator,
            mailboxes: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            cancel_token,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Enqueue a command for `address`, spawning its actor on first contact.
    pub async fn send(&self, address: Address, command: ArenaCommand) -> Result<(), Error> {
        let sender = self.mailbox(address);
        sender
            .send(command)
            .await
            .map_err(|_| Error::GameNotActive(format!("arena {} actor is gone", address)))
    }

    fn mailbox(&self, address: Address) -> mpsc::Sender<ArenaCommand> {
        let mut mailboxes = self.mailboxes.lock().expect("mailbox registry lock");
        if let Some(sender) = mailboxes.get(&address) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }

        let (sender, receiver) = mpsc::channel(MAILBOX_DEPTH);
        mailboxes.insert(address, sender.clone());

        let orchestrator = self.orchestrator.clone();
        let cancel_token = self.cancel_token.clone();
        self.tracker.spawn(async move {
            arena_actor(orchestrator, address, receiver, cancel_token).await;
        });
        sender
    }

    /// Consume the scheduler's event stream, routing arena timers to their
    /// mailboxes and agent cycles to the host agent. Runs until the stream
    /// closes or shutdown is requested.
    pub async fn run_events(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TimerEvent>,
        agent: Option<Arc<HostAgent>>,
    ) {
        info!("Starting timer event router");
        loop {
            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = self.cancel_token.cancelled() => break,
            };

            match event.key {
                TimerKey::Arena { address, kind } => {
                    if let Err(e) = self.send(address, ArenaCommand::TimerFired { kind }).await {
                        warn!("Dropped timer {:?} for arena {}: {}", kind, address, e);
                    }
                }
                TimerKey::AgentCycle => {
                    if let Some(agent) = &agent {
                        if let Err(e) = agent.run_cycle().await {
                            error!("Host agent cycle failed: {}", e);
                        }
                    }
                }
            }
        }
        info!("Timer event router stopped");
    }

    /// Wait for every actor to drain. Call after cancelling.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// One arena's processing loop: strictly sequential, failures stay inside
/// the arena.
async fn arena_actor(
    orchestrator: Arc<Orchestrator>,
    address: Address,
    mut receiver: mpsc::Receiver<ArenaCommand>,
    cancel_token: CancellationToken,
) {
    debug!("Arena actor {} started", address);
    loop {
        let command = tokio::select! {
            command = receiver.recv() => match command {
                Some(command) => command,
                None => break,
            },
            _ = cancel_token.cancelled() => break,
        };

        match command {
            ArenaCommand::Join { player, reply } => {
                let result = orchestrator.join(address, player).await;
                report(address, "join", result, reply);
            }
            ArenaCommand::SubmitMove { player, mv, reply } => {
                let result = orchestrator.submit_move(address, player, mv).await;
                report(address, "move", result, reply);
            }
            ArenaCommand::TimerFired { kind } => {
                if let Err(e) = orchestrator.handle_timer(address, kind).await {
                    error!("Arena {} timer {:?} failed: {}", address, kind, e);
                }
            }
            ArenaCommand::Finalize { reply } => {
                let result = orchestrator.finalize(address).await;
                report(address, "finalize", result, reply);
            }
        }
    }
    debug!("Arena actor {} stopped", address);
}

fn report<T>(
    address: Address,
    operation: &str,
    result: Result<T, Error>,
    reply: Option<oneshot::Sender<Result<T, Error>>>,
) {
    match reply {
        Some(reply) => {
            // The caller may have given up waiting; that is their business.
            let _ = reply.send(result);
        }
        None => {
            if let Err(e) = result {
                warn!("Arena {} {} failed: {}", address, operation, e);
            }
        }
    }
}
