use crate::{
    config::Settings,
    domain::{
        arenas::{ArenaRuntime, Orchestrator},
        scheduler::Scheduler,
        signer::FinalizeSigner,
        HostAgent,
    },
    infra::{
        chain::{ChainAdapter, MockChainClient},
        clock::{Clock, SystemClock},
        signing::{LocalSigner, SigningService},
        store::{ArenaStore, MemoryStore},
    },
};
use anyhow::anyhow;
use log::{error, info, warn};
use rand::Rng;
use std::sync::Arc;
use tokio::{
    select,
    signal::unix::{signal, SignalKind},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

pub struct Application {
    runtime: Arc<ArenaRuntime>,
    scheduler: Arc<Scheduler>,
    cancellation_token: CancellationToken,
    background_tasks: TaskTracker,
    shutdown_grace: std::time::Duration,
}

impl Application {
    pub async fn build(settings: Settings) -> Result<Self, anyhow::Error> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn ArenaStore> = Arc::new(MemoryStore::new());
        info!("In-memory arena store configured");

        let chain: Arc<dyn ChainAdapter> = Arc::new(MockChainClient::permissive());
        info!("Chain adapter configured (mock)");

        let signing = build_signing_service(&settings)?;
        info!(
            "Signing service configured, operator address {}",
            signing.operator_address()
        );

        let cancellation_token = CancellationToken::new();
        let (scheduler, timer_events) =
            Scheduler::new(clock.clone(), settings.orchestrator.scheduler_tick_ms.max(1));

        let signer = FinalizeSigner::new(signing, settings.signer_settings());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            chain,
            signer,
            scheduler.clone(),
            clock.clone(),
            settings.orchestrator_settings(),
        ));
        info!("Orchestrator configured");

        let runtime = Arc::new(ArenaRuntime::new(
            orchestrator.clone(),
            cancellation_token.clone(),
        ));

        let agent = if settings.agent.enabled {
            let agent = Arc::new(HostAgent::new(
                orchestrator,
                store,
                clock,
                scheduler.clone(),
                settings.agent_settings()?,
            ));
            agent.start();
            info!("Host agent configured");
            Some(agent)
        } else {
            info!("Host agent disabled");
            None
        };

        let background_tasks = TaskTracker::new();

        let scheduler_task = scheduler.clone();
        let scheduler_cancel = cancellation_token.clone();
        background_tasks.spawn(async move {
            scheduler_task.run(scheduler_cancel).await;
        });

        let router = runtime.clone();
        background_tasks.spawn(async move {
            router.run_events(timer_events, agent).await;
        });

        background_tasks.close();

        Ok(Self {
            runtime,
            scheduler,
            cancellation_token,
            background_tasks,
            shutdown_grace: std::time::Duration::from_secs(
                settings.orchestrator.shutdown_grace_secs,
            ),
        })
    }

    /// Handle on the command surface, for embedding and tests.
    pub fn runtime(&self) -> &Arc<ArenaRuntime> {
        &self.runtime
    }

    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        info!("Orchestrator running");
        shutdown_signal().await;

        info!("Shutdown initiated");
        // New timers stop first so draining mailboxes can't re-arm work.
        self.scheduler.stop_accepting();
        self.cancellation_token.cancel();

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            self.background_tasks.wait().await;
            self.runtime.drain().await;
        })
        .await;

        match drained {
            Ok(()) => {
                info!("Shutdown complete");
                Ok(())
            }
            Err(_) => {
                warn!("Background tasks timed out during shutdown");
                Err(anyhow!("shutdown grace period elapsed with tasks running"))
            }
        }
    }
}

fn build_signing_service(settings: &Settings) -> Result<Arc<dyn SigningService>, anyhow::Error> {
    match &settings.signer.operator_key_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow!("failed to read operator key file {}: {}", path, e))?;
            let signer = LocalSigner::from_hex(&raw)
                .map_err(|e| anyhow!("failed to load operator key: {}", e))?;
            Ok(Arc::new(signer))
        }
        None => {
            // Local development fallback; authorizations from this key are
            // worthless against any deployed escrow.
            warn!("No operator key file configured, generating an ephemeral key");
            let mut rng = rand::rng();
            let signer = loop {
                let mut bytes = [0u8; 32];
                rng.fill(&mut bytes[..]);
                if let Ok(signer) = LocalSigner::from_bytes(&bytes) {
                    break signer;
                }
            };
            Ok(Arc::new(signer))
        }
    }
}

async fn shutdown_signal() {
    let sigint = signal(SignalKind::interrupt());
    let sigterm = signal(SignalKind::terminate());
    match (sigint, sigterm) {
        (Ok(mut sigint), Ok(mut sigterm)) => {
            select! {
                _ = sigint.recv() => info!("Received SIGINT signal"),
                _ = sigterm.recv() => info!("Received SIGTERM signal"),
            }
        }
        _ => {
            error!("Failed to install signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
