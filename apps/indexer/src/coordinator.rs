//! Coordinator (§4.9): owns startup (catchup, then live handoff, per chain
//! and family), the monitor task, and graceful shutdown.

use crate::catchup;
use crate::chain::{ChainDescriptor, EventFamily, TransportKind};
use crate::checkpoint::CheckpointStore;
use crate::config::AppConfig;
use crate::db::Database;
use crate::live::{poller, subscription};
use crate::metrics::IndexerTelemetry;
use crate::ops::ActiveOperations;
use crate::rpc::JsonRpcClient;
use crate::supervisor::Supervisor;
use crate::ws::WsSubscriptionClient;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type LiveTaskSet = JoinSet<(ChainDescriptor, EventFamily, Result<()>)>;

pub struct Coordinator {
    config: AppConfig,
    db: Arc<dyn Database>,
    telemetry: IndexerTelemetry,
    ops: Arc<ActiveOperations>,
    supervisor: Arc<Supervisor>,
    tasks: tokio::sync::Mutex<LiveTaskSet>,
}

impl Coordinator {
    pub fn new(config: AppConfig, db: Arc<dyn Database>) -> Self {
        Self {
            config,
            db,
            telemetry: IndexerTelemetry::new(),
            ops: Arc::new(ActiveOperations::new()),
            supervisor: Arc::new(Supervisor::new()),
            tasks: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    /// The configured drain bound (§4.9's `shutdown_drain_timeout`), for
    /// callers that want `shutdown` to use the same default the process
    /// would use on its own.
    pub fn shutdown_timeout(&self) -> std::time::Duration {
        self.config.global.shutdown_drain_timeout
    }

    /// Runs catchup to completion — one family at a time, fanned out across
    /// every chain concurrently under a single overall cap per family (§4.9
    /// steps 5–6) — then starts the live transports and supervisor, and
    /// blocks until `shutdown` is cancelled or a task fails unrecoverably.
    /// Panicked tasks are treated like failed ones and restarted rather than
    /// propagated (§5, §9). Returns as soon as `shutdown` fires; it does not
    /// itself wait for live tasks to finish — call [`Coordinator::shutdown`]
    /// for that bounded wait (§6's separate `Start`/`Shutdown` operations).
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let checkpoints = Arc::new(CheckpointStore::new(self.db.clone()));

        for family in EventFamily::ALL_IN_CATCHUP_ORDER {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            self.run_catchup_for_family(family, &checkpoints, &shutdown)
                .await;
        }
        if shutdown.is_cancelled() {
            return Ok(());
        }

        {
            let mut tasks = self.tasks.lock().await;
            for chain in self.config.chains.clone() {
                for family in EventFamily::ALL_IN_CATCHUP_ORDER {
                    self.spawn_live_task(&mut tasks, chain.clone(), family, &checkpoints, &shutdown);
                }
            }
        }

        {
            let supervisor = self.supervisor.clone();
            let shutdown = shutdown.clone();
            let health_check_interval = self.config.global.health_check_interval;
            let scheduled_reconnect_interval = self.config.global.scheduled_reconnect_interval;
            tokio::spawn(async move {
                supervisor.run(health_check_interval, scheduled_reconnect_interval, shutdown).await;
            });
        }

        {
            let ops = self.ops.clone();
            let telemetry = self.telemetry.clone();
            let shutdown = shutdown.clone();
            let monitoring_interval = self.config.global.monitoring_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(monitoring_interval);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = ticker.tick() => {
                            ops.log_progress().await;
                            telemetry.set_active_tasks(ops.count().await as u64);
                        }
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                res = async { self.tasks.lock().await.join_next().await } => {
                    match res {
                        None => break,
                        Some(Ok((chain, family, Ok(())))) => {
                            tracing::info!(chain_id = chain.chain_id, %family, "live task exited cleanly");
                        }
                        Some(Ok((chain, family, Err(e)))) => {
                            tracing::error!(chain_id = chain.chain_id, %family, error = %e, "live task failed, restarting");
                            self.telemetry.restart(chain.chain_id, family.as_str());
                            tokio::time::sleep(self.config.global.timeouts.reconnect.min(std::time::Duration::from_secs(5))).await;
                            let mut tasks = self.tasks.lock().await;
                            self.spawn_live_task(&mut tasks, chain, family, &checkpoints, &shutdown);
                        }
                        Some(Err(join_err)) => {
                            tracing::error!(error = %join_err, "live task panicked, restarting");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Cancels `shutdown` and waits, up to `timeout`, for every live task to
    /// finish (§6's `Shutdown(timeout) -> error`). Tasks still running past
    /// `timeout` are abandoned rather than blocking process exit, but the
    /// timeout itself is returned as an error rather than only logged (§9
    /// "report timeout as an error but do not leak"; testable property 4).
    pub async fn shutdown(&self, shutdown: &CancellationToken, timeout: std::time::Duration) -> Result<()> {
        shutdown.cancel();
        let mut tasks = self.tasks.lock().await;
        let remaining = tasks.len();
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!(remaining, "shutdown drain timed out, abandoning remaining tasks");
                anyhow::bail!("shutdown timed out waiting for {remaining} live task(s) to drain")
            }
        }
    }

    /// Spawns (or respawns after a failure) the live transport for one
    /// (chain, family) pair into `tasks`, resolving push vs poll transport
    /// per `chain.transport`.
    fn spawn_live_task(
        &self,
        tasks: &mut LiveTaskSet,
        chain: ChainDescriptor,
        family: EventFamily,
        checkpoints: &Arc<CheckpointStore>,
        shutdown: &CancellationToken,
    ) {
        let db = self.db.clone();
        let checkpoints = checkpoints.clone();
        let shutdown = shutdown.clone();
        let supervisor = self.supervisor.clone();
        let telemetry = self.telemetry.clone();
        let timeouts = self.config.global.timeouts.clone();

        tasks.spawn(async move {
            let result =
                run_live(chain.clone(), family, db, checkpoints, supervisor, telemetry, shutdown, timeouts).await;
            (chain, family, result)
        });
    }

    /// Fans `family`'s catchup out across every configured chain
    /// concurrently and waits for all of them, bounded by
    /// `catchup_operation_timeout` (§4.9 step 5: "under a 10-minute overall
    /// cap"). A chain's failure — or the whole family timing out — is
    /// logged and does not prevent the next family from starting (§4.9 step
    /// 6, §7's per-chain/per-family error propagation policy); chains still
    /// in flight when the cap elapses are abandoned.
    async fn run_catchup_for_family(
        &self,
        family: EventFamily,
        checkpoints: &Arc<CheckpointStore>,
        shutdown: &CancellationToken,
    ) {
        let mut join_set: JoinSet<(u64, Result<catchup::CatchupStats>)> = JoinSet::new();

        for chain in self.config.chains.clone() {
            let db = self.db.clone();
            let checkpoints = checkpoints.clone();
            let shutdown = shutdown.clone();
            let ops = self.ops.clone();
            let telemetry = self.telemetry.clone();
            let timeouts = self.config.global.timeouts.clone();

            join_set.spawn(async move {
                let result = async {
                    let client = JsonRpcClient::with_telemetry(chain.chain_id, chain.rpc_http_urls.clone(), Some(telemetry.clone()))
                        .with_context(|| format!("build rpc client for chain {}", chain.chain_id))?;
                    let op = ops.begin(format!("catchup:{family}:{}", chain.chain_id)).await;
                    let stats = catchup::run(&client, db.as_ref(), &checkpoints, &chain, family, &telemetry, &shutdown, &timeouts)
                        .await
                        .with_context(|| format!("catchup chain={} family={family}", chain.chain_id));
                    ops.end(op).await;
                    stats
                }
                .await;
                (chain.chain_id, result)
            });
        }

        let drain = async {
            while let Some(res) = join_set.join_next().await {
                match res {
                    Ok((chain_id, Ok(stats))) => {
                        tracing::info!(
                            chain_id,
                            %family,
                            persisted = stats.persisted,
                            duplicates = stats.duplicates,
                            missing_antecedent = stats.missing_antecedent,
                            "catchup complete"
                        );
                    }
                    Ok((chain_id, Err(e))) => {
                        tracing::error!(chain_id, %family, error = %e, "catchup failed for chain, other chains unaffected");
                    }
                    Err(join_err) => {
                        tracing::error!(%family, error = %join_err, "catchup task panicked");
                    }
                }
            }
        };

        if tokio::time::timeout(self.config.global.timeouts.family_catchup, drain)
            .await
            .is_err()
        {
            tracing::error!(%family, "catchup overall cap exceeded, abandoning in-flight chains");
            join_set.shutdown().await;
        }
    }

    pub async fn active_tasks(&self) -> usize {
        self.ops.count().await
    }

    pub async fn update_polling_health(&self, chain_id: u64, healthy: bool) {
        self.supervisor.update_polling_health(chain_id, healthy).await;
    }
}

async fn run_live(
    chain: ChainDescriptor,
    family: EventFamily,
    db: Arc<dyn Database>,
    checkpoints: Arc<CheckpointStore>,
    supervisor: Arc<Supervisor>,
    telemetry: IndexerTelemetry,
    shutdown: CancellationToken,
    timeouts: crate::config::Timeouts,
) -> Result<()> {
    match chain.transport {
        TransportKind::Subscription => {
            let ws_url = chain
                .rpc_ws_url
                .clone()
                .with_context(|| format!("chain {} missing rpcWsUrl for subscription transport", chain.chain_id))?;
            let client = WsSubscriptionClient::new(ws_url);
            subscription::run(&client, db.as_ref(), &checkpoints, &chain, family, supervisor, telemetry, shutdown, &timeouts)
                .await
        }
        TransportKind::Poller => {
            let client = JsonRpcClient::with_telemetry(chain.chain_id, chain.rpc_http_urls.clone(), Some(telemetry.clone()))
                .with_context(|| format!("build rpc client for chain {}", chain.chain_id))?;
            poller::run(&client, db.as_ref(), &checkpoints, &chain, family, supervisor, telemetry, shutdown, &timeouts).await
        }
    }
}
