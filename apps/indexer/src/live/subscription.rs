//! Live Transport — Subscription (§4.6): push-mode delivery over a
//! WebSocket log subscription, with bounded-attempt reconnect on drop.

use crate::blockclient::LogSubscription;
use crate::chain::{ChainDescriptor, EventFamily};
use crate::checkpoint::CheckpointStore;
use crate::config::Timeouts;
use crate::db::Database;
use crate::metrics::IndexerTelemetry;
use crate::processor::{self, ProcessOutcome};
use crate::supervisor::{Supervisor, SupervisorEvent};
use anyhow::{Context, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Runs the push transport for `family` on `chain` until `cancel` fires or
/// reconnection has been exhausted (§4.6, §4.8's restart contract — the
/// Coordinator restarts this task from scratch on `Err`). Also listens for
/// the Supervisor's scheduled-reconnect broadcast (§4.8): on that signal the
/// current subscription is dropped and re-established unconditionally, even
/// absent an error, to bound the damage of silent connection decay.
pub async fn run(
    subscription_client: &dyn LogSubscription,
    db: &dyn Database,
    checkpoints: &CheckpointStore,
    chain: &ChainDescriptor,
    family: EventFamily,
    supervisor: Arc<Supervisor>,
    telemetry: IndexerTelemetry,
    cancel: CancellationToken,
    timeouts: &Timeouts,
) -> Result<()> {
    let topics = family.topic_signatures().to_vec();
    let mut attempt = 0u32;
    let mut backoff = INITIAL_BACKOFF;
    let mut supervisor_events = supervisor.subscribe();

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let from_block = tokio::time::timeout(
            timeouts.checkpoint_read,
            checkpoints.get_or_default(chain.chain_id, family, chain.default_start_block),
        )
        .await
        .context("read checkpoint before subscribing timed out")?
        .context("read checkpoint before subscribing")?;

        let subscribe_result = tokio::time::timeout(
            timeouts.resubscribe,
            subscription_client.subscribe(chain.contract_address, &topics, Some(from_block)),
        )
        .await;

        let handle = match subscribe_result {
            Ok(Ok(handle)) => {
                attempt = 0;
                backoff = INITIAL_BACKOFF;
                handle
            }
            Ok(Err(e)) => {
                telemetry.reconnect_attempt(chain.chain_id, family.as_str());
                attempt += 1;
                if attempt > MAX_RECONNECT_ATTEMPTS {
                    return Err(e.context("subscribe_logs exhausted reconnect attempts"));
                }
                tracing::warn!(chain_id = chain.chain_id, %family, attempt, error = %e, "subscribe failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
            Err(_) => {
                telemetry.reconnect_attempt(chain.chain_id, family.as_str());
                attempt += 1;
                if attempt > MAX_RECONNECT_ATTEMPTS {
                    anyhow::bail!("subscribe_logs timed out, exhausted reconnect attempts");
                }
                tracing::warn!(chain_id = chain.chain_id, %family, attempt, "subscribe timed out, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };

        let mut logs = handle.logs;
        let mut errors = handle.errors;
        let mut forced_reconnect = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = supervisor_events.recv() => {
                    match event {
                        Ok(SupervisorEvent::ScheduledReconnect) => {
                            tracing::info!(chain_id = chain.chain_id, %family, "scheduled reconnect, resubscribing");
                            forced_reconnect = true;
                            break;
                        }
                        Ok(SupervisorEvent::HealthCheck) => {}
                        Err(_) => {}
                    }
                }
                err = errors.next() => {
                    match err {
                        Some(Err(e)) => {
                            tracing::warn!(chain_id = chain.chain_id, %family, error = %e, "subscription error channel fired");
                            break;
                        }
                        Some(Ok(())) | None => {}
                    }
                }
                next = logs.next() => {
                    match next {
                        Some(Ok(log)) => {
                            telemetry.log_processed(chain.chain_id, family.as_str());
                            match processor::process_log(db, chain.chain_id, family, &log, timeouts).await {
                                Ok(outcome @ (ProcessOutcome::Persisted | ProcessOutcome::Duplicate)) => {
                                    if outcome == ProcessOutcome::Duplicate {
                                        telemetry.duplicate_absorbed(chain.chain_id, family.as_str());
                                    }
                                    if let Some(block_number) = log.block_number {
                                        match tokio::time::timeout(
                                            timeouts.store_write,
                                            checkpoints.set(chain.chain_id, family, block_number),
                                        )
                                        .await
                                        {
                                            Ok(Ok(())) => {}
                                            Ok(Err(e)) => {
                                                tracing::warn!(chain_id = chain.chain_id, %family, error = %e, "checkpoint write failed");
                                            }
                                            Err(_) => {
                                                tracing::warn!(chain_id = chain.chain_id, %family, "checkpoint write timed out");
                                            }
                                        }
                                    }
                                }
                                Ok(ProcessOutcome::MissingAntecedent) => {
                                    telemetry.missing_antecedent_skip(chain.chain_id, family.as_str());
                                }
                                Ok(ProcessOutcome::UnknownSignature) => {
                                    telemetry.decode_failure(chain.chain_id, family.as_str());
                                }
                                Err(e) => {
                                    telemetry.decode_failure(chain.chain_id, family.as_str());
                                    return Err(e.context("process live log"));
                                }
                            }
                        }
                        Some(Err(e)) => {
                            telemetry.rpc_error(chain.chain_id, "subscription_stream");
                            tracing::warn!(chain_id = chain.chain_id, %family, error = %e, "subscription stream error");
                            break;
                        }
                        None => {
                            telemetry.rpc_error(chain.chain_id, "subscription_stream");
                            tracing::warn!(chain_id = chain.chain_id, %family, "subscription stream closed, reconnecting");
                            break;
                        }
                    }
                }
            }
        }

        if forced_reconnect {
            continue;
        }

        telemetry.reconnect_attempt(chain.chain_id, family.as_str());
        attempt += 1;
        if attempt > MAX_RECONNECT_ATTEMPTS {
            anyhow::bail!("subscription for chain={} family={family} exhausted reconnect attempts", chain.chain_id);
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
