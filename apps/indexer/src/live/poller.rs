//! Live Transport — Poller (§4.7): pull-mode delivery for chains whose
//! endpoint has no reliable push subscription, used only when
//! `ChainDescriptor::transport` resolves to `TransportKind::Poller`.

use crate::blockclient::BlockClient;
use crate::chain::{ChainDescriptor, EventFamily};
use crate::checkpoint::CheckpointStore;
use crate::config::Timeouts;
use crate::db::Database;
use crate::metrics::IndexerTelemetry;
use crate::processor::{self, ProcessOutcome};
use crate::rpc::looks_like_transient;
use crate::scanner::{self, ChunkOutcome};
use crate::supervisor::Supervisor;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const MAX_CONSECUTIVE_ERRORS: u32 = 5;
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// §4.7: head-block read retries, 3 attempts with a fixed 5s/10s/20s backoff
/// ladder before the tick is skipped and polling health is marked unhealthy.
const HEAD_RETRY_BACKOFFS: [Duration; 3] =
    [Duration::from_secs(5), Duration::from_secs(10), Duration::from_secs(20)];

/// §4.7: forward progress must be recorded at least once per 5 minutes even
/// during quiescence (empty ticks).
const QUIESCENT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(300);

/// Polls `chain.poll_interval`, fetching any new logs for `family` since the
/// last checkpoint and persisting them before advancing it. Runs until
/// `cancel` fires.
pub async fn run(
    client: &dyn BlockClient,
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
    let mut consecutive_errors = 0u32;
    let mut last_checkpoint_write = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        match poll_once(
            client,
            db,
            checkpoints,
            chain,
            family,
            &topics,
            &supervisor,
            &telemetry,
            &mut last_checkpoint_write,
            timeouts,
        )
        .await
        {
            Ok(()) => consecutive_errors = 0,
            Err(e) if looks_like_transient(&e) && consecutive_errors < MAX_CONSECUTIVE_ERRORS => {
                telemetry.rpc_error(chain.chain_id, "poll_once");
                consecutive_errors += 1;
                tracing::warn!(chain_id = chain.chain_id, %family, consecutive_errors, error = %e, "poll tick failed, retrying");
                tokio::time::sleep(ERROR_BACKOFF).await;
                continue;
            }
            Err(e) => {
                telemetry.rpc_error(chain.chain_id, "poll_once");
                return Err(e.context("poller exhausted retries"));
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(chain.poll_interval) => {}
        }
    }
}

/// Reads the chain head with up to 3 retries on the fixed backoff ladder
/// (§4.7). On exhaustion, returns `Ok(None)` and the caller marks the
/// chain's polling health unhealthy without treating the tick as an error
/// (S6: after the third consecutive failure, health flips to false and the
/// tick is skipped rather than retried through the generic transient path).
async fn head_block_with_retry(
    client: &dyn BlockClient,
    chain_id: u64,
    family: EventFamily,
    telemetry: &IndexerTelemetry,
) -> Option<u64> {
    for (attempt, backoff) in HEAD_RETRY_BACKOFFS.iter().enumerate() {
        match client.head_block().await {
            Ok(head) => return Some(head),
            Err(e) => {
                telemetry.rpc_error(chain_id, "head_block");
                tracing::warn!(
                    chain_id,
                    %family,
                    attempt = attempt + 1,
                    error = %e,
                    "poller head_block failed"
                );
                tokio::time::sleep(*backoff).await;
            }
        }
    }
    None
}

async fn poll_once(
    client: &dyn BlockClient,
    db: &dyn Database,
    checkpoints: &CheckpointStore,
    chain: &ChainDescriptor,
    family: EventFamily,
    topics: &[alloy::primitives::B256],
    supervisor: &Supervisor,
    telemetry: &IndexerTelemetry,
    last_checkpoint_write: &mut Instant,
    timeouts: &Timeouts,
) -> Result<()> {
    let Some(head) = head_block_with_retry(client, chain.chain_id, family, telemetry).await else {
        supervisor.update_polling_health(chain.chain_id, false).await;
        return Ok(());
    };
    supervisor.update_polling_health(chain.chain_id, true).await;

    let from = tokio::time::timeout(
        timeouts.checkpoint_read,
        checkpoints.get_or_default(chain.chain_id, family, chain.default_start_block),
    )
    .await
    .context("read checkpoint timed out")?
    .context("read checkpoint")?;

    if from > head {
        if last_checkpoint_write.elapsed() >= QUIESCENT_CHECKPOINT_INTERVAL {
            let _ = tokio::time::timeout(
                timeouts.store_write,
                checkpoints.set(chain.chain_id, family, head.min(from.saturating_sub(1))),
            )
            .await;
            *last_checkpoint_write = Instant::now();
        }
        return Ok(());
    }

    let to = head.min(from.saturating_add(chain.max_range.saturating_sub(1)));

    let chunk_started = Instant::now();
    let outcome = scanner::scan_chunk(
        client,
        chain.contract_address,
        topics,
        from,
        to,
        false,
        timeouts.filter_logs,
    )
    .await
    .map_err(|e| {
        telemetry.rpc_error(chain.chain_id, "filter_logs");
        e
    })
    .context("poll scan_chunk")?;
    telemetry.catchup_chunk_ms(chain.chain_id, family.as_str(), chunk_started.elapsed().as_millis() as u64);

    if let ChunkOutcome::Processed(logs) = outcome {
        for log in &logs {
            telemetry.log_processed(chain.chain_id, family.as_str());
            match processor::process_log(db, chain.chain_id, family, log, timeouts).await? {
                ProcessOutcome::Persisted => {}
                ProcessOutcome::Duplicate => telemetry.duplicate_absorbed(chain.chain_id, family.as_str()),
                ProcessOutcome::MissingAntecedent => {
                    telemetry.missing_antecedent_skip(chain.chain_id, family.as_str())
                }
                ProcessOutcome::UnknownSignature => telemetry.decode_failure(chain.chain_id, family.as_str()),
            }
        }
    }

    tokio::time::timeout(timeouts.store_write, checkpoints.set(chain.chain_id, family, to))
        .await
        .context("advance checkpoint timed out")?
        .context("advance checkpoint")?;
    *last_checkpoint_write = Instant::now();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainDescriptor;
    use crate::db::{FulfillmentRow, IntentRecord, IntentRow, IntentStatus, SettlementRow, WriteOutcome};
    use alloy::primitives::{Address, B256};
    use alloy::rpc::types::{Log, Transaction};
    use async_trait::async_trait;
    use std::sync::{Mutex, atomic::AtomicU32, atomic::Ordering};

    struct FailingHeadClient {
        failures_remaining: AtomicU32,
        head: u64,
    }

    #[async_trait]
    impl BlockClient for FailingHeadClient {
        async fn head_block(&self) -> Result<u64> {
            if self.failures_remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 { Some(n - 1) } else { None }
            }).is_ok() {
                anyhow::bail!("rpc unavailable");
            }
            Ok(self.head)
        }
        async fn filter_logs(&self, _from: u64, _to: u64, _address: Address, _topics: &[B256]) -> Result<Vec<Log>> {
            Ok(Vec::new())
        }
        async fn get_transaction(&self, _hash: B256) -> Result<Option<Transaction>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct FakeDb {
        checkpoints: Mutex<std::collections::HashMap<(u64, &'static str), u64>>,
    }

    #[async_trait]
    impl Database for FakeDb {
        async fn get_checkpoint(&self, chain_id: u64, family: EventFamily) -> Result<u64> {
            Ok(self.checkpoints.lock().unwrap().get(&(chain_id, family.as_str())).copied().unwrap_or(0))
        }
        async fn set_checkpoint(&self, chain_id: u64, family: EventFamily, block: u64) -> Result<()> {
            self.checkpoints.lock().unwrap().insert((chain_id, family.as_str()), block);
            Ok(())
        }
        async fn get_intent(&self, _id: B256) -> Result<Option<IntentRecord>> {
            Ok(None)
        }
        async fn create_intent(&self, _row: IntentRow) -> Result<WriteOutcome> {
            Ok(WriteOutcome::Inserted)
        }
        async fn create_fulfillment(&self, _row: FulfillmentRow) -> Result<WriteOutcome> {
            Ok(WriteOutcome::Inserted)
        }
        async fn create_settlement(&self, _row: SettlementRow) -> Result<WriteOutcome> {
            Ok(WriteOutcome::Inserted)
        }
        async fn update_intent_status(&self, _id: B256, _status: IntentStatus) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn three_head_failures_mark_health_false_then_recovery_marks_true() {
        let client = FailingHeadClient {
            failures_remaining: AtomicU32::new(3),
            head: 100,
        };
        let db = FakeDb::default();
        let checkpoints = CheckpointStore::new(Arc::new(FakeDb::default()));
        let chain = ChainDescriptor::new(7000, Address::ZERO, 0);
        let supervisor = Supervisor::new();
        let telemetry = IndexerTelemetry::new();
        let mut last_write = Instant::now();

        poll_once(&client, &db, &checkpoints, &chain, EventFamily::Intent, &[], &supervisor, &telemetry, &mut last_write, &Timeouts::default())
            .await
            .unwrap();
        assert!(!supervisor.is_healthy(7000).await);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_outage_marks_health_true() {
        let client = FailingHeadClient {
            failures_remaining: AtomicU32::new(0),
            head: 100,
        };
        let db = FakeDb::default();
        let checkpoints = CheckpointStore::new(Arc::new(FakeDb::default()));
        let chain = ChainDescriptor::new(7000, Address::ZERO, 0);
        let supervisor = Supervisor::new();
        supervisor.update_polling_health(7000, false).await;
        let telemetry = IndexerTelemetry::new();
        let mut last_write = Instant::now();

        poll_once(&client, &db, &checkpoints, &chain, EventFamily::Intent, &[], &supervisor, &telemetry, &mut last_write, &Timeouts::default())
            .await
            .unwrap();
        assert!(supervisor.is_healthy(7000).await);
    }
}
