//! Catchup Runner (§4.5): drives one (chain, family) from its checkpoint up
//! to the chain's head at startup, one bounded chunk at a time, advancing
//! the checkpoint as each chunk's logs are durably persisted.

use crate::blockclient::BlockClient;
use crate::chain::{ChainDescriptor, EventFamily};
use crate::checkpoint::CheckpointStore;
use crate::config::Timeouts;
use crate::db::Database;
use crate::metrics::IndexerTelemetry;
use crate::processor::{self, ProcessOutcome};
use crate::rpc::{looks_like_range_too_large, looks_like_transient};
use crate::scanner::{self, ChunkOutcome};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// §4.5 step 2d: logs within a chunk are processed in sub-batches bounded
/// to this size so a stuck processor can only block this many logs' worth
/// of a single `batch` timeout.
const SUB_BATCH_SIZE: usize = 100;

#[derive(Debug, Default, Clone, Copy)]
pub struct CatchupStats {
    pub persisted: u64,
    pub duplicates: u64,
    pub missing_antecedent: u64,
    pub unknown_signature: u64,
}

/// Runs catchup for `family` on `chain` from its stored checkpoint (raised
/// to `chain.default_start_block` if unset) through `head_block`, inclusive.
/// Returns once every chunk up to the head at call time has been processed
/// and its checkpoint persisted; it does not track a moving head (§4.5 —
/// live delivery takes over once this returns).
pub async fn run(
    client: &dyn BlockClient,
    db: &dyn Database,
    checkpoints: &CheckpointStore,
    chain: &ChainDescriptor,
    family: EventFamily,
    telemetry: &IndexerTelemetry,
    cancel: &CancellationToken,
    timeouts: &Timeouts,
) -> Result<CatchupStats> {
    let mut stats = CatchupStats::default();
    let topics = family.topic_signatures().to_vec();

    let mut from = tokio::time::timeout(
        timeouts.checkpoint_read,
        checkpoints.get_or_default(chain.chain_id, family, chain.default_start_block),
    )
    .await
    .context("read starting checkpoint timed out")?
    .context("read starting checkpoint")?;

    let head = match tokio::time::timeout(timeouts.head_query, client.head_block()).await {
        Ok(Ok(head)) => head,
        Ok(Err(e)) => {
            telemetry.rpc_error(chain.chain_id, "head_block");
            return Err(e).context("query head block");
        }
        Err(_) => {
            telemetry.rpc_error(chain.chain_id, "head_block");
            anyhow::bail!("query head block timed out");
        }
    };

    if from >= head {
        return Ok(stats);
    }

    let mut max_range = chain.max_range;
    let mut cursor = from;

    while cursor <= head {
        if cancel.is_cancelled() {
            return Ok(stats);
        }

        let chunk_to = cursor.saturating_add(max_range.saturating_sub(1)).min(head);

        let chunk_started = Instant::now();
        let outcome = tokio::time::timeout(
            timeouts.chunk,
            scan_chunk_with_retry(client, chain, family, &topics, cursor, chunk_to, &mut max_range, telemetry, timeouts),
        )
        .await
        .context("chunk scan timed out")??;
        telemetry.catchup_chunk_ms(chain.chain_id, family.as_str(), chunk_started.elapsed().as_millis() as u64);

        if let ChunkOutcome::Processed(logs) = outcome {
            for sub_batch in logs.chunks(SUB_BATCH_SIZE) {
                let sub_batch_result = tokio::time::timeout(timeouts.batch, async {
                    for log in sub_batch {
                        telemetry.log_processed(chain.chain_id, family.as_str());
                        match processor::process_log(db, chain.chain_id, family, log, timeouts).await {
                            Ok(ProcessOutcome::Persisted) => stats.persisted += 1,
                            Ok(ProcessOutcome::Duplicate) => {
                                stats.duplicates += 1;
                                telemetry.duplicate_absorbed(chain.chain_id, family.as_str());
                            }
                            Ok(ProcessOutcome::MissingAntecedent) => {
                                stats.missing_antecedent += 1;
                                telemetry.missing_antecedent_skip(chain.chain_id, family.as_str());
                            }
                            Ok(ProcessOutcome::UnknownSignature) => {
                                stats.unknown_signature += 1;
                                telemetry.decode_failure(chain.chain_id, family.as_str());
                            }
                            Err(e) => {
                                telemetry.decode_failure(chain.chain_id, family.as_str());
                                return Err(e.context(format!(
                                    "process log chain={} family={family} block={:?}",
                                    chain.chain_id, log.block_number
                                )));
                            }
                        }
                    }
                    Ok(())
                })
                .await
                .context("sub-batch processing timed out")?;
                sub_batch_result?;

                // §4.5 step 2e: advance the in-memory checkpoint to the
                // sub-batch's highest block as soon as it is durably applied.
                if let Some(highest) = sub_batch.iter().filter_map(|l| l.block_number).max() {
                    match tokio::time::timeout(timeouts.store_write, checkpoints.set(chain.chain_id, family, highest)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::warn!(chain_id = chain.chain_id, %family, error = %e, "checkpoint write failed, will retry on next advance");
                        }
                        Err(_) => {
                            tracing::warn!(chain_id = chain.chain_id, %family, "checkpoint write timed out, will retry on next advance");
                        }
                    }
                }
            }
        }

        match tokio::time::timeout(timeouts.store_write, checkpoints.set(chain.chain_id, family, chunk_to)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(chain_id = chain.chain_id, %family, error = %e, "checkpoint write failed, will retry on next chunk");
            }
            Err(_) => {
                tracing::warn!(chain_id = chain.chain_id, %family, "checkpoint write timed out, will retry on next chunk");
            }
        }

        from = chunk_to + 1;
        cursor = from;
    }

    Ok(stats)
}

/// Scans `[from, to]`, shrinking `max_range` in half and retrying on a
/// "range too large" classification, and retrying transient errors with a
/// short fixed backoff (§7's retry taxonomy). `max_range` is updated in
/// place so later chunks in this run benefit from the learned ceiling.
async fn scan_chunk_with_retry(
    client: &dyn BlockClient,
    chain: &ChainDescriptor,
    family: EventFamily,
    topics: &[alloy::primitives::B256],
    from: u64,
    to: u64,
    max_range: &mut u64,
    telemetry: &IndexerTelemetry,
    timeouts: &Timeouts,
) -> Result<ChunkOutcome> {
    let mut attempt_from = from;
    let mut attempt_to = to;
    let mut transient_retries = 0;

    loop {
        let result = scanner::scan_chunk(
            client,
            chain.contract_address,
            topics,
            attempt_from,
            attempt_to,
            family.uses_bloom_sampling() && chain.sample_first,
            timeouts.filter_logs,
        )
        .await;

        match result {
            Ok(outcome) => return Ok(outcome),
            Err(e) if looks_like_range_too_large(&e) => {
                telemetry.rpc_error(chain.chain_id, "filter_logs");
                *max_range = (*max_range / 2).max(1);
                attempt_to = attempt_from.saturating_add(max_range.saturating_sub(1)).min(to);
                tracing::warn!(
                    chain_id = chain.chain_id,
                    %family,
                    new_max_range = *max_range,
                    "range too large, shrinking chunk"
                );
                if attempt_to == attempt_from && *max_range == 1 && transient_retries > 20 {
                    return Err(e.context("range too large even at max_range=1"));
                }
            }
            Err(e) if looks_like_transient(&e) && transient_retries < 5 => {
                telemetry.rpc_error(chain.chain_id, "filter_logs");
                transient_retries += 1;
                tokio::time::sleep(Duration::from_millis(500 * transient_retries)).await;
            }
            Err(e) => {
                telemetry.rpc_error(chain.chain_id, "filter_logs");
                return Err(e.context("scan chunk"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainDescriptor;
    use crate::db::{FulfillmentRow, IntentRecord, IntentRow, IntentStatus, SettlementRow, WriteOutcome};
    use alloy::primitives::{Address, B256};
    use alloy::rpc::types::{Log, Transaction};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeClient {
        head: u64,
        logs_by_range: Mutex<HashMap<(u64, u64), Vec<Log>>>,
    }

    #[async_trait]
    impl BlockClient for FakeClient {
        async fn head_block(&self) -> Result<u64> {
            Ok(self.head)
        }
        async fn filter_logs(&self, from: u64, to: u64, _address: Address, _topics: &[B256]) -> Result<Vec<Log>> {
            Ok(self
                .logs_by_range
                .lock()
                .unwrap()
                .get(&(from, to))
                .cloned()
                .unwrap_or_default())
        }
        async fn get_transaction(&self, _hash: B256) -> Result<Option<Transaction>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct FakeDb {
        checkpoints: Mutex<HashMap<(u64, &'static str), u64>>,
        intents: Mutex<HashMap<B256, IntentRecord>>,
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
        async fn get_intent(&self, id: B256) -> Result<Option<IntentRecord>> {
            Ok(self.intents.lock().unwrap().get(&id).cloned())
        }
        async fn create_intent(&self, row: IntentRow) -> Result<WriteOutcome> {
            let mut intents = self.intents.lock().unwrap();
            if intents.contains_key(&row.id) {
                return Ok(WriteOutcome::Duplicate);
            }
            intents.insert(row.id, IntentRecord { id: row.id, chain_id: row.chain_id, status: "created".into() });
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

    fn test_chain() -> ChainDescriptor {
        let mut chain = ChainDescriptor::new(1, Address::ZERO, 1);
        chain.max_range = 1_000;
        chain
    }

    #[tokio::test]
    async fn catchup_with_empty_checkpoint_starts_at_default_start_block() {
        let client = FakeClient { head: 1, logs_by_range: Mutex::new(HashMap::new()) };
        let db = FakeDb::default();
        let checkpoints = CheckpointStore::new(Arc::new(FakeDb::default()));
        let chain = test_chain();
        let cancel = CancellationToken::new();

        let telemetry = IndexerTelemetry::new();
        let stats = run(&client, &db, &checkpoints, &chain, EventFamily::Intent, &telemetry, &cancel, &Timeouts::default())
            .await
            .unwrap();
        assert_eq!(stats.persisted, 0);
        let checkpoint = checkpoints.get_or_default(1, EventFamily::Intent, 0).await.unwrap();
        assert_eq!(checkpoint, 1);
    }

    #[tokio::test]
    async fn head_below_checkpoint_does_nothing() {
        let client = FakeClient { head: 1, logs_by_range: Mutex::new(HashMap::new()) };
        let db = FakeDb::default();
        let inner_db = Arc::new(FakeDb::default());
        inner_db.set_checkpoint(1, EventFamily::Intent, 500).await.unwrap();
        let checkpoints = CheckpointStore::new(inner_db);
        let chain = test_chain();
        let cancel = CancellationToken::new();

        let telemetry = IndexerTelemetry::new();
        let stats = run(&client, &db, &checkpoints, &chain, EventFamily::Intent, &telemetry, &cancel, &Timeouts::default())
            .await
            .unwrap();
        assert_eq!(stats.persisted, 0);
        assert_eq!(stats.duplicates, 0);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_early() {
        let client = FakeClient { head: 10_000, logs_by_range: Mutex::new(HashMap::new()) };
        let db = FakeDb::default();
        let checkpoints = CheckpointStore::new(Arc::new(FakeDb::default()));
        let chain = test_chain();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let telemetry = IndexerTelemetry::new();
        let stats = run(&client, &db, &checkpoints, &chain, EventFamily::Intent, &telemetry, &cancel, &Timeouts::default())
            .await
            .unwrap();
        assert_eq!(stats.persisted, 0);
    }
}
