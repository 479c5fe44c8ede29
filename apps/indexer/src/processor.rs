//! Event Processor (§4.4): turns one decoded log into a store write,
//! applying the antecedent check and duplicate-as-success rule from §7.

use crate::chain::EventFamily;
use crate::config::Timeouts;
use crate::db::{Database, FulfillmentRow, SettlementRow, IntentRow, WriteOutcome};
use crate::decode::{self, DecodedEvent, LogMeta};
use alloy::rpc::types::Log;
use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A new row was persisted.
    Persisted,
    /// The store already had this row; treated as success, not an error (§7).
    Duplicate,
    /// Fulfillment/Settlement referenced an intent the store has never seen;
    /// skipped without retry (§4.4, §9).
    MissingAntecedent,
    /// The log didn't match a known signature for this family; skipped.
    UnknownSignature,
}

/// Processes one log already known to belong to `family` on `chain_id`.
///
/// Decode failures other than an unrecognized signature propagate as an
/// `Err` — they indicate a bindings/ABI mismatch the operator needs to see,
/// not a routine skip.
pub async fn process_log(
    db: &dyn Database,
    chain_id: u64,
    family: EventFamily,
    log: &Log,
    timeouts: &Timeouts,
) -> Result<ProcessOutcome> {
    let decoded = match decode::decode(chain_id, family, log) {
        Ok(decoded) => decoded,
        Err(decode::DecodeError::UnknownSignature) => return Ok(ProcessOutcome::UnknownSignature),
        Err(e) => return Err(anyhow::anyhow!(e).context("decode log")),
    };

    if family.requires_antecedent() {
        let intent_id = decoded.intent_id();
        let found = tokio::time::timeout(timeouts.dedup_lookup, db.get_intent(intent_id))
            .await
            .context("dedup lookup timed out")??;
        if found.is_none() {
            return Ok(ProcessOutcome::MissingAntecedent);
        }
    }

    let outcome = tokio::time::timeout(timeouts.store_write, persist(db, decoded))
        .await
        .context("store write timed out")??;
    Ok(match outcome {
        WriteOutcome::Inserted => ProcessOutcome::Persisted,
        WriteOutcome::Duplicate => ProcessOutcome::Duplicate,
    })
}

async fn persist(db: &dyn Database, decoded: DecodedEvent) -> Result<WriteOutcome> {
    match decoded {
        DecodedEvent::Intent {
            meta: LogMeta { chain_id, block_number, tx_hash, log_index },
            intent_id,
            creator,
            token,
            amount,
            destination_token,
            min_amount_out,
            receiver,
            deadline,
        } => {
            db.create_intent(IntentRow {
                id: intent_id,
                chain_id,
                creator,
                token,
                amount,
                destination_token,
                min_amount_out,
                receiver,
                deadline,
                block_number,
                tx_hash,
                log_index,
            })
            .await
        }
        DecodedEvent::Fulfillment {
            meta: LogMeta { chain_id, block_number, tx_hash, log_index },
            intent_id,
            solver,
            destination_token,
            amount_out,
            receiver,
        } => {
            let outcome = db
                .create_fulfillment(FulfillmentRow {
                    intent_id,
                    chain_id,
                    solver,
                    destination_token,
                    amount_out,
                    receiver,
                    block_number,
                    tx_hash,
                    log_index,
                })
                .await?;
            if outcome == WriteOutcome::Inserted {
                db.update_intent_status(intent_id, crate::db::IntentStatus::Fulfilled).await?;
            }
            Ok(outcome)
        }
        DecodedEvent::Settlement {
            meta: LogMeta { chain_id, block_number, tx_hash, log_index },
            intent_id,
            solver,
            settled_amount,
            failed,
        } => {
            let outcome = db
                .create_settlement(SettlementRow {
                    intent_id,
                    chain_id,
                    solver,
                    settled_amount,
                    failed,
                    block_number,
                    tx_hash,
                    log_index,
                })
                .await?;
            if outcome == WriteOutcome::Inserted {
                let status = if failed {
                    crate::db::IntentStatus::Failed
                } else {
                    crate::db::IntentStatus::Settled
                };
                db.update_intent_status(intent_id, status).await?;
            }
            Ok(outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::IntentRecord;
    use alloy::primitives::B256;
    use alloy::sol_types::SolEvent;
    use async_trait::async_trait;
    use indexer_bindings::{FulfillmentEvents, IntentEvents};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeDb {
        intents: Mutex<HashMap<B256, IntentRecord>>,
        fulfillments: Mutex<Vec<FulfillmentRow>>,
    }

    #[async_trait]
    impl Database for FakeDb {
        async fn get_checkpoint(&self, _chain_id: u64, _family: EventFamily) -> Result<u64> {
            Ok(0)
        }
        async fn set_checkpoint(&self, _chain_id: u64, _family: EventFamily, _block: u64) -> Result<()> {
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
            intents.insert(
                row.id,
                IntentRecord {
                    id: row.id,
                    chain_id: row.chain_id,
                    status: "created".into(),
                },
            );
            Ok(WriteOutcome::Inserted)
        }
        async fn create_fulfillment(&self, row: FulfillmentRow) -> Result<WriteOutcome> {
            let mut fulfillments = self.fulfillments.lock().unwrap();
            if fulfillments.iter().any(|f| f.intent_id == row.intent_id) {
                return Ok(WriteOutcome::Duplicate);
            }
            fulfillments.push(row);
            Ok(WriteOutcome::Inserted)
        }
        async fn create_settlement(&self, _row: SettlementRow) -> Result<WriteOutcome> {
            Ok(WriteOutcome::Inserted)
        }
        async fn update_intent_status(&self, id: B256, status: crate::db::IntentStatus) -> Result<()> {
            if let Some(rec) = self.intents.lock().unwrap().get_mut(&id) {
                rec.status = status.as_str().into();
            }
            Ok(())
        }
    }

    const ZERO_WORD: &str = "0000000000000000000000000000000000000000000000000000000000000000";

    fn intent_log(intent_id: B256) -> Log {
        let topic0 = IntentEvents::IntentCreated::SIGNATURE_HASH;
        // 6 non-indexed fields (token, amount, destinationToken, minAmountOut,
        // receiver, deadline), each a zeroed 32-byte word; values are
        // irrelevant to these tests, only decodability matters.
        let data_hex = format!("0x{}", ZERO_WORD.repeat(6));
        serde_json::from_value(serde_json::json!({
            "address": "0x0000000000000000000000000000000000000000",
            "topics": [
                format!("0x{}", hex::encode(topic0.as_slice())),
                format!("0x{}", hex::encode(intent_id.as_slice())),
                format!("0x{ZERO_WORD}"),
            ],
            "data": data_hex,
            "blockNumber": "0x64",
            "transactionHash": "0x0000000000000000000000000000000000000000000000000000000000000001",
            "transactionIndex": "0x0",
            "blockHash": "0x0000000000000000000000000000000000000000000000000000000000000002",
            "logIndex": "0x1",
            "removed": false
        }))
        .expect("intent log json parses")
    }

    fn fulfillment_log(intent_id: B256) -> Log {
        let topic0 = FulfillmentEvents::IntentFulfilled::SIGNATURE_HASH;
        // 3 non-indexed fields (destinationToken, amountOut, receiver).
        let data_hex = format!("0x{}", ZERO_WORD.repeat(3));
        serde_json::from_value(serde_json::json!({
            "address": "0x0000000000000000000000000000000000000000",
            "topics": [
                format!("0x{}", hex::encode(topic0.as_slice())),
                format!("0x{}", hex::encode(intent_id.as_slice())),
                format!("0x{ZERO_WORD}"),
            ],
            "data": data_hex,
            "blockNumber": "0x65",
            "transactionHash": "0x0000000000000000000000000000000000000000000000000000000000000003",
            "transactionIndex": "0x0",
            "blockHash": "0x0000000000000000000000000000000000000000000000000000000000000004",
            "logIndex": "0x1",
            "removed": false
        }))
        .expect("fulfillment log json parses")
    }

    #[tokio::test]
    async fn fulfillment_with_missing_intent_is_skipped() {
        let db = FakeDb::default();
        let log = fulfillment_log(B256::with_last_byte(9));
        let outcome = process_log(&db, 1, EventFamily::Fulfillment, &log, &Timeouts::default()).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::MissingAntecedent);
    }

    #[tokio::test]
    async fn intent_then_fulfillment_persists_both() {
        let db = FakeDb::default();
        let intent_id = B256::with_last_byte(9);
        let intent_outcome = process_log(&db, 1, EventFamily::Intent, &intent_log(intent_id), &Timeouts::default())
            .await
            .unwrap();
        assert_eq!(intent_outcome, ProcessOutcome::Persisted);

        let fulfillment_outcome =
            process_log(&db, 1, EventFamily::Fulfillment, &fulfillment_log(intent_id), &Timeouts::default())
                .await
                .unwrap();
        assert_eq!(fulfillment_outcome, ProcessOutcome::Persisted);
    }

    #[tokio::test]
    async fn duplicate_intent_log_is_not_an_error() {
        let db = FakeDb::default();
        let intent_id = B256::with_last_byte(9);
        let log = intent_log(intent_id);
        process_log(&db, 1, EventFamily::Intent, &log, &Timeouts::default()).await.unwrap();
        let second = process_log(&db, 1, EventFamily::Intent, &log, &Timeouts::default()).await.unwrap();
        assert_eq!(second, ProcessOutcome::Duplicate);
    }
}
