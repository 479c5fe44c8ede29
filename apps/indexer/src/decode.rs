//! EventCodec (§6 consumed interface): validates and decodes a raw `Log` into a typed
//! [`DecodedEvent`] for one [`EventFamily`], mirroring the teacher's
//! `decode_event`/`StreamEvent` shape but dispatching on the family's two
//! known topic0 signatures instead of a closed per-contract enum.

use crate::chain::EventFamily;
use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use indexer_bindings::{FulfillmentEvents, IntentEvents, SettlementEvents};

#[derive(Debug, Clone)]
pub enum DecodeError {
    /// §7: the log's `topic[0]` doesn't match either signature known for
    /// this family. Treated as fatal for that log — logged and skipped,
    /// never retried.
    UnknownSignature,
    /// The log is missing block/tx metadata the processor requires to form
    /// a dedup key (§3's Log entity).
    MissingMetadata(&'static str),
    /// ABI decoding of `data` or the indexed topics failed.
    Malformed(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::UnknownSignature => write!(f, "unknown event signature"),
            DecodeError::MissingMetadata(field) => write!(f, "log missing {field}"),
            DecodeError::Malformed(msg) => write!(f, "malformed event data: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug, Clone)]
pub struct LogMeta {
    pub chain_id: u64,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u32,
}

#[derive(Debug, Clone)]
pub enum DecodedEvent {
    Intent {
        meta: LogMeta,
        intent_id: B256,
        creator: Address,
        token: Address,
        amount: U256,
        destination_token: Address,
        min_amount_out: U256,
        receiver: Address,
        deadline: u64,
    },
    Fulfillment {
        meta: LogMeta,
        intent_id: B256,
        solver: Address,
        destination_token: Address,
        amount_out: U256,
        receiver: Address,
    },
    Settlement {
        meta: LogMeta,
        intent_id: B256,
        solver: Address,
        settled_amount: U256,
        failed: bool,
    },
}

impl DecodedEvent {
    pub fn intent_id(&self) -> B256 {
        match self {
            DecodedEvent::Intent { intent_id, .. }
            | DecodedEvent::Fulfillment { intent_id, .. }
            | DecodedEvent::Settlement { intent_id, .. } => *intent_id,
        }
    }
}

fn log_meta(chain_id: u64, log: &Log) -> Result<LogMeta, DecodeError> {
    Ok(LogMeta {
        chain_id,
        block_number: log.block_number.ok_or(DecodeError::MissingMetadata("blockNumber"))?,
        tx_hash: log
            .transaction_hash
            .ok_or(DecodeError::MissingMetadata("transactionHash"))?,
        log_index: log
            .log_index
            .ok_or(DecodeError::MissingMetadata("logIndex"))?
            .try_into()
            .map_err(|_| DecodeError::Malformed("logIndex overflowed u32".into()))?,
    })
}

fn decode_raw<E: SolEvent>(log: &Log) -> Result<E, DecodeError> {
    E::decode_raw_log(log.topics().iter().copied(), log.data().data.as_ref())
        .map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Decodes `log` as a member of `family`, dispatching on `topic[0]` against
/// the family's base/with-call signature pair. The with-call variant
/// carries an extra calldata field the indexer does not currently persist;
/// only the shared fields are extracted either way.
pub fn decode(chain_id: u64, family: EventFamily, log: &Log) -> Result<DecodedEvent, DecodeError> {
    let topic0 = log.topic0().copied().ok_or(DecodeError::UnknownSignature)?;
    let [base_sig, with_call_sig] = family.topic_signatures();

    if topic0 != base_sig && topic0 != with_call_sig {
        return Err(DecodeError::UnknownSignature);
    }

    let meta = log_meta(chain_id, log)?;

    match family {
        EventFamily::Intent => {
            let (intent_id, creator, token, amount, destination_token, min_amount_out, receiver, deadline) =
                if topic0 == base_sig {
                    let ev: IntentEvents::IntentCreated = decode_raw(log)?;
                    (
                        ev.intentId,
                        ev.creator,
                        ev.token,
                        ev.amount,
                        ev.destinationToken,
                        ev.minAmountOut,
                        ev.receiver,
                        ev.deadline,
                    )
                } else {
                    let ev: IntentEvents::IntentCreatedWithCall = decode_raw(log)?;
                    (
                        ev.intentId,
                        ev.creator,
                        ev.token,
                        ev.amount,
                        ev.destinationToken,
                        ev.minAmountOut,
                        ev.receiver,
                        ev.deadline,
                    )
                };
            let deadline: u64 = deadline
                .try_into()
                .map_err(|_| DecodeError::Malformed("deadline overflowed u64".into()))?;
            Ok(DecodedEvent::Intent {
                meta,
                intent_id,
                creator,
                token,
                amount,
                destination_token,
                min_amount_out,
                receiver,
                deadline,
            })
        }
        EventFamily::Fulfillment => {
            let (intent_id, solver, destination_token, amount_out, receiver) = if topic0 == base_sig {
                let ev: FulfillmentEvents::IntentFulfilled = decode_raw(log)?;
                (ev.intentId, ev.solver, ev.destinationToken, ev.amountOut, ev.receiver)
            } else {
                let ev: FulfillmentEvents::IntentFulfilledWithCall = decode_raw(log)?;
                (ev.intentId, ev.solver, ev.destinationToken, ev.amountOut, ev.receiver)
            };
            Ok(DecodedEvent::Fulfillment {
                meta,
                intent_id,
                solver,
                destination_token,
                amount_out,
                receiver,
            })
        }
        EventFamily::Settlement => {
            let (intent_id, solver, settled_amount, failed) = if topic0 == base_sig {
                let ev: SettlementEvents::IntentSettled = decode_raw(log)?;
                (ev.intentId, ev.solver, ev.settledAmount, ev.failed)
            } else {
                let ev: SettlementEvents::IntentSettledWithCall = decode_raw(log)?;
                (ev.intentId, ev.solver, ev.settledAmount, ev.failed)
            };
            Ok(DecodedEvent::Settlement {
                meta,
                intent_id,
                solver,
                settled_amount,
                failed,
            })
        }
    }
}
