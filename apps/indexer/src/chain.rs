//! Chain and event-family descriptors.
//!
//! A [`ChainDescriptor`] is immutable once constructed at startup (§3 of the
//! design). [`TransportKind`] replaces the source's hard-coded chain-id
//! predicate for selecting push vs. poll delivery with an explicit field.

use alloy::primitives::{Address, B256};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Push-mode log subscription (§4.6).
    Subscription,
    /// Pull-mode polling (§4.7), for endpoints without reliable push delivery.
    Poller,
}

#[derive(Debug, Clone)]
pub struct ChainDescriptor {
    pub chain_id: u64,
    pub contract_address: Address,
    pub default_start_block: u64,
    pub poll_interval: Duration,
    pub max_range: u64,
    /// Probe the Bloom Sampler before scanning a chunk (§4.2, §4.3).
    /// Only ever set for Intent catchup on high-density chains.
    pub sample_first: bool,
    pub transport: TransportKind,
    /// HTTP JSON-RPC endpoints, tried in round-robin order (§4.2, §6 BlockClient).
    pub rpc_http_urls: Vec<String>,
    /// Required when `transport` is `Subscription`.
    pub rpc_ws_url: Option<String>,
}

impl ChainDescriptor {
    pub fn new(chain_id: u64, contract_address: Address, default_start_block: u64) -> Self {
        Self {
            chain_id,
            contract_address,
            default_start_block,
            poll_interval: Duration::from_secs(15),
            max_range: 5_000,
            sample_first: false,
            transport: TransportKind::Subscription,
            rpc_http_urls: Vec::new(),
            rpc_ws_url: None,
        }
    }
}

/// The tagged union that selects decoder, topic set, dedup policy, and store
/// method for one of the three event families (§3, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFamily {
    Intent,
    Fulfillment,
    Settlement,
}

impl EventFamily {
    pub const ALL_IN_CATCHUP_ORDER: [EventFamily; 3] =
        [EventFamily::Intent, EventFamily::Fulfillment, EventFamily::Settlement];

    pub const fn as_str(self) -> &'static str {
        match self {
            EventFamily::Intent => "intent",
            EventFamily::Fulfillment => "fulfillment",
            EventFamily::Settlement => "settlement",
        }
    }

    /// Whether this family requires its antecedent (an existing Intent) to
    /// be present before a log is applied (§4.4, §7).
    pub const fn requires_antecedent(self) -> bool {
        match self {
            EventFamily::Intent => false,
            EventFamily::Fulfillment | EventFamily::Settlement => true,
        }
    }

    /// Whether catchup for this family should consult the Bloom Sampler
    /// before scanning a chunk (§4.3: Intent-only, because Fulfillment and
    /// Settlement ranges are assumed small).
    pub const fn uses_bloom_sampling(self) -> bool {
        matches!(self, EventFamily::Intent)
    }

    /// The base-event and with-call-event topic0 hashes for this family.
    pub fn topic_signatures(self) -> [B256; 2] {
        use alloy::sol_types::SolEvent;
        use indexer_bindings::{FulfillmentEvents, IntentEvents, SettlementEvents};
        match self {
            EventFamily::Intent => [
                IntentEvents::IntentCreated::SIGNATURE_HASH,
                IntentEvents::IntentCreatedWithCall::SIGNATURE_HASH,
            ],
            EventFamily::Fulfillment => [
                FulfillmentEvents::IntentFulfilled::SIGNATURE_HASH,
                FulfillmentEvents::IntentFulfilledWithCall::SIGNATURE_HASH,
            ],
            EventFamily::Settlement => [
                SettlementEvents::IntentSettled::SIGNATURE_HASH,
                SettlementEvents::IntentSettledWithCall::SIGNATURE_HASH,
            ],
        }
    }
}

impl std::fmt::Display for EventFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_intent_uses_bloom_sampling() {
        assert!(EventFamily::Intent.uses_bloom_sampling());
        assert!(!EventFamily::Fulfillment.uses_bloom_sampling());
        assert!(!EventFamily::Settlement.uses_bloom_sampling());
    }

    #[test]
    fn only_intent_has_no_antecedent() {
        assert!(!EventFamily::Intent.requires_antecedent());
        assert!(EventFamily::Fulfillment.requires_antecedent());
        assert!(EventFamily::Settlement.requires_antecedent());
    }

    #[test]
    fn catchup_order_is_intent_fulfillment_settlement() {
        assert_eq!(
            EventFamily::ALL_IN_CATCHUP_ORDER,
            [EventFamily::Intent, EventFamily::Fulfillment, EventFamily::Settlement]
        );
    }

    #[test]
    fn topic_signatures_are_two_distinct_hashes_per_family() {
        for family in EventFamily::ALL_IN_CATCHUP_ORDER {
            let [base, with_call] = family.topic_signatures();
            assert_ne!(base, with_call);
        }
    }
}
