//! Bloom Sampler (§4.3): a cheap probe deciding whether a block range
//! plausibly contains logs matching a topic set, used only by Intent
//! catchup on "sample-first" chains.

use crate::blockclient::BlockClient;
use alloy::primitives::{Address, B256};
use anyhow::Result;

const PROBE_COUNT: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeVerdict {
    /// All probes found zero logs; the range may be skipped.
    Empty,
    /// At least one probe found a log, or a probe errored (conservative).
    PossiblyNonEmpty,
}

/// Evenly spaces up to [`PROBE_COUNT`] single-block probes across `[from, to]`
/// and asks whether any of them observed a log for `topics` at `address`.
pub async fn probe_range(
    client: &dyn BlockClient,
    address: Address,
    topics: &[B256],
    from: u64,
    to: u64,
) -> RangeVerdict {
    for block in probe_blocks(from, to) {
        match client.filter_logs(block, block, address, topics).await {
            Ok(logs) if !logs.is_empty() => return RangeVerdict::PossiblyNonEmpty,
            Ok(_) => continue,
            // An RPC error during probing conservatively processes the range (§4.3).
            Err(_) => return RangeVerdict::PossiblyNonEmpty,
        }
    }
    RangeVerdict::Empty
}

/// Evenly spaced probe block numbers within `[from, to]`, inclusive, capped
/// at [`PROBE_COUNT`] and deduplicated for ranges shorter than that.
fn probe_blocks(from: u64, to: u64) -> Vec<u64> {
    if to < from {
        return Vec::new();
    }
    let span = to - from;
    let mut blocks = Vec::with_capacity(PROBE_COUNT as usize);
    for i in 0..PROBE_COUNT {
        let offset = span.saturating_mul(i) / PROBE_COUNT.max(1);
        let block = from.saturating_add(offset);
        if !blocks.contains(&block) {
            blocks.push(block);
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockclient::BlockClient;
    use alloy::rpc::types::{Log, Transaction};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeClient {
        /// Maps a probed block number to the logs it should "return".
        logs_by_block: Mutex<std::collections::HashMap<u64, Vec<Log>>>,
        err_on: Mutex<std::collections::HashSet<u64>>,
    }

    #[async_trait]
    impl BlockClient for FakeClient {
        async fn head_block(&self) -> Result<u64> {
            Ok(0)
        }

        async fn filter_logs(
            &self,
            from: u64,
            _to: u64,
            _address: Address,
            _topics: &[B256],
        ) -> Result<Vec<Log>> {
            if self.err_on.lock().unwrap().contains(&from) {
                anyhow::bail!("boom");
            }
            Ok(self
                .logs_by_block
                .lock()
                .unwrap()
                .get(&from)
                .cloned()
                .unwrap_or_default())
        }

        async fn get_transaction(&self, _hash: B256) -> Result<Option<Transaction>> {
            Ok(None)
        }
    }

    #[test]
    fn probe_blocks_span_1000_is_17000001_17000334_17000667() {
        // S2 from spec.md: chunk 17,000,001..17,001,000 probes exactly these three.
        assert_eq!(
            probe_blocks(17_000_001, 17_001_000),
            vec![17_000_001, 17_000_334, 17_000_667]
        );
    }

    #[test]
    fn probe_blocks_deduplicates_for_short_ranges() {
        let blocks = probe_blocks(10, 10);
        assert_eq!(blocks, vec![10]);
    }

    #[tokio::test]
    async fn all_empty_probes_yield_empty_verdict() {
        let client = FakeClient {
            logs_by_block: Mutex::new(Default::default()),
            err_on: Mutex::new(Default::default()),
        };
        let verdict = probe_range(&client, Address::ZERO, &[B256::ZERO], 17_000_001, 17_001_000)
            .await;
        assert_eq!(verdict, RangeVerdict::Empty);
    }

    fn sample_log() -> Log {
        serde_json::from_value(serde_json::json!({
            "address": "0x0000000000000000000000000000000000000000",
            "topics": [],
            "data": "0x",
            "blockNumber": "0x1",
            "transactionHash": "0x0000000000000000000000000000000000000000000000000000000000000001",
            "transactionIndex": "0x0",
            "blockHash": "0x0000000000000000000000000000000000000000000000000000000000000002",
            "logIndex": "0x0",
            "removed": false
        }))
        .expect("sample log parses")
    }

    #[tokio::test]
    async fn one_nonempty_probe_yields_possibly_nonempty() {
        let mut map = std::collections::HashMap::new();
        map.insert(17_000_334, vec![sample_log()]);
        let client = FakeClient {
            logs_by_block: Mutex::new(map),
            err_on: Mutex::new(Default::default()),
        };
        let verdict = probe_range(&client, Address::ZERO, &[B256::ZERO], 17_000_001, 17_001_000)
            .await;
        assert_eq!(verdict, RangeVerdict::PossiblyNonEmpty);
    }

    #[tokio::test]
    async fn probe_error_is_conservative() {
        let mut err_on = std::collections::HashSet::new();
        err_on.insert(17_000_001);
        let client = FakeClient {
            logs_by_block: Mutex::new(Default::default()),
            err_on: Mutex::new(err_on),
        };
        let verdict = probe_range(&client, Address::ZERO, &[B256::ZERO], 17_000_001, 17_001_000)
            .await;
        assert_eq!(verdict, RangeVerdict::PossiblyNonEmpty);
    }
}
