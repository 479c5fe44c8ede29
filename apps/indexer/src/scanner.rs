//! Log Scanner (§4.2): splits a block range into chunks bounded by a
//! chain-specific `max_range`, optionally Bloom-samples each chunk first,
//! and fetches `FilterLogs` under a bounded timeout.

use crate::blockclient::BlockClient;
use crate::bloom::{self, RangeVerdict};
use alloy::primitives::{Address, B256};
use alloy::rpc::types::Log;
use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug)]
pub enum ChunkOutcome {
    /// The chunk was scanned; these are its logs in `(block, log-index)` order.
    Processed(Vec<Log>),
    /// The Bloom Sampler declared the chunk empty; no `FilterLogs` was issued.
    Skipped,
}

/// Splits `[from, to]` into ascending, non-overlapping, inclusive chunks of
/// at most `max_range` blocks each.
pub fn chunk_ranges(from: u64, to: u64, max_range: u64) -> Vec<(u64, u64)> {
    if from > to {
        return Vec::new();
    }
    let max_range = max_range.max(1);
    let mut chunks = Vec::new();
    let mut start = from;
    while start <= to {
        let end = to.min(start.saturating_add(max_range - 1));
        chunks.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    chunks
}

/// Scans one chunk: Bloom-samples it first when `sample_first` is set, then
/// fetches logs under `filter_timeout` unless the sample says the chunk is
/// empty.
pub async fn scan_chunk(
    client: &dyn BlockClient,
    address: Address,
    topics: &[B256],
    from: u64,
    to: u64,
    sample_first: bool,
    filter_timeout: Duration,
) -> Result<ChunkOutcome> {
    if sample_first {
        match bloom::probe_range(client, address, topics, from, to).await {
            RangeVerdict::Empty => return Ok(ChunkOutcome::Skipped),
            RangeVerdict::PossiblyNonEmpty => {}
        }
    }

    let mut logs = tokio::time::timeout(filter_timeout, client.filter_logs(from, to, address, topics))
        .await
        .context("filter_logs timed out")??;

    logs.sort_by_key(|l| (l.block_number.unwrap_or(0), l.log_index.unwrap_or(0)));
    Ok(ChunkOutcome::Processed(logs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_when_range_fits() {
        // S8: to - from < chunk size => exactly one chunk.
        assert_eq!(chunk_ranges(1, 500, 1_000), vec![(1, 500)]);
    }

    #[test]
    fn splits_into_multiple_ascending_chunks() {
        assert_eq!(
            chunk_ranges(1, 2_500, 1_000),
            vec![(1, 1_000), (1_001, 2_000), (2_001, 2_500)]
        );
    }

    #[test]
    fn empty_range_yields_no_chunks() {
        // §8 property 7: checkpoint == head means from > to, no chunks.
        assert_eq!(chunk_ranges(100, 99, 1_000), Vec::new());
    }

    #[test]
    fn single_block_range_yields_one_chunk() {
        // S1: from == to, one chunk issued.
        assert_eq!(chunk_ranges(322_207_320, 322_207_400, 5_000), vec![(322_207_320, 322_207_400)]);
    }
}
