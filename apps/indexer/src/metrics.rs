//! OpenTelemetry instrumentation (§6 metrics exposition surface), modeled on the solver's
//! `SolverTelemetry` (`apps/solver/src/metrics.rs`): a `Meter`-backed struct
//! of counters and histograms, cloned cheaply via an `Arc` inner.

use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, UpDownCounter},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct IndexerTelemetry {
    inner: Arc<Inner>,
}

struct Inner {
    logs_processed_total: Counter<u64>,
    duplicates_absorbed_total: Counter<u64>,
    missing_antecedent_skips_total: Counter<u64>,
    decode_failures_total: Counter<u64>,
    rpc_errors_total: Counter<u64>,
    reconnect_attempts_total: Counter<u64>,
    restarts_total: Counter<u64>,

    rpc_ms: Histogram<u64>,
    catchup_chunk_ms: Histogram<u64>,

    /// §6's `ActiveGoroutines` gauge, exposed as an up-down counter since
    /// this crate observes absolute task counts rather than deltas.
    active_tasks: UpDownCounter<i64>,
    last_active_tasks: std::sync::atomic::AtomicI64,
}

impl IndexerTelemetry {
    pub fn new() -> Self {
        let meter = global::meter("indexer");

        let logs_processed_total = meter
            .u64_counter("indexer.logs_processed_total")
            .with_description("Total logs handed to the Event Processor")
            .build();
        let duplicates_absorbed_total = meter
            .u64_counter("indexer.duplicates_absorbed_total")
            .with_description("Total logs that were already persisted")
            .build();
        let missing_antecedent_skips_total = meter
            .u64_counter("indexer.missing_antecedent_skips_total")
            .with_description("Total Fulfillment/Settlement logs skipped for a missing Intent")
            .build();
        let decode_failures_total = meter
            .u64_counter("indexer.decode_failures_total")
            .with_description("Total logs that failed ABI decoding or had an unknown signature")
            .build();
        let rpc_errors_total = meter
            .u64_counter("indexer.rpc_errors_total")
            .with_description("Total BlockClient call failures")
            .build();
        let reconnect_attempts_total = meter
            .u64_counter("indexer.reconnect_attempts_total")
            .with_description("Total subscription reconnect attempts")
            .build();
        let restarts_total = meter
            .u64_counter("indexer.restarts_total")
            .with_description("Total per-(chain,family) task restarts by the Coordinator")
            .build();

        let rpc_ms = meter
            .u64_histogram("indexer.rpc_ms")
            .with_description("BlockClient call runtime")
            .with_unit("ms")
            .build();
        let catchup_chunk_ms = meter
            .u64_histogram("indexer.catchup_chunk_ms")
            .with_description("Per-chunk catchup scan runtime")
            .with_unit("ms")
            .build();

        let active_tasks = meter
            .i64_up_down_counter("indexer.active_tasks")
            .with_description("Number of currently running (chain,family) tasks")
            .build();

        Self {
            inner: Arc::new(Inner {
                logs_processed_total,
                duplicates_absorbed_total,
                missing_antecedent_skips_total,
                decode_failures_total,
                rpc_errors_total,
                reconnect_attempts_total,
                restarts_total,
                rpc_ms,
                catchup_chunk_ms,
                active_tasks,
                last_active_tasks: std::sync::atomic::AtomicI64::new(0),
            }),
        }
    }

    fn chain_family_attrs(chain_id: u64, family: &'static str) -> [KeyValue; 2] {
        [KeyValue::new("chain_id", chain_id as i64), KeyValue::new("family", family)]
    }

    pub fn log_processed(&self, chain_id: u64, family: &'static str) {
        self.inner
            .logs_processed_total
            .add(1, &Self::chain_family_attrs(chain_id, family));
    }

    pub fn duplicate_absorbed(&self, chain_id: u64, family: &'static str) {
        self.inner
            .duplicates_absorbed_total
            .add(1, &Self::chain_family_attrs(chain_id, family));
    }

    pub fn missing_antecedent_skip(&self, chain_id: u64, family: &'static str) {
        self.inner
            .missing_antecedent_skips_total
            .add(1, &Self::chain_family_attrs(chain_id, family));
    }

    pub fn decode_failure(&self, chain_id: u64, family: &'static str) {
        self.inner
            .decode_failures_total
            .add(1, &Self::chain_family_attrs(chain_id, family));
    }

    pub fn rpc_error(&self, chain_id: u64, method: &'static str) {
        let attrs = [KeyValue::new("chain_id", chain_id as i64), KeyValue::new("method", method)];
        self.inner.rpc_errors_total.add(1, &attrs);
    }

    pub fn reconnect_attempt(&self, chain_id: u64, family: &'static str) {
        self.inner
            .reconnect_attempts_total
            .add(1, &Self::chain_family_attrs(chain_id, family));
    }

    pub fn restart(&self, chain_id: u64, family: &'static str) {
        self.inner.restarts_total.add(1, &Self::chain_family_attrs(chain_id, family));
    }

    pub fn rpc_ms(&self, chain_id: u64, method: &'static str, ok: bool, ms: u64) {
        let attrs = [
            KeyValue::new("chain_id", chain_id as i64),
            KeyValue::new("method", method),
            KeyValue::new("status", if ok { "ok" } else { "err" }),
        ];
        self.inner.rpc_ms.record(ms, &attrs);
    }

    pub fn catchup_chunk_ms(&self, chain_id: u64, family: &'static str, ms: u64) {
        self.inner
            .catchup_chunk_ms
            .record(ms, &Self::chain_family_attrs(chain_id, family));
    }

    /// `UpDownCounter` only accepts deltas; this tracks the last reported
    /// count so the Coordinator can call it with an absolute value each time
    /// (matching `ActiveGoroutines`'s point-in-time semantics, §6).
    pub fn set_active_tasks(&self, count: u64) {
        let new = count as i64;
        let prev = self
            .inner
            .last_active_tasks
            .swap(new, std::sync::atomic::Ordering::Relaxed);
        let delta = new - prev;
        if delta != 0 {
            self.inner.active_tasks.add(delta, &[]);
        }
    }
}

impl Default for IndexerTelemetry {
    fn default() -> Self {
        Self::new()
    }
}
