//! Checkpoint Store (§4.1): a thin façade over [`Database::get_checkpoint`]/
//! [`Database::set_checkpoint`] that owns the startup "raise to default
//! block" rule and an in-process cache so hot loops don't round-trip to
//! Postgres for every read.

use crate::chain::EventFamily;
use crate::db::Database;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    chain_id: u64,
    family: EventFamily,
}

pub struct CheckpointStore {
    db: Arc<dyn Database>,
    cache: Mutex<HashMap<CacheKey, u64>>,
}

impl CheckpointStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Reads the persisted checkpoint, raising it to `default_start_block`
    /// if the store has none yet or it is behind the chain's configured
    /// genesis (§4.1 startup rule). Does not persist the raised value;
    /// callers persist the first real progress through [`Self::set`].
    pub async fn get_or_default(
        &self,
        chain_id: u64,
        family: EventFamily,
        default_start_block: u64,
    ) -> anyhow::Result<u64> {
        let key = CacheKey { chain_id, family };
        if let Some(cached) = self.cache.lock().await.get(&key).copied() {
            return Ok(cached.max(default_start_block));
        }

        let stored = self.db.get_checkpoint(chain_id, family).await?;
        let resolved = stored.max(default_start_block);
        self.cache.lock().await.insert(key, resolved);
        Ok(resolved)
    }

    /// Persists `block` as the new checkpoint and updates the cache. A
    /// write failure is logged by the caller and does not panic — catchup
    /// and live transports treat a failed checkpoint write as non-fatal and
    /// retry on the next advance (§7, best-effort write semantics).
    pub async fn set(&self, chain_id: u64, family: EventFamily, block: u64) -> anyhow::Result<()> {
        self.db.set_checkpoint(chain_id, family, block).await?;
        self.cache
            .lock()
            .await
            .insert(CacheKey { chain_id, family }, block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        FulfillmentRow, IntentRecord, IntentRow, IntentStatus, SettlementRow, WriteOutcome,
    };
    use alloy::primitives::B256;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeDb {
        checkpoints: StdMutex<HashMap<(u64, &'static str), u64>>,
    }

    #[async_trait]
    impl Database for FakeDb {
        async fn get_checkpoint(&self, chain_id: u64, family: EventFamily) -> anyhow::Result<u64> {
            Ok(self
                .checkpoints
                .lock()
                .unwrap()
                .get(&(chain_id, family.as_str()))
                .copied()
                .unwrap_or(0))
        }

        async fn set_checkpoint(
            &self,
            chain_id: u64,
            family: EventFamily,
            block: u64,
        ) -> anyhow::Result<()> {
            self.checkpoints
                .lock()
                .unwrap()
                .insert((chain_id, family.as_str()), block);
            Ok(())
        }

        async fn get_intent(&self, _id: B256) -> anyhow::Result<Option<IntentRecord>> {
            Ok(None)
        }

        async fn create_intent(&self, _row: IntentRow) -> anyhow::Result<WriteOutcome> {
            Ok(WriteOutcome::Inserted)
        }

        async fn create_fulfillment(&self, _row: FulfillmentRow) -> anyhow::Result<WriteOutcome> {
            Ok(WriteOutcome::Inserted)
        }

        async fn create_settlement(&self, _row: SettlementRow) -> anyhow::Result<WriteOutcome> {
            Ok(WriteOutcome::Inserted)
        }

        async fn update_intent_status(&self, _id: B256, _status: IntentStatus) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn missing_checkpoint_raises_to_default_start_block() {
        let db = Arc::new(FakeDb {
            checkpoints: StdMutex::new(HashMap::new()),
        });
        let store = CheckpointStore::new(db);
        let block = store
            .get_or_default(1, EventFamily::Intent, 322_000_000)
            .await
            .unwrap();
        assert_eq!(block, 322_000_000);
    }

    #[tokio::test]
    async fn stored_checkpoint_ahead_of_default_wins() {
        let db = Arc::new(FakeDb {
            checkpoints: StdMutex::new(HashMap::from([((1, "intent"), 322_500_000)])),
        });
        let store = CheckpointStore::new(db);
        let block = store
            .get_or_default(1, EventFamily::Intent, 322_000_000)
            .await
            .unwrap();
        assert_eq!(block, 322_500_000);
    }

    #[tokio::test]
    async fn set_then_get_uses_cache_without_touching_store_default() {
        let db = Arc::new(FakeDb {
            checkpoints: StdMutex::new(HashMap::new()),
        });
        let store = CheckpointStore::new(db);
        store.set(1, EventFamily::Intent, 100).await.unwrap();
        let block = store.get_or_default(1, EventFamily::Intent, 0).await.unwrap();
        assert_eq!(block, 100);
    }

    #[tokio::test]
    async fn families_on_same_chain_are_independent() {
        let db = Arc::new(FakeDb {
            checkpoints: StdMutex::new(HashMap::new()),
        });
        let store = CheckpointStore::new(db);
        store.set(1, EventFamily::Intent, 500).await.unwrap();
        let fulfillment = store
            .get_or_default(1, EventFamily::Fulfillment, 0)
            .await
            .unwrap();
        assert_eq!(fulfillment, 0);
    }
}
