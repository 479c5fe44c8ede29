//! The `BlockClient` / `LogSubscription` contracts consumed by the core (§6).
//!
//! Two families of implementation exist: [`crate::rpc::JsonRpcClient`] (HTTP
//! JSON-RPC, used for catchup and polling) and
//! [`crate::ws::WsSubscriptionClient`] (push-mode subscriptions, used only by
//! the Live Transport — Subscription). Both are black boxes from the core's
//! perspective; it only depends on these traits.

use alloy::primitives::{Address, B256};
use alloy::rpc::types::{Log, Transaction};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

#[async_trait]
pub trait BlockClient: Send + Sync {
    async fn head_block(&self) -> Result<u64>;

    async fn filter_logs(
        &self,
        from: u64,
        to: u64,
        address: Address,
        topics: &[B256],
    ) -> Result<Vec<Log>>;

    async fn get_transaction(&self, hash: B256) -> Result<Option<Transaction>>;
}

/// A live handle to a push-mode log subscription. Dropping it releases the
/// underlying connection resource; the core never leaks one (§4.6, §5
/// cancellation).
pub struct SubscriptionHandle {
    pub logs: BoxStream<'static, Result<Log>>,
    pub errors: BoxStream<'static, Result<()>>,
}

#[async_trait]
pub trait LogSubscription: Send + Sync {
    async fn subscribe(
        &self,
        address: Address,
        topics: &[B256],
        from_block: Option<u64>,
    ) -> Result<SubscriptionHandle>;
}
