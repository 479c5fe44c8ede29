//! Push-mode log delivery over a WebSocket provider (§4.6).
//!
//! This is the only component that talks to `alloy_provider`'s pubsub
//! frontend; everything above [`WsSubscriptionClient`] only sees the
//! [`LogSubscription`] trait.

use crate::blockclient::{LogSubscription, SubscriptionHandle};
use alloy::primitives::{Address, B256};
use alloy::rpc::types::Filter;
use alloy_provider::{Provider, ProviderBuilder, WsConnect};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;

pub struct WsSubscriptionClient {
    ws_url: String,
}

impl WsSubscriptionClient {
    pub fn new(ws_url: String) -> Self {
        Self { ws_url }
    }
}

#[async_trait]
impl LogSubscription for WsSubscriptionClient {
    async fn subscribe(
        &self,
        address: Address,
        topics: &[B256],
        from_block: Option<u64>,
    ) -> Result<SubscriptionHandle> {
        let provider = ProviderBuilder::new()
            .connect_ws(WsConnect::new(&self.ws_url))
            .await
            .with_context(|| format!("connect ws provider {}", self.ws_url))?;

        let mut filter = Filter::new().address(address).event_signature(topics.to_vec());
        if let Some(from_block) = from_block {
            filter = filter.from_block(from_block);
        }

        let subscription = provider
            .subscribe_logs(&filter)
            .await
            .context("subscribe_logs")?;

        let logs = subscription
            .into_stream()
            .map(|log| Ok(log))
            .boxed();

        // alloy's pubsub frontend surfaces transport failures by terminating
        // the log stream rather than a separate error channel; we model the
        // error channel as a stream that never yields while the connection
        // is healthy, so the Subscription transport's `tokio::select!` over
        // both channels still observes termination via `logs` going `None`.
        let errors = futures::stream::empty().boxed();

        Ok(SubscriptionHandle { logs, errors })
    }
}
