//! Subscription Supervisor (§4.8): tracks per-chain polling health and
//! broadcasts two periodic signals — a health-check tick (default 5m) and a
//! scheduled full-reconnect tick (default 2h) — that live transports use to
//! decide whether to proactively resubscribe even absent an error.

use std::collections::HashMap;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    HealthCheck,
    ScheduledReconnect,
}

pub struct Supervisor {
    health: Mutex<HashMap<u64, bool>>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(16);
        Self {
            health: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// §6's exposed surface: `Indexer::update_polling_health(chain_id, bool)`.
    pub async fn update_polling_health(&self, chain_id: u64, healthy: bool) {
        self.health.lock().await.insert(chain_id, healthy);
    }

    pub async fn is_healthy(&self, chain_id: u64) -> bool {
        self.health.lock().await.get(&chain_id).copied().unwrap_or(true)
    }

    /// Runs until `cancel` fires, emitting [`SupervisorEvent`]s on the
    /// configured cadences. A lagging or dropped receiver is not fatal —
    /// `broadcast::Sender::send` errors only when there are zero receivers,
    /// which simply means no live transport currently needs the signal.
    pub async fn run(
        &self,
        health_check_interval: Duration,
        scheduled_reconnect_interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut health_ticker = tokio::time::interval(health_check_interval);
        let mut reconnect_ticker = tokio::time::interval(scheduled_reconnect_interval);
        health_ticker.tick().await;
        reconnect_ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = health_ticker.tick() => {
                    let _ = self.events.send(SupervisorEvent::HealthCheck);
                    tracing::debug!("supervisor health-check tick");
                }
                _ = reconnect_ticker.tick() => {
                    let _ = self.events.send(SupervisorEvent::ScheduledReconnect);
                    tracing::info!("supervisor scheduled-reconnect tick");
                }
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn polling_health_defaults_to_healthy() {
        let supervisor = Supervisor::new();
        assert!(supervisor.is_healthy(1).await);
    }

    #[tokio::test]
    async fn update_polling_health_is_observed() {
        let supervisor = Supervisor::new();
        supervisor.update_polling_health(1, false).await;
        assert!(!supervisor.is_healthy(1).await);
        supervisor.update_polling_health(1, true).await;
        assert!(supervisor.is_healthy(1).await);
    }

    #[tokio::test]
    async fn run_emits_health_check_ticks_until_cancelled() {
        let supervisor = Supervisor::new();
        let mut rx = supervisor.subscribe();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let handle = tokio::spawn(async move {
            supervisor
                .run(Duration::from_millis(10), Duration::from_secs(3600), cancel_clone)
                .await;
        });

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("received an event before timeout")
            .unwrap();
        assert_eq!(event, SupervisorEvent::HealthCheck);

        cancel.cancel();
        handle.await.unwrap();
    }
}
