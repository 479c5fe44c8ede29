use crate::chain::{ChainDescriptor, TransportKind};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Timeouts {
    pub checkpoint_read: Duration,
    pub head_query: Duration,
    pub dedup_lookup: Duration,
    pub store_write: Duration,
    pub resubscribe: Duration,
    pub reconnect: Duration,
    pub filter_logs: Duration,
    pub chunk: Duration,
    pub batch: Duration,
    pub family_catchup: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            checkpoint_read: Duration::from_secs(10),
            head_query: Duration::from_secs(10),
            dedup_lookup: Duration::from_secs(10),
            store_write: Duration::from_secs(10),
            resubscribe: Duration::from_secs(30),
            reconnect: Duration::from_secs(30),
            filter_logs: Duration::from_secs(180),
            chunk: Duration::from_secs(300),
            batch: Duration::from_secs(300),
            family_catchup: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub timeouts: Timeouts,
    /// §4.9 step 2: interval for the Coordinator's active-operations monitor.
    pub monitoring_interval: Duration,
    /// §4.8: Subscription Supervisor health-check cadence (default 5m).
    pub health_check_interval: Duration,
    /// §4.8: Subscription Supervisor scheduled full-reconnect cadence (default 2h).
    pub scheduled_reconnect_interval: Duration,
    pub shutdown_drain_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub global: GlobalConfig,
    pub chains: Vec<ChainDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct BaseEnv {
    database_url: String,
    db_max_connections: u32,
    #[serde(rename = "indexer_monitoring_interval_secs")]
    monitoring_interval_secs: u64,
    #[serde(rename = "indexer_health_check_interval_secs")]
    health_check_interval_secs: u64,
    #[serde(rename = "indexer_scheduled_reconnect_interval_secs")]
    scheduled_reconnect_interval_secs: u64,
    #[serde(rename = "indexer_shutdown_drain_timeout_secs")]
    shutdown_drain_timeout_secs: u64,
    /// JSON array of per-chain entries.
    chains: String,
}

impl Default for BaseEnv {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            monitoring_interval_secs: DEFAULT_MONITORING_INTERVAL_SECS,
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            scheduled_reconnect_interval_secs: DEFAULT_SCHEDULED_RECONNECT_INTERVAL_SECS,
            shutdown_drain_timeout_secs: DEFAULT_SHUTDOWN_DRAIN_TIMEOUT_SECS,
            chains: "[]".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChainEnvEntry {
    #[serde(rename = "chainId")]
    chain_id: u64,
    #[serde(rename = "contractAddress")]
    contract_address: String,
    #[serde(rename = "defaultStartBlock")]
    default_start_block: u64,
    #[serde(rename = "rpcHttpUrls")]
    rpc_http_urls: Vec<String>,
    /// Required only when `transport` is `"subscription"`.
    #[serde(rename = "rpcWsUrl")]
    rpc_ws_url: Option<String>,
    #[serde(rename = "pollIntervalSecs")]
    poll_interval_secs: Option<u64>,
    #[serde(rename = "maxRange")]
    max_range: Option<u64>,
    #[serde(rename = "sampleFirst")]
    sample_first: Option<bool>,
    /// `"subscription"` (default) or `"poller"`.
    transport: Option<String>,
}

fn parse_transport(chain_id: u64, raw: Option<&str>) -> Result<TransportKind> {
    match raw.map(str::trim).map(str::to_lowercase).as_deref() {
        None | Some("subscription") => Ok(TransportKind::Subscription),
        Some("poller") => Ok(TransportKind::Poller),
        Some(other) => anyhow::bail!(
            "chain {chain_id}: invalid transport {other:?} (expected subscription|poller)"
        ),
    }
}

pub fn load_config() -> Result<AppConfig> {
    let base: BaseEnv = envy::from_env().context("load base env config")?;
    if base.database_url.trim().is_empty() {
        anyhow::bail!("DATABASE_URL must be set");
    }

    let entries: Vec<ChainEnvEntry> =
        serde_json::from_str(base.chains.trim()).context("parse CHAINS as JSON array")?;
    if entries.is_empty() {
        anyhow::bail!("CHAINS must configure at least one chain");
    }

    let mut chains = Vec::with_capacity(entries.len());
    for entry in entries {
        let contract_address = entry
            .contract_address
            .parse()
            .with_context(|| format!("chain {}: invalid contractAddress", entry.chain_id))?;

        if entry.rpc_http_urls.is_empty() {
            anyhow::bail!("chain {}: rpcHttpUrls must not be empty", entry.chain_id);
        }

        let transport = parse_transport(entry.chain_id, entry.transport.as_deref())?;
        if matches!(transport, TransportKind::Subscription) && entry.rpc_ws_url.is_none() {
            anyhow::bail!(
                "chain {}: rpcWsUrl is required for subscription transport",
                entry.chain_id
            );
        }

        chains.push(ChainDescriptor {
            chain_id: entry.chain_id,
            contract_address,
            default_start_block: entry.default_start_block,
            poll_interval: Duration::from_secs(
                entry
                    .poll_interval_secs
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
                    .max(5),
            ),
            max_range: entry.max_range.unwrap_or(DEFAULT_MAX_RANGE).max(1),
            sample_first: entry.sample_first.unwrap_or(false),
            transport,
            rpc_http_urls: entry.rpc_http_urls,
            rpc_ws_url: entry.rpc_ws_url,
        });
    }

    Ok(AppConfig {
        global: GlobalConfig {
            database_url: base.database_url,
            db_max_connections: base.db_max_connections.max(1),
            timeouts: Timeouts::default(),
            monitoring_interval: Duration::from_secs(base.monitoring_interval_secs.max(1)),
            health_check_interval: Duration::from_secs(base.health_check_interval_secs.max(1)),
            scheduled_reconnect_interval: Duration::from_secs(
                base.scheduled_reconnect_interval_secs.max(1),
            ),
            shutdown_drain_timeout: Duration::from_secs(base.shutdown_drain_timeout_secs.max(1)),
        },
        chains,
    })
}

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_MONITORING_INTERVAL_SECS: u64 = 60;
const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 300;
const DEFAULT_SCHEDULED_RECONNECT_INTERVAL_SECS: u64 = 7_200;
const DEFAULT_SHUTDOWN_DRAIN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;
const DEFAULT_MAX_RANGE: u64 = 5_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_transport_defaults_to_subscription() {
        assert!(matches!(
            parse_transport(1, None).unwrap(),
            TransportKind::Subscription
        ));
    }

    #[test]
    fn parse_transport_accepts_poller() {
        assert!(matches!(
            parse_transport(7000, Some("poller")).unwrap(),
            TransportKind::Poller
        ));
    }

    #[test]
    fn parse_transport_rejects_unknown_value() {
        assert!(parse_transport(1, Some("carrier-pigeon")).is_err());
    }
}
