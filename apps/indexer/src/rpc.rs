use crate::blockclient::BlockClient;
use crate::metrics::IndexerTelemetry;
use alloy::primitives::{Address, B256};
use alloy::rpc::types::{Log, Transaction};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};
use std::time::{Duration, Instant};

/// HTTP JSON-RPC implementation of [`BlockClient`]. Round-robins a
/// "preferred" endpoint across `urls` for consistency, falling back to the
/// rest on failure, exactly as the teacher's `RpcClient` does.
#[derive(Clone)]
pub struct JsonRpcClient {
    chain_id: u64,
    urls: Arc<Vec<String>>,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
    preferred_url: Arc<AtomicUsize>,
    telemetry: Option<IndexerTelemetry>,
}

impl JsonRpcClient {
    pub fn new(chain_id: u64, urls: Vec<String>) -> Result<Self> {
        Self::with_telemetry(chain_id, urls, None)
    }

    /// Same as [`Self::new`], recording per-call latency via `telemetry`'s
    /// `rpc_ms` histogram (§6 metrics exposition surface).
    pub fn with_telemetry(chain_id: u64, urls: Vec<String>, telemetry: Option<IndexerTelemetry>) -> Result<Self> {
        if urls.is_empty() {
            anyhow::bail!("rpc urls must not be empty");
        }
        let http = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build reqwest client")?;

        Ok(Self {
            chain_id,
            urls: Arc::new(urls),
            http,
            next_id: Arc::new(AtomicU64::new(1)),
            preferred_url: Arc::new(AtomicUsize::new(0)),
            telemetry,
        })
    }

    pub async fn request(&self, method: &'static str, params: Value) -> Result<Value> {
        let started = Instant::now();
        let result = self.request_inner(method, params).await;
        if let Some(telemetry) = &self.telemetry {
            telemetry.rpc_ms(self.chain_id, method, result.is_ok(), started.elapsed().as_millis() as u64);
        }
        result
    }

    async fn request_inner(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let start = self
            .preferred_url
            .load(Ordering::Relaxed)
            .wrapping_rem(self.urls.len());

        let mut last_err: Option<anyhow::Error> = None;
        for offset in 0..self.urls.len() {
            let idx = (start + offset) % self.urls.len();
            let url = &self.urls[idx];
            match self
                .http
                .post(url)
                .json(&body)
                .send()
                .await
                .with_context(|| format!("{method} POST {url}"))
            {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp
                        .text()
                        .await
                        .with_context(|| format!("{method} read body {url}"))?;
                    if status != StatusCode::OK {
                        last_err = Some(anyhow::anyhow!(
                            "{method} http status={} url={} body={}",
                            status.as_u16(),
                            url,
                            text
                        ));
                        continue;
                    }
                    let v: Value = serde_json::from_str(&text)
                        .with_context(|| format!("{method} parse json"))?;
                    if let Some(err) = v.get("error") {
                        last_err = Some(anyhow::anyhow!("{method} rpc error: {err}"));
                        continue;
                    }
                    let Some(result) = v.get("result") else {
                        last_err = Some(anyhow::anyhow!("{method} missing result field"));
                        continue;
                    };
                    self.preferred_url.store(idx, Ordering::Relaxed);
                    return Ok(result.clone());
                }
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{method} failed")))
    }

    pub async fn get_logs(&self, filter: Value) -> Result<Vec<Log>> {
        let v = self
            .request("eth_getLogs", serde_json::json!([filter]))
            .await?;
        serde_json::from_value(v).context("parse eth_getLogs result as logs")
    }

    pub async fn get_block_by_number(&self, block_number: u64) -> Result<Option<Value>> {
        let v = self
            .request(
                "eth_getBlockByNumber",
                serde_json::json!([format_quantity(block_number), false]),
            )
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        Ok(Some(v))
    }
}

#[async_trait]
impl BlockClient for JsonRpcClient {
    async fn head_block(&self) -> Result<u64> {
        let v = self
            .request("eth_blockNumber", serde_json::json!([]))
            .await?;
        parse_quantity_u64(v).context("parse eth_blockNumber")
    }

    async fn filter_logs(
        &self,
        from: u64,
        to: u64,
        address: Address,
        topics: &[B256],
    ) -> Result<Vec<Log>> {
        let filter = serde_json::json!({
            "address": address,
            "fromBlock": format_quantity(from),
            "toBlock": format_quantity(to),
            "topics": [topics],
        });
        self.get_logs(filter).await
    }

    async fn get_transaction(&self, hash: B256) -> Result<Option<Transaction>> {
        let v = self
            .request(
                "eth_getTransactionByHash",
                serde_json::json!([format!("0x{}", hex::encode(hash.as_slice()))]),
            )
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        Ok(Some(
            serde_json::from_value(v).context("parse eth_getTransactionByHash result")?,
        ))
    }
}

pub fn format_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

pub fn parse_quantity_u64(v: Value) -> Result<u64> {
    match v {
        Value::String(s) => parse_quantity_u64_str(&s),
        Value::Number(n) => n
            .as_u64()
            .context("quantity number not representable as u64"),
        other => anyhow::bail!("unexpected quantity json type: {other}"),
    }
}

fn parse_quantity_u64_str(s: &str) -> Result<u64> {
    let trimmed = s.trim();
    let Some(hex) = trimmed.strip_prefix("0x") else {
        return trimmed
            .parse::<u64>()
            .with_context(|| format!("invalid decimal u64: {trimmed}"));
    };
    if hex.is_empty() {
        anyhow::bail!("invalid hex quantity: {trimmed}");
    }
    u64::from_str_radix(hex, 16).with_context(|| format!("invalid hex quantity: {trimmed}"))
}

/// §7: transient I/O classification. Caught and retried with bounded backoff
/// by the Catchup Runner, Poller, and Subscription transport.
pub fn looks_like_transient(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("deadline")
        || msg.contains("too many requests")
        || msg.contains("rate limit")
        || msg.contains("429")
        || msg.contains("bad gateway")
        || msg.contains("gateway")
        || msg.contains("service unavailable")
        || msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
        || msg.contains("connection reset")
        || msg.contains("connection closed")
        || msg.contains("connection refused")
        || msg.contains("broken pipe")
        || msg.contains("temporarily unavailable")
}

/// §4.2: a chunk whose range was rejected as too large by the endpoint; the
/// Log Scanner's caller should retry with a smaller `max_range`.
pub fn looks_like_range_too_large(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("range too large")
        || msg.contains("block range")
        || msg.contains("too many results")
        || msg.contains("response size exceeded")
        || msg.contains("payload too large")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_and_parse_quantity_round_trip() {
        for n in [0u64, 1, 255, 322_207_320, u64::MAX] {
            let s = format_quantity(n);
            assert_eq!(parse_quantity_u64_str(&s).unwrap(), n);
        }
    }

    #[test]
    fn parse_quantity_accepts_decimal_string() {
        assert_eq!(parse_quantity_u64_str("42").unwrap(), 42);
    }

    #[test]
    fn parse_quantity_rejects_bare_0x() {
        assert!(parse_quantity_u64_str("0x").is_err());
    }

    #[test]
    fn looks_like_transient_matches_known_messages() {
        assert!(looks_like_transient(&anyhow::anyhow!("request timed out")));
        assert!(looks_like_transient(&anyhow::anyhow!("429 Too Many Requests")));
        assert!(!looks_like_transient(&anyhow::anyhow!("invalid signature")));
    }

    #[test]
    fn looks_like_range_too_large_matches_known_messages() {
        assert!(looks_like_range_too_large(&anyhow::anyhow!(
            "query returned too many results"
        )));
        assert!(looks_like_range_too_large(&anyhow::anyhow!(
            "block range is too large"
        )));
        assert!(!looks_like_range_too_large(&anyhow::anyhow!("nonce too low")));
    }
}
