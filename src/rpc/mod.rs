//! HTTP RPC client - balance, tick and broadcast collaborator
//!
//! Endpoint failover index and rate-limiter state live on the client, so
//! several independent clients can coexist in one process.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::RpcConfig;
use crate::sweep::LedgerGateway;
use crate::types::{BroadcastReceipt, TickInfo};

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: BalanceBody,
}

#[derive(Debug, Deserialize)]
struct BalanceBody {
    /// Serialized as a decimal string
    balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickInfoResponse {
    tick_info: TickInfoBody,
}

#[derive(Debug, Deserialize)]
struct TickInfoBody {
    tick: u32,
    epoch: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OracleQueryRequest<'a> {
    oracle: &'a str,
    currency1: &'a str,
    currency2: &'a str,
    target_tick: u32,
}

pub struct RpcClient {
    http: Client,
    endpoints: Vec<String>,
    broadcaster_url: String,
    identity: String,
    current_endpoint: AtomicUsize,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RpcClient {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        if config.endpoints.is_empty() {
            bail!("rpc.endpoints must list at least one URL");
        }
        let http = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            endpoints: config
                .endpoints
                .iter()
                .map(|e| e.trim_end_matches('/').to_string())
                .collect(),
            broadcaster_url: config.broadcaster_url.trim_end_matches('/').to_string(),
            identity: config.identity.clone(),
            current_endpoint: AtomicUsize::new(0),
            min_interval: Duration::from_millis(config.min_request_interval_ms),
            last_request: Mutex::new(None),
        })
    }

    /// Base URL currently in use
    pub fn endpoint(&self) -> &str {
        let idx = self.current_endpoint.load(Ordering::Relaxed) % self.endpoints.len();
        &self.endpoints[idx]
    }

    fn rotate_endpoint(&self) {
        let next = self.current_endpoint.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            endpoint = %self.endpoints[next % self.endpoints.len()],
            "⚠️ Switching RPC endpoint"
        );
    }

    /// Wait until `min_interval` has passed since the previous request.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// GET `path` on the current endpoint, rotating once through every
    /// endpoint on transport or status failure.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let mut last_err = None;
        for _ in 0..self.endpoints.len() {
            self.throttle().await;
            let url = format!("{}{}", self.endpoint(), path);
            debug!(url = %url, "RPC request");
            let outcome = async {
                let response = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .with_context(|| format!("Request to {} failed", url))?;
                if !response.status().is_success() {
                    bail!("{} returned {}", url, response.status());
                }
                response
                    .json::<T>()
                    .await
                    .with_context(|| format!("Failed to parse response from {}", url))
            }
            .await;
            match outcome {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!(error = %e, "⚠️ RPC request failed");
                    last_err = Some(e);
                    self.rotate_endpoint();
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no RPC endpoints configured")))
    }
}

#[async_trait]
impl LedgerGateway for RpcClient {
    async fn get_balance(&self) -> Result<u64> {
        if self.identity.is_empty() {
            bail!("rpc.identity is not set");
        }
        let body: BalanceResponse = self
            .get_json(&format!("/v1/balances/{}", self.identity))
            .await?;
        body.balance
            .balance
            .parse()
            .with_context(|| format!("Invalid balance value {:?}", body.balance.balance))
    }

    async fn get_current_tick(&self) -> Result<TickInfo> {
        let body: TickInfoResponse = self.get_json("/v1/tick-info").await?;
        Ok(TickInfo {
            tick: body.tick_info.tick,
            epoch: body.tick_info.epoch,
        })
    }

    async fn send_oracle_query(
        &self,
        oracle: &str,
        currency1: &str,
        currency2: &str,
        target_tick: u32,
    ) -> Result<BroadcastReceipt> {
        self.throttle().await;
        let url = format!("{}/oracle-query", self.broadcaster_url);
        let response = self
            .http
            .post(&url)
            .json(&OracleQueryRequest {
                oracle,
                currency1,
                currency2,
                target_tick,
            })
            .send()
            .await
            .context("Failed to reach broadcaster")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Broadcaster returned {}: {}", status, text);
        }

        let receipt: BroadcastReceipt = response
            .json()
            .await
            .context("Failed to parse broadcaster response")?;
        if !receipt.success {
            bail!("Broadcaster reported failure for {} {}/{}", oracle, currency1, currency2);
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoints: &[&str]) -> RpcConfig {
        RpcConfig {
            endpoints: endpoints.iter().map(|s| s.to_string()).collect(),
            broadcaster_url: "http://127.0.0.1:1/".into(),
            identity: String::new(),
            request_timeout_ms: 500,
            min_request_interval_ms: 40,
        }
    }

    #[test]
    fn empty_endpoint_list_is_rejected() {
        assert!(RpcClient::new(&config(&[])).is_err());
    }

    #[test]
    fn endpoints_rotate_round_robin() {
        let client = RpcClient::new(&config(&["http://a/", "http://b"])).unwrap();
        assert_eq!(client.endpoint(), "http://a");
        client.rotate_endpoint();
        assert_eq!(client.endpoint(), "http://b");
        client.rotate_endpoint();
        assert_eq!(client.endpoint(), "http://a");
    }

    #[tokio::test]
    async fn throttle_spaces_requests() {
        let client = RpcClient::new(&config(&["http://a"])).unwrap();
        let started = Instant::now();
        client.throttle().await;
        client.throttle().await;
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn balance_requires_identity() {
        let client = RpcClient::new(&config(&["http://a"])).unwrap();
        assert!(client.get_balance().await.is_err());
    }

    #[test]
    fn response_shapes_parse() {
        let balance: BalanceResponse =
            serde_json::from_str(r#"{"balance":{"id":"X","balance":"123456"}}"#).unwrap();
        assert_eq!(balance.balance.balance, "123456");

        let tick: TickInfoResponse = serde_json::from_str(
            r#"{"tickInfo":{"tick":22000123,"duration":1,"epoch":171,"initialTick":22000000}}"#,
        )
        .unwrap();
        assert_eq!(tick.tick_info.tick, 22_000_123);
        assert_eq!(tick.tick_info.epoch, 171);

        let receipt: BroadcastReceipt = serde_json::from_str(
            r#"{"success":true,"txId":"abc","peersBroadcasted":3}"#,
        )
        .unwrap();
        assert_eq!(receipt.peers_broadcasted, 3);
    }
}
