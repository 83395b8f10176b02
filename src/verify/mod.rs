//! Verification driver - re-reads oracle answers straight from a node
//!
//! One connection serves the whole scan. Transport failures are isolated per
//! tick and per query id; a failed connect or a session that can no longer be
//! resynchronised ends the run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::OracleClient;
use crate::config::NodeConfig;
use crate::error::{OracleError, Result};
use crate::persistence::PriceSink;
use crate::types::{PairKey, QueryStatus};

/// Source tag stored alongside every verified row
pub const VERIFY_SOURCE: &str = "tcp-verify";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedPriceRow {
    pub tick: u32,
    pub query_id: i64,
    pub oracle: String,
    pub currency1: String,
    pub currency2: String,
    pub price: f64,
    pub status: String,
}

impl VerifiedPriceRow {
    pub fn key(&self) -> PairKey {
        PairKey {
            oracle: self.oracle.clone(),
            currency1: self.currency1.clone(),
            currency2: self.currency2.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairAverage {
    pub oracle: String,
    pub currency1: String,
    pub currency2: String,
    pub samples: usize,
    pub average_price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub start_tick: u32,
    pub tick_count: u32,
    pub ticks_scanned: u32,
    /// Ticks answered with no query ids
    pub ticks_empty: u32,
    /// Ticks skipped because the exchange failed
    pub ticks_failed: u32,
    pub total_queries: usize,
    pub success_queries: usize,
    /// Query ids whose info could not be fetched
    pub failed_queries: usize,
    pub status_counts: BTreeMap<QueryStatus, usize>,
    pub prices: Vec<VerifiedPriceRow>,
    pub averages: Vec<PairAverage>,
}

/// Arithmetic mean price per `(oracle, currency1, currency2)`, sorted by pair
pub fn average_by_pair(rows: &[VerifiedPriceRow]) -> Vec<PairAverage> {
    let mut groups: BTreeMap<PairKey, (f64, usize)> = BTreeMap::new();
    for row in rows {
        let entry = groups.entry(row.key()).or_insert((0.0, 0));
        entry.0 += row.price;
        entry.1 += 1;
    }
    groups
        .into_iter()
        .map(|(key, (sum, n))| PairAverage {
            oracle: key.oracle,
            currency1: key.currency1,
            currency2: key.currency2,
            samples: n,
            average_price: sum / n as f64,
        })
        .collect()
}

/// Per-pair observation counts from a discovery scan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredPair {
    pub oracle: String,
    pub currency1: String,
    pub currency2: String,
    pub observations: usize,
    pub status_counts: BTreeMap<QueryStatus, usize>,
    pub last_price: Option<f64>,
    pub last_tick: u32,
}

impl DiscoveredPair {
    pub fn successes(&self) -> usize {
        self.status_counts
            .get(&QueryStatus::Success)
            .copied()
            .unwrap_or(0)
    }
}

pub struct VerificationDriver<P> {
    node: NodeConfig,
    sink: Option<P>,
    cancel: CancellationToken,
}

impl<P: PriceSink> VerificationDriver<P> {
    pub fn new(node: NodeConfig, sink: Option<P>, cancel: CancellationToken) -> Self {
        Self { node, sink, cancel }
    }

    /// Connect, scan `[start_tick, start_tick + tick_count)`, persist, close.
    pub async fn verify(&self, start_tick: u32, tick_count: u32) -> Result<VerificationReport> {
        let mut client = OracleClient::connect(&self.node, self.cancel.clone()).await?;
        let outcome = self.verify_with(&mut client, start_tick, tick_count).await;
        if let Err(e) = client.shutdown().await {
            debug!(error = %e, "close after verification failed");
        }
        outcome
    }

    /// Scan on an already-open session. The caller owns the connection.
    pub async fn verify_with<S>(
        &self,
        client: &mut OracleClient<S>,
        start_tick: u32,
        tick_count: u32,
    ) -> Result<VerificationReport>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        info!(start_tick, tick_count, peer = %client.peer(), "🔍 Verifying oracle answers");
        let mut report = VerificationReport {
            start_tick,
            tick_count,
            ..Default::default()
        };

        for tick in start_tick..start_tick.saturating_add(tick_count) {
            if self.cancel.is_cancelled() {
                warn!(tick, "⚠️ Verification cancelled");
                break;
            }
            report.ticks_scanned += 1;

            let ids = match client.get_query_ids_at_tick(tick).await {
                Ok(ids) => ids,
                Err(OracleError::Cancelled) => break,
                Err(e) if !e.is_unit_scoped() => {
                    error!(tick, error = %e, "❌ Session lost, aborting scan");
                    return Err(e);
                }
                Err(e) => {
                    warn!(tick, error = %e, "⚠️ Tick skipped");
                    report.ticks_failed += 1;
                    continue;
                }
            };
            if ids.is_empty() {
                report.ticks_empty += 1;
                continue;
            }

            for query_id in ids {
                report.total_queries += 1;
                let info = match client.get_query_info(query_id).await {
                    Ok(info) => info,
                    Err(OracleError::Cancelled) => break,
                    Err(e) if !e.is_unit_scoped() => {
                        error!(tick, query_id, error = %e, "❌ Session lost, aborting scan");
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(tick, query_id, error = %e, "⚠️ Query skipped");
                        report.failed_queries += 1;
                        continue;
                    }
                };

                *report.status_counts.entry(info.status).or_insert(0) += 1;
                if info.status == QueryStatus::Success {
                    report.success_queries += 1;
                }

                match (info.price, info.pair) {
                    (Some(price), Some(pair)) => {
                        debug!(tick, query_id, pair = %pair.key(), price, "price decoded");
                        report.prices.push(VerifiedPriceRow {
                            tick,
                            query_id,
                            oracle: pair.oracle,
                            currency1: pair.currency1,
                            currency2: pair.currency2,
                            price,
                            status: info.status.to_string(),
                        });
                    }
                    (Some(price), None) => {
                        debug!(tick, query_id, price, "price without pair data, not recorded")
                    }
                    _ => {}
                }
            }
        }

        report.averages = average_by_pair(&report.prices);
        info!(
            ticks = report.ticks_scanned,
            empty = report.ticks_empty,
            failed = report.ticks_failed,
            queries = report.total_queries,
            success = report.success_queries,
            prices = report.prices.len(),
            "📊 Verification finished"
        );

        self.persist(&report.prices).await;
        Ok(report)
    }

    /// Persistence failures are logged and never fail the verification.
    async fn persist(&self, rows: &[VerifiedPriceRow]) {
        let Some(sink) = &self.sink else {
            return;
        };
        if rows.is_empty() {
            return;
        }
        match sink.insert_prices_batch(rows, VERIFY_SOURCE).await {
            Ok(n) => info!(rows = n, "💾 Verified prices persisted"),
            Err(e) => {
                let err = OracleError::Persistence(format!("{:#}", e));
                error!(error = %err, "❌ Failed to persist verified prices");
            }
        }
    }

    /// Scan the `window` ticks before the node's current tick and tally
    /// every pair seen, by status.
    pub async fn discover(&self, window: u32) -> Result<Vec<DiscoveredPair>> {
        let mut client = OracleClient::connect(&self.node, self.cancel.clone()).await?;
        let outcome = async {
            let current = client.get_tick_info().await?;
            let start = current.tick.saturating_sub(window);
            self.discover_with(&mut client, start, window).await
        }
        .await;
        if let Err(e) = client.shutdown().await {
            debug!(error = %e, "close after discovery failed");
        }
        outcome
    }

    pub async fn discover_with<S>(
        &self,
        client: &mut OracleClient<S>,
        start_tick: u32,
        tick_count: u32,
    ) -> Result<Vec<DiscoveredPair>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut pairs: HashMap<PairKey, DiscoveredPair> = HashMap::new();
        let mut failed_ticks = 0u32;

        for tick in start_tick..start_tick.saturating_add(tick_count) {
            if self.cancel.is_cancelled() {
                break;
            }
            let ids = match client.get_query_ids_at_tick(tick).await {
                Ok(ids) => ids,
                Err(OracleError::Cancelled) => break,
                Err(e) if !e.is_unit_scoped() => {
                    error!(tick, error = %e, "❌ Session lost, aborting scan");
                    return Err(e);
                }
                Err(e) => {
                    warn!(tick, error = %e, "⚠️ Tick skipped");
                    failed_ticks += 1;
                    continue;
                }
            };
            for query_id in ids {
                let info = match client.get_query_info(query_id).await {
                    Ok(info) => info,
                    Err(OracleError::Cancelled) => break,
                    Err(e) if !e.is_unit_scoped() => {
                        error!(tick, query_id, error = %e, "❌ Session lost, aborting scan");
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(tick, query_id, error = %e, "⚠️ Query skipped");
                        continue;
                    }
                };
                let Some(pair) = info.pair else {
                    continue;
                };
                let entry = pairs.entry(pair.key()).or_insert_with(|| DiscoveredPair {
                    oracle: pair.oracle.clone(),
                    currency1: pair.currency1.clone(),
                    currency2: pair.currency2.clone(),
                    ..Default::default()
                });
                entry.observations += 1;
                *entry.status_counts.entry(info.status).or_insert(0) += 1;
                if tick >= entry.last_tick {
                    entry.last_tick = tick;
                    if info.price.is_some() {
                        entry.last_price = info.price;
                    }
                }
            }
        }

        let mut found: Vec<DiscoveredPair> = pairs.into_values().collect();
        found.sort_by(|a, b| {
            (&a.oracle, &a.currency1, &a.currency2).cmp(&(&b.oracle, &b.currency1, &b.currency2))
        });
        info!(
            start_tick,
            tick_count,
            failed_ticks,
            pairs = found.len(),
            "🔎 Discovery finished"
        );
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MockPriceSink;

    fn row(oracle: &str, price: f64) -> VerifiedPriceRow {
        VerifiedPriceRow {
            tick: 1,
            query_id: 1,
            oracle: oracle.into(),
            currency1: "BTC".into(),
            currency2: "USD".into(),
            price,
            status: "success".into(),
        }
    }

    #[test]
    fn averages_group_by_full_pair() {
        let rows = vec![
            row("KRAKEN", 100.0),
            row("BINANCE", 10.0),
            row("BINANCE", 20.0),
            row("KRAKEN", 300.0),
        ];
        let avgs = average_by_pair(&rows);
        assert_eq!(avgs.len(), 2);
        assert_eq!(avgs[0].oracle, "BINANCE");
        assert_eq!(avgs[0].samples, 2);
        assert_eq!(avgs[0].average_price, 15.0);
        assert_eq!(avgs[1].average_price, 200.0);
    }

    fn driver_with(sink: MockPriceSink) -> VerificationDriver<MockPriceSink> {
        VerificationDriver::new(NodeConfig::default(), Some(sink), CancellationToken::new())
    }

    #[tokio::test]
    async fn persist_sends_one_tagged_batch() {
        let mut sink = MockPriceSink::new();
        sink.expect_insert_prices_batch()
            .withf(|rows, source| rows.len() == 2 && source == VERIFY_SOURCE)
            .times(1)
            .returning(|rows, _| Ok(rows.len()));

        driver_with(sink)
            .persist(&[row("KRAKEN", 1.0), row("KRAKEN", 2.0)])
            .await;
    }

    #[tokio::test]
    async fn persist_skips_empty_scans() {
        let mut sink = MockPriceSink::new();
        sink.expect_insert_prices_batch().never();
        driver_with(sink).persist(&[]).await;
    }

    #[tokio::test]
    async fn persist_swallows_sink_errors() {
        let mut sink = MockPriceSink::new();
        sink.expect_insert_prices_batch()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("disk full")));
        driver_with(sink).persist(&[row("BINANCE", 5.0)]).await;
    }

    #[test]
    fn averages_of_nothing_is_empty() {
        assert!(average_by_pair(&[]).is_empty());
    }

    #[test]
    fn report_serializes_camel_case() {
        let report = VerificationReport {
            total_queries: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["totalQueries"], 1);
        assert!(json.get("ticksFailed").is_some());
    }
}
