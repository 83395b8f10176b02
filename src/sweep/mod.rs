//! Sweep scheduler - issues oracle queries for a batch of pairs
//!
//! `INIT -> BUDGET_CHECK -> per pair (BROADCAST -> [RETRY_ONCE]) -> SUMMARIZE -> PERSIST`
//!
//! Pairs are processed strictly in order against one tick baseline so every
//! pair gets a distinct future target tick.

pub mod registry;

pub use registry::{all_pairs, estimate_cost, pairs_by_tier, CostEstimate};

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SweepConfig;
use crate::error::{OracleError, Result};
use crate::persistence::RollingHistory;
use crate::types::{BroadcastReceipt, SweepPair, TickInfo};

/// Ledger-side collaborator used by the scheduler
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Spendable balance in QU
    async fn get_balance(&self) -> anyhow::Result<u64>;

    async fn get_current_tick(&self) -> anyhow::Result<TickInfo>;

    /// Broadcast one oracle query; errors on network or broadcast failure
    async fn send_oracle_query(
        &self,
        oracle: &str,
        currency1: &str,
        currency2: &str,
        target_tick: u32,
    ) -> anyhow::Result<BroadcastReceipt>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    DryRun,
    Broadcast,
    BroadcastRetry,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResult {
    pub oracle: String,
    pub currency1: String,
    pub currency2: String,
    pub target_tick: u32,
    pub status: SweepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_tick: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers_broadcasted: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SweepResult {
    fn base(pair: &SweepPair, target_tick: u32, status: SweepStatus) -> Self {
        Self {
            oracle: pair.oracle.clone(),
            currency1: pair.currency1.clone(),
            currency2: pair.currency2.clone(),
            target_tick,
            status,
            retry_tick: None,
            tx_id: None,
            peers_broadcasted: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            SweepStatus::Broadcast | SweepStatus::BroadcastRetry
        )
    }
}

/// Summary of one sweep invocation, as stored in the rolling history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepRecord {
    pub timestamp: String,
    pub epoch: u16,
    pub start_tick: u32,
    pub pair_count: usize,
    pub success_count: usize,
    pub error_count: usize,
    #[serde(rename = "costQU")]
    pub cost_qu: u64,
    pub duration_ms: u64,
    pub results: Vec<SweepResult>,
}

impl SweepRecord {
    fn summarize(
        timestamp: String,
        baseline: TickInfo,
        pair_count: usize,
        results: Vec<SweepResult>,
        cost_per_query_qu: u64,
        duration: Duration,
    ) -> Self {
        let success_count = results.iter().filter(|r| r.is_success()).count();
        let error_count = results
            .iter()
            .filter(|r| r.status == SweepStatus::Error)
            .count();
        Self {
            timestamp,
            epoch: baseline.epoch,
            start_tick: baseline.tick,
            pair_count,
            success_count,
            error_count,
            cost_qu: success_count as u64 * cost_per_query_qu,
            duration_ms: duration.as_millis() as u64,
            results,
        }
    }
}

pub struct SweepScheduler<G> {
    gateway: G,
    settings: SweepConfig,
    history: Option<RollingHistory>,
    cancel: CancellationToken,
}

impl<G: LedgerGateway> SweepScheduler<G> {
    pub fn new(
        gateway: G,
        settings: SweepConfig,
        history: Option<RollingHistory>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            settings,
            history,
            cancel,
        }
    }

    /// Target tick of the `index`-th pair: `current + lead + index * stagger`
    pub fn target_tick(&self, current_tick: u32, index: usize) -> u32 {
        current_tick + self.settings.tick_lead + index as u32 * self.settings.tick_stagger
    }

    /// Sleep unless cancelled first
    async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(OracleError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn check_budget(&self, pair_count: usize) -> Result<()> {
        let total_cost = pair_count as u64 * self.settings.cost_per_query_qu;
        let required = total_cost + self.settings.balance_reserve_qu;
        let balance = self
            .gateway
            .get_balance()
            .await
            .map_err(|e| OracleError::Gateway(format!("{:#}", e)))?;
        if balance < required {
            error!(balance, required, total_cost, "❌ Insufficient balance for sweep");
            return Err(OracleError::InsufficientBalance { balance, required });
        }
        info!(balance, total_cost, "💰 Budget check passed");
        Ok(())
    }

    async fn send(&self, pair: &SweepPair, tick: u32) -> anyhow::Result<BroadcastReceipt> {
        let receipt = self
            .gateway
            .send_oracle_query(&pair.oracle, &pair.currency1, &pair.currency2, tick)
            .await?;
        if !receipt.success {
            bail!("broadcaster rejected query (tx {})", receipt.tx_id);
        }
        Ok(receipt)
    }

    async fn broadcast_with_retry(&self, pair: &SweepPair, target_tick: u32) -> SweepResult {
        let first_err = match self.send(pair, target_tick).await {
            Ok(receipt) => {
                info!(
                    pair = %pair,
                    target_tick,
                    tx_id = %receipt.tx_id,
                    peers = receipt.peers_broadcasted,
                    "✅ Query broadcast"
                );
                let mut result = SweepResult::base(pair, target_tick, SweepStatus::Broadcast);
                result.tx_id = Some(receipt.tx_id);
                result.peers_broadcasted = Some(receipt.peers_broadcasted);
                return result;
            }
            Err(e) => e,
        };

        let retry_tick = target_tick + self.settings.retry_tick_offset;
        warn!(
            pair = %pair,
            target_tick,
            retry_tick,
            error = %first_err,
            "⚠️ Broadcast failed, retrying once"
        );

        let mut result = SweepResult::base(pair, target_tick, SweepStatus::Error);
        result.retry_tick = Some(retry_tick);
        if self.pause(self.settings.retry_backoff()).await.is_err() {
            result.error = Some(OracleError::Cancelled.to_string());
            return result;
        }

        match self.send(pair, retry_tick).await {
            Ok(receipt) => {
                info!(
                    pair = %pair,
                    retry_tick,
                    tx_id = %receipt.tx_id,
                    "🔁 Query broadcast on retry"
                );
                result.status = SweepStatus::BroadcastRetry;
                result.tx_id = Some(receipt.tx_id);
                result.peers_broadcasted = Some(receipt.peers_broadcasted);
            }
            Err(e) => {
                let err = OracleError::Broadcast(format!("{:#}", e));
                error!(pair = %pair, retry_tick, error = %err, "❌ Retry failed");
                result.error = Some(err.to_string());
            }
        }
        result
    }

    /// Run one sweep. Dry runs resolve the tick baseline but broadcast nothing
    /// and persist nothing.
    pub async fn run(&self, pairs: &[SweepPair], dry_run: bool) -> Result<SweepRecord> {
        let started = Instant::now();
        let timestamp = Utc::now().to_rfc3339();

        let baseline = self
            .gateway
            .get_current_tick()
            .await
            .map_err(|e| OracleError::Gateway(format!("{:#}", e)))?;
        info!(
            tick = baseline.tick,
            epoch = baseline.epoch,
            pairs = pairs.len(),
            dry_run,
            "📡 Starting sweep"
        );

        if !dry_run {
            self.check_budget(pairs.len()).await?;
        }

        let mut results = Vec::with_capacity(pairs.len());
        for (i, pair) in pairs.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(done = i, remaining = pairs.len() - i, "⚠️ Sweep cancelled");
                break;
            }
            let target_tick = self.target_tick(baseline.tick, i);

            if dry_run {
                info!(pair = %pair, target_tick, "🧪 Dry run");
                results.push(SweepResult::base(pair, target_tick, SweepStatus::DryRun));
                continue;
            }

            results.push(self.broadcast_with_retry(pair, target_tick).await);

            if i + 1 < pairs.len() && self.pause(self.settings.pacing()).await.is_err() {
                warn!(done = i + 1, remaining = pairs.len() - i - 1, "⚠️ Sweep cancelled");
                break;
            }
        }

        let record = SweepRecord::summarize(
            timestamp,
            baseline,
            pairs.len(),
            results,
            self.settings.cost_per_query_qu,
            started.elapsed(),
        );
        info!(
            success = record.success_count,
            errors = record.error_count,
            cost_qu = record.cost_qu,
            duration_ms = record.duration_ms,
            "📊 Sweep finished"
        );

        if !dry_run {
            if let Some(history) = &self.history {
                match history.append(&record) {
                    Ok(entries) => info!(entries, "💾 Sweep record stored"),
                    Err(e) => {
                        let err = OracleError::Persistence(format!("{:#}", e));
                        error!(error = %err, "❌ Failed to store sweep record");
                    }
                }
            }
        }

        Ok(record)
    }

    /// Repeat sweeps every `interval` until cancelled. A failed sweep
    /// (e.g. insufficient balance) is logged and retried next round.
    pub async fn run_loop(
        &self,
        pairs: &[SweepPair],
        dry_run: bool,
        interval: Duration,
    ) -> Vec<SweepRecord> {
        let mut records = Vec::new();
        let mut round = 0u64;
        while !self.cancel.is_cancelled() {
            round += 1;
            match self.run(pairs, dry_run).await {
                Ok(record) => records.push(record),
                Err(OracleError::Cancelled) => break,
                Err(e) => error!(round, error = %e, "❌ Sweep failed"),
            }
            info!(round, next_in_secs = interval.as_secs(), "⏳ Waiting for next sweep");
            if self.pause(interval).await.is_err() {
                break;
            }
        }
        info!(rounds = round, "🛑 Loop stopped");
        records
    }
}
