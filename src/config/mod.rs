//! Configuration management for oracle sweeps
//!
//! Loads built-in defaults, optional config files and `ORACLE_SWEEP__*`
//! environment variables (after reading `.env`).

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub rpc: RpcConfig,
    pub sweep: SweepConfig,
    pub verify: VerifyConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Node host for the raw TCP protocol
    pub host: String,
    /// Node port (21841 on mainnet)
    pub port: u16,
    /// Connect deadline in milliseconds
    pub connect_timeout_ms: u64,
    /// Deadline for one complete frame in milliseconds
    pub frame_timeout_ms: u64,
    /// Gossip frames tolerated while waiting for one answer frame
    pub max_skipped_frames: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// HTTP RPC base URLs, tried in order on failure
    pub endpoints: Vec<String>,
    /// Signing broadcaster base URL
    pub broadcaster_url: String,
    /// Identity whose balance funds the queries
    pub identity: String,
    pub request_timeout_ms: u64,
    /// Minimum spacing between two RPC requests
    pub min_request_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Fee per oracle query in QU
    pub cost_per_query_qu: u64,
    /// Balance that must remain after paying for a sweep
    pub balance_reserve_qu: u64,
    /// Ticks between the current tick and the first target
    pub tick_lead: u32,
    /// Ticks between consecutive targets
    pub tick_stagger: u32,
    /// Offset of the single retry from the first target
    pub retry_tick_offset: u32,
    pub retry_backoff_ms: u64,
    /// Delay between live broadcasts
    pub pacing_ms: u64,
    /// Rolling history size
    pub history_cap: usize,
    pub loop_interval_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyConfig {
    /// Ticks scanned by `--verify` when `--ticks` is not given
    pub default_tick_count: u32,
    /// Ticks scanned back from the current tick by discovery
    pub discover_window: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    pub data_dir: String,
    pub history_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human format
    pub json: bool,
}

impl SweepConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval_minutes * 60)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            cost_per_query_qu: 10,
            balance_reserve_qu: 100,
            tick_lead: 20,
            tick_stagger: 3,
            retry_tick_offset: 5,
            retry_backoff_ms: 2000,
            pacing_ms: 500,
            history_cap: 500,
            loop_interval_minutes: 30,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: crate::protocol::DEFAULT_PORT,
            connect_timeout_ms: 10_000,
            frame_timeout_ms: 8_000,
            max_skipped_frames: crate::protocol::filter::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PersistenceConfig {
    pub fn history_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.history_file)
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config/local").required(false))
                // Override with environment variables (ORACLE_SWEEP__*)
                .add_source(
                    Environment::with_prefix("ORACLE_SWEEP")
                        .separator("__")
                        .list_separator(",")
                        .with_list_parse_key("rpc.endpoints")
                        .try_parsing(true),
                ),
        )
    }

    /// Defaults only, for tests and tools without config files
    pub fn defaults() -> Result<Self> {
        Self::from_builder(Config::builder())
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let node = NodeConfig::default();
        let sweep = SweepConfig::default();

        let config = builder
            // Node defaults
            .set_default("node.host", node.host)?
            .set_default("node.port", node.port as i64)?
            .set_default("node.connect_timeout_ms", node.connect_timeout_ms)?
            .set_default("node.frame_timeout_ms", node.frame_timeout_ms)?
            .set_default("node.max_skipped_frames", node.max_skipped_frames as u64)?
            // RPC defaults
            .set_default("rpc.endpoints", vec!["https://rpc.qubic.org"])?
            .set_default("rpc.broadcaster_url", "http://127.0.0.1:8787")?
            .set_default("rpc.identity", "")?
            .set_default("rpc.request_timeout_ms", 15_000)?
            .set_default("rpc.min_request_interval_ms", 250)?
            // Sweep defaults
            .set_default("sweep.cost_per_query_qu", sweep.cost_per_query_qu)?
            .set_default("sweep.balance_reserve_qu", sweep.balance_reserve_qu)?
            .set_default("sweep.tick_lead", sweep.tick_lead as u64)?
            .set_default("sweep.tick_stagger", sweep.tick_stagger as u64)?
            .set_default("sweep.retry_tick_offset", sweep.retry_tick_offset as u64)?
            .set_default("sweep.retry_backoff_ms", sweep.retry_backoff_ms)?
            .set_default("sweep.pacing_ms", sweep.pacing_ms)?
            .set_default("sweep.history_cap", sweep.history_cap as u64)?
            .set_default("sweep.loop_interval_minutes", sweep.loop_interval_minutes)?
            // Verification defaults
            .set_default("verify.default_tick_count", 10)?
            .set_default("verify.discover_window", 50)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.history_file", "oracle-price-history.json")?
            .set_default("logging.json", false)?
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "node={}:{} rpc_endpoints={} cost_per_query={}QU history={} cap={}",
            self.node.host,
            self.node.port,
            self.rpc.endpoints.len(),
            self.sweep.cost_per_query_qu,
            self.persistence.history_path().display(),
            self.sweep.history_cap,
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let cfg = AppConfig::defaults().unwrap();
        assert_eq!(cfg.node.port, 21841);
        assert_eq!(cfg.node.frame_timeout_ms, 8_000);
        assert_eq!(cfg.node.connect_timeout_ms, 10_000);
        assert_eq!(cfg.node.max_skipped_frames, 10);
        assert_eq!(cfg.sweep.tick_lead, 20);
        assert_eq!(cfg.sweep.tick_stagger, 3);
        assert_eq!(cfg.sweep.retry_tick_offset, 5);
        assert_eq!(cfg.sweep.history_cap, 500);
        assert_eq!(cfg.sweep.pacing(), Duration::from_millis(500));
        assert_eq!(cfg.sweep.retry_backoff(), Duration::from_secs(2));
        assert_eq!(
            cfg.persistence.history_path(),
            PathBuf::from("./data").join("oracle-price-history.json")
        );
    }

    #[test]
    fn digest_omits_identity() {
        let mut cfg = AppConfig::defaults().unwrap();
        cfg.rpc.identity = "SECRETIDENTITY".to_string();
        assert!(!cfg.digest().contains("SECRETIDENTITY"));
    }
}
