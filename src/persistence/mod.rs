//! Persistence for sweep history and verified prices
//!
//! - `RollingHistory`: JSON array file capped at N entries, oldest evicted
//! - `CsvPriceStore`: append-only daily CSV of verified price rows

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use csv::WriterBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::verify::VerifiedPriceRow;

/// Durable batch sink for verified prices
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSink: Send + Sync {
    async fn insert_prices_batch(&self, rows: &[VerifiedPriceRow], source: &str) -> Result<usize>;
}

/// Capped JSON-array history file.
///
/// Single writer: each append reads, trims and rewrites the whole file.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    path: PathBuf,
    cap: usize,
}

impl RollingHistory {
    pub fn new(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            path: path.into(),
            cap: cap.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored entries, oldest first. Missing file is empty.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    /// Append one record and evict from the front down to the cap.
    /// Returns the number of entries stored afterwards.
    pub fn append<T: Serialize + DeserializeOwned>(&self, record: &T) -> Result<usize> {
        let mut entries: Vec<serde_json::Value> = match self.load() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "⚠️ History file unreadable, starting a new one"
                );
                Vec::new()
            }
        };
        entries.push(serde_json::to_value(record).context("Failed to serialize record")?);
        if entries.len() > self.cap {
            let overflow = entries.len() - self.cap;
            entries.drain(..overflow);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create history directory")?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&entries)?)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), entries = entries.len(), "history updated");
        Ok(entries.len())
    }
}

/// One CSV line of a verified price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPriceRecord {
    pub recorded_at: i64,
    pub source: String,
    pub tick: u32,
    pub query_id: i64,
    pub oracle: String,
    pub currency1: String,
    pub currency2: String,
    pub price: f64,
    pub status: String,
}

/// Daily CSV files under `{data_dir}/verified/`
pub struct CsvPriceStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl CsvPriceStore {
    pub fn new(data_dir: &str) -> Result<Self> {
        let dir = PathBuf::from(data_dir).join("verified");
        fs::create_dir_all(&dir).context("Failed to create verified price directory")?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn current_file(&self) -> PathBuf {
        let today = Utc::now().format("%Y-%m-%d");
        self.dir.join(format!("verified_prices_{}.csv", today))
    }

    fn create_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open CSV file")?;

        Ok(WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file))
    }

    /// Read back every row of today's file
    pub fn load_today(&self) -> Result<Vec<StoredPriceRecord>> {
        let path = self.current_file();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&path).context("Failed to open CSV file")?;
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row.context("Failed to parse CSV row")?);
        }
        Ok(rows)
    }
}

#[async_trait]
impl PriceSink for CsvPriceStore {
    async fn insert_prices_batch(&self, rows: &[VerifiedPriceRow], source: &str) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock.lock().await;
        let path = self.current_file();
        let mut writer = Self::create_writer(&path)?;
        let recorded_at = Utc::now().timestamp_millis();
        for row in rows {
            writer
                .serialize(StoredPriceRecord {
                    recorded_at,
                    source: source.to_string(),
                    tick: row.tick,
                    query_id: row.query_id,
                    oracle: row.oracle.clone(),
                    currency1: row.currency1.clone(),
                    currency2: row.currency2.clone(),
                    price: row.price,
                    status: row.status.clone(),
                })
                .context("Failed to write price record")?;
        }
        writer.flush().context("Failed to flush price writer")?;
        info!(path = %path.display(), rows = rows.len(), source, "💾 Verified prices stored");
        Ok(rows.len())
    }
}
