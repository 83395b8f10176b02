//! Oracle sweep CLI
//!
//! Usage:
//!
//! ```bash
//! oracle-sweep --estimate --all
//! oracle-sweep --tier 1,2 --dry-run
//! oracle-sweep --tier 1 --loop --interval 30
//! oracle-sweep --verify 22000100 --ticks 20
//! oracle-sweep --discover
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use oracle_sweep::config::AppConfig;
use oracle_sweep::persistence::{CsvPriceStore, RollingHistory};
use oracle_sweep::rpc::RpcClient;
use oracle_sweep::sweep::{self, SweepRecord, SweepScheduler};
use oracle_sweep::types::Tier;
use oracle_sweep::verify::{DiscoveredPair, VerificationDriver, VerificationReport};

#[derive(Debug, Parser)]
#[command(version, about = "Oracle price-query sweeps and TCP verification")]
struct Args {
    /// Print the cost of sweeping the selected tiers
    #[arg(long)]
    estimate: bool,

    /// List registry pairs grouped by tier
    #[arg(long)]
    explore: bool,

    /// Tiers to sweep, e.g. `1` or `1,2`
    #[arg(long, value_name = "N[,M]", value_parser = parse_tiers)]
    tier: Option<TierList>,

    /// Select every tier
    #[arg(long, conflicts_with = "tier")]
    all: bool,

    /// Compute target ticks without broadcasting or persisting
    #[arg(long)]
    dry_run: bool,

    /// Repeat sweeps until interrupted
    #[arg(long = "loop")]
    run_loop: bool,

    /// Minutes between sweeps in loop mode
    #[arg(long, value_name = "MINUTES", requires = "run_loop")]
    interval: Option<u64>,

    /// Verify oracle answers from this tick on
    #[arg(long, value_name = "START_TICK")]
    verify: Option<u32>,

    /// Ticks to scan with --verify
    #[arg(long, value_name = "COUNT", requires = "verify")]
    ticks: Option<u32>,

    /// Scan recent ticks and list every pair seen
    #[arg(long)]
    discover: bool,

    /// Scan recent ticks and list pairs with at least one successful answer
    #[arg(long, conflicts_with = "discover")]
    working: bool,
}

#[derive(Debug, Clone)]
struct TierList(Vec<Tier>);

fn parse_tiers(s: &str) -> std::result::Result<TierList, String> {
    Tier::parse_list(s)
        .map(TierList)
        .ok_or_else(|| format!("invalid tier list {:?}, expected e.g. 1 or 1,2", s))
}

impl Args {
    fn tiers(&self) -> Vec<Tier> {
        if self.all {
            Tier::ALL.to_vec()
        } else {
            self.tier
                .as_ref()
                .map(|t| t.0.clone())
                .unwrap_or_else(|| vec![Tier::Core])
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    if let Err(e) = run(args).await {
        error!(error = %format!("{:#}", e), "❌ Run failed");
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(config.logging.json);
    info!(config = %config, "🚀 oracle-sweep {}", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, stopping");
            ctrl_c_cancel.cancel();
        }
    });

    let tiers = args.tiers();

    if args.estimate {
        print_estimate(&tiers, config.sweep.cost_per_query_qu);
        return Ok(());
    }
    if args.explore {
        print_registry(&tiers);
        return Ok(());
    }

    if let Some(start_tick) = args.verify {
        let tick_count = args.ticks.unwrap_or(config.verify.default_tick_count);
        let store = match CsvPriceStore::new(&config.persistence.data_dir) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(error = %e, "⚠️ Price store unavailable, results will not be persisted");
                None
            }
        };
        let driver = VerificationDriver::new(config.node.clone(), store, cancel);
        let report = driver
            .verify(start_tick, tick_count)
            .await
            .context("Verification failed")?;
        print_verification(&report);
        return Ok(());
    }

    if args.discover || args.working {
        let driver: VerificationDriver<CsvPriceStore> =
            VerificationDriver::new(config.node.clone(), None, cancel);
        let mut found = driver
            .discover(config.verify.discover_window)
            .await
            .context("Discovery failed")?;
        if args.working {
            found.retain(|p| p.successes() > 0);
        }
        print_discovery(&found, args.working);
        return Ok(());
    }

    let pairs = sweep::pairs_by_tier(&tiers);
    let rpc = RpcClient::new(&config.rpc)?;
    let history = RollingHistory::new(config.persistence.history_path(), config.sweep.history_cap);
    let loop_interval = args
        .interval
        .map(|m| std::time::Duration::from_secs(m * 60))
        .unwrap_or_else(|| config.sweep.loop_interval());
    let scheduler = SweepScheduler::new(rpc, config.sweep.clone(), Some(history), cancel);

    if args.run_loop {
        let records = scheduler.run_loop(&pairs, args.dry_run, loop_interval).await;
        for record in &records {
            print_sweep(record, args.dry_run);
        }
        return Ok(());
    }

    let record = scheduler.run(&pairs, args.dry_run).await?;
    print_sweep(&record, args.dry_run);
    Ok(())
}

fn print_estimate(tiers: &[Tier], cost_per_query_qu: u64) {
    let mut total_pairs = 0;
    let mut total_cost = 0;
    println!("{:<14} {:>6} {:>10}", "tier", "pairs", "cost (QU)");
    for &tier in tiers {
        let est = sweep::estimate_cost(tier, cost_per_query_qu);
        println!("{:<14} {:>6} {:>10}", tier.to_string(), est.pair_count, est.cost_qu);
        total_pairs += est.pair_count;
        total_cost += est.cost_qu;
    }
    println!("{:<14} {:>6} {:>10}", "total", total_pairs, total_cost);
}

fn print_registry(tiers: &[Tier]) {
    for &tier in tiers {
        println!("Tier {}", tier);
        for pair in sweep::pairs_by_tier(&[tier]) {
            println!("  {}", pair);
        }
    }
}

fn print_sweep(record: &SweepRecord, dry_run: bool) {
    println!(
        "{} sweep @ tick {} (epoch {}): {} pairs, {} ok, {} errors, {} QU, {} ms",
        if dry_run { "🧪 Dry-run" } else { "📡 Live" },
        record.start_tick,
        record.epoch,
        record.pair_count,
        record.success_count,
        record.error_count,
        record.cost_qu,
        record.duration_ms
    );
    for r in &record.results {
        let icon = match r.status {
            sweep::SweepStatus::DryRun => "🧪",
            sweep::SweepStatus::Broadcast => "✅",
            sweep::SweepStatus::BroadcastRetry => "🔁",
            sweep::SweepStatus::Error => "❌",
        };
        let detail = r
            .error
            .clone()
            .or_else(|| r.tx_id.clone())
            .unwrap_or_default();
        println!(
            "  {} {} {}/{} tick {} {}",
            icon, r.oracle, r.currency1, r.currency2, r.target_tick, detail
        );
    }
}

fn print_verification(report: &VerificationReport) {
    println!(
        "🔍 Ticks {}..{}: {} scanned, {} empty, {} failed",
        report.start_tick,
        report.start_tick.saturating_add(report.tick_count),
        report.ticks_scanned,
        report.ticks_empty,
        report.ticks_failed
    );
    println!(
        "   {} queries, {} success, {} failed, {} prices",
        report.total_queries,
        report.success_queries,
        report.failed_queries,
        report.prices.len()
    );
    for (status, n) in &report.status_counts {
        println!("   {:<13} {}", status.as_str(), n);
    }
    for avg in &report.averages {
        println!(
            "   {} {}/{}: {:.8} ({} samples)",
            avg.oracle, avg.currency1, avg.currency2, avg.average_price, avg.samples
        );
    }
}

fn print_discovery(found: &[DiscoveredPair], working_only: bool) {
    println!(
        "🔎 {} {}",
        found.len(),
        if working_only { "working pairs" } else { "pairs seen" }
    );
    for p in found {
        let price = p
            .last_price
            .map(|v| format!("{:.8}", v))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} {}/{}: {} obs, {} success, last tick {}, last price {}",
            p.oracle,
            p.currency1,
            p.currency2,
            p.observations,
            p.successes(),
            p.last_tick,
            price
        );
    }
}
