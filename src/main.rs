//! Momentum Rebalancer - Main Entry Point
//!
//! Runs one rebalance cycle over a CSV price export, stores the emitted plan
//! and prints the plan with the order deltas for the current holdings.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use momentum_rebalancer::config::Config;
use momentum_rebalancer::data::{latest_prices, load_holdings, CsvPriceSource, PriceSource};
use momentum_rebalancer::persistence::PlanStore;
use momentum_rebalancer::strategy::{OrderPlanner, RebalanceCycle};
use momentum_rebalancer::EngineError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Momentum Rebalancer CLI
#[derive(Parser)]
#[command(name = "momentum-rebalancer")]
#[command(version, about = "Regime-gated momentum rebalancing with position caps")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one rebalance cycle
    Run {
        /// Path to price CSV (timestamp,symbol,high,low,close)
        #[arg(short, long)]
        prices: String,

        /// Path to holdings CSV (symbol,quantity)
        #[arg(long)]
        holdings: Option<String>,

        /// Uninvested cash
        #[arg(short, long, default_value = "0")]
        cash: Decimal,

        /// Decision date (YYYY-MM-DD); defaults to the last bar in the prices file
        #[arg(short, long)]
        as_of: Option<String>,

        /// Path to SQLite plan database (default from config)
        #[arg(long)]
        db: Option<String>,

        /// Rebalance even if no trigger fired
        #[arg(short, long)]
        force: bool,
    },

    /// Show stored plan history
    History {
        /// Path to SQLite plan database (default from config)
        #[arg(long)]
        db: Option<String>,

        /// Number of plans to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Validate and print the effective configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    log_config(&config);

    match cli.command {
        Commands::Run {
            prices,
            holdings,
            cash,
            as_of,
            db,
            force,
        } => {
            let db = db.unwrap_or_else(|| config.persistence.db_path.clone());
            run_cycle(
                &config,
                &prices,
                holdings.as_deref(),
                cash,
                as_of.as_deref(),
                &db,
                force,
            )
            .await
        }
        Commands::History { db, limit } => {
            let db = db.unwrap_or_else(|| config.persistence.db_path.clone());
            show_history(&db, limit)
        }
        Commands::CheckConfig => check_config(&config),
    }
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "momentum-rebalancer.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("momentum_rebalancer=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stderr.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Benchmark: {}", config.universe.benchmark);
    info!(
        "   Max Position Weight: {:.0}%",
        config.risk.max_position_weight * dec!(100)
    );
    info!(
        "   Positions: strong bull {} / weak bull {} / bear {}",
        config.risk.positions.strong_bull,
        config.risk.positions.weak_bull,
        config.risk.positions.bear
    );
    info!("   Bear Substitute: {}", config.risk.bear_substitute_asset);
    info!("   Weighting: {:?}", config.risk.weighting);
    if config.volatility.enabled {
        info!(
            "   Volatility Target: {:.0}% over {} periods",
            config.volatility.target_annual_vol * dec!(100),
            config.volatility.window
        );
    } else {
        info!("   Volatility Target: disabled");
    }
    info!(
        "   Regime MAs: {}/{}",
        config.regime.short_ma, config.regime.long_ma
    );
    info!("   Scoring: {:?}", config.scoring.method);
    info!("   Rebalance Months: {:?}", config.schedule.rebalance_months);
}

fn parse_as_of(value: Option<&str>, source: &CsvPriceSource) -> Result<DateTime<Utc>> {
    match value {
        Some(s) => {
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| anyhow::anyhow!("Invalid as-of date '{}': {}", s, e))?;
            date.and_hms_opt(23, 59, 59)
                .map(|dt| dt.and_utc())
                .context("Invalid as-of time")
        }
        None => Ok(source.latest_timestamp().unwrap_or_else(Utc::now)),
    }
}

/// Run one rebalance cycle and print the plan and order deltas.
async fn run_cycle(
    config: &Config,
    prices_path: &str,
    holdings_path: Option<&str>,
    cash: Decimal,
    as_of: Option<&str>,
    db_path: &str,
    force: bool,
) -> Result<()> {
    let cycle = match RebalanceCycle::new(config) {
        Ok(cycle) => cycle,
        Err(e) => {
            error!("❌ Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    info!("📊 Loading prices from: {}", prices_path);
    let source = CsvPriceSource::new(prices_path)?;
    info!("   Symbols: {}", source.len());

    let as_of = parse_as_of(as_of, &source)?;

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let store = PlanStore::new(db_path)?;

    let stale_after = Duration::seconds(config.persistence.lock_stale_after_secs as i64);
    let lease = match store.try_lock_cycle(stale_after) {
        Ok(lease) => lease,
        Err(e) if matches!(e.downcast_ref::<EngineError>(), Some(EngineError::CycleInProgress)) => {
            warn!("⏳ Another rebalance cycle is running against {}, skipping", db_path);
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    debug!(holder = lease.holder(), "Cycle lock held");

    let last = store.latest_plan()?;

    let outcome = cycle.run(&source, as_of, last.as_ref().map(|r| &r.plan), force)?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    let Some(plan) = outcome.plan.as_ref() else {
        info!("✅ No rebalance due as of {}", as_of.format("%Y-%m-%d"));
        return Ok(());
    };

    let plan_id = store.save_plan(plan, outcome.trigger.as_ref())?;
    info!(plan_id, "💾 Plan saved");

    let holdings: HashMap<String, Decimal> = match holdings_path {
        Some(path) => load_holdings(path)?,
        None => HashMap::new(),
    };

    let symbols: BTreeSet<&String> = plan.weights().keys().chain(holdings.keys()).collect();
    let prices = latest_prices(&source, symbols, as_of)?;

    let orders = OrderPlanner::new(config.orders.clone()).plan_orders(plan, &holdings, &prices, cash);
    if !orders.unpriced.is_empty() {
        warn!(unpriced = ?orders.unpriced, "⚠️  Symbols without prices were skipped");
    }

    println!("{}", serde_json::to_string_pretty(&orders)?);

    Ok(())
}

/// Print stored plans, newest first.
fn show_history(db_path: &str, limit: usize) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              PLAN HISTORY                                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   No cycle has run yet, or the database path is incorrect.");
        return Ok(());
    }

    let store = PlanStore::new(db_path)?;
    let records = store.history(limit)?;

    if records.is_empty() {
        println!("\n❌ No plans stored.");
        return Ok(());
    }

    for record in &records {
        let plan = &record.plan;
        println!(
            "\n📅 #{} {} {} ({})",
            record.id,
            plan.generated_at().format("%Y-%m-%d %H:%M:%S UTC"),
            plan.regime(),
            record.trigger.as_deref().unwrap_or("-")
        );
        for (symbol, weight) in plan.weights() {
            println!("   ├─ {:<10} {:>7.2}%", symbol, weight * dec!(100));
        }
        println!("   └─ Cash       {:>7.2}%", plan.cash_weight() * dec!(100));
        if let Some(scalar) = plan.volatility_scalar() {
            println!("      Volatility scalar: {:.4}", scalar);
        }
        for warning in plan.warnings() {
            println!("      ⚠️  {}", serde_json::to_string(warning)?);
        }
    }

    println!();
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    match config.validate() {
        Ok(()) => {
            println!("{}", serde_json::to_string_pretty(config)?);
            info!("✅ Configuration is valid");
            Ok(())
        }
        Err(e) => {
            error!(fatal = e.is_fatal(), "❌ {}", e);
            Err(e.into())
        }
    }
}
