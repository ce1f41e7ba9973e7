#[cfg(feature = "jemalloc")]
use tikv_jemallocator::Jemalloc;
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[cfg(feature = "jemalloc")]
fn jemalloc_purge() {
    use tikv_jemalloc_ctl::epoch;
    // Advancing the epoch makes jemalloc evaluate decay windows and release dirty pages.
    if let Ok(e) = epoch::mib() {
        let _ = e.advance();
    }
    log::debug!("jemalloc: epoch advanced");
}

use anyhow::Context;
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use smc_engine::config::{paper_symbol_info, SmcConfig, HISTORY_CANDLES, MAX_CONCURRENT_SCANS};
use smc_engine::feed::{CandleFeed, CsvFeed, FileScores};
use smc_engine::signal_generator::{AccountContext, MarketSnapshot};
use smc_engine::signal_tracker::{DedupVerdict, JsonFileStore, SignalDeduplicator, SignalKey};
use smc_engine::types::{AccountSnapshot, AccountState, RiskProfile, Timeframe};
use smc_engine::{NoSetup, Rejection, Signal, SignalGenerator};

const TRACKER_RETENTION_DAYS: i64 = 7;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cfg = Arc::new(SmcConfig::from_env().context("loading configuration")?);
    let feed: Arc<dyn CandleFeed> = Arc::new(CsvFeed::new(&cfg.data_dir, cfg.ltf_timeframe));
    let scores = FileScores::new(&cfg.data_dir);
    let generator = Arc::new(SignalGenerator::new(&cfg, Box::new(scores.clone()), Box::new(scores)));
    let store = JsonFileStore::open(&cfg.signal_store)
        .with_context(|| format!("opening signal store {}", cfg.signal_store.display()))?;
    let mut dedup = SignalDeduplicator::new(store, cfg.dedup_cooldown_hours);

    // Bounds concurrent symbol scans.
    let sem = Arc::new(Semaphore::new(MAX_CONCURRENT_SCANS));
    let interval = Duration::from_secs(cfg.scan_interval_minutes * 60);

    log::info!(
        "SMC engine started | {} symbols | {} / {} / {} | every {} min",
        cfg.symbols.len(),
        cfg.htf_timeframe,
        cfg.itf_timeframe,
        cfg.ltf_timeframe,
        cfg.scan_interval_minutes
    );

    loop {
        let handles: Vec<_> = cfg
            .symbols
            .iter()
            .map(|symbol| {
                let sem = sem.clone();
                let cfg = cfg.clone();
                let feed = feed.clone();
                let generator = generator.clone();
                let symbol = symbol.clone();
                tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.ok()?;
                    let scanned = symbol.clone();
                    match tokio::task::spawn_blocking(move || scan_symbol(&cfg, feed.as_ref(), &generator, &symbol)).await {
                        Ok(result) => Some((scanned, result)),
                        Err(e) => {
                            log::error!("[{}] scan task failed: {}", scanned, e);
                            None
                        }
                    }
                })
            })
            .collect();

        let mut emitted = 0usize;
        let mut scanned = 0usize;
        for handle in handles {
            let Ok(Some((symbol, result))) = handle.await else {
                continue;
            };
            scanned += 1;
            match result {
                Ok(signal) => {
                    let now = Utc::now();
                    let key = SignalKey::from_setup(&signal.setup);
                    match dedup.check_and_record(&key, now) {
                        Ok(DedupVerdict::Duplicate(reason)) => log::info!("[{}] {}", symbol, reason),
                        Ok(DedupVerdict::New) => {
                            emitted += 1;
                            if let Err(e) = append_audit(&cfg.audit_log, &signal) {
                                log::error!("[{}] audit write failed: {}", symbol, e);
                            }
                        }
                        Err(e) => log::error!("[{}] signal tracker error: {}", symbol, e),
                    }
                }
                Err(Rejection::NoSetup(NoSetup::InsufficientData { timeframe, len, required })) => {
                    log::warn!("[{} {}] only {} candles (need {})", symbol, timeframe, len, required);
                }
                Err(reason) => log::info!("[{}] {}", symbol, reason),
            }
        }
        log::info!("Scan complete: {}/{} symbols produced a new signal", emitted, scanned);

        if let Err(e) = dedup.cleanup_older_than(TRACKER_RETENTION_DAYS, Utc::now()) {
            log::warn!("signal tracker cleanup failed: {}", e);
        }

        #[cfg(feature = "jemalloc")]
        jemalloc_purge();

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutdown requested, stopping scan loop");
                break;
            }
        }
    }
    Ok(())
}

/// One symbol, one cycle: fetch, run the engine against the paper account.
fn scan_symbol(
    cfg: &SmcConfig,
    feed: &dyn CandleFeed,
    generator: &SignalGenerator,
    symbol: &str,
) -> Result<Signal, Rejection> {
    let fetch = |tf: Timeframe| {
        feed.get_historical_data(symbol, tf, HISTORY_CANDLES).map_err(|e| match e {
            smc_engine::SmcError::InsufficientData { len, required } => {
                Rejection::NoSetup(NoSetup::InsufficientData { timeframe: tf, len, required })
            }
            other => Rejection::Feed { timeframe: tf, reason: other.to_string() },
        })
    };
    let market = MarketSnapshot {
        htf: fetch(cfg.htf_timeframe)?,
        itf: fetch(cfg.itf_timeframe)?,
        ltf: fetch(cfg.ltf_timeframe)?,
        quote: feed.get_current_price(symbol),
    };

    let balance = cfg.account_balance;
    let account = AccountContext {
        profile: RiskProfile {
            balance,
            equity: balance,
            margin_level: f64::INFINITY,
            risk_percentage: cfg.risk_percentage,
            max_daily_loss_percent: cfg.max_daily_loss_percent,
            max_open_positions: cfg.max_open_positions,
            max_lot_size: cfg.max_lot_size,
        },
        account: Some(AccountSnapshot {
            balance,
            equity: balance,
            margin_level: f64::INFINITY,
            currency: "USD".to_string(),
            leverage: 100,
        }),
        state: AccountState {
            balance,
            margin_level: f64::INFINITY,
            open_positions: 0,
            daily_pnl: 0.0,
            weekly_pnl: 0.0,
        },
        symbol_info: Some(paper_symbol_info(symbol)),
        stats: None,
    };

    generator.generate(symbol, &market, &account, Utc::now())
}

fn append_audit(path: &Path, signal: &Signal) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{}", serde_json::to_string(signal)?)?;
    Ok(())
}
