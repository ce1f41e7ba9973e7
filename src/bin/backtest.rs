/// SMC backtester: replays the engine candle by candle over data/*.csv.
/// Run: cargo run --bin backtest --release [SYMBOL ...]
use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use smc_engine::config::{paper_symbol_info, pip_size, SmcConfig};
use smc_engine::feed::load_candles;
use smc_engine::order_type::decide_with_tolerance;
use smc_engine::risk_manager::RiskManager;
use smc_engine::signal_tracker::{InMemoryStore, SignalDeduplicator, SignalKey};
use smc_engine::types::{
    AccountSnapshot, AccountState, Candle, CandleSeries, ClosedTrade, Direction, OrderType, RiskProfile,
    Timeframe, TradingSetup,
};
use smc_engine::SmcAnalyzer;

// ── Constants ─────────────────────────────────────────────────────────────────
const WINDOW:          usize = 500; // candles handed to the engine per timeframe
const WARMUP:          usize = 100; // LTF candles before the first scan
const PENDING_EXPIRY:  usize = 20;  // LTF candles a pending order stays live

// ── Types ─────────────────────────────────────────────────────────────────────
#[derive(Clone, Debug, Serialize)]
struct Trade {
    symbol: String,
    side: &'static str,
    order_type: &'static str,
    entry_time: String,
    exit_time: String,
    entry: f64,
    exit: f64,
    lots: f64,
    sl: f64,
    tp1: f64,
    tp2: f64,
    pnl: f64,
    r_multiple: f64,
    confidence: f64,
    reason: &'static str,
}

struct Pending {
    setup: TradingSetup,
    order_type: OrderType,
    lots: f64,
    risk_amount: f64,
    placed_at: usize,
}

struct Position {
    setup: TradingSetup,
    order_type: OrderType,
    lots: f64,
    remaining: f64,
    sl: f64,
    risk_amount: f64,
    realized: f64,
    tp1_done: bool,
    entry_index: usize,
}

struct Frames {
    htf: Vec<Candle>,
    itf: Vec<Candle>,
    ltf: Vec<Candle>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────
fn ms_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn fmt_ts(ms: i64) -> String {
    ms_to_utc(ms).format("%Y-%m-%d %H:%M").to_string()
}

fn close_time(c: &Candle, tf: Timeframe) -> i64 {
    c.timestamp + tf.minutes() * 60_000
}

/// Last `WINDOW` candles of `candles` already closed at `now_ms`.
fn closed_window(symbol: &str, tf: Timeframe, candles: &[Candle], now_ms: i64) -> Option<CandleSeries> {
    let end = candles.partition_point(|c| close_time(c, tf) <= now_ms);
    let start = end.saturating_sub(WINDOW);
    CandleSeries::new(symbol, tf, candles[start..end].to_vec()).ok()
}

fn money(symbol: &str, direction: Direction, entry: f64, exit: f64, lots: f64) -> f64 {
    let pips = (exit - entry) * f64::from(direction.sign()) / pip_size(symbol);
    pips * paper_symbol_info(symbol).pip_value * lots
}

fn triggered(order_type: OrderType, entry: f64, c: &Candle) -> bool {
    match order_type {
        OrderType::Market => true,
        OrderType::BuyStop | OrderType::SellLimit => c.high >= entry,
        OrderType::BuyLimit | OrderType::SellStop => c.low <= entry,
    }
}

fn stop_hit(direction: Direction, sl: f64, c: &Candle) -> bool {
    match direction {
        Direction::Bullish => c.low <= sl,
        Direction::Bearish => c.high >= sl,
    }
}

fn target_hit(direction: Direction, tp: f64, c: &Candle) -> bool {
    match direction {
        Direction::Bullish => c.high >= tp,
        Direction::Bearish => c.low <= tp,
    }
}

// ── Backtest per symbol ───────────────────────────────────────────────────────
fn backtest_symbol(cfg: &SmcConfig, symbol: &str, frames: &Frames) -> Vec<Trade> {
    let analyzer = SmcAnalyzer::new(cfg);
    let risk = RiskManager::new(cfg);
    let mut dedup = SignalDeduplicator::new(InMemoryStore::new(), cfg.dedup_cooldown_hours);
    let info = paper_symbol_info(symbol);
    let ltf_tf = cfg.ltf_timeframe;

    let mut balance = cfg.account_balance;
    let mut closed: Vec<ClosedTrade> = Vec::new();
    let mut trades: Vec<Trade> = Vec::new();
    let mut pending: Option<Pending> = None;
    let mut position: Option<Position> = None;

    let profile = |balance: f64| RiskProfile {
        balance,
        equity: balance,
        margin_level: f64::INFINITY,
        risk_percentage: cfg.risk_percentage,
        max_daily_loss_percent: cfg.max_daily_loss_percent,
        max_open_positions: cfg.max_open_positions,
        max_lot_size: cfg.max_lot_size,
    };

    for i in WARMUP..frames.ltf.len() {
        let candle = &frames.ltf[i];
        let now_ms = close_time(candle, ltf_tf);

        // ── Pending fill / expiry ─────────────────────────────────────────────
        if let Some(p) = pending.take() {
            let dir = p.setup.direction;
            if triggered(p.order_type, p.setup.entry_price, candle) {
                position = Some(Position {
                    sl: p.setup.stop_loss,
                    order_type: p.order_type,
                    lots: p.lots,
                    remaining: p.lots,
                    risk_amount: p.risk_amount,
                    realized: 0.0,
                    tp1_done: false,
                    entry_index: i,
                    setup: p.setup,
                });
            } else if i - p.placed_at < PENDING_EXPIRY && !stop_hit(dir, p.setup.stop_loss, candle) {
                pending = Some(p);
            }
        }

        // ── Open position management ──────────────────────────────────────────
        if let Some(mut pos) = position.take() {
            let dir = pos.setup.direction;
            let entry = pos.setup.entry_price;
            let mut exit: Option<(f64, &'static str)> = None;

            if stop_hit(dir, pos.sl, candle) {
                exit = Some((pos.sl, if pos.tp1_done { "BE" } else { "SL" }));
            } else if !pos.tp1_done && target_hit(dir, pos.setup.take_profit_1, candle) {
                match risk.partial_close_volume(pos.remaining, info.volume_step) {
                    Some(part) => {
                        pos.realized += money(symbol, dir, entry, pos.setup.take_profit_1, part);
                        pos.remaining -= part;
                        pos.tp1_done = true;
                        pos.sl = risk.breakeven_stop(symbol, dir, entry);
                    }
                    None => exit = Some((pos.setup.take_profit_1, "TP1")),
                }
            } else if pos.tp1_done && target_hit(dir, pos.setup.take_profit_2, candle) {
                exit = Some((pos.setup.take_profit_2, "TP2"));
            }

            match exit {
                Some((price, reason)) => {
                    let pnl = pos.realized + money(symbol, dir, entry, price, pos.remaining);
                    balance += pnl;
                    closed.push(ClosedTrade {
                        symbol: symbol.to_string(),
                        close_time: ms_to_utc(now_ms),
                        profit: pnl,
                        volume: pos.lots,
                    });
                    trades.push(Trade {
                        symbol: symbol.to_string(),
                        side: dir.side(),
                        order_type: pos.order_type.as_str(),
                        entry_time: fmt_ts(frames.ltf[pos.entry_index].timestamp),
                        exit_time: fmt_ts(candle.timestamp),
                        entry,
                        exit: price,
                        lots: pos.lots,
                        sl: pos.setup.stop_loss,
                        tp1: pos.setup.take_profit_1,
                        tp2: pos.setup.take_profit_2,
                        pnl,
                        r_multiple: if pos.risk_amount > 0.0 { pnl / pos.risk_amount } else { 0.0 },
                        confidence: pos.setup.confidence_score,
                        reason,
                    });
                }
                None => position = Some(pos),
            }
            continue;
        }
        if pending.is_some() {
            continue;
        }

        // ── Risk gate ─────────────────────────────────────────────────────────
        let now = ms_to_utc(now_ms);
        let state = AccountState::from_trades(balance, f64::INFINITY, 0, &closed, now);
        if let Err(breach) = risk.check_risk_limits(&profile(balance), &state) {
            log::debug!("[{}] {} | {}", symbol, fmt_ts(now_ms), breach);
            continue;
        }

        // ── Signal search ─────────────────────────────────────────────────────
        let (Some(htf), Some(itf), Some(ltf)) = (
            closed_window(symbol, cfg.htf_timeframe, &frames.htf, now_ms),
            closed_window(symbol, cfg.itf_timeframe, &frames.itf, now_ms),
            closed_window(symbol, ltf_tf, &frames.ltf, now_ms),
        ) else {
            continue;
        };
        let setup = match analyzer.generate_setup(&htf, &itf, &ltf, None, None) {
            Ok(s) => s,
            Err(reason) => {
                log::trace!("[{}] {} | {}", symbol, fmt_ts(now_ms), reason);
                continue;
            }
        };
        match dedup.check_and_record(&SignalKey::from_setup(&setup), now) {
            Ok(v) if v.is_duplicate() => continue,
            Ok(_) => {}
            Err(e) => {
                log::warn!("[{}] tracker: {}", symbol, e);
                continue;
            }
        }

        let tolerance = cfg.price_tolerance_pips * pip_size(symbol);
        let decision = decide_with_tolerance(setup.direction, setup.entry_price, candle.close, tolerance);
        let account = AccountSnapshot {
            balance,
            equity: balance,
            margin_level: f64::INFINITY,
            currency: "USD".to_string(),
            leverage: 100,
        };
        let size = risk.calculate_position_size(
            &profile(balance),
            Some(&account),
            Some(&info),
            symbol,
            setup.entry_price,
            setup.stop_loss,
        );
        log::debug!(
            "[{}] {} | {} {} @ {:.5} | {:.2} lots",
            symbol,
            fmt_ts(now_ms),
            setup.direction.side(),
            decision.order_type,
            setup.entry_price,
            size.lot_size
        );

        pending = Some(Pending {
            setup,
            order_type: decision.order_type,
            lots: size.lot_size,
            risk_amount: size.risk_amount,
            placed_at: i,
        });
    }

    trades
}

// ── Statistics ────────────────────────────────────────────────────────────────
struct Stats {
    trades: usize,
    wins: usize,
    win_rate: f64,
    total_pnl: f64,
    avg_r: f64,
    profit_factor: f64,
    max_drawdown: f64,
}

fn compute_stats(trades: &[Trade], initial: f64) -> Stats {
    if trades.is_empty() {
        return Stats { trades: 0, wins: 0, win_rate: 0.0, total_pnl: 0.0, avg_r: 0.0, profit_factor: 0.0, max_drawdown: 0.0 };
    }
    let gross_win: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = trades.iter().filter(|t| t.pnl <= 0.0).map(|t| t.pnl.abs()).sum();
    let wins = trades.iter().filter(|t| t.pnl > 0.0).count();

    let mut bal = initial;
    let mut peak = initial;
    let mut max_dd = 0.0_f64;
    for t in trades {
        bal += t.pnl;
        peak = peak.max(bal);
        max_dd = max_dd.max((peak - bal) / peak * 100.0);
    }

    Stats {
        trades: trades.len(),
        wins,
        win_rate: wins as f64 / trades.len() as f64 * 100.0,
        total_pnl: trades.iter().map(|t| t.pnl).sum(),
        avg_r: trades.iter().map(|t| t.r_multiple).sum::<f64>() / trades.len() as f64,
        profit_factor: if gross_loss == 0.0 { f64::INFINITY } else { gross_win / gross_loss },
        max_drawdown: max_dd,
    }
}

fn print_stats(label: &str, s: &Stats) {
    println!();
    println!("  ┌─────────────────────────────────────────────┐");
    println!("  │  {:12}", label);
    println!("  ├─────────────────────────────────────────────┤");
    println!("  │  Trades         {:>6}   ({} W / {} L)", s.trades, s.wins, s.trades - s.wins);
    println!("  │  Win Rate       {:>6.1}%", s.win_rate);
    println!("  │  Total PnL      {:>+9.2}", s.total_pnl);
    println!("  │  Avg R          {:>+9.2}", s.avg_r);
    println!("  │  Profit Factor  {:>9.2}", s.profit_factor);
    println!("  │  Max Drawdown   {:>6.1}%", s.max_drawdown);
    println!("  └─────────────────────────────────────────────┘");
}

fn save_trades(trades: &[Trade], path: &Path) -> anyhow::Result<()> {
    let mut w = csv::Writer::from_path(path)?;
    for t in trades {
        w.serialize(t)?;
    }
    w.flush()?;
    Ok(())
}

fn load_frames(cfg: &SmcConfig, symbol: &str) -> anyhow::Result<Frames> {
    let path = |tf: Timeframe| cfg.data_dir.join(format!("{}_{}.csv", symbol, tf));
    let load = |tf: Timeframe| load_candles(&path(tf)).with_context(|| format!("loading {}", path(tf).display()));
    Ok(Frames {
        htf: load(cfg.htf_timeframe)?,
        itf: load(cfg.itf_timeframe)?,
        ltf: load(cfg.ltf_timeframe)?,
    })
}

// ── Main ──────────────────────────────────────────────────────────────────────
fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cfg = SmcConfig::from_env().context("loading configuration")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let symbols: Vec<String> = if args.is_empty() { cfg.symbols.clone() } else { args };

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║  SMC BACKTESTER  {} / {} / {}", cfg.htf_timeframe, cfg.itf_timeframe, cfg.ltf_timeframe);
    println!("║  Capital: {:.0}   Risk: {}%   Max daily loss: {}%", cfg.account_balance, cfg.risk_percentage, cfg.max_daily_loss_percent);
    println!("╚═══════════════════════════════════════════════════════╝");

    let mut all_trades: Vec<Trade> = Vec::new();
    for symbol in &symbols {
        let frames = match load_frames(&cfg, symbol) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("  skipping {}: {:#}", symbol, e);
                continue;
            }
        };
        println!("  {} … {} LTF candles", symbol, frames.ltf.len());
        let trades = backtest_symbol(&cfg, symbol, &frames);
        print_stats(symbol, &compute_stats(&trades, cfg.account_balance));
        all_trades.extend(trades);
    }

    print_stats("ALL", &compute_stats(&all_trades, cfg.account_balance));

    let mut reasons: HashMap<&str, (usize, f64)> = HashMap::new();
    for t in &all_trades {
        let e = reasons.entry(t.reason).or_insert((0, 0.0));
        e.0 += 1;
        e.1 += t.pnl;
    }
    let mut rv: Vec<_> = reasons.into_iter().collect();
    rv.sort_by_key(|(k, _)| *k);
    println!("\n  Exits by type:");
    for (r, (n, pnl)) in rv {
        println!("    {:<6} {:>5} trades   {:>+9.2}", r, n, pnl);
    }

    let log_path = cfg.data_dir.join("backtest_trades.csv");
    save_trades(&all_trades, &log_path)?;
    println!("\n  Trade log: {}\n", log_path.display());
    Ok(())
}
