use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

use crate::config::{pip_size, SmcConfig, BREAKEVEN_BUFFER_PIPS, KELLY_FLOOR_PERCENT, PARTIAL_CLOSE_TP1_PERCENT};
use crate::types::{
    AccountSnapshot, AccountState, ClosedTrade, Direction, PositionSizeResult, Quote, RiskProfile, SymbolInfo,
};

/// A failed account-level check. Expected outcome, reported for audit.
#[derive(Clone, Debug, PartialEq)]
pub enum RiskBreach {
    DailyLoss { pnl: f64, limit: f64 },
    MaxPositions { open: usize, max: usize },
    LowMargin { level: f64, min: f64 },
    WeeklyLoss { pnl: f64, limit: f64 },
}

impl fmt::Display for RiskBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskBreach::DailyLoss { pnl, limit } => {
                write!(f, "Daily loss limit reached: {pnl:.2} (limit: {:.2})", -limit)
            }
            RiskBreach::MaxPositions { open, max } => write!(f, "Max positions reached: {open}/{max}"),
            RiskBreach::LowMargin { level, min } => {
                write!(f, "Low margin level: {level:.2}% (minimum {min:.0}%)")
            }
            RiskBreach::WeeklyLoss { pnl, limit } => {
                write!(f, "Weekly loss limit reached: {pnl:.2} (limit: {:.2})", -limit)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TradeRejection {
    Risk(RiskBreach),
    LowConfidence { confidence: f64, threshold: f64 },
    SymbolUnavailable(String),
    SpreadTooWide { spread: f64, max: f64 },
}

impl fmt::Display for TradeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeRejection::Risk(b) => write!(f, "{b}"),
            TradeRejection::LowConfidence { confidence, threshold } => {
                write!(f, "Confidence too low: {confidence:.2} (need {threshold:.2})")
            }
            TradeRejection::SymbolUnavailable(s) => write!(f, "Symbol {s} not available"),
            TradeRejection::SpreadTooWide { spread, max } => {
                write!(f, "Spread too high: {spread:.5} (max {max:.5})")
            }
        }
    }
}

impl From<RiskBreach> for TradeRejection {
    fn from(b: RiskBreach) -> Self {
        TradeRejection::Risk(b)
    }
}

/// Win/loss history summary feeding Kelly sizing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TradingStats {
    pub total_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    /// Positive number.
    pub avg_loss: f64,
}

impl TradingStats {
    pub fn from_trades(trades: &[ClosedTrade]) -> Self {
        if trades.is_empty() {
            return TradingStats { total_trades: 0, win_rate: 0.5, avg_win: 0.0, avg_loss: 0.0 };
        }
        let wins: Vec<f64> = trades.iter().map(|t| t.profit).filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = trades.iter().map(|t| t.profit).filter(|p| *p < 0.0).collect();
        let mean = |v: &[f64]| if v.is_empty() { 0.0 } else { v.iter().sum::<f64>() / v.len() as f64 };
        TradingStats {
            total_trades: trades.len(),
            win_rate: wins.len() as f64 / trades.len() as f64,
            avg_win: mean(&wins),
            avg_loss: mean(&losses).abs(),
        }
    }
}

impl AccountState {
    /// Daily P&L counts trades closed since UTC midnight, weekly the trailing
    /// seven days. Trades stamped after `now` are ignored.
    pub fn from_trades(
        balance: f64,
        margin_level: f64,
        open_positions: usize,
        trades: &[ClosedTrade],
        now: DateTime<Utc>,
    ) -> Self {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc())
            .unwrap_or(now);
        let week_ago = now - Duration::days(7);
        let sum_since = |from: DateTime<Utc>| -> f64 {
            trades
                .iter()
                .filter(|t| t.close_time >= from && t.close_time <= now)
                .map(|t| t.profit)
                .sum()
        };
        AccountState {
            balance,
            margin_level,
            open_positions,
            daily_pnl: sum_since(midnight),
            weekly_pnl: sum_since(week_ago),
        }
    }
}

/// Open position as reported by the execution layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OpenPosition {
    pub symbol: String,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub volume: f64,
    /// Account-currency value of one pip for one lot.
    pub pip_value: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskReport {
    pub balance: f64,
    pub equity: f64,
    pub margin_level: f64,
    pub daily_pnl: f64,
    pub daily_pnl_percent: f64,
    pub weekly_pnl: f64,
    pub weekly_pnl_percent: f64,
    pub open_positions: usize,
    pub max_positions: usize,
    pub total_risk_exposure: f64,
    pub risk_exposure_percent: f64,
    pub risk_per_trade: f64,
    pub max_daily_loss: f64,
    pub win_rate: f64,
    pub total_trades: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
}

#[derive(Clone, Debug)]
pub struct RiskManager {
    min_lot: f64,
    max_lot: f64,
    lot_step: f64,
    min_margin_level: f64,
    max_weekly_loss_percent: f64,
    confidence_threshold: f64,
    max_spread_points: f64,
    partial_close_percent: f64,
    breakeven_buffer_pips: f64,
}

impl RiskManager {
    pub fn new(cfg: &SmcConfig) -> Self {
        RiskManager {
            min_lot: cfg.min_lot_size,
            max_lot: cfg.max_lot_size,
            lot_step: cfg.lot_step,
            min_margin_level: cfg.min_margin_level,
            max_weekly_loss_percent: cfg.max_weekly_loss_percent,
            confidence_threshold: cfg.ml_ensemble_threshold,
            max_spread_points: cfg.max_spread_points,
            partial_close_percent: PARTIAL_CLOSE_TP1_PERCENT,
            breakeven_buffer_pips: BREAKEVEN_BUFFER_PIPS,
        }
    }

    pub fn min_lot(&self) -> f64 {
        self.min_lot
    }

    /// Percentage-risk sizing. Missing account or symbol data, or a degenerate
    /// stop, yields the minimum lot with `fallback` set; never zero.
    pub fn calculate_position_size(
        &self,
        profile: &RiskProfile,
        account: Option<&AccountSnapshot>,
        symbol_info: Option<&SymbolInfo>,
        symbol: &str,
        entry_price: f64,
        stop_loss: f64,
    ) -> PositionSizeResult {
        let pip = pip_size(symbol);
        let stop_distance = (entry_price - stop_loss).abs() / pip;
        let fallback = |risk_amount: f64| PositionSizeResult {
            lot_size: self.min_lot,
            risk_amount,
            stop_distance,
            fallback: true,
        };

        let Some(account) = account else {
            log::warn!("[{}] no account info, sizing at minimum lot", symbol);
            return fallback(0.0);
        };
        let risk_amount = account.balance * profile.risk_percentage / 100.0;
        let Some(info) = symbol_info else {
            log::warn!("[{}] no symbol info, sizing at minimum lot", symbol);
            return fallback(risk_amount);
        };
        if !(stop_distance.is_finite() && stop_distance > 0.0 && info.pip_value > 0.0 && risk_amount > 0.0) {
            log::warn!(
                "[{}] degenerate sizing inputs (stop {:.1} pips, pip value {}), minimum lot",
                symbol,
                stop_distance,
                info.pip_value
            );
            return fallback(risk_amount);
        }

        let raw = risk_amount / (stop_distance * info.pip_value);
        let step = if info.volume_step > 0.0 { info.volume_step } else { self.lot_step };
        let cap = self.max_lot.min(profile.max_lot_size).max(self.min_lot);
        let lot_size = round_down(raw, step).clamp(self.min_lot, cap);

        log::info!(
            "[{}] risk {:.2}% of {:.2} = {:.2}, SL {:.1} pips -> {:.2} lots",
            symbol,
            profile.risk_percentage,
            account.balance,
            risk_amount,
            stop_distance,
            lot_size
        );
        PositionSizeResult { lot_size, risk_amount, stop_distance, fallback: false }
    }

    /// Kelly percentage capped to the profile's risk percentage. Kelly can
    /// only shrink risk, never grow it.
    pub fn kelly_risk_percentage(&self, profile: &RiskProfile, stats: &TradingStats) -> f64 {
        match kelly_percent(stats.win_rate, stats.avg_win, stats.avg_loss) {
            Some(k) => k.min(profile.risk_percentage).max(KELLY_FLOOR_PERCENT.min(profile.risk_percentage)),
            None => profile.risk_percentage,
        }
    }

    /// Daily loss, position count, margin floor, weekly loss; first failure wins.
    pub fn check_risk_limits(&self, profile: &RiskProfile, state: &AccountState) -> Result<(), RiskBreach> {
        let daily_limit = state.balance * profile.max_daily_loss_percent / 100.0;
        if state.daily_pnl < -daily_limit {
            return Err(RiskBreach::DailyLoss { pnl: state.daily_pnl, limit: daily_limit });
        }
        if state.open_positions >= profile.max_open_positions {
            return Err(RiskBreach::MaxPositions { open: state.open_positions, max: profile.max_open_positions });
        }
        if state.margin_level < self.min_margin_level {
            return Err(RiskBreach::LowMargin { level: state.margin_level, min: self.min_margin_level });
        }
        let weekly_limit = state.balance * self.max_weekly_loss_percent / 100.0;
        if state.weekly_pnl < -weekly_limit {
            return Err(RiskBreach::WeeklyLoss { pnl: state.weekly_pnl, limit: weekly_limit });
        }
        Ok(())
    }

    pub fn validate_trade(
        &self,
        profile: &RiskProfile,
        state: &AccountState,
        symbol: &str,
        confidence: f64,
        symbol_info: Option<&SymbolInfo>,
        quote: Option<&Quote>,
    ) -> Result<(), TradeRejection> {
        self.check_risk_limits(profile, state)?;
        if confidence < self.confidence_threshold {
            return Err(TradeRejection::LowConfidence { confidence, threshold: self.confidence_threshold });
        }
        let info = symbol_info.ok_or_else(|| TradeRejection::SymbolUnavailable(symbol.to_string()))?;
        if let Some(q) = quote {
            let max = info.point * self.max_spread_points;
            if q.spread() > max {
                return Err(TradeRejection::SpreadTooWide { spread: q.spread(), max });
            }
        }
        Ok(())
    }

    /// Volume to close at TP1. `None` when the position is too small to split.
    pub fn partial_close_volume(&self, volume: f64, step: f64) -> Option<f64> {
        let step = if step > 0.0 { step } else { self.lot_step };
        let close = round_down(volume * self.partial_close_percent / 100.0, step).max(self.min_lot);
        if volume - close < self.min_lot - 1e-9 {
            None
        } else {
            Some(close)
        }
    }

    /// Stop moved past entry by the break-even buffer once TP1 is hit.
    pub fn breakeven_stop(&self, symbol: &str, direction: Direction, entry_price: f64) -> f64 {
        let buffer = self.breakeven_buffer_pips * pip_size(symbol);
        match direction {
            Direction::Bullish => entry_price + buffer,
            Direction::Bearish => entry_price - buffer,
        }
    }

    pub fn risk_report(
        &self,
        profile: &RiskProfile,
        account: &AccountSnapshot,
        positions: &[OpenPosition],
        trades: &[ClosedTrade],
        now: DateTime<Utc>,
    ) -> RiskReport {
        let state = AccountState::from_trades(account.balance, account.margin_level, positions.len(), trades, now);
        let stats = TradingStats::from_trades(trades);
        let exposure: f64 = positions
            .iter()
            .filter_map(|p| {
                p.stop_loss
                    .map(|sl| (p.entry_price - sl).abs() / pip_size(&p.symbol) * p.pip_value * p.volume)
            })
            .sum();
        let pct = |v: f64| if account.balance > 0.0 { v / account.balance * 100.0 } else { 0.0 };
        RiskReport {
            balance: account.balance,
            equity: account.equity,
            margin_level: account.margin_level,
            daily_pnl: state.daily_pnl,
            daily_pnl_percent: pct(state.daily_pnl),
            weekly_pnl: state.weekly_pnl,
            weekly_pnl_percent: pct(state.weekly_pnl),
            open_positions: positions.len(),
            max_positions: profile.max_open_positions,
            total_risk_exposure: exposure,
            risk_exposure_percent: pct(exposure),
            risk_per_trade: profile.risk_percentage,
            max_daily_loss: profile.max_daily_loss_percent,
            win_rate: stats.win_rate * 100.0,
            total_trades: stats.total_trades,
            avg_win: stats.avg_win,
            avg_loss: stats.avg_loss,
        }
    }
}

/// `W - (1 - W) / R` in percent, with R = avg_win / avg_loss.
pub fn kelly_percent(win_rate: f64, avg_win: f64, avg_loss: f64) -> Option<f64> {
    if avg_loss <= 0.0 || avg_win <= 0.0 {
        return None;
    }
    let r = avg_win / avg_loss;
    Some((win_rate - (1.0 - win_rate) / r) * 100.0)
}

// Epsilon keeps 0.49999999 from flooring to 0.49 on a 0.01 step.
fn round_down(value: f64, step: f64) -> f64 {
    let steps = (value / step + 1e-9).floor();
    (steps * step * 1e8).round() / 1e8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn profile() -> RiskProfile {
        RiskProfile {
            balance: 10_000.0,
            equity: 10_000.0,
            margin_level: 1_000.0,
            risk_percentage: 1.0,
            max_daily_loss_percent: 5.0,
            max_open_positions: 3,
            max_lot_size: 10.0,
        }
    }

    fn account() -> AccountSnapshot {
        AccountSnapshot { balance: 10_000.0, equity: 10_000.0, margin_level: 1_000.0, currency: "USD".into(), leverage: 100 }
    }

    fn eurusd() -> SymbolInfo {
        SymbolInfo { digits: 5, point: 0.00001, volume_step: 0.01, pip_value: 10.0 }
    }

    fn healthy() -> AccountState {
        AccountState { balance: 10_000.0, margin_level: 1_000.0, open_positions: 0, daily_pnl: 0.0, weekly_pnl: 0.0 }
    }

    #[test]
    fn twenty_pip_stop_on_one_percent() {
        let rm = RiskManager::new(&SmcConfig::default());
        let r = rm.calculate_position_size(&profile(), Some(&account()), Some(&eurusd()), "EURUSD", 1.1000, 1.0980);
        assert!(!r.fallback);
        assert!((r.lot_size - 0.5).abs() < 1e-9);
        assert!((r.risk_amount - 100.0).abs() < 1e-9);
        assert!((r.stop_distance - 20.0).abs() < 1e-6);
    }

    #[test]
    fn missing_metadata_falls_back_to_min_lot() {
        let rm = RiskManager::new(&SmcConfig::default());
        let r = rm.calculate_position_size(&profile(), None, Some(&eurusd()), "EURUSD", 1.1, 1.09);
        assert!(r.fallback);
        assert_eq!(r.lot_size, 0.01);
        let r = rm.calculate_position_size(&profile(), Some(&account()), None, "EURUSD", 1.1, 1.09);
        assert!(r.fallback);
        let r = rm.calculate_position_size(&profile(), Some(&account()), Some(&eurusd()), "EURUSD", 1.1, 1.1);
        assert!(r.fallback);
    }

    #[test]
    fn profile_cap_limits_size() {
        let rm = RiskManager::new(&SmcConfig::default());
        let p = RiskProfile { max_lot_size: 0.2, ..profile() };
        let r = rm.calculate_position_size(&p, Some(&account()), Some(&eurusd()), "EURUSD", 1.1000, 1.0995);
        assert_eq!(r.lot_size, 0.2);
    }

    #[test]
    fn kelly_only_reduces_risk() {
        let rm = RiskManager::new(&SmcConfig::default());
        // 60% wins at 2:1 -> 40% Kelly, capped at 1%
        let strong = TradingStats { total_trades: 10, win_rate: 0.6, avg_win: 200.0, avg_loss: 100.0 };
        assert_eq!(rm.kelly_risk_percentage(&profile(), &strong), 1.0);
        // 30% wins at 1:1 -> negative, floored at 0.1%
        let weak = TradingStats { total_trades: 10, win_rate: 0.3, avg_win: 100.0, avg_loss: 100.0 };
        assert!((rm.kelly_risk_percentage(&profile(), &weak) - 0.1).abs() < 1e-12);
        let none = TradingStats::from_trades(&[]);
        assert_eq!(none.win_rate, 0.5);
        assert_eq!(rm.kelly_risk_percentage(&profile(), &none), 1.0);
    }

    #[test]
    fn gate_reports_first_failure() {
        let rm = RiskManager::new(&SmcConfig::default());
        let bad = AccountState { daily_pnl: -501.0, open_positions: 5, margin_level: 50.0, ..healthy() };
        assert!(matches!(rm.check_risk_limits(&profile(), &bad), Err(RiskBreach::DailyLoss { .. })));
        let bad = AccountState { open_positions: 3, margin_level: 50.0, ..healthy() };
        assert!(matches!(rm.check_risk_limits(&profile(), &bad), Err(RiskBreach::MaxPositions { .. })));
        let bad = AccountState { margin_level: 150.0, ..healthy() };
        assert!(matches!(rm.check_risk_limits(&profile(), &bad), Err(RiskBreach::LowMargin { .. })));
        let bad = AccountState { weekly_pnl: -1_000.5, ..healthy() };
        assert!(matches!(rm.check_risk_limits(&profile(), &bad), Err(RiskBreach::WeeklyLoss { .. })));
        let edge = AccountState { daily_pnl: -500.0, weekly_pnl: -1_000.0, ..healthy() };
        assert!(rm.check_risk_limits(&profile(), &edge).is_ok());
    }

    #[test]
    fn trade_validation_checks_confidence_then_spread() {
        let rm = RiskManager::new(&SmcConfig::default());
        let low = rm.validate_trade(&profile(), &healthy(), "EURUSD", 0.5, Some(&eurusd()), None);
        assert!(matches!(low, Err(TradeRejection::LowConfidence { .. })));
        let wide = Quote { bid: 1.1000, ask: 1.1006 };
        let r = rm.validate_trade(&profile(), &healthy(), "EURUSD", 0.7, Some(&eurusd()), Some(&wide));
        assert!(matches!(r, Err(TradeRejection::SpreadTooWide { .. })));
        let tight = Quote { bid: 1.1000, ask: 1.1001 };
        assert!(rm.validate_trade(&profile(), &healthy(), "EURUSD", 0.7, Some(&eurusd()), Some(&tight)).is_ok());
        let r = rm.validate_trade(&profile(), &healthy(), "EURUSD", 0.7, None, None);
        assert!(matches!(r, Err(TradeRejection::SymbolUnavailable(_))));
    }

    #[test]
    fn pnl_windows_split_by_midnight_and_week() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap();
        let trade = |d: u32, h: u32, profit: f64| ClosedTrade {
            symbol: "EURUSD".into(),
            close_time: Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap(),
            profit,
            volume: 0.1,
        };
        let trades = vec![trade(15, 1, -50.0), trade(14, 23, -30.0), trade(9, 12, 20.0), trade(1, 12, 500.0)];
        let s = AccountState::from_trades(10_000.0, 800.0, 1, &trades, now);
        assert_eq!(s.daily_pnl, -50.0);
        assert_eq!(s.weekly_pnl, -60.0);
    }

    #[test]
    fn tp1_management() {
        let rm = RiskManager::new(&SmcConfig::default());
        assert_eq!(rm.partial_close_volume(0.5, 0.01), Some(0.25));
        assert_eq!(rm.partial_close_volume(0.03, 0.01), Some(0.01));
        assert_eq!(rm.partial_close_volume(0.01, 0.01), None);
        assert!((rm.breakeven_stop("EURUSD", Direction::Bullish, 1.1000) - 1.1002).abs() < 1e-12);
        assert!((rm.breakeven_stop("USDJPY", Direction::Bearish, 150.0) - 149.98).abs() < 1e-9);
    }

    #[test]
    fn report_sums_exposure_in_currency() {
        let rm = RiskManager::new(&SmcConfig::default());
        let positions = vec![OpenPosition {
            symbol: "EURUSD".into(),
            entry_price: 1.1000,
            stop_loss: Some(1.0980),
            volume: 0.5,
            pip_value: 10.0,
        }];
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap();
        let report = rm.risk_report(&profile(), &account(), &positions, &[], now);
        assert!((report.total_risk_exposure - 100.0).abs() < 1e-6);
        assert!((report.risk_exposure_percent - 1.0).abs() < 1e-8);
        assert_eq!(report.open_positions, 1);
        assert_eq!(report.win_rate, 50.0);
    }
}
