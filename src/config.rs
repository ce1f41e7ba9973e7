use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SmcError;
use crate::types::{SymbolInfo, Timeframe};

// ─── Engine ───────────────────────────────────────────────────────────────────
pub const MIN_SERIES_LEN: usize = 20;
pub const SWING_LOOKBACK: usize = 3;           // ±k candles for a pivot
pub const MSS_CONFIRMATION_CANDLES: usize = 1;
pub const BOS_DOUBLE_BREAK_REQUIRED: bool = true;
pub const FVG_MIN_SIZE_PERCENT: f64 = 0.1;     // % of price
pub const DISPLACEMENT_RANGE_MULT: f64 = 1.5;  // vs trailing average range
pub const AVG_RANGE_PERIOD: usize = 5;

// ─── Setup ────────────────────────────────────────────────────────────────────
pub const SL_PADDING_PIPS: f64 = 3.0;
pub const MINIMUM_TP1_RR: f64 = 2.0;           // no upper cap
pub const ML_ENSEMBLE_THRESHOLD: f64 = 0.6;
pub const STRUCTURE_WEIGHT: f64 = 0.4;
pub const ML_WEIGHT: f64 = 0.3;
pub const SENTIMENT_WEIGHT: f64 = 0.3;
pub const PRICE_TOLERANCE_PIPS: f64 = 2.0;

// ─── Risk ─────────────────────────────────────────────────────────────────────
pub const ACCOUNT_BALANCE: f64 = 10_000.0;
pub const RISK_PER_TRADE_PERCENT: f64 = 1.0;
pub const MAX_DAILY_LOSS_PERCENT: f64 = 5.0;
pub const MAX_WEEKLY_LOSS_PERCENT: f64 = 10.0;
pub const MIN_MARGIN_LEVEL: f64 = 200.0;
pub const MAX_OPEN_POSITIONS: usize = 3;
pub const MIN_LOT_SIZE: f64 = 0.01;
pub const MAX_LOT_SIZE: f64 = 10.0;
pub const LOT_STEP: f64 = 0.01;
pub const MAX_SPREAD_POINTS: f64 = 50.0;
pub const KELLY_FLOOR_PERCENT: f64 = 0.1;
pub const PARTIAL_CLOSE_TP1_PERCENT: f64 = 50.0;
pub const BREAKEVEN_BUFFER_PIPS: f64 = 2.0;

// ─── Service ──────────────────────────────────────────────────────────────────
pub const DEDUP_COOLDOWN_HOURS: i64 = 24;
pub const SCAN_INTERVAL_MINUTES: u64 = 60;
pub const HISTORY_CANDLES: usize = 500;
pub const MAX_CONCURRENT_SCANS: usize = 8;

/// Default symbols scanned when the config file names none.
pub const TRADING_SYMBOLS: &[&str] = &[
    "EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD", "GBPJPY", "XAUUSD", "US30", "BTCUSD",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    /// POI body midpoint for every POI type.
    Midpoint,
    /// Breaker blocks enter at the body edge facing price; other POIs use the midpoint.
    BreakerProximal,
}

/// Every tunable the engine and the scan service read. All fields default to
/// the constants above, so a TOML file only needs the keys it overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmcConfig {
    pub htf_timeframe: Timeframe,
    pub itf_timeframe: Timeframe,
    pub ltf_timeframe: Timeframe,

    pub swing_lookback: usize,
    pub mss_confirmation_candles: usize,
    pub double_break_required: bool,
    pub fvg_min_size_percent: f64,

    pub sl_padding_pips: f64,
    pub min_risk_reward: f64,
    pub ml_ensemble_threshold: f64,
    pub structure_weight: f64,
    pub ml_weight: f64,
    pub sentiment_weight: f64,
    pub entry_mode: EntryMode,
    pub price_tolerance_pips: f64,

    pub risk_percentage: f64,
    pub max_daily_loss_percent: f64,
    pub max_weekly_loss_percent: f64,
    pub min_margin_level: f64,
    pub max_open_positions: usize,
    pub min_lot_size: f64,
    pub max_lot_size: f64,
    pub lot_step: f64,
    pub max_spread_points: f64,

    pub dedup_cooldown_hours: i64,
    pub scan_interval_minutes: u64,
    pub symbols: Vec<String>,
    pub data_dir: PathBuf,
    pub audit_log: PathBuf,
    pub signal_store: PathBuf,
    pub account_balance: f64,
}

impl Default for SmcConfig {
    fn default() -> Self {
        SmcConfig {
            htf_timeframe: Timeframe::H4,
            itf_timeframe: Timeframe::H1,
            ltf_timeframe: Timeframe::M15,
            swing_lookback: SWING_LOOKBACK,
            mss_confirmation_candles: MSS_CONFIRMATION_CANDLES,
            double_break_required: BOS_DOUBLE_BREAK_REQUIRED,
            fvg_min_size_percent: FVG_MIN_SIZE_PERCENT,
            sl_padding_pips: SL_PADDING_PIPS,
            min_risk_reward: MINIMUM_TP1_RR,
            ml_ensemble_threshold: ML_ENSEMBLE_THRESHOLD,
            structure_weight: STRUCTURE_WEIGHT,
            ml_weight: ML_WEIGHT,
            sentiment_weight: SENTIMENT_WEIGHT,
            entry_mode: EntryMode::Midpoint,
            price_tolerance_pips: PRICE_TOLERANCE_PIPS,
            risk_percentage: RISK_PER_TRADE_PERCENT,
            max_daily_loss_percent: MAX_DAILY_LOSS_PERCENT,
            max_weekly_loss_percent: MAX_WEEKLY_LOSS_PERCENT,
            min_margin_level: MIN_MARGIN_LEVEL,
            max_open_positions: MAX_OPEN_POSITIONS,
            min_lot_size: MIN_LOT_SIZE,
            max_lot_size: MAX_LOT_SIZE,
            lot_step: LOT_STEP,
            max_spread_points: MAX_SPREAD_POINTS,
            dedup_cooldown_hours: DEDUP_COOLDOWN_HOURS,
            scan_interval_minutes: SCAN_INTERVAL_MINUTES,
            symbols: TRADING_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            data_dir: PathBuf::from("data"),
            audit_log: PathBuf::from("data/signals.jsonl"),
            signal_store: PathBuf::from("data/signal_tracker.json"),
            account_balance: ACCOUNT_BALANCE,
        }
    }
}

impl SmcConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, SmcError> {
        let cfg: SmcConfig = toml::from_str(text).map_err(|e| SmcError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, SmcError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reads the file named by `SMC_CONFIG`, or falls back to defaults.
    pub fn from_env() -> Result<Self, SmcError> {
        match std::env::var("SMC_CONFIG") {
            Ok(path) => Self::from_toml_file(Path::new(&path)),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), SmcError> {
        let weights = [self.structure_weight, self.ml_weight, self.sentiment_weight];
        if weights.iter().any(|w| *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(SmcError::Config("confidence weights must be non-negative with a positive sum".into()));
        }
        if self.swing_lookback == 0 || self.mss_confirmation_candles == 0 {
            return Err(SmcError::Config("swing lookback and MSS confirmation must be at least 1".into()));
        }
        if self.lot_step <= 0.0 || self.min_lot_size <= 0.0 || self.min_lot_size > self.max_lot_size {
            return Err(SmcError::Config(format!(
                "invalid lot bounds: min={} max={} step={}",
                self.min_lot_size, self.max_lot_size, self.lot_step
            )));
        }
        if !(0.0..=1.0).contains(&self.ml_ensemble_threshold) {
            return Err(SmcError::Config("ml_ensemble_threshold must be within [0, 1]".into()));
        }
        if self.min_risk_reward <= 0.0 || self.fvg_min_size_percent <= 0.0 {
            return Err(SmcError::Config("min_risk_reward and fvg_min_size_percent must be positive".into()));
        }
        Ok(())
    }
}

// ─── Symbols ──────────────────────────────────────────────────────────────────

const CORE_SYMBOLS: &[&str] = &[
    "EURUSD", "GBPUSD", "USDJPY", "USDCHF", "AUDUSD", "USDCAD", "NZDUSD",
    "EURJPY", "GBPJPY", "EURGBP", "AUDJPY", "EURAUD", "EURCHF", "AUDNZD",
    "NZDJPY", "GBPAUD", "GBPCAD", "EURNZD", "AUDCAD", "GBPCHF", "AUDCHF",
    "EURCAD", "CADJPY", "GBPNZD", "CADCHF", "CHFJPY", "NZDCAD", "NZDCHF",
    "XAUUSD", "XAGUSD", "XAUEUR", "XAUGBP", "XAUAUD", "XAUJPY",
    "BTCUSD", "ETHUSD", "LTCUSD", "XRPUSD", "BCHUSD", "ADAUSD",
    "US30", "NAS100", "SPX500", "US500", "GER40", "UK100", "FRA40",
    "ESP35", "ITA40", "AUS200", "JPN225", "HKG50",
];

const ALIASES: &[(&str, &str)] = &[
    ("GOLD", "XAUUSD"),
    ("SILVER", "XAGUSD"),
    ("DOW", "US30"),
    ("DJ30", "US30"),
    ("NASDAQ", "NAS100"),
    ("NDX", "NAS100"),
    ("SPX", "SPX500"),
    ("SP500", "SPX500"),
    ("DAX", "GER40"),
    ("FTSE", "UK100"),
    ("NIKKEI", "JPN225"),
    ("BITCOIN", "BTCUSD"),
    ("ETHEREUM", "ETHUSD"),
];

// Longest first so ".cash" is tried before "c".
const BROKER_SUFFIXES: &[&str] = &[
    ".CASH", ".SPOT", "MICRO", "PRIME", ".RAW", "_ECN", "_PRO", "MINI", "_SB", ".A", ".F", "_I",
    "PRO", ".", "M", "C",
];

/// Broker symbol → canonical form (`XAUUSDm` → `XAUUSD`, `GOLD` → `XAUUSD`).
/// Unknown symbols come back upper-cased and otherwise unchanged.
pub fn normalize_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_ascii_uppercase();
    if let Some(core) = canonical(&upper) {
        return core;
    }
    for suffix in BROKER_SUFFIXES {
        if let Some(stripped) = upper.strip_suffix(suffix) {
            if let Some(core) = canonical(stripped) {
                return core;
            }
        }
    }
    upper
}

fn canonical(upper: &str) -> Option<String> {
    if CORE_SYMBOLS.contains(&upper) {
        return Some(upper.to_string());
    }
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == upper)
        .map(|(_, core)| core.to_string())
}

/// Price distance of one pip.
pub fn pip_size(symbol: &str) -> f64 {
    let s = normalize_symbol(symbol);
    if s.contains("JPY") {
        0.01
    } else if matches!(s.as_str(), "XAUUSD" | "XAUEUR" | "XAUGBP") {
        0.01
    } else if s.starts_with("XAG") {
        0.001
    } else if s.chars().any(|c| c.is_ascii_digit()) {
        1.0
    } else if matches!(s.as_str(), "BTCUSD" | "ETHUSD" | "LTCUSD" | "XRPUSD" | "BCHUSD") {
        1.0
    } else {
        0.0001
    }
}

/// Metadata for paper trading when no broker is attached: five-digit quotes
/// for forex (one pip = ten points) and $10 per pip per standard lot.
pub fn paper_symbol_info(symbol: &str) -> SymbolInfo {
    let pip = pip_size(symbol);
    let point = pip / 10.0;
    let digits = (-point.log10()).round().max(0.0) as u32;
    SymbolInfo {
        digits,
        point,
        volume_step: LOT_STEP,
        pip_value: 10.0,
    }
}
