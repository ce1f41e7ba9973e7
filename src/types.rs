use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::MIN_SERIES_LEN;
use crate::error::SmcError;

// ─── Candles ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64, // Unix millis
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn body_high(&self) -> f64 {
        self.open.max(self.close)
    }

    pub fn body_low(&self) -> f64 {
        self.open.min(self.close)
    }

    /// True when the candle closed in `direction`.
    pub fn closes_toward(&self, direction: Direction) -> bool {
        match direction {
            Direction::Bullish => self.is_bullish(),
            Direction::Bearish => self.is_bearish(),
        }
    }

    fn check(&self) -> Result<(), String> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err("non-finite price".to_string());
        }
        if self.low > self.body_low() {
            return Err(format!("low {} above body low {}", self.low, self.body_low()));
        }
        if self.high < self.body_high() {
            return Err(format!("high {} below body high {}", self.high, self.body_high()));
        }
        Ok(())
    }
}

/// Bar interval. Lower timeframes need a wider POI lookback to reach an
/// equivalent structural point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
}

impl Timeframe {
    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1_440,
            Timeframe::W1 => 10_080,
        }
    }

    /// Candles scanned backwards from the structure break when looking for POIs.
    pub fn poi_lookback(self) -> usize {
        match self {
            Timeframe::M1 | Timeframe::M5 | Timeframe::M15 | Timeframe::M30 => 200,
            Timeframe::H1 => 150,
            Timeframe::H4 | Timeframe::D1 | Timeframe::W1 => 100,
        }
    }

    /// Largest candle distance allowed between a POI and the inducement.
    pub fn max_poi_distance(self) -> i64 {
        match self {
            Timeframe::M1 | Timeframe::M5 => 50,
            Timeframe::M15 | Timeframe::M30 => 60,
            Timeframe::H1 => 40,
            Timeframe::H4 | Timeframe::D1 | Timeframe::W1 => 30,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = SmcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "M1" => Ok(Timeframe::M1),
            "M5" => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1" => Ok(Timeframe::H1),
            "H4" => Ok(Timeframe::H4),
            "D1" => Ok(Timeframe::D1),
            "W1" => Ok(Timeframe::W1),
            other => Err(SmcError::UnknownTimeframe(other.to_string())),
        }
    }
}

/// Ordered OHLCV bars for one (symbol, timeframe). Construction enforces the
/// minimum analysable length, per-candle OHLC consistency and strictly
/// increasing timestamps, so every analysis can index it without re-checking.
#[derive(Clone, Debug, PartialEq)]
pub struct CandleSeries {
    symbol: String,
    timeframe: Timeframe,
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) -> Result<Self, SmcError> {
        if candles.len() < MIN_SERIES_LEN {
            return Err(SmcError::InsufficientData {
                len: candles.len(),
                required: MIN_SERIES_LEN,
            });
        }
        for (index, candle) in candles.iter().enumerate() {
            candle
                .check()
                .map_err(|reason| SmcError::MalformedCandle { index, reason })?;
            if index > 0 && candle.timestamp <= candles[index - 1].timestamp {
                return Err(SmcError::Unordered { index });
            }
        }
        Ok(CandleSeries {
            symbol: symbol.to_string(),
            timeframe,
            candles,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> &Candle {
        // Non-empty by construction.
        &self.candles[self.candles.len() - 1]
    }
}

impl std::ops::Index<usize> for CandleSeries {
    type Output = Candle;

    fn index(&self, index: usize) -> &Candle {
        &self.candles[index]
    }
}

// ─── Direction / structure ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Bullish => Direction::Bearish,
            Direction::Bearish => Direction::Bullish,
        }
    }

    /// +1 for bullish, -1 for bearish. Matches the ML ensemble vote encoding.
    pub fn sign(self) -> i8 {
        match self {
            Direction::Bullish => 1,
            Direction::Bearish => -1,
        }
    }

    /// Trade side label used in setups and signal hashes.
    pub fn side(self) -> &'static str {
        match self {
            Direction::Bullish => "BUY",
            Direction::Bearish => "SELL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Bullish => f.write_str("bullish"),
            Direction::Bearish => f.write_str("bearish"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Ranging,
}

impl Trend {
    pub fn direction(self) -> Option<Direction> {
        match self {
            Trend::Bullish => Some(Direction::Bullish),
            Trend::Bearish => Some(Direction::Bearish),
            Trend::Ranging => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub index: usize,
    pub price: f64,
    pub kind: SwingKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakKind {
    /// Break of Structure: continuation, or an unconfirmed counter-trend break.
    Bos,
    /// Market Structure Shift: accepted break against the prevailing bias.
    Mss,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructureBreak {
    pub index: usize,
    pub direction: Direction,
    pub kind: BreakKind,
    /// Swing level that was closed through.
    pub level: f64,
    pub swing_index: usize,
}

/// Snapshot of one series' structure. Recomputed on every analysis call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StructureState {
    pub trend: Trend,
    pub swings: Vec<SwingPoint>,
    pub breaks: Vec<StructureBreak>,
    /// Direction accepted by the last BOS/MSS sequence; `None` before the first break.
    pub bias: Option<Direction>,
    pub last_bos: Option<usize>,
    pub last_mss: Option<usize>,
}

impl StructureState {
    pub fn swing_highs(&self) -> impl Iterator<Item = &SwingPoint> {
        self.swings.iter().filter(|s| s.kind == SwingKind::High)
    }

    pub fn swing_lows(&self) -> impl Iterator<Item = &SwingPoint> {
        self.swings.iter().filter(|s| s.kind == SwingKind::Low)
    }

    pub fn last_break(&self) -> Option<&StructureBreak> {
        self.breaks.last()
    }

    /// Most recent break in `direction`, of either kind.
    pub fn last_break_toward(&self, direction: Direction) -> Option<&StructureBreak> {
        self.breaks.iter().rev().find(|b| b.direction == direction)
    }
}

// ─── Points of interest ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoiType {
    #[serde(rename = "OB")]
    OrderBlock,
    #[serde(rename = "BB")]
    BreakerBlock,
    #[serde(rename = "FVG")]
    FairValueGap,
}

impl PoiType {
    pub fn code(self) -> &'static str {
        match self {
            PoiType::OrderBlock => "OB",
            PoiType::BreakerBlock => "BB",
            PoiType::FairValueGap => "FVG",
        }
    }
}

impl fmt::Display for PoiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PointOfInterest {
    pub poi_type: PoiType,
    pub direction: Direction,
    pub candle_index: usize,
    pub timestamp: i64,
    /// Wick extent.
    pub price_high: f64,
    pub price_low: f64,
    /// Open/close extent (gap extent for FVGs).
    pub body_high: f64,
    pub body_low: f64,
    pub triggered_structure: bool,
    pub has_inducement: bool,
    pub is_unmitigated: bool,
    /// Candles between the POI and the inducement point.
    pub distance_to_liquidity: i64,
    pub fvg_overlap: bool,
}

/// Zone geometry shared by every POI constructor.
#[derive(Clone, Copy, Debug)]
pub struct PoiZone {
    pub price_high: f64,
    pub price_low: f64,
    pub body_high: f64,
    pub body_low: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct PoiFlags {
    pub triggered_structure: bool,
    pub has_inducement: bool,
    pub is_unmitigated: bool,
    pub distance_to_liquidity: i64,
    pub fvg_overlap: bool,
}

impl PointOfInterest {
    /// Rejects empty or inverted zones; such candidates never surface as POIs.
    pub fn new(
        poi_type: PoiType,
        direction: Direction,
        candle_index: usize,
        timestamp: i64,
        zone: PoiZone,
        flags: PoiFlags,
    ) -> Result<Self, SmcError> {
        if !(zone.price_high > zone.price_low) {
            return Err(SmcError::InvalidPoi(format!(
                "{} at {}: high {} not above low {}",
                poi_type, candle_index, zone.price_high, zone.price_low
            )));
        }
        if zone.body_high < zone.body_low
            || zone.body_high > zone.price_high
            || zone.body_low < zone.price_low
        {
            return Err(SmcError::InvalidPoi(format!(
                "{} at {}: body [{}, {}] outside range [{}, {}]",
                poi_type,
                candle_index,
                zone.body_low,
                zone.body_high,
                zone.price_low,
                zone.price_high
            )));
        }
        Ok(PointOfInterest {
            poi_type,
            direction,
            candle_index,
            timestamp,
            price_high: zone.price_high,
            price_low: zone.price_low,
            body_high: zone.body_high,
            body_low: zone.body_low,
            triggered_structure: flags.triggered_structure,
            has_inducement: flags.has_inducement,
            is_unmitigated: flags.is_unmitigated,
            distance_to_liquidity: flags.distance_to_liquidity,
            fvg_overlap: flags.fvg_overlap,
        })
    }

    /// All four selection rules hold.
    pub fn is_valid(&self) -> bool {
        self.rule_failure().is_none()
    }

    /// First selection rule this POI fails, if any.
    pub fn rule_failure(&self) -> Option<&'static str> {
        if !self.triggered_structure {
            Some("did not trigger a structure break")
        } else if !self.has_inducement {
            Some("no inducement beyond the zone")
        } else if !self.is_unmitigated {
            Some("zone already mitigated")
        } else if self.distance_to_liquidity < 0 {
            Some("formed after the inducement point")
        } else {
            None
        }
    }

    pub fn body_midpoint(&self) -> f64 {
        (self.body_high + self.body_low) / 2.0
    }

    pub fn wick_midpoint(&self) -> f64 {
        (self.price_high + self.price_low) / 2.0
    }
}

// ─── Setups and orders ────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scenario {
    #[serde(rename = "Continuation via BOS")]
    Continuation,
    #[serde(rename = "Reversal via MSS")]
    Reversal,
}

impl Scenario {
    pub fn label(self) -> &'static str {
        match self {
            Scenario::Continuation => "Continuation via BOS",
            Scenario::Reversal => "Reversal via MSS",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Price levels of a trade plan before confidence scoring.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TradeLevels {
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
}

impl TradeLevels {
    pub fn risk(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }

    pub fn risk_reward_tp1(&self) -> f64 {
        let risk = self.risk();
        if risk > 0.0 {
            (self.take_profit_1 - self.entry_price).abs() / risk
        } else {
            0.0
        }
    }

    pub fn risk_reward_tp2(&self) -> f64 {
        let risk = self.risk();
        if risk > 0.0 {
            (self.take_profit_2 - self.entry_price).abs() / risk
        } else {
            0.0
        }
    }

    /// BUY: stop < entry < tp1 < tp2. SELL: the mirror.
    pub fn check_order(&self, direction: Direction) -> Result<(), SmcError> {
        let TradeLevels {
            entry_price: e,
            stop_loss: sl,
            take_profit_1: tp1,
            take_profit_2: tp2,
        } = *self;
        if [e, sl, tp1, tp2].iter().any(|p| !p.is_finite()) {
            return Err(SmcError::InvalidSetup("non-finite level".to_string()));
        }
        let ordered = match direction {
            Direction::Bullish => sl < e && e < tp1 && tp1 < tp2,
            Direction::Bearish => sl > e && e > tp1 && tp1 > tp2,
        };
        if ordered {
            Ok(())
        } else {
            Err(SmcError::InvalidSetup(format!(
                "{} levels out of order: sl={sl:.5} entry={e:.5} tp1={tp1:.5} tp2={tp2:.5}",
                direction.side()
            )))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TradingSetup {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub risk_reward_tp1: f64,
    pub risk_reward_tp2: f64,
    pub confidence_score: f64,
    pub scenario: Scenario,
    pub poi: PointOfInterest,
    pub inducement_swept: bool,
    pub fvg_validation: bool,
    /// Timestamp of the last LTF candle the setup was computed from.
    pub timestamp: i64,
}

/// Inputs for [`TradingSetup::new`] besides the levels.
#[derive(Clone, Debug)]
pub struct SetupContext {
    pub symbol: String,
    pub direction: Direction,
    pub scenario: Scenario,
    pub poi: PointOfInterest,
    pub inducement_swept: bool,
    pub fvg_validation: bool,
    pub timestamp: i64,
}

impl TradingSetup {
    /// Builds a setup only from well-ordered levels meeting the minimum R:R.
    pub fn new(
        ctx: SetupContext,
        levels: TradeLevels,
        confidence_score: f64,
        min_risk_reward: f64,
    ) -> Result<Self, SmcError> {
        levels.check_order(ctx.direction)?;
        let rr1 = levels.risk_reward_tp1();
        if rr1 < min_risk_reward {
            return Err(SmcError::InvalidSetup(format!(
                "R:R {rr1:.2} below minimum {min_risk_reward:.2}"
            )));
        }
        Ok(TradingSetup {
            symbol: ctx.symbol,
            direction: ctx.direction,
            entry_price: levels.entry_price,
            stop_loss: levels.stop_loss,
            take_profit_1: levels.take_profit_1,
            take_profit_2: levels.take_profit_2,
            risk_reward_tp1: rr1,
            risk_reward_tp2: levels.risk_reward_tp2(),
            confidence_score: confidence_score.clamp(0.0, 1.0),
            scenario: ctx.scenario,
            poi: ctx.poi,
            inducement_swept: ctx.inducement_swept,
            fvg_validation: ctx.fvg_validation,
            timestamp: ctx.timestamp,
        })
    }

    pub fn levels(&self) -> TradeLevels {
        TradeLevels {
            entry_price: self.entry_price,
            stop_loss: self.stop_loss,
            take_profit_1: self.take_profit_1,
            take_profit_2: self.take_profit_2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    BuyStop,
    SellStop,
    BuyLimit,
    SellLimit,
}

impl OrderType {
    pub fn is_pending(self) -> bool {
        self != OrderType::Market
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::BuyStop => "BUY_STOP",
            OrderType::SellStop => "SELL_STOP",
            OrderType::BuyLimit => "BUY_LIMIT",
            OrderType::SellLimit => "SELL_LIMIT",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrderDecision {
    pub order_type: OrderType,
    pub execution_price: f64,
    pub immediate_execution: bool,
    pub reason: String,
}

// ─── External scores ──────────────────────────────────────────────────────────

/// ML ensemble output. Votes are -1 (sell), 0 (neutral) or 1 (buy).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MlPrediction {
    pub model1: i8,
    pub model2: i8,
    pub model3: i8,
    pub ensemble: i8,
    pub confidence: f64,
}

impl MlPrediction {
    /// Output of an untrained three-class model: neutral class, uniform probability.
    pub fn neutral() -> Self {
        MlPrediction {
            model1: 0,
            model2: 0,
            model3: 0,
            ensemble: 0,
            confidence: 0.33,
        }
    }

    /// Share of the three models voting for `direction`.
    pub fn vote_share(&self, direction: Direction) -> f64 {
        let sign = direction.sign();
        [self.model1, self.model2, self.model3]
            .iter()
            .filter(|&&v| v == sign)
            .count() as f64
            / 3.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    /// -1 (bearish) ..= 1 (bullish).
    pub score: f64,
    pub label: String,
    pub confidence: f64,
}

// ─── Account / symbol boundary data ───────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub equity: f64,
    /// Percent. Report `f64::INFINITY` when no margin is in use.
    pub margin_level: f64,
    pub currency: String,
    pub leverage: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub digits: u32,
    /// Smallest price increment.
    pub point: f64,
    pub volume_step: f64,
    /// Account-currency value of one pip for one lot.
    pub pip_value: f64,
}

/// Per-account risk settings. Percent fields are in percent (1.0 = 1 %).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub balance: f64,
    pub equity: f64,
    pub margin_level: f64,
    pub risk_percentage: f64,
    pub max_daily_loss_percent: f64,
    pub max_open_positions: usize,
    pub max_lot_size: f64,
}

/// Live account figures the risk gate reads. Treated as an eventually
/// consistent snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AccountState {
    pub balance: f64,
    pub margin_level: f64,
    pub open_positions: usize,
    /// Realised P&L since UTC midnight.
    pub daily_pnl: f64,
    /// Realised P&L over the trailing seven days.
    pub weekly_pnl: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PositionSizeResult {
    pub lot_size: f64,
    pub risk_amount: f64,
    /// Stop distance in pips.
    pub stop_distance: f64,
    /// Set when sizing fell back to the minimum lot.
    pub fallback: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub close_time: chrono::DateTime<chrono::Utc>,
    pub profit: f64,
    pub volume: f64,
}
