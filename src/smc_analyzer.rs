use std::fmt;

use crate::config::{pip_size, EntryMode, SmcConfig};
use crate::poi_detector::PoiDetector;
use crate::structure::StructureDetector;
use crate::types::{
    BreakKind, CandleSeries, Direction, MlPrediction, PoiType, PointOfInterest, Scenario,
    SentimentScore, SetupContext, StructureState, SwingKind, SwingPoint, Timeframe, TradeLevels,
    TradingSetup, Trend,
};

/// Why a scan produced no setup. Normal outcome, never a fault.
#[derive(Clone, Debug, PartialEq)]
pub enum NoSetup {
    InsufficientData { timeframe: Timeframe, len: usize, required: usize },
    NoBias { timeframe: Timeframe },
    NoLtfBreak { direction: Direction },
    NoInducement { direction: Direction },
    InducementNotSwept { index: usize, price: f64 },
    NoValidPoi { candidates: usize, reason: String },
    NoLiquidityTarget { target: &'static str },
    RiskRewardTooLow { rr: f64, min: f64 },
    MlDisagreement { confidence: f64, threshold: f64 },
    InvalidLevels(String),
}

impl fmt::Display for NoSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoSetup::InsufficientData { timeframe, len, required } => {
                write!(f, "insufficient {timeframe} data: {len} candles (need {required})")
            }
            NoSetup::NoBias { timeframe } => write!(f, "no {timeframe} structure break defines a bias"),
            NoSetup::NoLtfBreak { direction } => write!(f, "no LTF {direction} structure break"),
            NoSetup::NoInducement { direction } => {
                write!(f, "no inducement swing before the LTF {direction} break")
            }
            NoSetup::InducementNotSwept { index, price } => {
                write!(f, "inducement at {index} ({price:.5}) not swept yet")
            }
            NoSetup::NoValidPoi { candidates, reason } => {
                write!(f, "no valid POI among {candidates} candidates: {reason}")
            }
            NoSetup::NoLiquidityTarget { target } => {
                write!(f, "no untaken opposing liquidity for {target}")
            }
            NoSetup::RiskRewardTooLow { rr, min } => write!(f, "R:R {rr:.2} below minimum {min:.2}"),
            NoSetup::MlDisagreement { confidence, threshold } => write!(
                f,
                "ML ensemble opposes direction with confidence {confidence:.2} > {threshold:.2}"
            ),
            NoSetup::InvalidLevels(msg) => write!(f, "{msg}"),
        }
    }
}

/// Multi-timeframe setup assembler. Pure: no I/O, no shared state.
#[derive(Clone, Debug)]
pub struct SmcAnalyzer {
    structure: StructureDetector,
    fvg_min_size_percent: f64,
    sl_padding_pips: f64,
    min_risk_reward: f64,
    ml_threshold: f64,
    weights: [f64; 3],
    entry_mode: EntryMode,
}

impl SmcAnalyzer {
    pub fn new(cfg: &SmcConfig) -> Self {
        SmcAnalyzer {
            structure: StructureDetector::from_config(cfg),
            fvg_min_size_percent: cfg.fvg_min_size_percent,
            sl_padding_pips: cfg.sl_padding_pips,
            min_risk_reward: cfg.min_risk_reward,
            ml_threshold: cfg.ml_ensemble_threshold,
            weights: [cfg.structure_weight, cfg.ml_weight, cfg.sentiment_weight],
            entry_mode: cfg.entry_mode,
        }
    }

    pub fn generate_setup(
        &self,
        htf: &CandleSeries,
        itf: &CandleSeries,
        ltf: &CandleSeries,
        ml: Option<&MlPrediction>,
        sentiment: Option<&SentimentScore>,
    ) -> Result<TradingSetup, NoSetup> {
        let symbol = ltf.symbol();
        let pip = pip_size(symbol);

        // 1-2. HTF context, ITF bias
        let htf_state = self.structure.analyze(htf);
        let itf_state = self.structure.analyze(itf);
        let direction = itf_state.bias.ok_or(NoSetup::NoBias { timeframe: itf.timeframe() })?;
        let scenario = match itf_state.last_break_toward(direction) {
            Some(b) if b.kind == BreakKind::Mss => Scenario::Reversal,
            _ => Scenario::Continuation,
        };

        // 3. LTF break, inducement, POIs
        let ltf_state = self.structure.analyze(ltf);
        let ltf_break = *ltf_state
            .last_break_toward(direction)
            .ok_or(NoSetup::NoLtfBreak { direction })?;
        let inducement = inducement_before(&ltf_state, direction, ltf_break.index)
            .ok_or(NoSetup::NoInducement { direction })?;
        if !is_swept(ltf, &inducement, direction) {
            return Err(NoSetup::InducementNotSwept { index: inducement.index, price: inducement.price });
        }

        let detector = PoiDetector::new(ltf.timeframe()).with_fvg_min_size_percent(self.fvg_min_size_percent);
        let candidates = detector.candidates(ltf, direction, inducement.index, ltf_break.index);
        // 4. selection rules
        let poi = match candidates.iter().find(|p| p.is_valid()) {
            Some(p) => p.clone(),
            None => {
                let reason = candidates
                    .first()
                    .and_then(|p| p.rule_failure().map(|r| format!("{} at {}: {}", p.poi_type, p.candle_index, r)))
                    .unwrap_or_else(|| "no candidates in the lookback window".to_string());
                return Err(NoSetup::NoValidPoi { candidates: candidates.len(), reason });
            }
        };

        // 5-7. levels
        let entry = entry_price(&poi, direction, self.entry_mode);
        let stop = stop_loss(&poi, direction, self.sl_padding_pips * pip);
        let tp1 = nearest_untaken_level(ltf, &ltf_state.swings, direction, entry)
            .ok_or(NoSetup::NoLiquidityTarget { target: "TP1" })?;
        let tp2 = nearest_untaken_level(htf, &htf_state.swings, direction, tp1)
            .or_else(|| nearest_untaken_level(itf, &itf_state.swings, direction, tp1))
            .ok_or(NoSetup::NoLiquidityTarget { target: "TP2" })?;
        let levels = TradeLevels { entry_price: entry, stop_loss: stop, take_profit_1: tp1, take_profit_2: tp2 };
        levels
            .check_order(direction)
            .map_err(|e| NoSetup::InvalidLevels(e.to_string()))?;

        // 8. R:R floor
        let rr = levels.risk_reward_tp1();
        if rr < self.min_risk_reward {
            return Err(NoSetup::RiskRewardTooLow { rr, min: self.min_risk_reward });
        }

        // 9. confidence
        let fvg_validation = poi.poi_type == PoiType::FairValueGap || poi.fvg_overlap;
        let structural = structural_score(&htf_state, &ltf_state, direction, fvg_validation);
        let ml_score = self.ml_score(ml, direction)?;
        let sentiment_score = sentiment.map_or(0.0, |s| sentiment_sub_score(s, direction));
        let confidence = self.blend(structural, ml_score, sentiment_score);

        log::debug!(
            "[{}] {} {} via {} at {}: entry {:.5} sl {:.5} tp1 {:.5} tp2 {:.5} rr {:.2} conf {:.2}",
            symbol,
            direction.side(),
            scenario,
            poi.poi_type,
            poi.candle_index,
            entry,
            stop,
            tp1,
            tp2,
            rr,
            confidence
        );

        let ctx = SetupContext {
            symbol: symbol.to_string(),
            direction,
            scenario,
            poi,
            inducement_swept: true,
            fvg_validation,
            timestamp: ltf.last().timestamp,
        };
        TradingSetup::new(ctx, levels, confidence, self.min_risk_reward)
            .map_err(|e| NoSetup::InvalidLevels(e.to_string()))
    }

    /// Ensemble agreement in [0, 1]. A confident opposing ensemble vetoes the setup.
    fn ml_score(&self, ml: Option<&MlPrediction>, direction: Direction) -> Result<f64, NoSetup> {
        let Some(p) = ml else {
            return Ok(0.0);
        };
        let sign = direction.sign();
        if p.ensemble == -sign && p.confidence > self.ml_threshold {
            return Err(NoSetup::MlDisagreement { confidence: p.confidence, threshold: self.ml_threshold });
        }
        if p.ensemble == sign {
            Ok(((p.confidence + p.vote_share(direction)) / 2.0).clamp(0.0, 1.0))
        } else {
            Ok(0.0)
        }
    }

    fn blend(&self, structural: f64, ml: f64, sentiment: f64) -> f64 {
        let [ws, wm, wt] = self.weights;
        let total = ws + wm + wt;
        if total <= 0.0 {
            return 0.0;
        }
        ((ws * structural + wm * ml + wt * sentiment) / total).clamp(0.0, 1.0)
    }
}

/// Entry price for a POI under the configured entry mode.
pub fn entry_price(poi: &PointOfInterest, direction: Direction, mode: EntryMode) -> f64 {
    match (mode, poi.poi_type, direction) {
        (EntryMode::BreakerProximal, PoiType::BreakerBlock, Direction::Bullish) => poi.body_high,
        (EntryMode::BreakerProximal, PoiType::BreakerBlock, Direction::Bearish) => poi.body_low,
        _ => poi.body_midpoint(),
    }
}

/// Beyond the POI's wick extreme by `padding` price units.
pub fn stop_loss(poi: &PointOfInterest, direction: Direction, padding: f64) -> f64 {
    match direction {
        Direction::Bullish => poi.price_low - padding,
        Direction::Bearish => poi.price_high + padding,
    }
}

/// Closest opposing swing beyond `beyond` that no later candle has reached.
pub fn nearest_untaken_level(
    series: &CandleSeries,
    swings: &[SwingPoint],
    direction: Direction,
    beyond: f64,
) -> Option<f64> {
    let c = series.candles();
    let kind = match direction {
        Direction::Bullish => SwingKind::High,
        Direction::Bearish => SwingKind::Low,
    };
    let untaken = |s: &&SwingPoint| {
        c[s.index + 1..].iter().all(|x| match direction {
            Direction::Bullish => x.high < s.price,
            Direction::Bearish => x.low > s.price,
        })
    };
    let candidates = swings
        .iter()
        .filter(|s| s.kind == kind)
        .filter(|s| match direction {
            Direction::Bullish => s.price > beyond,
            Direction::Bearish => s.price < beyond,
        })
        .filter(untaken)
        .map(|s| s.price);
    match direction {
        Direction::Bullish => candidates.reduce(f64::min),
        Direction::Bearish => candidates.reduce(f64::max),
    }
}

/// Last opposing swing before the break: the liquidity price must raid first.
fn inducement_before(state: &StructureState, direction: Direction, break_index: usize) -> Option<SwingPoint> {
    let kind = match direction {
        Direction::Bullish => SwingKind::Low,
        Direction::Bearish => SwingKind::High,
    };
    state
        .swings
        .iter()
        .rev()
        .find(|s| s.kind == kind && s.index < break_index)
        .copied()
}

fn is_swept(series: &CandleSeries, inducement: &SwingPoint, direction: Direction) -> bool {
    series.candles()[inducement.index + 1..].iter().any(|x| match direction {
        Direction::Bullish => x.low < inducement.price,
        Direction::Bearish => x.high > inducement.price,
    })
}

/// Timeframe agreement blended with FVG confluence. The ITF always agrees
/// since it defines the bias.
fn structural_score(htf: &StructureState, ltf: &StructureState, direction: Direction, fvg_validation: bool) -> f64 {
    let htf_score = match htf.trend {
        Trend::Ranging => 0.5,
        t if t.direction() == Some(direction) => 1.0,
        _ => 0.0,
    };
    let ltf_score = if ltf.bias == Some(direction) { 1.0 } else { 0.5 };
    let alignment = (htf_score + 1.0 + ltf_score) / 3.0;
    0.8 * alignment + if fvg_validation { 0.2 } else { 0.0 }
}

fn sentiment_sub_score(s: &SentimentScore, direction: Direction) -> f64 {
    let signed = s.score.clamp(-1.0, 1.0) * f64::from(direction.sign()) * s.confidence.clamp(0.0, 1.0);
    (0.5 + 0.5 * signed).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PoiFlags, PoiZone};

    fn poi(poi_type: PoiType) -> PointOfInterest {
        let zone = PoiZone { price_high: 1.1010, price_low: 1.0990, body_high: 1.1006, body_low: 1.0994 };
        let flags = PoiFlags {
            triggered_structure: true,
            has_inducement: true,
            is_unmitigated: true,
            distance_to_liquidity: 4,
            fvg_overlap: false,
        };
        PointOfInterest::new(poi_type, Direction::Bullish, 10, 0, zone, flags).unwrap()
    }

    #[test]
    fn breaker_proximal_uses_body_edge() {
        let bb = poi(PoiType::BreakerBlock);
        assert!((entry_price(&bb, Direction::Bullish, EntryMode::Midpoint) - 1.1000).abs() < 1e-12);
        assert_eq!(entry_price(&bb, Direction::Bullish, EntryMode::BreakerProximal), 1.1006);
        assert_eq!(entry_price(&bb, Direction::Bearish, EntryMode::BreakerProximal), 1.0994);
        let ob = poi(PoiType::OrderBlock);
        assert!((entry_price(&ob, Direction::Bullish, EntryMode::BreakerProximal) - 1.1000).abs() < 1e-12);
    }

    #[test]
    fn stop_sits_beyond_the_wick() {
        let ob = poi(PoiType::OrderBlock);
        assert!((stop_loss(&ob, Direction::Bullish, 0.0003) - 1.0987).abs() < 1e-12);
        assert!((stop_loss(&ob, Direction::Bearish, 0.0003) - 1.1013).abs() < 1e-12);
    }

    #[test]
    fn missing_scores_contribute_nothing() {
        let analyzer = SmcAnalyzer::new(&SmcConfig::default());
        assert_eq!(analyzer.ml_score(None, Direction::Bullish).unwrap(), 0.0);
        assert!((analyzer.blend(1.0, 0.0, 0.0) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn confident_opposing_ensemble_vetoes() {
        let analyzer = SmcAnalyzer::new(&SmcConfig::default());
        let sell = MlPrediction { model1: -1, model2: -1, model3: 0, ensemble: -1, confidence: 0.9 };
        assert!(matches!(
            analyzer.ml_score(Some(&sell), Direction::Bullish),
            Err(NoSetup::MlDisagreement { .. })
        ));
        let weak = MlPrediction { confidence: 0.5, ..sell };
        assert_eq!(analyzer.ml_score(Some(&weak), Direction::Bullish).unwrap(), 0.0);
        assert!((analyzer.ml_score(Some(&sell), Direction::Bearish).unwrap() - (0.9 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn sentiment_is_centred_on_half() {
        let s = SentimentScore { score: 0.5, label: "positive".into(), confidence: 0.8 };
        assert!((sentiment_sub_score(&s, Direction::Bullish) - 0.7).abs() < 1e-12);
        assert!((sentiment_sub_score(&s, Direction::Bearish) - 0.3).abs() < 1e-12);
    }
}
