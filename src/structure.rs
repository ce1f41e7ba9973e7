use crate::config::SmcConfig;
use crate::types::{
    BreakKind, CandleSeries, Direction, StructureBreak, StructureState, SwingKind, SwingPoint, Trend,
};

/// Swing pivots, trend and BOS/MSS events for one series.
#[derive(Clone, Copy, Debug)]
pub struct StructureDetector {
    swing_lookback: usize,
    confirmation_candles: usize,
    double_break_required: bool,
}

impl StructureDetector {
    pub fn new(swing_lookback: usize, confirmation_candles: usize, double_break_required: bool) -> Self {
        StructureDetector {
            swing_lookback: swing_lookback.max(1),
            confirmation_candles: confirmation_candles.max(1),
            double_break_required,
        }
    }

    pub fn from_config(cfg: &SmcConfig) -> Self {
        Self::new(cfg.swing_lookback, cfg.mss_confirmation_candles, cfg.double_break_required)
    }

    /// Candle `i` is a swing high when its high is strictly above every high
    /// within ±k candles. Lows mirror that. Swings come back ordered by index.
    pub fn swing_points(&self, series: &CandleSeries) -> Vec<SwingPoint> {
        let k = self.swing_lookback;
        let c = series.candles();
        let n = c.len();
        let mut swings = Vec::new();
        if n < 2 * k + 1 {
            return swings;
        }

        for i in k..(n - k) {
            let mut window = (i - k)..=(i + k);
            let is_high = window.clone().all(|j| j == i || c[j].high < c[i].high);
            let is_low = window.all(|j| j == i || c[j].low > c[i].low);
            if is_high {
                swings.push(SwingPoint { index: i, price: c[i].high, kind: SwingKind::High });
            }
            if is_low {
                swings.push(SwingPoint { index: i, price: c[i].low, kind: SwingKind::Low });
            }
        }
        swings
    }

    pub fn analyze(&self, series: &CandleSeries) -> StructureState {
        let swings = self.swing_points(series);
        let trend = trend_of(&swings);
        let mut tracker = BiasTracker::new(self.double_break_required);
        let breaks = self.detect_breaks(series, &swings, &mut tracker);

        let last_bos = breaks.iter().rev().find(|b| b.kind == BreakKind::Bos).map(|b| b.index);
        let last_mss = breaks.iter().rev().find(|b| b.kind == BreakKind::Mss).map(|b| b.index);

        log::debug!(
            "[{} {}] structure: {} swings, {} breaks, trend {:?}, bias {:?}",
            series.symbol(),
            series.timeframe(),
            swings.len(),
            breaks.len(),
            trend,
            tracker.bias
        );

        StructureState {
            trend,
            swings,
            breaks,
            bias: tracker.bias,
            last_bos,
            last_mss,
        }
    }

    /// Walks the series forward. The active level on each side is the most
    /// recent swing already confirmed (its k right-hand candles have closed);
    /// once broken it is consumed until a newer swing confirms.
    fn detect_breaks(
        &self,
        series: &CandleSeries,
        swings: &[SwingPoint],
        tracker: &mut BiasTracker,
    ) -> Vec<StructureBreak> {
        let k = self.swing_lookback;
        let need = self.confirmation_candles;
        let c = series.candles();

        let mut breaks = Vec::new();
        let mut next_swing = 0;
        let mut active_high: Option<SwingPoint> = None;
        let mut active_low: Option<SwingPoint> = None;
        let mut closes_above = 0usize;
        let mut closes_below = 0usize;

        for i in 0..c.len() {
            while next_swing < swings.len() && swings[next_swing].index + k <= i {
                let s = swings[next_swing];
                match s.kind {
                    SwingKind::High => {
                        active_high = Some(s);
                        closes_above = 0;
                    }
                    SwingKind::Low => {
                        active_low = Some(s);
                        closes_below = 0;
                    }
                }
                next_swing += 1;
            }

            let close = c[i].close;

            if let Some(level) = active_high {
                if close > level.price {
                    closes_above += 1;
                    if closes_above >= need {
                        let kind = tracker.classify(Direction::Bullish);
                        breaks.push(StructureBreak {
                            index: i,
                            direction: Direction::Bullish,
                            kind,
                            level: level.price,
                            swing_index: level.index,
                        });
                        active_high = None;
                        closes_above = 0;
                    }
                } else {
                    closes_above = 0;
                }
            }

            if let Some(level) = active_low {
                if close < level.price {
                    closes_below += 1;
                    if closes_below >= need {
                        let kind = tracker.classify(Direction::Bearish);
                        breaks.push(StructureBreak {
                            index: i,
                            direction: Direction::Bearish,
                            kind,
                            level: level.price,
                            swing_index: level.index,
                        });
                        active_low = None;
                        closes_below = 0;
                    }
                } else {
                    closes_below = 0;
                }
            }
        }
        breaks
    }
}

/// Accepted bias plus a pending counter-trend break awaiting its second
/// confirmation in double-break mode.
struct BiasTracker {
    bias: Option<Direction>,
    pending: Option<Direction>,
    double_break: bool,
}

impl BiasTracker {
    fn new(double_break: bool) -> Self {
        BiasTracker { bias: None, pending: None, double_break }
    }

    fn classify(&mut self, direction: Direction) -> BreakKind {
        match self.bias {
            None => {
                self.bias = Some(direction);
                BreakKind::Bos
            }
            Some(b) if b == direction => {
                self.pending = None;
                BreakKind::Bos
            }
            Some(_) if !self.double_break || self.pending == Some(direction) => {
                self.bias = Some(direction);
                self.pending = None;
                BreakKind::Mss
            }
            Some(_) => {
                self.pending = Some(direction);
                BreakKind::Bos
            }
        }
    }
}

/// HH + HL over the last two highs and lows is bullish, LH + LL bearish.
fn trend_of(swings: &[SwingPoint]) -> Trend {
    let last_two = |kind: SwingKind| -> Option<(f64, f64)> {
        let mut it = swings.iter().rev().filter(|s| s.kind == kind);
        let last = it.next()?;
        let prev = it.next()?;
        Some((prev.price, last.price))
    };

    match (last_two(SwingKind::High), last_two(SwingKind::Low)) {
        (Some((ph, lh)), Some((pl, ll))) if lh > ph && ll > pl => Trend::Bullish,
        (Some((ph, lh)), Some((pl, ll))) if lh < ph && ll < pl => Trend::Bearish,
        _ => Trend::Ranging,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candle, Timeframe};

    fn flat_series(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                timestamp: i as i64 * 60_000,
                open: 1.0,
                high: 1.001,
                low: 0.999,
                close: 1.0,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn equal_highs_are_not_swings() {
        let series = CandleSeries::new("EURUSD", Timeframe::M15, flat_series(30)).unwrap();
        let det = StructureDetector::new(3, 1, true);
        assert!(det.swing_points(&series).is_empty());
        let state = det.analyze(&series);
        assert_eq!(state.trend, Trend::Ranging);
        assert!(state.breaks.is_empty());
        assert_eq!(state.bias, None);
    }

    #[test]
    fn single_spike_is_a_swing_high() {
        let mut candles = flat_series(30);
        candles[10].high = 1.01;
        let series = CandleSeries::new("EURUSD", Timeframe::M15, candles).unwrap();
        let swings = StructureDetector::new(3, 1, true).swing_points(&series);
        assert_eq!(swings.len(), 1);
        assert_eq!(swings[0].index, 10);
        assert_eq!(swings[0].kind, SwingKind::High);
    }

    #[test]
    fn double_break_defers_the_shift() {
        let mut t = BiasTracker::new(true);
        assert_eq!(t.classify(Direction::Bullish), BreakKind::Bos);
        assert_eq!(t.classify(Direction::Bearish), BreakKind::Bos);
        assert_eq!(t.bias, Some(Direction::Bullish));
        assert_eq!(t.classify(Direction::Bearish), BreakKind::Mss);
        assert_eq!(t.bias, Some(Direction::Bearish));
    }

    #[test]
    fn continuation_clears_pending_counter_break() {
        let mut t = BiasTracker::new(true);
        t.classify(Direction::Bullish);
        t.classify(Direction::Bearish);
        assert_eq!(t.classify(Direction::Bullish), BreakKind::Bos);
        assert_eq!(t.classify(Direction::Bearish), BreakKind::Bos);
        assert_eq!(t.bias, Some(Direction::Bullish));
    }

    #[test]
    fn single_break_mode_shifts_immediately() {
        let mut t = BiasTracker::new(false);
        t.classify(Direction::Bearish);
        assert_eq!(t.classify(Direction::Bullish), BreakKind::Mss);
        assert_eq!(t.bias, Some(Direction::Bullish));
    }
}
