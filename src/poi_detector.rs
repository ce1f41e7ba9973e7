use std::ops::Range;

use crate::config::{AVG_RANGE_PERIOD, DISPLACEMENT_RANGE_MULT, FVG_MIN_SIZE_PERCENT};
use crate::types::{
    Candle, CandleSeries, Direction, PoiFlags, PoiType, PoiZone, PointOfInterest, Timeframe,
};

const DISPLACEMENT_CANDLES: usize = 3;
const DISPLACEMENT_MIN_COUNT: usize = 2;

/// Order block, breaker block and FVG scanner for one timeframe.
///
/// Every `detect_*` method returns all candidates inside the lookback window
/// that lie within the timeframe's maximum distance of the inducement point,
/// valid or not, so callers can report why a zone was skipped.
/// [`PoiDetector::find_pois`] keeps only valid ones and ranks them.
#[derive(Clone, Copy, Debug)]
pub struct PoiDetector {
    timeframe: Timeframe,
    lookback: usize,
    max_distance: i64,
    fvg_min_size_percent: f64,
}

impl PoiDetector {
    pub fn new(timeframe: Timeframe) -> Self {
        PoiDetector {
            timeframe,
            lookback: timeframe.poi_lookback(),
            max_distance: timeframe.max_poi_distance(),
            fvg_min_size_percent: FVG_MIN_SIZE_PERCENT,
        }
    }

    pub fn with_fvg_min_size_percent(mut self, percent: f64) -> Self {
        self.fvg_min_size_percent = percent;
        self
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Valid POIs, closest to liquidity first. Ties go to the most recent candle.
    pub fn find_pois(
        &self,
        series: &CandleSeries,
        direction: Direction,
        inducement_index: usize,
        structure_break_index: usize,
    ) -> Vec<PointOfInterest> {
        let mut pois: Vec<PointOfInterest> = self
            .candidates(series, direction, inducement_index, structure_break_index)
            .into_iter()
            .filter(PointOfInterest::is_valid)
            .collect();
        rank(&mut pois);
        pois
    }

    /// Every candidate of every type, ranked the same way as `find_pois`.
    pub fn candidates(
        &self,
        series: &CandleSeries,
        direction: Direction,
        inducement_index: usize,
        structure_break_index: usize,
    ) -> Vec<PointOfInterest> {
        let fvgs = self.detect_fair_value_gaps(series, direction, inducement_index, structure_break_index);
        let mut all = self.detect_order_blocks(series, direction, inducement_index, structure_break_index);
        all.extend(self.detect_breaker_blocks(series, direction, inducement_index, structure_break_index));
        all.extend(fvgs);
        rank(&mut all);

        log::debug!(
            "[{} {}] {} POI candidates ({} valid) for {} before break {}",
            series.symbol(),
            self.timeframe,
            all.len(),
            all.iter().filter(|p| p.is_valid()).count(),
            direction,
            structure_break_index
        );
        all
    }

    /// Last opposite-coloured candle before a displacement leg.
    pub fn detect_order_blocks(
        &self,
        series: &CandleSeries,
        direction: Direction,
        inducement_index: usize,
        structure_break_index: usize,
    ) -> Vec<PointOfInterest> {
        let c = series.candles();
        let mut out = Vec::new();

        for i in self.scan_window(series, structure_break_index) {
            if !c[i].closes_toward(direction.opposite()) || !has_room(c, i) {
                continue;
            }
            if !is_displacement(c, i, direction) {
                continue;
            }
            let distance = inducement_index as i64 - i as i64;
            if distance > self.max_distance {
                continue;
            }
            let zone = PoiZone {
                price_high: c[i].high,
                price_low: c[i].low,
                body_high: c[i].body_high(),
                body_low: c[i].body_low(),
            };
            let flags = PoiFlags {
                triggered_structure: i < structure_break_index,
                has_inducement: i < inducement_index,
                is_unmitigated: wick_midpoint_holds(c, i, inducement_index, direction),
                distance_to_liquidity: distance,
                fvg_overlap: self.leg_has_fvg(c, i, direction),
            };
            push_poi(&mut out, series, PoiType::OrderBlock, direction, i, zone, flags);
        }
        out
    }

    /// Candle whose extreme is taken out by the next candle with displacement,
    /// keeping only those whose body is never traded into afterwards.
    pub fn detect_breaker_blocks(
        &self,
        series: &CandleSeries,
        direction: Direction,
        inducement_index: usize,
        structure_break_index: usize,
    ) -> Vec<PointOfInterest> {
        let c = series.candles();
        let mut out = Vec::new();

        for i in self.scan_window(series, structure_break_index) {
            if !has_room(c, i) {
                continue;
            }
            let broken = match direction {
                Direction::Bullish => c[i + 1].high > c[i].high,
                Direction::Bearish => c[i + 1].low < c[i].low,
            };
            if !broken || !is_displacement(c, i, direction) {
                continue;
            }
            let distance = inducement_index as i64 - i as i64;
            if distance > self.max_distance {
                continue;
            }
            let zone = PoiZone {
                price_high: c[i].high,
                price_low: c[i].low,
                body_high: c[i].body_high(),
                body_low: c[i].body_low(),
            };
            let flags = PoiFlags {
                triggered_structure: i < structure_break_index,
                has_inducement: i < inducement_index,
                is_unmitigated: body_holds(c, i, direction),
                distance_to_liquidity: distance,
                fvg_overlap: self.leg_has_fvg(c, i, direction),
            };
            push_poi(&mut out, series, PoiType::BreakerBlock, direction, i, zone, flags);
        }
        out
    }

    /// Three-candle imbalance indexed by its middle candle.
    pub fn detect_fair_value_gaps(
        &self,
        series: &CandleSeries,
        direction: Direction,
        inducement_index: usize,
        structure_break_index: usize,
    ) -> Vec<PointOfInterest> {
        let c = series.candles();
        let window = self.scan_window(series, structure_break_index);
        let mut out = Vec::new();

        for mid in window.start.max(1)..window.end {
            if mid + 1 >= c.len() {
                break;
            }
            let Some((bottom, top)) = self.gap_at(c, mid, direction) else {
                continue;
            };
            let distance = inducement_index as i64 - mid as i64;
            if distance > self.max_distance {
                continue;
            }
            let zone = PoiZone { price_high: top, price_low: bottom, body_high: top, body_low: bottom };
            let flags = PoiFlags {
                triggered_structure: mid < structure_break_index,
                has_inducement: mid < inducement_index,
                is_unmitigated: gap_stays_open(c, mid, bottom, top, direction),
                distance_to_liquidity: distance,
                fvg_overlap: true,
            };
            push_poi(&mut out, series, PoiType::FairValueGap, direction, mid, zone, flags);
        }
        out
    }

    fn scan_window(&self, series: &CandleSeries, structure_break_index: usize) -> Range<usize> {
        let end = structure_break_index.min(series.len());
        end.saturating_sub(self.lookback)..end
    }

    /// (bottom, top) of a gap in `direction` around `mid`, if it clears the minimum size.
    fn gap_at(&self, c: &[Candle], mid: usize, direction: Direction) -> Option<(f64, f64)> {
        let (bottom, top) = match direction {
            Direction::Bullish => (c[mid - 1].high, c[mid + 1].low),
            Direction::Bearish => (c[mid + 1].high, c[mid - 1].low),
        };
        let gap = top - bottom;
        if gap <= 0.0 || bottom <= 0.0 {
            return None;
        }
        let pct = gap / bottom * 100.0;
        (pct >= self.fvg_min_size_percent).then_some((bottom, top))
    }

    fn leg_has_fvg(&self, c: &[Candle], i: usize, direction: Direction) -> bool {
        (i + 1..=i + DISPLACEMENT_CANDLES)
            .filter(|&mid| mid + 1 < c.len())
            .any(|mid| self.gap_at(c, mid, direction).is_some())
    }
}

fn rank(pois: &mut [PointOfInterest]) {
    pois.sort_by(|a, b| {
        a.distance_to_liquidity
            .cmp(&b.distance_to_liquidity)
            .then(b.candle_index.cmp(&a.candle_index))
    });
}

fn push_poi(
    out: &mut Vec<PointOfInterest>,
    series: &CandleSeries,
    poi_type: PoiType,
    direction: Direction,
    index: usize,
    zone: PoiZone,
    flags: PoiFlags,
) {
    match PointOfInterest::new(poi_type, direction, index, series[index].timestamp, zone, flags) {
        Ok(poi) => out.push(poi),
        Err(e) => log::debug!("[{} {}] skipped: {}", series.symbol(), series.timeframe(), e),
    }
}

/// Enough history for the average range and enough candles for the leg.
fn has_room(c: &[Candle], i: usize) -> bool {
    i >= AVG_RANGE_PERIOD && i + DISPLACEMENT_CANDLES < c.len()
}

/// At least two of the next three candles close in `direction`, and the leg's
/// total range beats the trailing average range by the displacement multiple.
fn is_displacement(c: &[Candle], i: usize, direction: Direction) -> bool {
    let leg = &c[i + 1..=i + DISPLACEMENT_CANDLES];
    if leg.iter().filter(|x| x.closes_toward(direction)).count() < DISPLACEMENT_MIN_COUNT {
        return false;
    }
    let high = leg.iter().map(|x| x.high).fold(f64::MIN, f64::max);
    let low = leg.iter().map(|x| x.low).fold(f64::MAX, f64::min);
    let avg_range = c[i - AVG_RANGE_PERIOD..i].iter().map(Candle::range).sum::<f64>() / AVG_RANGE_PERIOD as f64;
    high - low > avg_range * DISPLACEMENT_RANGE_MULT
}

/// 50% rule: between formation and the inducement, no wick may reach the
/// midpoint of the POI candle's range.
fn wick_midpoint_holds(c: &[Candle], i: usize, inducement_index: usize, direction: Direction) -> bool {
    if i >= inducement_index {
        return true;
    }
    let mean = (c[i].high + c[i].low) / 2.0;
    let end = inducement_index.min(c.len() - 1);
    c[i + 1..=end].iter().all(|x| match direction {
        Direction::Bullish => x.low > mean,
        Direction::Bearish => x.high < mean,
    })
}

/// The body survives through the last candle of the series.
fn body_holds(c: &[Candle], i: usize, direction: Direction) -> bool {
    let (body_low, body_high) = (c[i].body_low(), c[i].body_high());
    c[i + 1..].iter().all(|x| match direction {
        Direction::Bullish => x.low > body_low,
        Direction::Bearish => x.high < body_high,
    })
}

/// No later candle trades back through the far side of the gap.
fn gap_stays_open(c: &[Candle], mid: usize, bottom: f64, top: f64, direction: Direction) -> bool {
    c.iter().skip(mid + 2).all(|x| match direction {
        Direction::Bullish => x.low > bottom,
        Direction::Bearish => x.high < top,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doji(ts: i64, price: f64) -> Candle {
        Candle { timestamp: ts, open: price, high: price + 0.0005, low: price - 0.0005, close: price, volume: 1.0 }
    }

    fn base(n: usize, price: f64) -> Vec<Candle> {
        (0..n).map(|i| doji(i as i64 * 900_000, price)).collect()
    }

    fn set(c: &mut [Candle], i: usize, o: f64, h: f64, l: f64, cl: f64) {
        c[i].open = o;
        c[i].high = h;
        c[i].low = l;
        c[i].close = cl;
    }

    #[test]
    fn window_is_clamped_to_series() {
        let det = PoiDetector::new(Timeframe::H4);
        let series = CandleSeries::new("EURUSD", Timeframe::H4, base(40, 1.1)).unwrap();
        assert_eq!(det.scan_window(&series, 500), 0..40);
        assert_eq!(det.scan_window(&series, 30), 0..30);
    }

    #[test]
    fn bearish_order_block_mirrors_bullish() {
        let mut c = base(60, 1.1000);
        // bullish candle then a bearish leg
        set(&mut c, 30, 1.0998, 1.1010, 1.0996, 1.1002);
        set(&mut c, 31, 1.1002, 1.1002, 1.0988, 1.0990);
        set(&mut c, 32, 1.0990, 1.0991, 1.0973, 1.0975);
        set(&mut c, 33, 1.0975, 1.0976, 1.0958, 1.0960);
        for x in c.iter_mut().skip(34) {
            *x = doji(x.timestamp, 1.0960);
        }
        let series = CandleSeries::new("EURUSD", Timeframe::M15, c).unwrap();
        let det = PoiDetector::new(Timeframe::M15);
        let obs = det.detect_order_blocks(&series, Direction::Bearish, 45, 50);
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].candle_index, 30);
        assert_eq!(obs[0].distance_to_liquidity, 15);
        assert!(obs[0].is_valid());
    }

    #[test]
    fn far_candidates_are_dropped() {
        let mut c = base(120, 1.1000);
        set(&mut c, 30, 1.1002, 1.1004, 1.0990, 1.0998);
        set(&mut c, 31, 1.0998, 1.1012, 1.0998, 1.1010);
        set(&mut c, 32, 1.1010, 1.1027, 1.1009, 1.1025);
        set(&mut c, 33, 1.1025, 1.1042, 1.1024, 1.1040);
        for x in c.iter_mut().skip(34) {
            *x = doji(x.timestamp, 1.1040);
        }
        let series = CandleSeries::new("EURUSD", Timeframe::H4, c).unwrap();
        // H4 allows 30 candles between POI and inducement.
        let det = PoiDetector::new(Timeframe::H4);
        assert!(det.detect_order_blocks(&series, Direction::Bullish, 61, 70).is_empty());
        assert_eq!(det.detect_order_blocks(&series, Direction::Bullish, 60, 70).len(), 1);
    }

    #[test]
    fn gap_below_minimum_size_is_ignored() {
        let gap_series = |third_low: f64| {
            let mut c = base(40, 1.1000);
            set(&mut c, 20, 1.1000, 1.1005, 1.0995, 1.1003);
            set(&mut c, 21, 1.1003, 1.1020, 1.1003, 1.1018);
            set(&mut c, 22, 1.1025, 1.1030, third_low, 1.1028);
            for x in c.iter_mut().skip(23) {
                *x = doji(x.timestamp, 1.1030);
            }
            CandleSeries::new("EURUSD", Timeframe::M15, c).unwrap()
        };
        let det = PoiDetector::new(Timeframe::M15);
        // 0.05% and 0.15% of 1.1005
        assert!(det.detect_fair_value_gaps(&gap_series(1.10105), Direction::Bullish, 30, 35).is_empty());
        let gaps = det.detect_fair_value_gaps(&gap_series(1.10215), Direction::Bullish, 30, 35);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].candle_index, 21);
        assert!(gaps[0].is_valid());
    }
}
