#![allow(dead_code)]

use smc_engine::types::{Candle, CandleSeries, Timeframe};

pub const M15_MS: i64 = 900_000;

/// Piecewise-linear path through `points`, `steps` candles per leg.
pub fn zigzag(points: &[f64], steps: usize) -> Vec<f64> {
    let mut path = Vec::new();
    for w in points.windows(2) {
        let (a, b) = (w[0], w[1]);
        for s in 0..steps {
            path.push(a + (b - a) * s as f64 / steps as f64);
        }
    }
    if let Some(last) = points.last() {
        path.push(*last);
    }
    path
}

/// One candle per path price: ±5 pip wicks, ±2 pip body coloured by the move.
pub fn candles_from_path(path: &[f64], step_ms: i64) -> Vec<Candle> {
    let mut prev: Option<f64> = None;
    path.iter()
        .enumerate()
        .map(|(i, &c)| {
            let rising = prev.map_or(true, |p| c >= p);
            prev = Some(c);
            let (open, close) = if rising { (c - 0.0002, c + 0.0002) } else { (c + 0.0002, c - 0.0002) };
            Candle { timestamp: i as i64 * step_ms, open, high: c + 0.0005, low: c - 0.0005, close, volume: 100.0 }
        })
        .collect()
}

pub fn series(symbol: &str, tf: Timeframe, candles: Vec<Candle>) -> CandleSeries {
    CandleSeries::new(symbol, tf, candles).expect("valid fixture series")
}

pub fn doji(i: usize, price: f64) -> Candle {
    Candle { timestamp: i as i64 * M15_MS, open: price, high: price + 0.0005, low: price - 0.0005, close: price, volume: 100.0 }
}

/// Flat tape at 1.1000, a bearish candle at 300, a three-candle bullish
/// displacement leg leaving a gap around 302, then flat at 1.1040.
pub fn displacement_tape() -> Vec<Candle> {
    let mut c: Vec<Candle> = (0..300).map(|i| doji(i, 1.1000)).collect();
    let bar = |i: usize, open: f64, high: f64, low: f64, close: f64| Candle {
        timestamp: i as i64 * M15_MS,
        open,
        high,
        low,
        close,
        volume: 100.0,
    };
    c.push(bar(300, 1.1002, 1.1004, 1.0990, 1.0998));
    c.push(bar(301, 1.0998, 1.1012, 1.0998, 1.1010));
    c.push(bar(302, 1.1010, 1.1027, 1.1009, 1.1025));
    c.push(bar(303, 1.1025, 1.1042, 1.1024, 1.1040));
    c.extend((304..500).map(|i| doji(i, 1.1040)));
    c
}

/// EURUSD M15 / H1 / H4 fixtures: all three timeframes trend up, the last LTF
/// swing low (index 20) is raided by candle 29.
pub fn bullish_mtf() -> (CandleSeries, CandleSeries, CandleSeries) {
    let htf = candles_from_path(&zigzag(&[1.000, 1.050, 1.030, 1.080, 1.060, 1.150, 1.120, 1.130], 5), 16 * M15_MS);
    let itf = candles_from_path(&zigzag(&[1.050, 1.060, 1.055, 1.065, 1.060, 1.070, 1.065, 1.075], 5), 4 * M15_MS);
    let mut ltf = candles_from_path(&zigzag(&[1.1000, 1.1050, 1.1020, 1.1070, 1.1040, 1.1090, 1.1060], 5), M15_MS);
    ltf[29].low = 1.1030;
    (
        series("EURUSD", Timeframe::H4, htf),
        series("EURUSD", Timeframe::H1, itf),
        series("EURUSD", Timeframe::M15, ltf),
    )
}
