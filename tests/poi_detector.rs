mod common;

use common::{displacement_tape, series};
use smc_engine::poi_detector::PoiDetector;
use smc_engine::types::{Direction, PoiType, Timeframe};

const INDUCEMENT: usize = 320;
const BREAK: usize = 325;

#[test]
fn displacement_leg_yields_ranked_pois() {
    let s = series("EURUSD", Timeframe::M15, displacement_tape());
    let pois = PoiDetector::new(Timeframe::M15).find_pois(&s, Direction::Bullish, INDUCEMENT, BREAK);

    let found: Vec<(PoiType, usize, i64)> = pois.iter().map(|p| (p.poi_type, p.candle_index, p.distance_to_liquidity)).collect();
    assert_eq!(
        found,
        vec![
            (PoiType::FairValueGap, 302, 18),
            (PoiType::BreakerBlock, 301, 19),
            (PoiType::OrderBlock, 300, 20),
        ]
    );
    assert!(pois.iter().all(|p| p.is_valid() && p.direction == Direction::Bullish));
}

#[test]
fn order_block_geometry() {
    let s = series("EURUSD", Timeframe::M15, displacement_tape());
    let obs = PoiDetector::new(Timeframe::M15).detect_order_blocks(&s, Direction::Bullish, INDUCEMENT, BREAK);

    assert_eq!(obs.len(), 1);
    let ob = &obs[0];
    assert_eq!(ob.candle_index, 300);
    assert_eq!(ob.price_high, 1.1004);
    assert_eq!(ob.price_low, 1.0990);
    assert_eq!(ob.body_high, 1.1002);
    assert_eq!(ob.body_low, 1.0998);
    assert!(ob.triggered_structure && ob.has_inducement && ob.is_unmitigated);
    assert!(ob.fvg_overlap);
}

#[test]
fn breaker_whose_body_is_traded_into_is_invalid() {
    let s = series("EURUSD", Timeframe::M15, displacement_tape());
    let bbs = PoiDetector::new(Timeframe::M15).detect_breaker_blocks(&s, Direction::Bullish, INDUCEMENT, BREAK);
    let at_300 = bbs.iter().find(|p| p.candle_index == 300).expect("breaker candidate at 300");
    // Candle 301 opens at 1.0998 with a low on the body edge.
    assert!(!at_300.is_unmitigated);
    assert!(!at_300.is_valid());
}

#[test]
fn wick_into_the_midpoint_mitigates_every_zone() {
    let mut tape = displacement_tape();
    tape[310].low = 1.0996;
    let s = series("EURUSD", Timeframe::M15, tape);
    let det = PoiDetector::new(Timeframe::M15);

    assert!(det.find_pois(&s, Direction::Bullish, INDUCEMENT, BREAK).is_empty());
    let candidates = det.candidates(&s, Direction::Bullish, INDUCEMENT, BREAK);
    assert!(!candidates.is_empty());
    assert!(candidates.iter().all(|p| !p.is_unmitigated));
}

#[test]
fn gap_size_threshold_is_respected() {
    let s = series("EURUSD", Timeframe::M15, displacement_tape());
    // The gap at 302 spans 1.1012..1.1024, roughly 0.109%.
    let loose = PoiDetector::new(Timeframe::M15).with_fvg_min_size_percent(0.08);
    let strict = PoiDetector::new(Timeframe::M15).with_fvg_min_size_percent(0.15);

    let gaps = loose.detect_fair_value_gaps(&s, Direction::Bullish, INDUCEMENT, BREAK);
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].candle_index, 302);
    assert_eq!((gaps[0].price_low, gaps[0].price_high), (1.1012, 1.1024));

    assert!(strict.detect_fair_value_gaps(&s, Direction::Bullish, INDUCEMENT, BREAK).is_empty());
    let obs = strict.detect_order_blocks(&s, Direction::Bullish, INDUCEMENT, BREAK);
    assert!(!obs[0].fvg_overlap);
}

#[test]
fn wrong_direction_finds_nothing_valid() {
    let s = series("EURUSD", Timeframe::M15, displacement_tape());
    let pois = PoiDetector::new(Timeframe::M15).find_pois(&s, Direction::Bearish, INDUCEMENT, BREAK);
    assert!(pois.is_empty());
}

#[test]
fn zones_after_the_break_are_outside_the_window() {
    let s = series("EURUSD", Timeframe::M15, displacement_tape());
    // Break placed before the leg: nothing in the window qualifies.
    let pois = PoiDetector::new(Timeframe::M15).find_pois(&s, Direction::Bullish, 296, 298);
    assert!(pois.is_empty());
}

#[test]
fn detection_is_idempotent() {
    let s = series("EURUSD", Timeframe::M15, displacement_tape());
    let det = PoiDetector::new(Timeframe::M15);
    assert_eq!(
        det.find_pois(&s, Direction::Bullish, INDUCEMENT, BREAK),
        det.find_pois(&s, Direction::Bullish, INDUCEMENT, BREAK)
    );
}
