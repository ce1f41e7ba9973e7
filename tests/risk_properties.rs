use proptest::prelude::*;

use smc_engine::config::{EntryMode, SmcConfig};
use smc_engine::order_type::decide_with_tolerance;
use smc_engine::risk_manager::RiskManager;
use smc_engine::smc_analyzer::{entry_price, stop_loss};
use smc_engine::types::{
    AccountSnapshot, Direction, OrderType, PoiFlags, PoiType, PoiZone, PointOfInterest, RiskProfile, SymbolInfo,
};

fn profile(balance: f64, risk: f64, max_lot: f64) -> RiskProfile {
    RiskProfile {
        balance,
        equity: balance,
        margin_level: 1_000.0,
        risk_percentage: risk,
        max_daily_loss_percent: 5.0,
        max_open_positions: 3,
        max_lot_size: max_lot,
    }
}

fn direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Bullish), Just(Direction::Bearish)]
}

proptest! {
    #[test]
    fn lot_size_stays_in_bounds(
        balance in 100.0f64..1_000_000.0,
        risk in 0.1f64..5.0,
        stop_pips in 1.0f64..500.0,
        pip_value in 0.5f64..20.0,
        max_lot in 0.05f64..50.0,
    ) {
        let rm = RiskManager::new(&SmcConfig::default());
        let account = AccountSnapshot { balance, equity: balance, margin_level: 1_000.0, currency: "USD".into(), leverage: 100 };
        let info = SymbolInfo { digits: 5, point: 0.00001, volume_step: 0.01, pip_value };
        let entry = 1.2000;
        let sl = entry - stop_pips * 0.0001;
        let p = profile(balance, risk, max_lot);
        let r = rm.calculate_position_size(&p, Some(&account), Some(&info), "EURUSD", entry, sl);

        let cap = max_lot.min(10.0).max(0.01);
        prop_assert!(r.lot_size >= 0.01 - 1e-12);
        prop_assert!(r.lot_size <= cap + 1e-12);
        prop_assert!(!r.fallback);

        // Above the minimum lot, realised risk never exceeds the budget.
        if r.lot_size > 0.01 + 1e-12 {
            let at_risk = r.lot_size * r.stop_distance * pip_value;
            prop_assert!(at_risk <= r.risk_amount * (1.0 + 1e-6), "{} > {}", at_risk, r.risk_amount);
        }
    }

    #[test]
    fn entry_and_stop_straddle_the_zone(
        low in 0.5f64..200.0,
        height_frac in 0.0005f64..0.02,
        body_lo_frac in 0.0f64..0.5,
        body_hi_frac in 0.5f64..1.0,
        pad in 0.0f64..0.01,
        dir in direction(),
        proximal in any::<bool>(),
        kind in prop_oneof![Just(PoiType::OrderBlock), Just(PoiType::BreakerBlock), Just(PoiType::FairValueGap)],
    ) {
        let high = low * (1.0 + height_frac);
        let span = high - low;
        let zone = PoiZone {
            price_high: high,
            price_low: low,
            body_high: low + span * body_hi_frac,
            body_low: low + span * body_lo_frac,
        };
        let flags = PoiFlags { triggered_structure: true, has_inducement: true, is_unmitigated: true, distance_to_liquidity: 1, fvg_overlap: false };
        let poi = PointOfInterest::new(kind, dir, 10, 0, zone, flags).unwrap();
        let mode = if proximal { EntryMode::BreakerProximal } else { EntryMode::Midpoint };

        let entry = entry_price(&poi, dir, mode);
        let stop = stop_loss(&poi, dir, pad);
        prop_assert!(entry >= poi.body_low && entry <= poi.body_high);
        match dir {
            Direction::Bullish => prop_assert!(stop < entry && stop <= poi.price_low),
            Direction::Bearish => prop_assert!(stop > entry && stop >= poi.price_high),
        }
    }

    #[test]
    fn order_type_matches_entry_side(
        current in 0.5f64..200.0,
        offset_frac in -0.05f64..0.05,
        tol_frac in 0.0f64..0.001,
        dir in direction(),
    ) {
        let entry = current * (1.0 + offset_frac);
        let tolerance = current * tol_frac;
        let d = decide_with_tolerance(dir, entry, current, tolerance);

        if (entry - current).abs() < tolerance * 0.999 {
            prop_assert_eq!(d.order_type, OrderType::Market);
        }
        if d.order_type == OrderType::Market {
            prop_assert!(d.immediate_execution);
            prop_assert_eq!(d.execution_price, current);
        } else {
            prop_assert!(!d.immediate_execution);
            prop_assert_eq!(d.execution_price, entry);
            let expected = match (dir, entry > current) {
                (Direction::Bullish, true) => OrderType::BuyStop,
                (Direction::Bullish, false) => OrderType::BuyLimit,
                (Direction::Bearish, true) => OrderType::SellLimit,
                (Direction::Bearish, false) => OrderType::SellStop,
            };
            prop_assert_eq!(d.order_type, expected);
        }
    }
}
