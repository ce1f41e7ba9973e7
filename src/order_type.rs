use crate::config::{pip_size, PRICE_TOLERANCE_PIPS};
use crate::types::{Direction, OrderDecision, OrderType, Quote};

/// Market vs pending classification of a setup entry.
#[derive(Clone, Copy, Debug)]
pub struct OrderTypeDecider {
    tolerance_pips: f64,
}

impl Default for OrderTypeDecider {
    fn default() -> Self {
        OrderTypeDecider { tolerance_pips: PRICE_TOLERANCE_PIPS }
    }
}

impl OrderTypeDecider {
    pub fn new(tolerance_pips: f64) -> Self {
        OrderTypeDecider { tolerance_pips }
    }

    /// Tolerance converted with the symbol's pip size.
    pub fn decide(&self, symbol: &str, direction: Direction, entry_price: f64, current_price: f64) -> OrderDecision {
        let tolerance = self.tolerance_pips * pip_size(symbol);
        decide_with_tolerance(direction, entry_price, current_price, tolerance)
    }

    /// BUY fills at the ask, SELL at the bid.
    pub fn decide_for_quote(&self, symbol: &str, direction: Direction, entry_price: f64, quote: &Quote) -> OrderDecision {
        let current = match direction {
            Direction::Bullish => quote.ask,
            Direction::Bearish => quote.bid,
        };
        self.decide(symbol, direction, entry_price, current)
    }
}

pub fn decide_with_tolerance(direction: Direction, entry_price: f64, current_price: f64, tolerance: f64) -> OrderDecision {
    let gap = entry_price - current_price;
    // absorb float noise at the boundary
    if gap.abs() <= tolerance + tolerance.abs() * 1e-9 {
        return OrderDecision {
            order_type: OrderType::Market,
            execution_price: current_price,
            immediate_execution: true,
            reason: format!(
                "price {current_price:.5} within {tolerance:.5} of entry {entry_price:.5}"
            ),
        };
    }

    let (order_type, reason) = match direction {
        Direction::Bullish if gap > 0.0 => (
            OrderType::BuyStop,
            format!("entry {entry_price:.5} above market {current_price:.5}: buy on breakout"),
        ),
        Direction::Bullish => (
            OrderType::BuyLimit,
            format!("entry {entry_price:.5} below market {current_price:.5}: buy the pullback"),
        ),
        Direction::Bearish if gap < 0.0 => (
            OrderType::SellStop,
            format!("entry {entry_price:.5} below market {current_price:.5}: sell on breakdown"),
        ),
        Direction::Bearish => (
            OrderType::SellLimit,
            format!("entry {entry_price:.5} above market {current_price:.5}: sell the rally"),
        ),
    };

    OrderDecision {
        order_type,
        execution_price: entry_price,
        immediate_execution: false,
        reason,
    }
}
