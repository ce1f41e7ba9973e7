use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::config::{normalize_symbol, SmcConfig};
use crate::order_type::OrderTypeDecider;
use crate::risk_manager::{RiskManager, TradeRejection, TradingStats};
use crate::smc_analyzer::{NoSetup, SmcAnalyzer};
use crate::types::{
    AccountSnapshot, AccountState, CandleSeries, Direction, MlPrediction, OrderDecision, PositionSizeResult,
    Quote, RiskProfile, SentimentScore, SymbolInfo, Timeframe, TradingSetup,
};

/// ML ensemble seam. `None` means the model is unavailable for this call.
pub trait MlScorer: Send + Sync {
    fn predict(&self, series: &CandleSeries) -> Option<MlPrediction>;
}

/// Stand-in when no trained model is loaded.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeutralScorer;

impl MlScorer for NeutralScorer {
    fn predict(&self, _series: &CandleSeries) -> Option<MlPrediction> {
        Some(MlPrediction::neutral())
    }
}

/// News sentiment seam.
pub trait SentimentProvider: Send + Sync {
    fn analyze_symbol_sentiment(&self, symbol: &str) -> Option<SentimentScore>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoSentiment;

impl SentimentProvider for NoSentiment {
    fn analyze_symbol_sentiment(&self, _symbol: &str) -> Option<SentimentScore> {
        None
    }
}

/// Candles and live quote for one symbol, fetched before the engine runs.
#[derive(Clone, Debug)]
pub struct MarketSnapshot {
    pub htf: CandleSeries,
    pub itf: CandleSeries,
    pub ltf: CandleSeries,
    pub quote: Option<Quote>,
}

#[derive(Clone, Debug)]
pub struct AccountContext {
    pub profile: RiskProfile,
    pub account: Option<AccountSnapshot>,
    pub state: AccountState,
    pub symbol_info: Option<SymbolInfo>,
    /// When present, Kelly sizing may lower the profile's risk percentage.
    pub stats: Option<TradingStats>,
}

/// Accepted, sized instruction handed to execution and audit.
#[derive(Clone, Debug, Serialize)]
pub struct Signal {
    pub symbol: String,
    pub normalized_symbol: String,
    pub setup: TradingSetup,
    pub order: OrderDecision,
    pub position: PositionSizeResult,
    pub current_price: f64,
    pub ml_prediction: Option<MlPrediction>,
    pub sentiment: Option<SentimentScore>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Rejection {
    NoSetup(NoSetup),
    Feed { timeframe: Timeframe, reason: String },
    NoQuote,
    Trade(TradeRejection),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoSetup(r) => write!(f, "no setup: {r}"),
            Rejection::Feed { timeframe, reason } => write!(f, "{timeframe} data unavailable: {reason}"),
            Rejection::NoQuote => f.write_str("no live price"),
            Rejection::Trade(r) => write!(f, "trade rejected: {r}"),
        }
    }
}

impl From<NoSetup> for Rejection {
    fn from(r: NoSetup) -> Self {
        Rejection::NoSetup(r)
    }
}

impl From<TradeRejection> for Rejection {
    fn from(r: TradeRejection) -> Self {
        Rejection::Trade(r)
    }
}

pub struct SignalGenerator {
    analyzer: SmcAnalyzer,
    decider: OrderTypeDecider,
    risk: RiskManager,
    ml: Box<dyn MlScorer>,
    sentiment: Box<dyn SentimentProvider>,
}

impl SignalGenerator {
    pub fn new(cfg: &SmcConfig, ml: Box<dyn MlScorer>, sentiment: Box<dyn SentimentProvider>) -> Self {
        SignalGenerator {
            analyzer: SmcAnalyzer::new(cfg),
            decider: OrderTypeDecider::new(cfg.price_tolerance_pips),
            risk: RiskManager::new(cfg),
            ml,
            sentiment,
        }
    }

    pub fn risk_manager(&self) -> &RiskManager {
        &self.risk
    }

    /// Setup, order type, trade validation, sizing. Every `Err` carries a
    /// reason fit for the audit log.
    pub fn generate(
        &self,
        symbol: &str,
        market: &MarketSnapshot,
        account: &AccountContext,
        now: DateTime<Utc>,
    ) -> Result<Signal, Rejection> {
        let normalized = normalize_symbol(symbol);

        let ml_prediction = self.ml.predict(&market.itf);
        let sentiment = self.sentiment.analyze_symbol_sentiment(&normalized);
        if ml_prediction.is_none() {
            log::debug!("[{}] ML unavailable, scoring without it", symbol);
        }

        let setup = self.analyzer.generate_setup(
            &market.htf,
            &market.itf,
            &market.ltf,
            ml_prediction.as_ref(),
            sentiment.as_ref(),
        )?;

        let quote = market.quote.ok_or(Rejection::NoQuote)?;
        let current_price = match setup.direction {
            Direction::Bullish => quote.ask,
            Direction::Bearish => quote.bid,
        };
        let order = self
            .decider
            .decide_for_quote(&normalized, setup.direction, setup.entry_price, &quote);
        log::info!("[{}] order type {} - {}", symbol, order.order_type, order.reason);

        self.risk.validate_trade(
            &account.profile,
            &account.state,
            &normalized,
            setup.confidence_score,
            account.symbol_info.as_ref(),
            Some(&quote),
        )?;

        let profile = match &account.stats {
            Some(stats) => RiskProfile {
                risk_percentage: self.risk.kelly_risk_percentage(&account.profile, stats),
                ..account.profile.clone()
            },
            None => account.profile.clone(),
        };
        let position = self.risk.calculate_position_size(
            &profile,
            account.account.as_ref(),
            account.symbol_info.as_ref(),
            &normalized,
            setup.entry_price,
            setup.stop_loss,
        );

        log::info!(
            "[{}] {} {} @ {:.5} SL {:.5} TP1 {:.5} TP2 {:.5} | {:.2} lots | RR {:.2} | conf {:.2} | {}",
            symbol,
            setup.direction.side(),
            order.order_type,
            setup.entry_price,
            setup.stop_loss,
            setup.take_profit_1,
            setup.take_profit_2,
            position.lot_size,
            setup.risk_reward_tp1,
            setup.confidence_score,
            setup.scenario
        );

        Ok(Signal {
            symbol: symbol.to_string(),
            normalized_symbol: normalized,
            setup,
            order,
            position,
            current_price,
            ml_prediction,
            sentiment,
            generated_at: now,
        })
    }
}
