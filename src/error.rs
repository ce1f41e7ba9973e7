use thiserror::Error;

/// Data and construction faults. Expected "no trade" outcomes are not errors;
/// see `NoSetup`, `RiskBreach` and `TradeRejection`.
#[derive(Debug, Error)]
pub enum SmcError {
    #[error("insufficient data: {len} candles (need at least {required})")]
    InsufficientData { len: usize, required: usize },

    #[error("malformed candle at index {index}: {reason}")]
    MalformedCandle { index: usize, reason: String },

    #[error("candle timestamps not strictly increasing at index {index}")]
    Unordered { index: usize },

    #[error("invalid point of interest: {0}")]
    InvalidPoi(String),

    #[error("invalid setup: {0}")]
    InvalidSetup(String),

    #[error("unknown timeframe: {0}")]
    UnknownTimeframe(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}
