use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{normalize_symbol, paper_symbol_info};
use crate::error::SmcError;
use crate::signal_generator::{MlScorer, SentimentProvider};
use crate::types::{Candle, CandleSeries, MlPrediction, Quote, SentimentScore, Timeframe};

/// Price-data boundary. Implementations return validated series only.
pub trait CandleFeed: Send + Sync {
    fn get_historical_data(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<CandleSeries, SmcError>;
    fn get_current_price(&self, symbol: &str) -> Option<Quote>;
}

/// Reads `{data_dir}/{SYMBOL}_{TF}.csv` with a
/// `timestamp,open,high,low,close,volume` header (timestamp in Unix millis).
#[derive(Clone, Debug)]
pub struct CsvFeed {
    data_dir: PathBuf,
    quote_timeframe: Timeframe,
    spread_points: f64,
}

impl CsvFeed {
    pub fn new(data_dir: &Path, quote_timeframe: Timeframe) -> Self {
        CsvFeed { data_dir: data_dir.to_path_buf(), quote_timeframe, spread_points: 10.0 }
    }

    pub fn with_spread_points(mut self, points: f64) -> Self {
        self.spread_points = points;
        self
    }

    pub fn path_for(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.data_dir.join(format!("{}_{}.csv", normalize_symbol(symbol), timeframe))
    }
}

impl CandleFeed for CsvFeed {
    fn get_historical_data(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<CandleSeries, SmcError> {
        let mut candles = load_candles(&self.path_for(symbol, timeframe))?;
        if candles.len() > count {
            candles.drain(..candles.len() - count);
        }
        CandleSeries::new(&normalize_symbol(symbol), timeframe, candles)
    }

    /// Last close as the bid, ask a fixed spread above.
    fn get_current_price(&self, symbol: &str) -> Option<Quote> {
        let candles = load_candles(&self.path_for(symbol, self.quote_timeframe)).ok()?;
        let last = candles.last()?;
        let point = paper_symbol_info(symbol).point;
        Some(Quote { bid: last.close, ask: last.close + point * self.spread_points })
    }
}

/// Sorted by timestamp, exact duplicates of a timestamp collapsed to the last row.
pub fn load_candles(path: &Path) -> Result<Vec<Candle>, SmcError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut candles = Vec::new();
    for row in reader.deserialize() {
        let candle: Candle = row?;
        candles.push(candle);
    }
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by(|later, earlier| {
        if later.timestamp == earlier.timestamp {
            *earlier = later.clone();
            true
        } else {
            false
        }
    });
    log::debug!("{} -> {} candles", path.display(), candles.len());
    Ok(candles)
}

/// ML and sentiment outputs dropped by external collaborators as
/// `{SYMBOL}_ml.json` and `{SYMBOL}_sentiment.json` next to the candles.
#[derive(Clone, Debug)]
pub struct FileScores {
    dir: PathBuf,
}

impl FileScores {
    pub fn new(dir: &Path) -> Self {
        FileScores { dir: dir.to_path_buf() }
    }

    fn read<T: serde::de::DeserializeOwned>(&self, symbol: &str, kind: &str) -> Option<T> {
        let path = self.dir.join(format!("{}_{}.json", normalize_symbol(symbol), kind));
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("[{}] unreadable {}: {}", symbol, path.display(), e);
                None
            }
        }
    }
}

impl MlScorer for FileScores {
    fn predict(&self, series: &CandleSeries) -> Option<MlPrediction> {
        self.read(series.symbol(), "ml")
    }
}

impl SentimentProvider for FileScores {
    fn analyze_symbol_sentiment(&self, symbol: &str) -> Option<SentimentScore> {
        self.read(symbol, "sentiment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn csv_feed_reads_sorts_and_truncates() {
        let dir = std::env::temp_dir().join(format!("smc_feed_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let mut f = fs::File::create(dir.join("EURUSD_M15.csv")).unwrap();
        writeln!(f, "timestamp,open,high,low,close,volume").unwrap();
        for i in (0..30).rev() {
            let p = 1.1 + i as f64 * 0.0001;
            writeln!(f, "{},{},{},{},{},100", i * 900_000, p, p + 0.0005, p - 0.0005, p).unwrap();
        }
        drop(f);

        let feed = CsvFeed::new(&dir, Timeframe::M15);
        let series = feed.get_historical_data("EURUSD.raw", Timeframe::M15, 25).unwrap();
        assert_eq!(series.len(), 25);
        assert_eq!(series[0].timestamp, 5 * 900_000);
        assert_eq!(series.symbol(), "EURUSD");

        let q = feed.get_current_price("EURUSD").unwrap();
        assert!(q.ask > q.bid);
        assert!(feed.get_historical_data("GBPUSD", Timeframe::M15, 25).is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
