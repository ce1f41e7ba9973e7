use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SmcError;
use crate::types::{Direction, PoiType, Scenario, TradingSetup};

/// Fields that make two setups "the same opportunity".
#[derive(Clone, Debug, PartialEq)]
pub struct SignalKey {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub scenario: Scenario,
    pub poi_type: PoiType,
}

impl SignalKey {
    pub fn from_setup(setup: &TradingSetup) -> Self {
        SignalKey {
            symbol: setup.symbol.clone(),
            direction: setup.direction,
            entry_price: setup.entry_price,
            scenario: setup.scenario,
            poi_type: setup.poi.poi_type,
        }
    }

    /// SHA-256 hex of `symbol|side|entry(5dp)|scenario|poi`.
    pub fn hash(&self) -> String {
        let canonical = format!(
            "{}|{}|{:.5}|{}|{}",
            self.symbol,
            self.direction.side(),
            self.entry_price,
            self.scenario.label(),
            self.poi_type.code()
        );
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub hash: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub scenario: Scenario,
    pub poi_type: PoiType,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_sent: Option<DateTime<Utc>>,
    pub occurrence_count: u32,
    pub sent_count: u32,
}

/// Persistence seam for dedup history.
pub trait SignalStore {
    fn get(&self, hash: &str) -> Result<Option<SignalRecord>, SmcError>;
    fn put(&mut self, record: SignalRecord) -> Result<(), SmcError>;
    /// Drops records last seen before `cutoff`; returns how many went.
    fn remove_seen_before(&mut self, cutoff: DateTime<Utc>) -> Result<usize, SmcError>;
    fn records(&self) -> Result<Vec<SignalRecord>, SmcError>;
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: HashMap<String, SignalRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignalStore for InMemoryStore {
    fn get(&self, hash: &str) -> Result<Option<SignalRecord>, SmcError> {
        Ok(self.records.get(hash).cloned())
    }

    fn put(&mut self, record: SignalRecord) -> Result<(), SmcError> {
        self.records.insert(record.hash.clone(), record);
        Ok(())
    }

    fn remove_seen_before(&mut self, cutoff: DateTime<Utc>) -> Result<usize, SmcError> {
        let before = self.records.len();
        self.records.retain(|_, r| r.last_seen >= cutoff);
        Ok(before - self.records.len())
    }

    fn records(&self) -> Result<Vec<SignalRecord>, SmcError> {
        Ok(self.records.values().cloned().collect())
    }
}

/// Whole history in one JSON file, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: InMemoryStore,
}

impl JsonFileStore {
    pub fn open(path: &Path) -> Result<Self, SmcError> {
        let records: HashMap<String, SignalRecord> = if path.exists() {
            let text = fs::read_to_string(path)?;
            if text.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&text)?
            }
        } else {
            HashMap::new()
        };
        log::info!("Signal store {} loaded ({} records)", path.display(), records.len());
        Ok(JsonFileStore { path: path.to_path_buf(), inner: InMemoryStore { records } })
    }

    fn flush(&self) -> Result<(), SmcError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.inner.records)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SignalStore for JsonFileStore {
    fn get(&self, hash: &str) -> Result<Option<SignalRecord>, SmcError> {
        self.inner.get(hash)
    }

    fn put(&mut self, record: SignalRecord) -> Result<(), SmcError> {
        self.inner.put(record)?;
        self.flush()
    }

    fn remove_seen_before(&mut self, cutoff: DateTime<Utc>) -> Result<usize, SmcError> {
        let removed = self.inner.remove_seen_before(cutoff)?;
        if removed > 0 {
            self.flush()?;
        }
        Ok(removed)
    }

    fn records(&self) -> Result<Vec<SignalRecord>, SmcError> {
        self.inner.records()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DedupVerdict {
    New,
    Duplicate(String),
}

impl DedupVerdict {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DedupVerdict::Duplicate(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TrackerStats {
    pub total_unique_signals: usize,
    pub signals_last_24h: usize,
    pub total_occurrences: u64,
    pub total_sent: u64,
    pub duplicates_prevented: u64,
}

/// Suppresses re-emission of a setup within the cooldown window.
pub struct SignalDeduplicator<S: SignalStore> {
    store: S,
    cooldown: Duration,
}

impl<S: SignalStore> SignalDeduplicator<S> {
    pub fn new(store: S, cooldown_hours: i64) -> Self {
        SignalDeduplicator { store, cooldown: Duration::hours(cooldown_hours) }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Duplicate when the same hash was last sent within the cooldown.
    pub fn check(&self, key: &SignalKey, now: DateTime<Utc>) -> Result<DedupVerdict, SmcError> {
        let Some(record) = self.store.get(&key.hash())? else {
            return Ok(DedupVerdict::New);
        };
        match record.last_sent {
            Some(sent) if now - sent < self.cooldown => {
                let hours_ago = (now - sent).num_seconds() as f64 / 3600.0;
                Ok(DedupVerdict::Duplicate(format!(
                    "Duplicate signal (last sent {hours_ago:.1}h ago, occurrence #{})",
                    record.occurrence_count
                )))
            }
            _ => Ok(DedupVerdict::New),
        }
    }

    pub fn record(&mut self, key: &SignalKey, was_sent: bool, now: DateTime<Utc>) -> Result<(), SmcError> {
        let hash = key.hash();
        let record = match self.store.get(&hash)? {
            Some(mut r) => {
                r.last_seen = now;
                r.occurrence_count += 1;
                if was_sent {
                    r.sent_count += 1;
                    r.last_sent = Some(now);
                }
                r
            }
            None => SignalRecord {
                hash,
                symbol: key.symbol.clone(),
                direction: key.direction,
                entry_price: key.entry_price,
                scenario: key.scenario,
                poi_type: key.poi_type,
                first_seen: now,
                last_seen: now,
                last_sent: was_sent.then_some(now),
                occurrence_count: 1,
                sent_count: u32::from(was_sent),
            },
        };
        self.store.put(record)
    }

    /// Checks, then records the occurrence: as sent when new, as suppressed otherwise.
    pub fn check_and_record(&mut self, key: &SignalKey, now: DateTime<Utc>) -> Result<DedupVerdict, SmcError> {
        let verdict = self.check(key, now)?;
        self.record(key, !verdict.is_duplicate(), now)?;
        Ok(verdict)
    }

    pub fn cleanup_older_than(&mut self, days: i64, now: DateTime<Utc>) -> Result<usize, SmcError> {
        let removed = self.store.remove_seen_before(now - Duration::days(days))?;
        if removed > 0 {
            log::info!("Cleaned up {} old signal records", removed);
        }
        Ok(removed)
    }

    pub fn stats(&self, now: DateTime<Utc>) -> Result<TrackerStats, SmcError> {
        let records = self.store.records()?;
        let day_ago = now - Duration::hours(24);
        let total_occurrences: u64 = records.iter().map(|r| u64::from(r.occurrence_count)).sum();
        let total_sent: u64 = records.iter().map(|r| u64::from(r.sent_count)).sum();
        Ok(TrackerStats {
            total_unique_signals: records.len(),
            signals_last_24h: records.iter().filter(|r| r.last_seen > day_ago).count(),
            total_occurrences,
            total_sent,
            duplicates_prevented: total_occurrences.saturating_sub(total_sent),
        })
    }
}
