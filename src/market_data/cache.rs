// Time-bounded cache of validated price series
use crate::model::PriceSeries;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub lookback_days: u32,
}

impl CacheKey {
    pub fn new(symbol: &str, lookback_days: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            lookback_days,
        }
    }
}

pub trait SeriesCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<PriceSeries>;
    fn put(&self, key: CacheKey, series: PriceSeries);
    fn invalidate(&self, key: &CacheKey);
    /// Drops every expired entry and returns how many were removed.
    fn purge_expired(&self) -> usize;
}

struct CacheEntry {
    series: PriceSeries,
    expires_at: Instant,
}

pub struct InMemorySeriesCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl InMemorySeriesCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_ttl_secs(ttl_secs: u64) -> Self {
        Self::new(Duration::from_secs(ttl_secs))
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SeriesCache for InMemorySeriesCache {
    fn get(&self, key: &CacheKey) -> Option<PriceSeries> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(key)?;
        if Instant::now() < entry.expires_at {
            debug!(symbol = %key.symbol, lookback = key.lookback_days, "Cache hit");
            Some(entry.series.clone())
        } else {
            None
        }
    }

    fn put(&self, key: CacheKey, series: PriceSeries) {
        if self.ttl.is_zero() {
            return;
        }
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(
                    key,
                    CacheEntry {
                        series,
                        expires_at: Instant::now() + self.ttl,
                    },
                );
            }
            Err(_) => warn!("Series cache lock poisoned, skipping insert"),
        }
    }

    fn invalidate(&self, key: &CacheKey) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(key);
        }
    }

    fn purge_expired(&self) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}
