use crate::config::AppConfig;
use crate::market_data::cache::{CacheKey, InMemorySeriesCache, SeriesCache};
use crate::market_data::providers::build_providers;
use crate::market_data::traits::PriceProvider;
use crate::model::{ConfigError, FetchError, PriceBar, PriceSeries, ProviderError};
use crate::normalizer::normalize_symbol;
use crate::retry::{Exhausted, RetryPolicy, retry_with_backoff};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// One in-flight guard per cache key.
type FetchLockMap = RwLock<HashMap<CacheKey, Arc<Mutex<()>>>>;

/// Resolves a symbol to a validated daily series, trying providers in order.
pub struct MarketDataFetcher {
    providers: Vec<Arc<dyn PriceProvider>>,
    cache: Arc<dyn SeriesCache>,
    retry: RetryPolicy,
    max_lookback_days: u32,
    fetch_locks: FetchLockMap,
}

impl MarketDataFetcher {
    pub fn new(
        providers: Vec<Arc<dyn PriceProvider>>,
        cache: Arc<dyn SeriesCache>,
        retry: RetryPolicy,
        max_lookback_days: u32,
    ) -> Self {
        Self {
            providers,
            cache,
            retry,
            max_lookback_days,
            fetch_locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let providers = build_providers(&config.data_providers)?;
        let cache = Arc::new(InMemorySeriesCache::with_ttl_secs(config.cache_ttl_seconds));
        Ok(Self::new(
            providers,
            cache,
            config.retry.clone(),
            config.max_lookback_days,
        ))
    }

    pub fn cache(&self) -> &Arc<dyn SeriesCache> {
        &self.cache
    }

    pub async fn fetch(&self, symbol: &str, lookback_days: u32) -> Result<PriceSeries, FetchError> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(FetchError::InvalidSymbol(symbol));
        }
        if lookback_days == 0 || lookback_days > self.max_lookback_days {
            return Err(FetchError::InvalidWindow {
                requested: lookback_days,
                max: self.max_lookback_days,
            });
        }

        let key = CacheKey::new(&symbol, lookback_days);
        if let Some(series) = self.cache.get(&key) {
            return Ok(series);
        }

        // Parallel requests for the same key wait here and reuse the first result
        let lock = self.get_or_create_lock(&key).await;
        let _guard = lock.lock().await;
        if let Some(series) = self.cache.get(&key) {
            debug!(%symbol, lookback = lookback_days, "Served by a concurrent fetch");
            return Ok(series);
        }

        let mut failures = Vec::with_capacity(self.providers.len());
        let mut not_found = 0;

        for provider in &self.providers {
            match self.fetch_from(provider.as_ref(), &symbol, lookback_days).await {
                Ok(bars) => {
                    let series = PriceSeries {
                        symbol: symbol.clone(),
                        bars,
                        source: provider.id().to_string(),
                    };
                    info!(
                        %symbol,
                        provider = provider.id(),
                        bars = series.len(),
                        "📈 Price series fetched"
                    );
                    let purged = self.cache.purge_expired();
                    if purged > 0 {
                        debug!(purged, "Expired cache entries dropped");
                    }
                    self.cache.put(key, series.clone());
                    return Ok(series);
                }
                Err(e) => {
                    if matches!(e, ProviderError::SymbolNotFound(_)) {
                        not_found += 1;
                    }
                    warn!(%symbol, provider = provider.id(), error = %e, "Provider failed, trying next");
                    failures.push(format!("{}: {}", provider.id(), e));
                }
            }
        }

        if not_found > 0 && not_found == self.providers.len() {
            return Err(FetchError::InvalidSymbol(symbol));
        }
        Err(FetchError::DataUnavailable { symbol, failures })
    }

    async fn get_or_create_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let locks = self.fetch_locks.read().await;
        if let Some(lock) = locks.get(key) {
            return lock.clone();
        }
        drop(locks);

        let mut locks = self.fetch_locks.write().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn fetch_from(
        &self,
        provider: &dyn PriceProvider,
        symbol: &str,
        lookback_days: u32,
    ) -> Result<Vec<PriceBar>, ProviderError> {
        let timeout = self.retry.request_timeout();
        let rows = retry_with_backoff(
            &self.retry,
            provider.id(),
            move |_| async move {
                match tokio::time::timeout(timeout, provider.fetch_raw(symbol, lookback_days)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout),
                }
            },
            ProviderError::is_retryable,
        )
        .await
        .map_err(|Exhausted { error, .. }| error)?;

        let mut bars = validate_rows(rows)?;
        let keep = lookback_days as usize;
        if bars.len() > keep {
            bars.drain(..bars.len() - keep);
        }
        Ok(bars)
    }
}

/// Sorts rows ascending by date and rejects empty sets, repeated dates and
/// non-finite or negative values.
pub fn validate_rows(mut rows: Vec<PriceBar>) -> Result<Vec<PriceBar>, ProviderError> {
    if rows.is_empty() {
        return Err(ProviderError::Empty);
    }
    rows.sort_by_key(|bar| bar.date);
    if let Some(pair) = rows.windows(2).find(|pair| pair[0].date == pair[1].date) {
        return Err(ProviderError::Malformed(format!(
            "duplicate bar for {}",
            pair[1].date
        )));
    }
    if let Some(bad) = rows.iter().find(|bar| !bar.is_valid()) {
        return Err(ProviderError::Malformed(format!(
            "invalid price or volume on {}",
            bad.date
        )));
    }
    Ok(rows)
}
