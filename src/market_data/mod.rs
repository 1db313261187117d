// Market data module: providers, cache and the multi-source fetcher.

pub mod cache;
pub mod fetcher;
pub mod providers;
pub mod traits;

pub use cache::{CacheKey, InMemorySeriesCache, SeriesCache};
pub use fetcher::MarketDataFetcher;
pub use traits::PriceProvider;
