use crate::model::{PriceBar, ProviderError};

/// One upstream source of daily bars. Rows may come back in any order;
/// the fetcher sorts and validates them.
#[async_trait::async_trait]
pub trait PriceProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn fetch_raw(&self, symbol: &str, lookback_days: u32)
    -> Result<Vec<PriceBar>, ProviderError>;
}
