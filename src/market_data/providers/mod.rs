pub mod eastmoney;
pub mod yahoo;

pub use eastmoney::EastmoneyProvider;
pub use yahoo::YahooProvider;

use crate::config::DataProviderConfig;
use crate::market_data::traits::PriceProvider;
use crate::model::ConfigError;
use crate::utils::random_user_agent;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 15;

fn http_client(timeout_secs: Option<u64>) -> Result<Client, ConfigError> {
    Client::builder()
        .user_agent(random_user_agent())
        .timeout(Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)))
        .build()
        .map_err(|e| ConfigError::Invalid(format!("cannot build HTTP client: {}", e)))
}

/// Instantiates providers in configured order.
pub fn build_providers(
    configs: &[DataProviderConfig],
) -> Result<Vec<Arc<dyn PriceProvider>>, ConfigError> {
    configs
        .iter()
        .map(|cfg| {
            let client = http_client(cfg.timeout_secs)?;
            let base_url = cfg.base_url.as_deref();
            let provider: Arc<dyn PriceProvider> = match cfg.kind.to_ascii_lowercase().as_str() {
                "eastmoney" => Arc::new(EastmoneyProvider::new(client, base_url)),
                "yahoo" => Arc::new(YahooProvider::new(client, base_url)),
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "unknown data provider kind: {}",
                        other
                    )));
                }
            };
            Ok(provider)
        })
        .collect()
}
