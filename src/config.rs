use crate::analyzer::IndicatorConfig;
use crate::llm::ProviderProfile;
use crate::model::{ConfigError, InstrumentMeta};
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::fs;

/// One entry of the ordered market data provider list.
#[derive(Debug, Clone, Deserialize)]
pub struct DataProviderConfig {
    pub kind: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl DataProviderConfig {
    pub fn of_kind(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            base_url: None,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Explicit profile id; when absent the profile is inferred from `base_url`.
    pub provider: Option<String>,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub retry: RetryPolicy,
    /// Extra provider profiles registered next to the built-in ones.
    pub profiles: Vec<ProviderProfile>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            base_url: String::new(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            retry: RetryPolicy {
                request_timeout_secs: 60,
                ..RetryPolicy::default()
            },
            profiles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default = "default_data_providers")]
    pub data_providers: Vec<DataProviderConfig>,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_max_lookback_days")]
    pub max_lookback_days: u32,
    #[serde(default = "default_max_concurrent_analyses")]
    pub max_concurrent_analyses: usize,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub instruments: Vec<InstrumentMeta>,
}

fn default_data_providers() -> Vec<DataProviderConfig> {
    vec![
        DataProviderConfig::of_kind("eastmoney"),
        DataProviderConfig::of_kind("yahoo"),
    ]
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

fn default_lookback_days() -> u32 {
    90
}

fn default_max_lookback_days() -> u32 {
    250
}

fn default_max_concurrent_analyses() -> usize {
    4
}

fn default_database_path() -> String {
    "data.db".to_string()
}

fn default_owner() -> String {
    "default".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            data_providers: default_data_providers(),
            indicators: IndicatorConfig::default(),
            retry: RetryPolicy::default(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            lookback_days: default_lookback_days(),
            max_lookback_days: default_max_lookback_days(),
            max_concurrent_analyses: default_max_concurrent_analyses(),
            database_path: default_database_path(),
            owner: default_owner(),
            log_level: default_log_level(),
            instruments: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Environment variables win over the file: LLM_API_BASE, LLM_API_KEY,
    /// LLM_MODEL_NAME, LLM_PROVIDER, CACHE_EXPIRE_SECONDS.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LLM_API_BASE").filter(|v| !v.trim().is_empty()) {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("LLM_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.llm.api_key = v;
        }
        if let Some(v) = lookup("LLM_MODEL_NAME").filter(|v| !v.trim().is_empty()) {
            self.llm.model = v;
        }
        if let Some(v) = lookup("LLM_PROVIDER").filter(|v| !v.trim().is_empty()) {
            self.llm.provider = Some(v);
        }
        if let Some(ttl) = lookup("CACHE_EXPIRE_SECONDS").and_then(|v| v.trim().parse().ok()) {
            self.cache_ttl_seconds = ttl;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_providers.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one data provider is required".into(),
            ));
        }
        if self.max_lookback_days == 0 {
            return Err(ConfigError::Invalid("max_lookback_days must be > 0".into()));
        }
        if self.lookback_days == 0 || self.lookback_days > self.max_lookback_days {
            return Err(ConfigError::Invalid(format!(
                "lookback_days must be in 1..={}",
                self.max_lookback_days
            )));
        }
        if self.max_concurrent_analyses == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_analyses must be > 0".into(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.model must not be empty".into()));
        }
        self.indicators
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let required = self.indicators.required_window();
        if (self.lookback_days as usize) < required {
            return Err(ConfigError::Invalid(format!(
                "lookback_days {} is shorter than the {} bars the indicators need",
                self.lookback_days, required
            )));
        }
        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_json::from_str(content)?;
    Ok(config)
}

pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
