// Analyzer module: technical indicator math, signal summaries and the snapshot engine.

pub mod engine;
pub mod market_indicators;
pub mod signals;

// Re-export the engine for ease of use.
pub use engine::{IndicatorConfig, IndicatorEngine, compute};
pub use market_indicators::moving_averages;
