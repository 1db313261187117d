pub mod analyzer;
pub mod config;
pub mod llm;
pub mod market_data;
pub mod model;
pub mod normalizer;
pub mod orchestrator;
pub mod retry;
pub mod storage;
pub mod utils;

pub use config::{AppConfig, load_config};
pub use orchestrator::{AnalysisOrchestrator, AnalysisStage};
