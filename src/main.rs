use quant_scout::config::{AppConfig, load_config};
use quant_scout::orchestrator::AnalysisOrchestrator;
use quant_scout::storage::{ReportStore, SqliteReportStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "QUANT_SCOUT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.json";

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let loaded = load_config(&config_path);

    // Initialize logging
    let level = loaded
        .as_ref()
        .map(|cfg| cfg.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(&level);

    // Set panic hook to log details about any panic
    std::panic::set_hook(Box::new(|panic_info| {
        error!("😱 Panic occurred: {}", panic_info);
    }));

    let config: Arc<AppConfig> = match loaded {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!(path = %config_path, "Config load error: {}", e);
            return;
        }
    };

    // Initialize storage (SQLite); analyses still run without it
    let store: Option<Arc<dyn ReportStore>> = match SqliteReportStore::new(&config.database_path) {
        Ok(s) => Some(Arc::new(s) as Arc<dyn ReportStore>),
        Err(e) => {
            warn!("Failed to initialize storage, reports will not be saved: {}", e);
            None
        }
    };

    let orchestrator = match AnalysisOrchestrator::from_config(&config, store) {
        Ok(o) => o,
        Err(e) => {
            error!("Failed to build analysis pipeline: {}", e);
            return;
        }
    };

    let symbols: Vec<String> = {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if args.is_empty() {
            config.instruments.iter().map(|i| i.symbol.clone()).collect()
        } else {
            args
        }
    };
    if symbols.is_empty() {
        warn!("No symbols given and the instrument pool is empty; nothing to analyze");
        return;
    }

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, cancelling analyses...");
            ctrl_c_token.cancel();
        }
    });

    info!("🚀 quant-scout started: {} symbol(s) to analyze", symbols.len());
    let results = orchestrator.run_batch(&symbols, &token).await;

    let mut failed = 0;
    for (symbol, result) in &results {
        match result {
            Ok(report) => info!(
                "📊 {} ({}) score {:.0} -> {} | trend: {} | {}",
                report.symbol,
                report.name,
                report.verdict.score,
                report.verdict.recommendation,
                report.indicators.trend.label(),
                report.verdict.rationale
            ),
            Err(e) => {
                failed += 1;
                warn!("{}: {}", symbol, e);
            }
        }
    }
    info!(
        "Finished: {} succeeded, {} failed",
        results.len() - failed,
        failed
    );
}
