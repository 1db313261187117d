// Storage module: persistence of finished analysis reports.

pub mod sqlite;

pub use sqlite::SqliteReportStore;

use crate::model::{AnalysisReport, StorageError};

/// Persistence collaborator of the orchestrator.
#[async_trait::async_trait]
pub trait ReportStore: Send + Sync {
    async fn save(&self, report: &AnalysisReport, owner: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredReport {
    pub id: i64,
    pub owner: String,
    pub report: AnalysisReport,
}
