use crate::model::{AnalysisReport, StorageError};
use crate::storage::{ReportStore, StoredReport};
use rusqlite::{Connection, Row, params};
use tokio::sync::Mutex;
use tracing::debug;

pub struct SqliteReportStore {
    conn: Mutex<Connection>,
}

impl SqliteReportStore {
    /// Opens the database and applies migrations.
    pub fn new(db_path: &str) -> Result<Self, StorageError> {
        Self::init(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS analysis_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                analysis_type TEXT NOT NULL,
                results TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            ",
        )?;

        // Columns added after the first schema; older databases get them on open
        Self::migrate_add_column_if_missing(&conn, "analysis_history", "symbol", "TEXT NOT NULL DEFAULT ''")?;
        Self::migrate_add_column_if_missing(&conn, "analysis_history", "owner", "TEXT NOT NULL DEFAULT ''")?;
        Self::migrate_add_column_if_missing(&conn, "analysis_history", "score", "REAL")?;
        Self::migrate_add_column_if_missing(&conn, "analysis_history", "recommendation", "TEXT")?;

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_analysis_history_symbol
                ON analysis_history (symbol, created_at);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Adds the column when the table does not have it yet.
    fn migrate_add_column_if_missing(
        conn: &Connection,
        table: &str,
        column: &str,
        column_def: &str,
    ) -> Result<(), StorageError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let existing_columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;

        if !existing_columns.iter().any(|c| c == column) {
            let alter_sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_def);
            conn.execute(&alter_sql, [])?;
        }

        Ok(())
    }

    /// Newest reports first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<StoredReport>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, owner, results FROM analysis_history
             ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::map_row)?;
        Self::collect_reports(rows)
    }

    pub async fn recent_for_symbol(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<StoredReport>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, owner, results FROM analysis_history
             WHERE symbol = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![symbol, limit as i64], Self::map_row)?;
        Self::collect_reports(rows)
    }

    fn map_row(row: &Row) -> Result<(i64, String, String), rusqlite::Error> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    }

    fn collect_reports(
        rows: impl Iterator<Item = Result<(i64, String, String), rusqlite::Error>>,
    ) -> Result<Vec<StoredReport>, StorageError> {
        let mut reports = Vec::new();
        for row in rows {
            let (id, owner, results) = row?;
            let report: AnalysisReport = serde_json::from_str(&results)?;
            reports.push(StoredReport { id, owner, report });
        }
        Ok(reports)
    }
}

#[async_trait::async_trait]
impl ReportStore for SqliteReportStore {
    async fn save(&self, report: &AnalysisReport, owner: &str) -> Result<(), StorageError> {
        let results = serde_json::to_string(report)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO analysis_history (
                analysis_type, results, created_at, symbol, owner, score, recommendation
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                report.kind.to_string(),
                &results,
                report.timestamp.to_rfc3339(),
                &report.symbol,
                owner,
                report.verdict.score,
                report.verdict.recommendation.to_string(),
            ],
        )?;
        debug!(symbol = %report.symbol, %owner, "Analysis report stored");
        Ok(())
    }
}
