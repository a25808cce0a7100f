//! SQLite-backed record store.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, Row};
use tracing::{debug, info};

use crate::model::{decode_risk_factors, encode_risk_factors, VulnerabilityRecord};
use crate::traits::{PersistenceError, QueryField, RecordStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vulnerabilities (
    id TEXT PRIMARY KEY NOT NULL,
    severity TEXT,
    cvss REAL,
    status TEXT,
    package_name TEXT,
    current_version TEXT,
    fixed_version TEXT,
    description TEXT,
    published_date TEXT,
    link TEXT,
    risk_factors TEXT,
    source_file TEXT,
    scan_time TEXT,
    scan_id TEXT,
    resource_type TEXT,
    resource_name TEXT
);
CREATE INDEX IF NOT EXISTS idx_vulnerabilities_severity ON vulnerabilities (severity);
"#;

const COLUMNS: &str = "id, severity, cvss, status, package_name, current_version, fixed_version, \
     description, published_date, link, risk_factors, source_file, scan_time, scan_id, \
     resource_type, resource_name";

/// One SQLite connection shared by every worker.
///
/// Calls are serialized by the mutex and run on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and initializes the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                PersistenceError::Unavailable(format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        info!(path = %path.display(), "Opened vulnerability database");
        Self::with_connection(conn)
    }

    /// Creates a private in-memory database.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Number of stored rows.
    pub async fn count(&self) -> Result<usize, PersistenceError> {
        self.with_db(|conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM vulnerabilities", [], |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_db<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|e| {
                PersistenceError::Unavailable(format!("Failed to acquire database lock: {}", e))
            })?;
            f(&conn)
        })
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))?
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<VulnerabilityRecord> {
    let text = |idx: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
    };

    Ok(VulnerabilityRecord {
        id: text(0)?,
        severity: text(1)?,
        cvss_score: row.get::<_, Option<f64>>(2)?,
        status: text(3)?,
        package_name: text(4)?,
        current_version: text(5)?,
        fixed_version: text(6)?,
        description: text(7)?,
        published_date: text(8)?,
        link: text(9)?,
        risk_factors: decode_risk_factors(row.get::<_, Option<String>>(10)?.as_deref()),
        source_file: text(11)?,
        scan_time: text(12)?,
        scan_id: text(13)?,
        resource_type: text(14)?,
        resource_name: text(15)?,
    })
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert_if_absent(&self, record: &VulnerabilityRecord) -> Result<(), PersistenceError> {
        let record = record.clone();
        self.with_db(move |conn| {
            let inserted = conn.execute(
                &format!(
                    "INSERT INTO vulnerabilities ({}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, \
                     ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16) \
                     ON CONFLICT(id) DO NOTHING",
                    COLUMNS
                ),
                params![
                    record.id,
                    record.severity,
                    record.cvss_score,
                    record.status,
                    record.package_name,
                    record.current_version,
                    record.fixed_version,
                    record.description,
                    record.published_date,
                    record.link,
                    encode_risk_factors(&record.risk_factors),
                    record.source_file,
                    record.scan_time,
                    record.scan_id,
                    record.resource_type,
                    record.resource_name,
                ],
            )?;
            if inserted == 0 {
                debug!(id = %record.id, "Record already present");
            }
            Ok(())
        })
        .await
    }

    async fn query_by_field(
        &self,
        field: QueryField,
        value: &str,
    ) -> Result<Vec<VulnerabilityRecord>, PersistenceError> {
        let value = value.to_string();
        self.with_db(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM vulnerabilities WHERE {} = ?1 ORDER BY id",
                COLUMNS,
                field.column()
            ))?;
            let rows = stmt.query_map(params![value], record_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}
