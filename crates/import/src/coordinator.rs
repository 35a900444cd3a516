use std::path::{Path, PathBuf};

use chrono::Utc;
use dropzone_core::{coerce, hash_of, AccountConfig, CellValue, ConfigError, SchemaResolver, Table};
use dropzone_storage::{
    ensure_table, insert_row, is_duplicate, ledger_stats, DbPool, LedgerRow, StoreError,
    DUPLICATE_TAG,
};
use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archive::{move_to_archive, prepare_archive};
use crate::csv::{read_table, ParseError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No account folder for {0}")]
    NoAccount(PathBuf),
}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self {
        IngestError::Store(StoreError::Sqlx(e))
    }
}

/// Outcome counts for one ingested file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub account_id: String,
    pub rows_read: usize,
    pub inserted: usize,
    /// Inserted rows tagged as duplicates (included in `inserted`).
    pub duplicates: usize,
    pub skipped_required: usize,
    pub skipped_ignored: usize,
    pub archived_to: PathBuf,
}

/// Drives one file through resolve → normalize → store → archive.
pub struct Coordinator {
    pool: DbPool,
    resolver: SchemaResolver,
    completed_dir: PathBuf,
}

impl Coordinator {
    pub fn new(pool: DbPool, resolver: SchemaResolver, completed_dir: PathBuf) -> Self {
        Self { pool, resolver, completed_dir }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Ingest a whole file. Any error leaves the file where it is; on success
    /// it has been moved under the archive root.
    pub async fn ingest_file(&self, account_id: &str, path: &Path) -> Result<IngestReport, IngestError> {
        info!(account = account_id, "Processing {}", path.display());

        let config = self.resolver.resolve(account_id)?;
        let table = read_table(path, &config).await?;

        let archive_error = |source| IngestError::Archive { path: path.to_path_buf(), source };

        let mut tx = self.pool.begin().await?;
        let mut report = store_rows(&mut *tx, account_id, &config, &table).await?;

        // An unusable archive root rolls the rows back with the file untouched.
        let dest = prepare_archive(&self.completed_dir, account_id, path)
            .await
            .map_err(archive_error)?;
        tx.commit().await?;

        move_to_archive(path, &dest).await.map_err(archive_error)?;
        report.archived_to = dest;

        info!(
            account = account_id,
            rows = report.rows_read,
            inserted = report.inserted,
            duplicates = report.duplicates,
            skipped = report.skipped_required + report.skipped_ignored,
            "Archived to {}",
            report.archived_to.display()
        );
        Ok(report)
    }
}

/// Write every row of one file on `conn`. The caller owns the transaction.
async fn store_rows(
    conn: &mut SqliteConnection,
    account_id: &str,
    config: &AccountConfig,
    table: &Table,
) -> Result<IngestReport, IngestError> {
    let now = Utc::now().timestamp();

    ensure_table(&mut *conn, account_id, &table.columns, &config.column_types, now).await?;

    let types: Vec<_> = table.columns.iter().map(|c| config.column_type(c)).collect();
    let required: Vec<usize> = config
        .required_columns
        .iter()
        .filter_map(|r| table.columns.iter().position(|c| c == r))
        .collect();

    let mut report = IngestReport {
        account_id: account_id.to_string(),
        rows_read: table.rows.len(),
        ..IngestReport::default()
    };

    for raw in &table.rows {
        let values: Vec<CellValue> = raw
            .iter()
            .zip(&types)
            .map(|(cell, ty)| coerce(cell, *ty))
            .collect();
        let unique_hash = hash_of(account_id, &table.columns, &values, &config.hash_columns);

        if config.ignore_hashes.contains(&unique_hash) {
            debug!(account = account_id, hash = %unique_hash, "Skipping ignored row");
            report.skipped_ignored += 1;
            continue;
        }

        // Checked after hashing so rejected rows still have a stable identity.
        if required.iter().any(|&i| raw[i].trim().is_empty()) {
            warn!(
                account = account_id,
                hash = %unique_hash,
                "Skipping row missing required columns {:?}",
                config.required_columns
            );
            report.skipped_required += 1;
            continue;
        }

        let duplicate = is_duplicate(&mut *conn, account_id, &unique_hash).await?;
        let row = LedgerRow {
            unique_hash: &unique_hash,
            tags: if duplicate { DUPLICATE_TAG } else { "" },
            created: now,
            columns: &table.columns,
            values: &values,
        };
        insert_row(&mut *conn, account_id, &row).await?;

        report.inserted += 1;
        if duplicate {
            report.duplicates += 1;
        }
    }

    let stats = ledger_stats(&mut *conn, account_id).await?;
    debug!(account = account_id, rows = stats.rows, distinct = stats.distinct_hashes, "Ledger totals");

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropzone_storage::create_db;
    use sqlx::Row;

    const CONFIG: &str = r#"
[accounts.checking]
headers = ["date", "amount", "desc"]
column_types = { date = "DATETIME", amount = "NUMERIC" }

[accounts.visa]
header_row = 2
column_types = { Amount = "NUMERIC" }
required_column = ["Amount"]
hash_columns = ["Date", "Amount"]
"#;

    struct Fixture {
        dir: tempfile::TempDir,
        coordinator: Coordinator,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config_path = dir.path().join("dropzone.toml");
            std::fs::write(&config_path, CONFIG).unwrap();
            let pool = create_db(&dir.path().join("financials.db")).await.unwrap();
            let coordinator = Coordinator::new(
                pool,
                SchemaResolver::new(config_path),
                dir.path().join("completed"),
            );
            Self { dir, coordinator }
        }

        fn drop_file(&self, account: &str, name: &str, content: &str) -> PathBuf {
            let dir = self.dir.path().join("dropzone").join(account);
            std::fs::create_dir_all(&dir).unwrap();
            let path = dir.join(name);
            std::fs::write(&path, content).unwrap();
            path
        }

        async fn tags(&self, account: &str) -> Vec<String> {
            sqlx::query(&format!("SELECT \"Tags\" FROM \"{account}\" ORDER BY rowid"))
                .fetch_all(self.coordinator.pool())
                .await
                .unwrap()
                .iter()
                .map(|r| r.get::<String, _>(0))
                .collect()
        }
    }

    const CHECKING_CSV: &str = "03/15/2023,$42.50,coffee\n07/04/2023,\"1,200.00\",rent\n";

    #[tokio::test]
    async fn checking_scenario_creates_table_and_tags_reingestion() {
        let fx = Fixture::new().await;

        let path = fx.drop_file("checking", "march.csv", CHECKING_CSV);
        let report = fx.coordinator.ingest_file("checking", &path).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.duplicates, 0);
        assert!(!path.exists());
        assert!(report.archived_to.exists());

        let info = sqlx::query("PRAGMA table_info(\"checking\")")
            .fetch_all(fx.coordinator.pool())
            .await
            .unwrap();
        let names: Vec<String> = info.iter().map(|r| r.get::<String, _>("name")).collect();
        assert_eq!(names, vec!["unique_hash", "Tags", "created", "date", "amount", "desc"]);
        assert_eq!(fx.tags("checking").await, vec!["", ""]);

        let path = fx.drop_file("checking", "march.csv", CHECKING_CSV);
        let report = fx.coordinator.ingest_file("checking", &path).await.unwrap();
        assert_eq!(report.duplicates, 2);
        assert_eq!(fx.tags("checking").await, vec!["", "", "duplicate", "duplicate"]);

        let (rows, distinct): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COUNT(DISTINCT unique_hash) FROM \"checking\"")
                .fetch_one(fx.coordinator.pool())
                .await
                .unwrap();
        assert_eq!((rows, distinct), (4, 2));

        let (date, amount): (i64, f64) =
            sqlx::query_as("SELECT date, amount FROM \"checking\" WHERE \"desc\" = 'coffee' LIMIT 1")
                .fetch_one(fx.coordinator.pool())
                .await
                .unwrap();
        assert_eq!(date, 1_678_856_400);
        assert_eq!(amount, 42.5);
    }

    #[tokio::test]
    async fn required_columns_and_header_row() {
        let fx = Fixture::new().await;
        let csv = "Statement,2023\nDate,Payee,Amount\n2023-01-02,ACME,10.00\n2023-01-03,BOLT,\n2023-01-02,ACME,10.00\n";
        let path = fx.drop_file("visa", "jan.csv", csv);

        let report = fx.coordinator.ingest_file("visa", &path).await.unwrap();
        assert_eq!(report.rows_read, 3);
        assert_eq!(report.skipped_required, 1);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(fx.tags("visa").await, vec!["", "duplicate"]);
    }

    #[tokio::test]
    async fn ignored_hashes_are_never_stored() {
        let fx = Fixture::new().await;
        let values = vec![
            CellValue::Text("2023-01-02".into()),
            CellValue::Numeric(10.0),
        ];
        let ignored = hash_of(
            "visa",
            &["Date".to_string(), "Amount".to_string()],
            &values,
            &["Date".to_string(), "Amount".to_string()],
        );
        let mut config = std::fs::read_to_string(fx.coordinator.resolver.path()).unwrap();
        config.push_str(&format!("ignore_hash = [\"{ignored}\"]\n"));
        std::fs::write(fx.coordinator.resolver.path(), config).unwrap();

        let csv = "junk\nDate,Payee,Amount\n2023-01-02,ACME,10.00\n2023-01-05,BOLT,3\n";
        let path = fx.drop_file("visa", "jan.csv", csv);
        let report = fx.coordinator.ingest_file("visa", &path).await.unwrap();
        assert_eq!(report.skipped_ignored, 1);
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn unknown_account_uses_first_row_as_header() {
        let fx = Fixture::new().await;
        let path = fx.drop_file("savings", "a.csv", "When,What\nmonday,deposit\n");
        let report = fx.coordinator.ingest_file("savings", &path).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(fx.tags("savings").await, vec![""]);
    }

    #[tokio::test]
    async fn failed_file_stays_in_dropzone() {
        let fx = Fixture::new().await;
        let path = fx.drop_file("checking", "bad.csv", "1,2,3,4\n");
        let err = fx.coordinator.ingest_file("checking", &path).await.unwrap_err();
        assert!(matches!(err, IngestError::Parse(ParseError::Header(_))));
        assert!(path.exists());
        assert!(!fx.dir.path().join("completed").join("checking").exists());
    }

    #[tokio::test]
    async fn schema_mismatch_rejects_file_without_writing() {
        let fx = Fixture::new().await;
        let first = fx.drop_file("savings", "a.csv", "When,What\nmonday,deposit\n");
        fx.coordinator.ingest_file("savings", &first).await.unwrap();

        let second = fx.drop_file("savings", "b.csv", "When,What,Extra\ntuesday,fee,x\n");
        let err = fx.coordinator.ingest_file("savings", &second).await.unwrap_err();
        assert!(matches!(err, IngestError::Store(StoreError::SchemaMismatch { .. })));
        assert!(second.exists());
        assert_eq!(fx.tags("savings").await.len(), 1);
    }

    #[tokio::test]
    async fn malformed_config_fails_only_that_file() {
        let fx = Fixture::new().await;
        std::fs::write(fx.coordinator.resolver.path(), "[accounts.checking\n").unwrap();
        let path = fx.drop_file("checking", "x.csv", CHECKING_CSV);
        let err = fx.coordinator.ingest_file("checking", &path).await.unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn unusable_archive_root_stores_nothing() {
        let fx = Fixture::new().await;
        let completed = fx.dir.path().join("completed");
        std::fs::write(&completed, "not a directory").unwrap();

        let path = fx.drop_file("checking", "march.csv", CHECKING_CSV);
        let err = fx.coordinator.ingest_file("checking", &path).await.unwrap_err();
        assert!(matches!(err, IngestError::Archive { .. }));
        assert!(path.exists());

        let (tables,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'checking'")
                .fetch_one(fx.coordinator.pool())
                .await
                .unwrap();
        assert_eq!(tables, 0);

        std::fs::remove_file(&completed).unwrap();
        let report = fx.coordinator.ingest_file("checking", &path).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.duplicates, 0);
        assert_eq!(fx.tags("checking").await, vec!["", ""]);
    }

    #[tokio::test]
    async fn unparseable_cells_are_stored_as_null() {
        let fx = Fixture::new().await;
        let path = fx.drop_file("checking", "odd.csv", "someday,n/a,coffee
03/15/2023,12.00,tea
");

        let report = fx.coordinator.ingest_file("checking", &path).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert!(!path.exists());
        assert!(report.archived_to.exists());

        let (date, amount): (Option<i64>, Option<f64>) =
            sqlx::query_as("SELECT date, amount FROM \"checking\" WHERE \"desc\" = 'coffee'")
                .fetch_one(fx.coordinator.pool())
                .await
                .unwrap();
        assert!(date.is_none());
        assert!(amount.is_none());
    }
}
