use std::collections::HashMap;

use dropzone_core::{type_of, CellValue, ColumnType};
use sqlx::{Row, SqliteConnection};
use thiserror::Error;

use crate::db::quote_ident;

/// Leading columns every ledger table carries, in order.
pub const HASH_COLUMN: &str = "unique_hash";
pub const TAGS_COLUMN: &str = "Tags";
pub const CREATED_COLUMN: &str = "created";
pub const SYSTEM_COLUMNS: [&str; 3] = [HASH_COLUMN, TAGS_COLUMN, CREATED_COLUMN];

pub const DUPLICATE_TAG: &str = "duplicate";

/// Version recorded for a newly created ledger table.
pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Schema mismatch for account '{account}': columns not in the ledger: {unexpected:?}")]
    SchemaMismatch {
        account: String,
        unexpected: Vec<String>,
    },
    #[error("Stored schema is unreadable: {0}")]
    Json(#[from] serde_json::Error),
}

/// The recorded column layout of one account's ledger table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSchema {
    pub account_id: String,
    pub version: i64,
    /// Account-specific columns, excluding the system columns.
    pub columns: Vec<String>,
}

impl LedgerSchema {
    /// Columns of `incoming` the ledger does not have.
    pub fn unexpected<'a>(&self, incoming: &'a [String]) -> Vec<&'a String> {
        incoming
            .iter()
            .filter(|c| !self.columns.contains(c))
            .collect()
    }
}

/// One row about to be appended.
#[derive(Debug, Clone)]
pub struct LedgerRow<'a> {
    pub unique_hash: &'a str,
    pub tags: &'a str,
    /// Ingestion wall-clock time, epoch seconds.
    pub created: i64,
    pub columns: &'a [String],
    pub values: &'a [CellValue],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerStats {
    pub rows: i64,
    pub distinct_hashes: i64,
}

pub async fn table_exists(conn: &mut SqliteConnection, account_id: &str) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

/// Create the account's table on first use and return its recorded schema.
///
/// An existing table is never altered. A file whose columns are not all
/// present in the stored schema is rejected with [`StoreError::SchemaMismatch`].
pub async fn ensure_table(
    conn: &mut SqliteConnection,
    account_id: &str,
    columns: &[String],
    column_types: &HashMap<String, ColumnType>,
    now: i64,
) -> Result<LedgerSchema, StoreError> {
    let schema = match load_schema(conn, account_id).await? {
        Some(schema) => schema,
        None => create_table(conn, account_id, columns, column_types, now).await?,
    };

    let unexpected = schema.unexpected(columns);
    if !unexpected.is_empty() {
        return Err(StoreError::SchemaMismatch {
            account: account_id.to_string(),
            unexpected: unexpected.into_iter().cloned().collect(),
        });
    }
    Ok(schema)
}

/// Stored schema of an existing table. Tables predating `ledger_schema` are
/// adopted from `PRAGMA table_info` and recorded.
pub async fn load_schema(
    conn: &mut SqliteConnection,
    account_id: &str,
) -> Result<Option<LedgerSchema>, StoreError> {
    if !table_exists(conn, account_id).await? {
        return Ok(None);
    }

    let recorded = sqlx::query_as::<_, (i64, String)>(
        "SELECT version, columns FROM ledger_schema WHERE account_id = ?",
    )
    .bind(account_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((version, columns)) = recorded {
        return Ok(Some(LedgerSchema {
            account_id: account_id.to_string(),
            version,
            columns: serde_json::from_str(&columns)?,
        }));
    }

    let info = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(account_id)))
        .fetch_all(&mut *conn)
        .await?;
    let mut columns = Vec::with_capacity(info.len());
    for row in info {
        let name: String = row.try_get("name")?;
        if !SYSTEM_COLUMNS.contains(&name.as_str()) {
            columns.push(name);
        }
    }
    tracing::info!(account = account_id, columns = columns.len(), "Adopting existing ledger table");

    let schema = LedgerSchema {
        account_id: account_id.to_string(),
        version: SCHEMA_VERSION,
        columns,
    };
    record_schema(conn, &schema, 0).await?;
    Ok(Some(schema))
}

async fn create_table(
    conn: &mut SqliteConnection,
    account_id: &str,
    columns: &[String],
    column_types: &HashMap<String, ColumnType>,
    now: i64,
) -> Result<LedgerSchema, StoreError> {
    let mut definitions = vec![
        format!("{} TEXT", quote_ident(HASH_COLUMN)),
        format!("{} TEXT", quote_ident(TAGS_COLUMN)),
        format!("{} INTEGER", quote_ident(CREATED_COLUMN)),
    ];
    for column in columns {
        definitions.push(format!(
            "{} {}",
            quote_ident(column),
            type_of(column, column_types).sql_type()
        ));
    }

    let sql = format!(
        "CREATE TABLE {} ({})",
        quote_ident(account_id),
        definitions.join(", ")
    );
    sqlx::query(&sql).execute(&mut *conn).await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(&format!("idx_{account_id}_unique_hash")),
        quote_ident(account_id),
        quote_ident(HASH_COLUMN)
    ))
    .execute(&mut *conn)
    .await?;

    let schema = LedgerSchema {
        account_id: account_id.to_string(),
        version: SCHEMA_VERSION,
        columns: columns.to_vec(),
    };
    record_schema(conn, &schema, now).await?;
    tracing::info!(account = account_id, columns = columns.len(), "Created ledger table");
    Ok(schema)
}

async fn record_schema(
    conn: &mut SqliteConnection,
    schema: &LedgerSchema,
    now: i64,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT OR REPLACE INTO ledger_schema (account_id, version, columns, created) VALUES (?, ?, ?, ?)",
    )
    .bind(&schema.account_id)
    .bind(schema.version)
    .bind(serde_json::to_string(&schema.columns)?)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn is_duplicate(
    conn: &mut SqliteConnection,
    account_id: &str,
    unique_hash: &str,
) -> Result<bool, StoreError> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE {} = ? LIMIT 1",
        quote_ident(account_id),
        quote_ident(HASH_COLUMN)
    );
    let row = sqlx::query(&sql)
        .bind(unique_hash)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

/// Append one row. Rows are never updated or deleted.
pub async fn insert_row(
    conn: &mut SqliteConnection,
    account_id: &str,
    row: &LedgerRow<'_>,
) -> Result<(), StoreError> {
    let names: Vec<String> = SYSTEM_COLUMNS
        .iter()
        .copied()
        .chain(row.columns.iter().map(String::as_str))
        .map(quote_ident)
        .collect();
    let placeholders = vec!["?"; names.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(account_id),
        names.join(", "),
        placeholders
    );

    let mut query = sqlx::query(&sql)
        .bind(row.unique_hash)
        .bind(row.tags)
        .bind(row.created);
    for value in row.values {
        query = match value {
            CellValue::Null => query.bind(None::<String>),
            CellValue::Text(s) => query.bind(s.clone()),
            CellValue::Numeric(n) => query.bind(*n),
            CellValue::Epoch(secs) => query.bind(*secs),
        };
    }
    query.execute(&mut *conn).await?;
    Ok(())
}

pub async fn ledger_stats(conn: &mut SqliteConnection, account_id: &str) -> Result<LedgerStats, StoreError> {
    let sql = format!(
        "SELECT COUNT(*), COUNT(DISTINCT {}) FROM {}",
        quote_ident(HASH_COLUMN),
        quote_ident(account_id)
    );
    let (rows, distinct_hashes) = sqlx::query_as::<_, (i64, i64)>(&sql)
        .fetch_one(&mut *conn)
        .await?;
    Ok(LedgerStats { rows, distinct_hashes })
}
