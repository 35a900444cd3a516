use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Account '{0}': header_row is 1-based and must be at least 1")]
    InvalidHeaderRow(String),
}

/// Declared type of a CSV column. Columns without a declaration are `Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ColumnType {
    #[default]
    Text,
    Numeric,
    Datetime,
}

impl ColumnType {
    /// SQLite storage type. Datetimes are stored as epoch seconds.
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Numeric => "NUMERIC",
            ColumnType::Datetime => "INTEGER",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Text => write!(f, "TEXT"),
            ColumnType::Numeric => write!(f, "NUMERIC"),
            ColumnType::Datetime => write!(f, "DATETIME"),
        }
    }
}

impl std::str::FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TEXT" => Ok(ColumnType::Text),
            "NUMERIC" => Ok(ColumnType::Numeric),
            "DATETIME" => Ok(ColumnType::Datetime),
            other => Err(format!("Unknown column type: '{other}'")),
        }
    }
}

impl TryFrom<String> for ColumnType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Per-account ingestion settings, one `[accounts.<id>]` table in the config document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// 1-based row holding the column names. Ignored when `headers` is set.
    pub header_row: usize,
    pub headers: Option<Vec<String>>,
    pub column_types: HashMap<String, ColumnType>,
    #[serde(rename = "required_column")]
    pub required_columns: Vec<String>,
    /// Ordered subset of columns that identify a row. Empty means every column.
    pub hash_columns: Vec<String>,
    #[serde(rename = "ignore_hash")]
    pub ignore_hashes: HashSet<String>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            header_row: 1,
            headers: None,
            column_types: HashMap::new(),
            required_columns: Vec::new(),
            hash_columns: Vec::new(),
            ignore_hashes: HashSet::new(),
        }
    }
}

impl AccountConfig {
    /// Explicit column names, if configured. An empty list counts as unset.
    pub fn explicit_headers(&self) -> Option<&[String]> {
        self.headers.as_deref().filter(|h| !h.is_empty())
    }

    pub fn column_type(&self, column: &str) -> ColumnType {
        crate::normalize::type_of(column, &self.column_types)
    }
}

#[derive(Debug, Default, Deserialize)]
struct AccountsDocument {
    #[serde(default)]
    accounts: HashMap<String, AccountConfig>,
}

/// Looks up account settings in the configuration document.
///
/// The document is re-read on every call so edits apply to the next file
/// without restarting the watcher.
#[derive(Debug, Clone)]
pub struct SchemaResolver {
    path: PathBuf,
}

impl SchemaResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn resolve(&self, account_id: &str) -> Result<AccountConfig, ConfigError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        resolve_from_str(&content, account_id).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: self.path.clone(),
                source,
            },
            other => other,
        })
    }
}

/// Resolve an account from an in-memory document. Unknown accounts get the defaults.
pub fn resolve_from_str(content: &str, account_id: &str) -> Result<AccountConfig, ConfigError> {
    let mut doc: AccountsDocument = toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: PathBuf::new(),
        source,
    })?;
    let config = doc.accounts.remove(account_id).unwrap_or_default();
    if config.header_row == 0 {
        return Err(ConfigError::InvalidHeaderRow(account_id.to_string()));
    }
    Ok(config)
}
