use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ConfigError;

/// Environment variable that overrides the default configuration path.
pub const CONFIG_ENV: &str = "DROPZONE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "dropzone.toml";

/// Service-level sections of the configuration document. The `accounts`
/// table is read separately, per file, by [`crate::SchemaResolver`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub service: ServiceSettings,
    pub aggregation: AggregationSettings,
    pub enrichment: EnrichmentSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub dropzone: PathBuf,
    pub completed: PathBuf,
    pub database: PathBuf,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            dropzone: PathBuf::from("./dropzone"),
            completed: PathBuf::from("./completed"),
            database: PathBuf::from("./financials.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    /// Program and arguments of the merchant aggregation process.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Run the enrichment stage after a successful aggregation.
    pub enrich: bool,
    pub enrich_command: Vec<String>,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            command: vec!["dropzone-merchant".to_string()],
            timeout_secs: 300,
            enrich: false,
            enrich_command: vec!["dropzone-merchant".to_string(), "enrich".to_string()],
        }
    }
}

impl AggregationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    pub api_key_file: PathBuf,
    pub endpoint: String,
    pub model: String,
    pub batch_size: usize,
    pub retry_limit: u32,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            api_key_file: PathBuf::from("openai_key.txt"),
            endpoint: "https://api.openai.com/v1/completions".to_string(),
            model: "gpt-3.5-turbo-instruct".to_string(),
            batch_size: 3,
            retry_limit: 3,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Config path from an explicit argument, else `DROPZONE_CONFIG`, else the default.
    pub fn locate(explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }
}
