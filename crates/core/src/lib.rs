pub mod config;
pub mod hash;
pub mod normalize;
pub mod settings;

pub use config::{resolve_from_str, AccountConfig, ColumnType, ConfigError, SchemaResolver};
pub use hash::{hash_of, sha256_hex};
pub use normalize::{coerce, normalize_header, type_of, CellValue, HeaderError, Table};
pub use settings::{AggregationSettings, EnrichmentSettings, ServiceSettings, Settings};
