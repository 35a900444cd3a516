pub mod aggregate;
pub mod enrich;

use std::path::PathBuf;
use thiserror::Error;

pub use aggregate::aggregate;
pub use enrich::{enrich, fetch_metadata, render_prompt, CompletionClient, OpenAiClient};

#[derive(Debug, Error)]
pub enum MerchantError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Completion request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Malformed completion response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("No API key: set OPENAI_API_KEY or create {0}")]
    MissingApiKey(PathBuf),
    #[error("Completion response had no choices")]
    EmptyResponse,
    #[error("Gave up after {0} failed completion attempts")]
    RetriesExhausted(u32),
}
