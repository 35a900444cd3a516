use std::path::Path;
use std::time::Duration;

use dropzone_core::EnrichmentSettings;
use dropzone_storage::{apply_metadata, merchants_without_metadata, DbPool, MerchantMetadata};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::MerchantError;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const MAX_TOKENS: u32 = 1024;

pub const PROMPT_TEMPLATE: &str = r#"I will provide a list of merchant names. You will respond with a JSON array of objects, each object containing the following keys:
- merchant (this value must exactly match the input value for merchant)
- city
- region (state if in the USA)
- country
- phone_number
- URL
- gpt_category (an inferred budget category based on the merchant's information)

Use an empty string ("") for any values you cannot reasonably infer. This response is for data integration, so the JSON structure must be clean, consistent, and without any introductory or concluding text.

MERCHANTS:
{data}"#;

pub fn render_prompt(merchants: &[String]) -> String {
    PROMPT_TEMPLATE.replace("{data}", &merchants.join("\n"))
}

/// A text-completion service.
#[allow(async_fn_in_trait)]
pub trait CompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, MerchantError>;
}

/// Completion client for an OpenAI-compatible `/v1/completions` endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    /// Build a client from settings. The key comes from `OPENAI_API_KEY`,
    /// falling back to `api_key_file`.
    pub fn from_settings(settings: &EnrichmentSettings) -> Result<Self, MerchantError> {
        let api_key = match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ => read_key_file(&settings.api_key_file)?,
        };
        Ok(Self::new(settings.endpoint.clone(), settings.model.clone(), api_key))
    }
}

fn read_key_file(path: &Path) -> Result<String, MerchantError> {
    let key = std::fs::read_to_string(path).map_err(|_| MerchantError::MissingApiKey(path.to_path_buf()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(MerchantError::MissingApiKey(path.to_path_buf()));
    }
    Ok(key.to_string())
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    text: String,
}

impl CompletionClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String, MerchantError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": MAX_TOKENS,
            "temperature": 0,
        });
        let response: CompletionResponse = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .ok_or(MerchantError::EmptyResponse)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MerchantReply {
    merchant: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    phone_number: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
    gpt_category: Option<String>,
}

fn field(value: Option<String>) -> String {
    value.map(|s| s.trim().to_string()).unwrap_or_default()
}

impl From<MerchantReply> for MerchantMetadata {
    fn from(reply: MerchantReply) -> Self {
        Self {
            merchant_id: field(reply.merchant),
            city: field(reply.city),
            region: field(reply.region),
            country: field(reply.country),
            phone_number: field(reply.phone_number),
            url: field(reply.url),
            category: field(reply.gpt_category),
        }
    }
}

fn is_complete_array(text: &str) -> bool {
    text.starts_with('[') && text.ends_with(']')
}

/// Ask the completion service for metadata on `merchants`.
///
/// A truncated reply drops the last merchant and asks again without using up
/// a retry. Transport and decode failures each use one of `retry_limit`
/// retries. An emptied batch yields no metadata.
pub async fn fetch_metadata<C: CompletionClient>(
    client: &C,
    merchants: &[String],
    retry_limit: u32,
) -> Result<Vec<MerchantMetadata>, MerchantError> {
    let mut batch = merchants.to_vec();
    let mut retries = retry_limit;

    while retries > 0 {
        if batch.is_empty() {
            warn!("Every reply was truncated, giving up on this batch");
            return Ok(Vec::new());
        }

        debug!(merchants = batch.len(), "Requesting merchant metadata");
        let text = match client.complete(&render_prompt(&batch)).await {
            Ok(text) => text,
            Err(e) => {
                retries -= 1;
                warn!(retries, "Completion request failed: {e}");
                continue;
            }
        };

        let text = text.trim();
        if !is_complete_array(text) {
            batch.pop();
            debug!(merchants = batch.len(), "Reply truncated, shrinking batch");
            continue;
        }

        match serde_json::from_str::<Vec<MerchantReply>>(text) {
            Ok(replies) => return Ok(replies.into_iter().map(MerchantMetadata::from).collect()),
            Err(e) => {
                retries -= 1;
                warn!(retries, "Could not decode reply: {e}");
            }
        }
    }

    Err(MerchantError::RetriesExhausted(retry_limit))
}

/// Enrich one batch of merchants that have no location metadata yet.
/// Returns the number of merchant rows updated.
pub async fn enrich<C: CompletionClient>(
    pool: &DbPool,
    client: &C,
    settings: &EnrichmentSettings,
) -> Result<usize, MerchantError> {
    let merchants = merchants_without_metadata(pool, settings.batch_size).await?;
    if merchants.is_empty() {
        info!("No merchants without metadata");
        return Ok(0);
    }
    info!(merchants = merchants.len(), "Enriching merchants");

    let metadata = fetch_metadata(client, &merchants, settings.retry_limit).await?;
    let mut updated = 0;
    for meta in &metadata {
        if meta.merchant_id.is_empty() {
            continue;
        }
        if apply_metadata(pool, meta).await? {
            updated += 1;
        } else {
            debug!(merchant = %meta.merchant_id, "Skipped, unknown or already enriched");
        }
    }
    info!(updated, "Merchant enrichment written");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropzone_storage::{create_db, upsert_tx_categories};
    use std::cell::RefCell;
    use std::collections::{BTreeMap, VecDeque};

    /// Replies from a fixed script and records each prompt.
    struct ScriptedClient {
        replies: RefCell<VecDeque<Result<String, MerchantError>>>,
        prompts: RefCell<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String, MerchantError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                prompts: RefCell::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.borrow().clone()
        }
    }

    impl CompletionClient for ScriptedClient {
        async fn complete(&self, prompt: &str) -> Result<String, MerchantError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or(Err(MerchantError::EmptyResponse))
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn prompt_lists_merchants_one_per_line() {
        let prompt = render_prompt(&names(&["ACME", "BOLT"]));
        assert!(prompt.ends_with("MERCHANTS:\nACME\nBOLT"));
        assert!(prompt.contains("- gpt_category"));
    }

    #[tokio::test]
    async fn reply_fields_are_trimmed_and_defaulted() {
        let client = ScriptedClient::new(vec![Ok(
            r#" [{"merchant": " ACME ", "city": "Boston", "URL": "acme.com", "gpt_category": "Food"}] "#.into(),
        )]);
        let metadata = fetch_metadata(&client, &names(&["ACME"]), 3).await.unwrap();

        assert_eq!(
            metadata,
            vec![MerchantMetadata {
                merchant_id: "ACME".into(),
                city: "Boston".into(),
                url: "acme.com".into(),
                category: "Food".into(),
                ..Default::default()
            }]
        );
    }

    #[tokio::test]
    async fn truncated_reply_shrinks_batch_without_using_a_retry() {
        let client = ScriptedClient::new(vec![
            Ok(r#"[{"merchant": "A"}, {"merch"#.into()),
            Ok(r#"[{"merchant": "A"}, {"mer"#.into()),
            Ok(r#"[{"merchant": "A"}]"#.into()),
        ]);
        let metadata = fetch_metadata(&client, &names(&["A", "B", "C"]), 1).await.unwrap();

        assert_eq!(metadata.len(), 1);
        let prompts = client.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].ends_with("A\nB\nC"));
        assert!(prompts[1].ends_with("A\nB"));
        assert!(prompts[2].ends_with("MERCHANTS:\nA"));
    }

    #[tokio::test]
    async fn decode_and_transport_errors_use_retries() {
        let client = ScriptedClient::new(vec![
            Err(MerchantError::EmptyResponse),
            Ok("[not json]".into()),
            Ok(r#"[{"merchant": "A", "country": "US"}]"#.into()),
        ]);
        let metadata = fetch_metadata(&client, &names(&["A"]), 3).await.unwrap();
        assert_eq!(metadata[0].country, "US");

        let failing = ScriptedClient::new(vec![Ok("[oops]".into()), Ok("[oops]".into())]);
        assert!(matches!(
            fetch_metadata(&failing, &names(&["A"]), 2).await,
            Err(MerchantError::RetriesExhausted(2))
        ));
        assert_eq!(failing.prompts().len(), 2);
    }

    #[tokio::test]
    async fn emptied_batch_stops() {
        let client = ScriptedClient::new(vec![Ok("[{".into()), Ok("[{".into())]);
        let metadata = fetch_metadata(&client, &names(&["A", "B"]), 3).await.unwrap();
        assert!(metadata.is_empty());
        assert_eq!(client.prompts().len(), 2);
    }

    #[tokio::test]
    async fn enrich_updates_only_bare_merchants() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("financials.db")).await.unwrap();
        let merchants: BTreeMap<String, String> = [("ACME", "Food"), ("BOLT", "Travel")]
            .into_iter()
            .map(|(m, c)| (m.to_string(), c.to_string()))
            .collect();
        upsert_tx_categories(&pool, &merchants).await.unwrap();

        let settings = EnrichmentSettings { batch_size: 5, ..Default::default() };
        let client = ScriptedClient::new(vec![Ok(r#"[
            {"merchant": "ACME", "city": "Boston", "region": "MA", "country": "US", "gpt_category": "Groceries"},
            {"merchant": "BOLT", "city": "Oslo"},
            {"merchant": "GHOST", "city": "Nowhere"}
        ]"#
        .into())]);

        assert_eq!(enrich(&pool, &client, &settings).await.unwrap(), 2);
        let (city, category, tx_category): (String, String, String) =
            sqlx::query_as("SELECT city, category, tx_category FROM merchant WHERE merchant_id = 'ACME'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!((city.as_str(), category.as_str(), tx_category.as_str()), ("Boston", "Groceries", "Food"));

        let idle = ScriptedClient::new(vec![]);
        assert_eq!(enrich(&pool, &idle, &settings).await.unwrap(), 0);
        assert!(idle.prompts().is_empty());
    }
}
