use dropzone_storage::{merchant_categories, upsert_tx_categories, DbPool};
use tracing::info;

use crate::MerchantError;

/// Rebuild the merchant registry from `all_transactions`. Returns the number
/// of merchants written.
pub async fn aggregate(pool: &DbPool) -> Result<usize, MerchantError> {
    let merchants = merchant_categories(pool).await?;
    if merchants.is_empty() {
        info!("No merchants in all_transactions");
        return Ok(0);
    }
    let written = upsert_tx_categories(pool, &merchants).await?;
    info!(merchants = written, "Merchant table updated");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropzone_storage::create_db;

    #[tokio::test]
    async fn aggregate_fills_merchant_table() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("financials.db")).await.unwrap();
        for sql in [
            "CREATE TABLE checking (tx_merchant TEXT, tx_category TEXT)",
            "CREATE VIEW all_transactions AS SELECT tx_merchant, tx_category FROM checking",
        ] {
            sqlx::query(sql).execute(&pool).await.unwrap();
        }

        assert_eq!(aggregate(&pool).await.unwrap(), 0);

        sqlx::query("INSERT INTO checking VALUES ('ACME', 'Food'), ('ACME', 'Bills'), ('BOLT', NULL)")
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(aggregate(&pool).await.unwrap(), 2);

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT merchant_id, tx_category FROM merchant ORDER BY merchant_id")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(
            rows,
            vec![("ACME".to_string(), "Bills,Food".to_string()), ("BOLT".to_string(), String::new())]
        );
    }

    #[tokio::test]
    async fn missing_view_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("financials.db")).await.unwrap();
        assert!(matches!(aggregate(&pool).await, Err(MerchantError::Sqlx(_))));
    }
}
