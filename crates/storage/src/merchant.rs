use std::collections::{BTreeMap, BTreeSet};

use crate::db::DbPool;

/// Enrichment fields for one merchant, as returned by the completion service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerchantMetadata {
    pub merchant_id: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub phone_number: String,
    pub url: String,
    pub category: String,
}

/// Distinct merchants seen in `all_transactions`, each mapped to the sorted,
/// comma-joined set of its non-null categories. Null merchants are skipped.
pub async fn merchant_categories(pool: &DbPool) -> Result<BTreeMap<String, String>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (Option<String>, Option<String>)>(
        "SELECT tx_merchant, tx_category FROM all_transactions",
    )
    .fetch_all(pool)
    .await?;

    let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (merchant, category) in rows {
        let Some(merchant) = merchant else { continue };
        let categories = grouped.entry(merchant).or_default();
        if let Some(category) = category {
            categories.insert(category);
        }
    }

    Ok(grouped
        .into_iter()
        .map(|(merchant, categories)| {
            let joined = categories.into_iter().collect::<Vec<_>>().join(",");
            (merchant, joined)
        })
        .collect())
}

/// Insert or refresh `tx_category` for each merchant. Enrichment columns of
/// existing rows are left alone.
pub async fn upsert_tx_categories(
    pool: &DbPool,
    merchants: &BTreeMap<String, String>,
) -> Result<usize, sqlx::Error> {
    let mut tx = pool.begin().await?;
    for (merchant_id, tx_category) in merchants {
        sqlx::query(
            "INSERT INTO merchant (merchant_id, tx_category) VALUES (?, ?)
             ON CONFLICT(merchant_id) DO UPDATE SET tx_category = excluded.tx_category",
        )
        .bind(merchant_id)
        .bind(tx_category)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(merchants.len())
}

const NO_METADATA: &str = "COALESCE(city, '') = '' AND COALESCE(region, '') = '' AND COALESCE(country, '') = ''";

pub async fn merchants_without_metadata(pool: &DbPool, limit: usize) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String,)>(&format!(
        "SELECT merchant_id FROM merchant WHERE {NO_METADATA} ORDER BY merchant_id LIMIT ?"
    ))
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Write enrichment fields, only for merchants that still have none.
/// Returns whether a row was updated.
pub async fn apply_metadata(pool: &DbPool, meta: &MerchantMetadata) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(&format!(
        "UPDATE merchant
         SET city = ?, region = ?, country = ?, phone_number = ?, url = ?, category = ?
         WHERE merchant_id = ? AND {NO_METADATA}"
    ))
    .bind(&meta.city)
    .bind(&meta.region)
    .bind(&meta.country)
    .bind(&meta.phone_number)
    .bind(&meta.url)
    .bind(&meta.category)
    .bind(&meta.merchant_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
