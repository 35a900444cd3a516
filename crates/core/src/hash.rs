use sha2::{Digest, Sha256};

use crate::normalize::CellValue;

/// Compute SHA-256 of an in-memory byte slice as lowercase hex (64 chars).
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Content identity of a ledger row.
///
/// The digest input is `account_id` followed by the textual form of each
/// selected value, with no separator. With `hash_columns` set, values are
/// taken in that order and configured columns missing from `columns` are
/// skipped; otherwise every column is used in file order. Reordering either
/// list changes every hash.
pub fn hash_of(
    account_id: &str,
    columns: &[String],
    values: &[CellValue],
    hash_columns: &[String],
) -> String {
    let mut input = String::from(account_id);
    if hash_columns.is_empty() {
        for value in values {
            input.push_str(&value.to_string());
        }
    } else {
        for col in hash_columns {
            if let Some(value) = columns
                .iter()
                .position(|c| c == col)
                .and_then(|i| values.get(i))
            {
                input.push_str(&value.to_string());
            }
        }
    }
    sha256_hex(input.as_bytes())
}
