pub mod db;
pub mod ledger;
pub mod merchant;

pub use db::{create_db, quote_ident, DbPool};
pub use ledger::{
    ensure_table, insert_row, is_duplicate, ledger_stats, load_schema, table_exists, LedgerRow,
    LedgerSchema, LedgerStats, StoreError, DUPLICATE_TAG, SYSTEM_COLUMNS,
};
pub use merchant::{
    apply_metadata, merchant_categories, merchants_without_metadata, upsert_tx_categories,
    MerchantMetadata,
};
