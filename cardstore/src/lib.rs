pub mod config;
pub mod errors;
pub mod memory;
pub mod models;
pub mod reserved;
pub mod retry;
pub mod scan;
pub mod sqlite;
pub mod table;
pub mod upsert;
pub mod utils;
pub mod value;

use std::path::Path;
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::errors::Result;
use crate::memory::MemoryTable;
use crate::models::LoyaltyCard;
use crate::scan::{Projection, ScanOutcome, Scanner};
use crate::sqlite::SqliteTable;
use crate::table::{Cursor, KvTable};
use crate::upsert::{BatchUpserter, UpsertReport};
use crate::value::{AttributeValue, Item};

/// The main entry point for the `cardstore` library.
///
/// `CardStore` binds one loyalty-card table to the engines that operate on it:
/// - the Batch Upsert Engine (`BatchUpserter`) for chunked, last-write-wins writes,
/// - the Scan/Query Engine (`Scanner`) for cursor-driven, normalized reads,
/// - the email uniqueness check used before every insert.
///
/// The table itself is any [`KvTable`]; the store never assumes more than
/// batched puts, page scans and key queries.
///
/// # Example
///
/// ```rust,no_run
/// use cardstore::{CardStore, config::StorageConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let store = CardStore::in_memory(StorageConfig::default());
///     assert!(!store.email_exists("a@x.com").await.unwrap());
/// }
/// ```
pub struct CardStore {
    pub config: StorageConfig,
    pub table: Arc<dyn KvTable>,
    pub upserter: BatchUpserter,
    pub scanner: Scanner,
}

impl CardStore {
    pub fn new(table: Arc<dyn KvTable>, config: StorageConfig) -> Self {
        let upserter = BatchUpserter::new(Arc::clone(&table), &config);
        let scanner = Scanner::new(Arc::clone(&table), config.retry.clone());
        Self {
            config,
            table,
            upserter,
            scanner,
        }
    }

    /// A store backed by a fresh [`MemoryTable`] carrying the configured schema.
    pub fn in_memory(config: StorageConfig) -> Self {
        let table = MemoryTable::new().with_table(config.table_schema());
        Self::new(Arc::new(table), config)
    }

    /// Opens (and if needed creates) a SQLite-backed card table.
    pub fn open_sqlite(path: impl AsRef<Path>, config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let table = SqliteTable::open(path)?.with_table(config.table_schema());
        table.initialize_schema()?;
        Ok(Self::new(Arc::new(table), config))
    }

    /// Whether any card is already registered under `email`.
    ///
    /// One indexed query, first page only. The answer can be stale by the time
    /// a write follows it; uniqueness is best-effort.
    pub async fn email_exists(&self, email: &str) -> Result<bool> {
        let items = self
            .scanner
            .query_index_by_key(
                &self.config.email_index,
                &self.config.table_name,
                &self.config.email_field,
                AttributeValue::from(email),
            )
            .await?;
        Ok(!items.is_empty())
    }

    pub async fn upsert_items(&self, items: Vec<Item>) -> Result<UpsertReport> {
        self.upserter
            .upsert(&self.config.table_name, items, &[self.config.primary_key.as_str()])
            .await
    }

    pub async fn upsert_cards(&self, cards: &[LoyaltyCard]) -> Result<UpsertReport> {
        self.upsert_items(cards.iter().map(LoyaltyCard::to_item).collect())
            .await
    }

    pub async fn get_card(&self, card_number: &str) -> Result<Option<Item>> {
        let outcome = self
            .scanner
            .query_by_key(
                &self.config.table_name,
                &self.config.primary_key,
                AttributeValue::from(card_number),
                &Projection::All,
            )
            .await?;
        Ok(outcome.items.into_iter().next())
    }

    pub async fn scan_cards(&self, minimum_count: usize, cursor: Option<Cursor>) -> Result<ScanOutcome> {
        self.scanner
            .scan(&self.config.table_name, minimum_count, cursor)
            .await
    }

    /// Every card in the table, read page by page until exhaustion.
    pub async fn list_cards(&self) -> Result<Vec<Item>> {
        self.scanner
            .scan_all(&self.config.table_name, self.config.scan_page_size)
            .await
    }
}
