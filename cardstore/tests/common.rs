use std::sync::Arc;

use cardstore::{
    config::StorageConfig,
    memory::MemoryTable,
    retry::RetryPolicy,
    value::{AttributeValue, Item},
    CardStore,
};

pub const TABLE: &str = "loyalty_cards";

#[allow(dead_code)]
pub struct TestContext {
    pub table: Arc<MemoryTable>,
    pub store: CardStore,
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        request_timeout_ms: 1_000,
    }
}

pub fn test_config(batch_size: usize) -> StorageConfig {
    StorageConfig::new(TABLE)
        .with_batch_size(batch_size)
        .with_retry(fast_retry())
}

pub fn init_test_context(batch_size: usize) -> TestContext {
    let config = test_config(batch_size);
    let table = Arc::new(MemoryTable::new().with_table(config.table_schema()));
    let store = CardStore::new(table.clone(), config);
    TestContext { table, store }
}

#[allow(dead_code)]
pub fn card_item(card_number: &str, email: &str, points: i64) -> Item {
    let mut item = Item::new();
    item.insert("card_number".into(), card_number.into());
    item.insert("first_name".into(), "Test".into());
    item.insert("last_name".into(), "Member".into());
    item.insert("email".into(), email.into());
    item.insert("points".into(), AttributeValue::Int(points));
    item
}

#[allow(dead_code)]
pub fn card_numbers(items: &[Item]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item.get("card_number").and_then(|v| v.as_str()).map(str::to_string))
        .collect()
}
