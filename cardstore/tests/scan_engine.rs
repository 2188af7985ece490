mod common;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use cardstore::{
    errors::StorageError,
    memory::MemoryTable,
    scan::Projection,
    sqlite::SqliteTable,
    table::{Cursor, KvTable},
    value::{AttributeValue, Item},
    CardStore,
};
use common::{card_item, card_numbers, init_test_context, test_config};
use tempfile::tempdir;

async fn seed(store: &CardStore, count: usize) -> Result<()> {
    let items: Vec<Item> = (0..count)
        .map(|i| card_item(&format!("card-{i:03}"), &format!("member{i}@x.com"), i as i64))
        .collect();
    store.upsert_items(items).await?;
    Ok(())
}

/// Follows cursors from the beginning until exhaustion, checking the
/// minimum-count contract on every call.
async fn chain_scans(store: &CardStore, minimum: usize) -> Result<Vec<Item>> {
    let mut collected = Vec::new();
    let mut cursor: Option<Cursor> = None;
    for _ in 0..100 {
        let outcome = store.scan_cards(minimum, cursor).await?;
        assert!(
            outcome.items.len() >= minimum || outcome.last_cursor.is_none(),
            "short window with a cursor for minimum {minimum}"
        );
        collected.extend(outcome.items);
        match outcome.last_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(collected),
        }
    }
    panic!("scan never exhausted for minimum {minimum}");
}

#[tokio::test]
async fn chained_scans_cover_every_item_exactly_once() -> Result<()> {
    let ctx = init_test_context(4);
    seed(&ctx.store, 10).await?;

    for minimum in 1..=12 {
        let items = chain_scans(&ctx.store, minimum).await?;
        let numbers = card_numbers(&items);
        let unique: HashSet<_> = numbers.iter().cloned().collect();
        assert_eq!(numbers.len(), 10, "minimum {minimum}");
        assert_eq!(unique.len(), 10, "minimum {minimum}");
    }
    Ok(())
}

#[tokio::test]
async fn empty_table_scan_is_exhausted_immediately() -> Result<()> {
    let ctx = init_test_context(25);
    let outcome = ctx.store.scan_cards(5, None).await?;
    assert!(outcome.items.is_empty());
    assert!(outcome.is_exhausted());
    Ok(())
}

#[tokio::test]
async fn zero_minimum_is_rejected() -> Result<()> {
    let ctx = init_test_context(25);
    let err = ctx.store.scan_cards(0, None).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidArg(_)));
    Ok(())
}

#[tokio::test]
async fn scanned_numbers_come_back_as_integers() -> Result<()> {
    let ctx = init_test_context(25);
    seed(&ctx.store, 3).await?;

    // Stored natively as decimals.
    let raw = ctx.table.get(common::TABLE, "card-002").unwrap();
    assert!(matches!(raw["points"], AttributeValue::N(_)));

    let items = ctx.store.list_cards().await?;
    assert_eq!(items.len(), 3);
    assert!(items
        .iter()
        .all(|item| matches!(item["points"], AttributeValue::Int(_))));
    assert_eq!(items[2]["points"], AttributeValue::Int(2));
    Ok(())
}

#[tokio::test]
async fn key_query_projects_requested_attributes() -> Result<()> {
    let ctx = init_test_context(25);
    seed(&ctx.store, 3).await?;

    let outcome = ctx
        .store
        .scanner
        .query_by_key(
            common::TABLE,
            "card_number",
            AttributeValue::from("card-001"),
            &Projection::Attributes(vec!["email".into(), "points".into()]),
        )
        .await?;

    assert_eq!(outcome.items.len(), 1);
    let item = &outcome.items[0];
    assert_eq!(item.len(), 2);
    assert_eq!(item["email"], AttributeValue::from("member1@x.com"));
    assert_eq!(item["points"], AttributeValue::Int(1));

    let missing = ctx.store.get_card("card-999").await?;
    assert!(missing.is_none());
    Ok(())
}

#[tokio::test]
async fn email_uniqueness_check() -> Result<()> {
    let ctx = init_test_context(25);
    assert!(!ctx.store.email_exists("member1@x.com").await?);

    seed(&ctx.store, 2).await?;
    assert!(ctx.store.email_exists("member1@x.com").await?);
    assert!(!ctx.store.email_exists("someone@else.com").await?);
    Ok(())
}

#[tokio::test]
async fn sqlite_store_behaves_like_memory_store() -> Result<()> {
    let dir = tempdir()?;
    let config = test_config(3);
    let table = SqliteTable::open(dir.path().join("cards.sqlite"))?.with_table(config.table_schema());
    table.initialize_schema()?;
    let table: Arc<dyn KvTable> = Arc::new(table);
    let sqlite = CardStore::new(table, config.clone());

    let memory = CardStore::new(
        Arc::new(MemoryTable::new().with_table(config.table_schema())),
        config,
    );

    for store in [&sqlite, &memory] {
        let mut input: Vec<Item> = (0..8)
            .map(|i| card_item(&format!("card-{i}"), &format!("{i}@x.com"), i))
            .collect();
        input.push(card_item("card-0", "moved@x.com", 100));
        store.upsert_items(input).await?;

        let items = chain_scans(store, 3).await?;
        assert_eq!(items.len(), 8);
        assert!(store.email_exists("moved@x.com").await?);
        assert!(!store.email_exists("0@x.com").await?);

        let card = store.get_card("card-0").await?.unwrap();
        assert_eq!(card["points"], AttributeValue::Int(100));
    }
    Ok(())
}
