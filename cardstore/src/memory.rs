use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{Result, StorageError};
use crate::table::{
    project, BatchWriteOutcome, Cursor, KvTable, Page, QueryRequest, ScanRequest, TableSchema,
    DEFAULT_MAX_BATCH_ITEMS,
};
use crate::value::{AttributeValue, Item};

/// An ordered in-memory table that behaves like the remote store: numbers are
/// kept as decimals, oversized or self-colliding batches are rejected, and a
/// page that fills its limit always reports a continuation cursor.
pub struct MemoryTable {
    schemas: HashMap<String, TableSchema>,
    tables: Mutex<HashMap<String, BTreeMap<String, Item>>>,
    max_batch_items: usize,
    batch_requests: Mutex<Vec<usize>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
            tables: Mutex::new(HashMap::new()),
            max_batch_items: DEFAULT_MAX_BATCH_ITEMS,
            batch_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_table(mut self, schema: TableSchema) -> Self {
        self.tables
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(schema.name.clone(), BTreeMap::new());
        self.schemas.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_max_batch_items(mut self, max_batch_items: usize) -> Self {
        self.max_batch_items = max_batch_items.max(1);
        self
    }

    /// Sizes of every batched write accepted so far, in order.
    pub fn batch_request_sizes(&self) -> Vec<usize> {
        self.batch_requests
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default()
    }

    pub fn len(&self, table: &str) -> usize {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| tables.get(table).map(BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Raw stored item, without normalization.
    pub fn get(&self, table: &str, key: &str) -> Option<Item> {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| tables.get(table).and_then(|rows| rows.get(key).cloned()))
    }

    fn schema(&self, table: &str) -> Result<&TableSchema> {
        self.schemas
            .get(table)
            .ok_or_else(|| StorageError::NotFound(format!("table '{table}'")))
    }

    fn lock_tables(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, BTreeMap<String, Item>>>> {
        self.tables
            .lock()
            .map_err(|_| StorageError::Upstream("memory table mutex poisoned".to_string()))
    }
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

fn cursor_for(item: &Item, primary_key: &str) -> Option<Cursor> {
    item.get(primary_key).map(|value| {
        let mut key = Item::new();
        key.insert(primary_key.to_string(), value.clone());
        Cursor(key)
    })
}

fn start_after(cursor: Option<&Cursor>, primary_key: &str) -> Option<String> {
    cursor.and_then(|cursor| cursor.0.get(primary_key).map(AttributeValue::key_text))
}

/// Cuts an ordered candidate list into one page.
fn paginate<'a>(
    candidates: impl Iterator<Item = (&'a String, &'a Item)>,
    start: Option<String>,
    limit: Option<usize>,
    primary_key: &str,
) -> (Vec<Item>, Option<Cursor>) {
    let mut items = Vec::new();
    let mut cursor = None;
    for (key, item) in candidates {
        if let Some(start) = &start {
            if key <= start {
                continue;
            }
        }
        items.push(item.clone());
        if limit.is_some_and(|limit| items.len() >= limit) {
            cursor = cursor_for(item, primary_key);
            break;
        }
    }
    (items, cursor)
}

#[async_trait]
impl KvTable for MemoryTable {
    fn max_batch_items(&self) -> usize {
        self.max_batch_items
    }

    async fn batch_put(&self, table: &str, items: Vec<Item>) -> Result<BatchWriteOutcome> {
        let schema = self.schema(table)?;
        if items.len() > self.max_batch_items {
            return Err(StorageError::InvalidArg(format!(
                "batch of {} items exceeds the limit of {}",
                items.len(),
                self.max_batch_items
            )));
        }

        let mut staged = BTreeMap::new();
        for item in items {
            let key = item
                .get(&schema.primary_key)
                .map(AttributeValue::key_text)
                .ok_or_else(|| {
                    StorageError::InvalidArg(format!(
                        "item is missing primary key '{}'",
                        schema.primary_key
                    ))
                })?;
            let native: Item = item
                .into_iter()
                .map(|(name, value)| (name, value.to_native()))
                .collect();
            if staged.insert(key.clone(), native).is_some() {
                return Err(StorageError::InvalidArg(format!(
                    "batch contains duplicate key '{key}'"
                )));
            }
        }

        let count = staged.len();
        let mut tables = self.lock_tables()?;
        let rows = tables.entry(table.to_string()).or_default();
        rows.extend(staged);
        drop(tables);

        if let Ok(mut sizes) = self.batch_requests.lock() {
            sizes.push(count);
        }
        Ok(BatchWriteOutcome::default())
    }

    async fn scan_page(&self, table: &str, request: ScanRequest) -> Result<Page> {
        let schema = self.schema(table)?;
        let tables = self.lock_tables()?;
        let rows = tables
            .get(table)
            .ok_or_else(|| StorageError::NotFound(format!("table '{table}'")))?;

        let start = start_after(request.exclusive_start_key.as_ref(), &schema.primary_key);
        let (items, last_evaluated_key) =
            paginate(rows.iter(), start, request.limit, &schema.primary_key);
        Ok(Page {
            items,
            last_evaluated_key,
        })
    }

    async fn query_page(&self, table: &str, request: QueryRequest) -> Result<Page> {
        let schema = self.schema(table)?;
        let expected_field = match &request.index_name {
            Some(index) => schema
                .indexes
                .get(index)
                .ok_or_else(|| StorageError::InvalidArg(format!("unknown index '{index}'")))?,
            None => &schema.primary_key,
        };
        if &request.key_condition.field != expected_field {
            return Err(StorageError::InvalidArg(format!(
                "key condition on '{}' does not match key '{}'",
                request.key_condition.field, expected_field
            )));
        }

        let wanted = request.key_condition.value.key_text();
        let tables = self.lock_tables()?;
        let rows = tables
            .get(table)
            .ok_or_else(|| StorageError::NotFound(format!("table '{table}'")))?;
        let matching = rows.iter().filter(|(_, item)| {
            item.get(expected_field)
                .is_some_and(|value| value.key_text() == wanted)
        });

        let start = start_after(request.exclusive_start_key.as_ref(), &schema.primary_key);
        let (items, last_evaluated_key) =
            paginate(matching, start, request.limit, &schema.primary_key);
        let items = items
            .iter()
            .map(|item| project(item, request.projection.as_ref()))
            .collect();
        Ok(Page {
            items,
            last_evaluated_key,
        })
    }
}
