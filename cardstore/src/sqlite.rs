use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::{Result, StorageError};
use crate::table::{
    project, BatchWriteOutcome, Cursor, KvTable, Page, QueryRequest, ScanRequest, TableSchema,
    DEFAULT_MAX_BATCH_ITEMS,
};
use crate::value::{AttributeValue, Item};

/// A `KvTable` persisted in a local SQLite file.
///
/// Items are stored as JSON-encoded attribute maps, one row per primary key.
/// Secondary indexes live in `kv_index` and are rewritten with every put.
pub struct SqliteTable {
    conn: Arc<Mutex<Connection>>,
    schemas: HashMap<String, TableSchema>,
    max_batch_items: usize,
}

impl SqliteTable {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            schemas: HashMap::new(),
            max_batch_items: DEFAULT_MAX_BATCH_ITEMS,
        }
    }

    pub fn with_table(mut self, schema: TableSchema) -> Self {
        self.schemas.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_max_batch_items(mut self, max_batch_items: usize) -> Self {
        self.max_batch_items = max_batch_items.max(1);
        self
    }

    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS kv_items (
                table_name TEXT NOT NULL,
                pk TEXT NOT NULL,
                item TEXT NOT NULL,
                PRIMARY KEY (table_name, pk)
            );
            CREATE TABLE IF NOT EXISTS kv_index (
                table_name TEXT NOT NULL,
                index_name TEXT NOT NULL,
                index_key TEXT NOT NULL,
                pk TEXT NOT NULL,
                PRIMARY KEY (table_name, index_name, pk)
            );
            CREATE INDEX IF NOT EXISTS kv_index_lookup
                ON kv_index (table_name, index_name, index_key);
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn count(&self, table: &str) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM kv_items WHERE table_name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| poisoned())
    }

    /// Runs `work` against the connection on tokio's blocking pool, so a
    /// caller's timeout can fire while SQLite is busy.
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| poisoned())?;
            work(&mut guard)
        })
        .await
        .map_err(|err| StorageError::Upstream(format!("sqlite task failed: {err}")))?
    }

    fn schema(&self, table: &str) -> Result<&TableSchema> {
        self.schemas
            .get(table)
            .ok_or_else(|| StorageError::NotFound(format!("table '{table}'")))
    }
}

fn poisoned() -> StorageError {
    StorageError::Upstream("sqlite connection mutex poisoned".to_string())
}

fn decode_item(raw: &str) -> Result<Item> {
    Ok(serde_json::from_str(raw)?)
}

fn limit_param(limit: Option<usize>) -> i64 {
    // SQLite treats a negative LIMIT as unbounded.
    limit.map(|limit| limit as i64).unwrap_or(-1)
}

fn page_from_rows(rows: Vec<String>, limit: Option<usize>, schema: &TableSchema) -> Result<Page> {
    let items = rows
        .iter()
        .map(|raw| decode_item(raw))
        .collect::<Result<Vec<_>>>()?;
    let full = limit.is_some_and(|limit| items.len() >= limit);
    let last_evaluated_key = if full {
        items.last().and_then(|item| {
            item.get(&schema.primary_key).map(|value| {
                let mut key = Item::new();
                key.insert(schema.primary_key.clone(), value.clone());
                Cursor(key)
            })
        })
    } else {
        None
    };
    Ok(Page {
        items,
        last_evaluated_key,
    })
}

fn start_key(cursor: Option<&Cursor>, schema: &TableSchema) -> Option<String> {
    cursor.and_then(|cursor| cursor.0.get(&schema.primary_key).map(AttributeValue::key_text))
}

/// One item ready to be written: its primary key, encoded body and index entries.
struct EncodedItem {
    pk: String,
    body: String,
    index_keys: Vec<(String, String)>,
}

fn encode_items(schema: &TableSchema, items: Vec<Item>) -> Result<Vec<EncodedItem>> {
    let mut seen = HashSet::with_capacity(items.len());
    let mut encoded = Vec::with_capacity(items.len());
    for item in items {
        let pk = item
            .get(&schema.primary_key)
            .map(AttributeValue::key_text)
            .ok_or_else(|| {
                StorageError::InvalidArg(format!(
                    "item is missing primary key '{}'",
                    schema.primary_key
                ))
            })?;
        if !seen.insert(pk.clone()) {
            return Err(StorageError::InvalidArg(format!(
                "batch contains duplicate key '{pk}'"
            )));
        }
        let native: Item = item
            .into_iter()
            .map(|(name, value)| (name, value.to_native()))
            .collect();
        let index_keys = schema
            .indexes
            .iter()
            .filter_map(|(index_name, attribute)| {
                native
                    .get(attribute)
                    .map(|value| (index_name.clone(), value.key_text()))
            })
            .collect();
        encoded.push(EncodedItem {
            pk,
            body: serde_json::to_string(&native)?,
            index_keys,
        });
    }
    Ok(encoded)
}

#[async_trait]
impl KvTable for SqliteTable {
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
        let encoded = encode_items(schema, items)?;

        let table = table.to_string();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            for item in &encoded {
                tx.execute(
                    "INSERT INTO kv_items (table_name, pk, item) VALUES (?1, ?2, ?3)
                     ON CONFLICT(table_name, pk) DO UPDATE SET item = excluded.item",
                    params![table, item.pk, item.body],
                )?;
                tx.execute(
                    "DELETE FROM kv_index WHERE table_name = ?1 AND pk = ?2",
                    params![table, item.pk],
                )?;
                for (index_name, index_key) in &item.index_keys {
                    tx.execute(
                        "INSERT INTO kv_index (table_name, index_name, index_key, pk)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![table, index_name, index_key, item.pk],
                    )?;
                }
            }
            tx.commit()?;
            Ok(BatchWriteOutcome::default())
        })
        .await
    }

    async fn scan_page(&self, table: &str, request: ScanRequest) -> Result<Page> {
        let schema = self.schema(table)?.clone();
        let start = start_key(request.exclusive_start_key.as_ref(), &schema);

        let table = table.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT item FROM kv_items
                 WHERE table_name = ?1 AND (?2 IS NULL OR pk > ?2)
                 ORDER BY pk LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![table, start, limit_param(request.limit)], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            page_from_rows(rows, request.limit, &schema)
        })
        .await
    }

    async fn query_page(&self, table: &str, request: QueryRequest) -> Result<Page> {
        let schema = self.schema(table)?.clone();
        let start = start_key(request.exclusive_start_key.as_ref(), &schema);
        let wanted = request.key_condition.value.key_text();

        let index = match &request.index_name {
            Some(index_name) => {
                let attribute = schema.indexes.get(index_name).ok_or_else(|| {
                    StorageError::InvalidArg(format!("unknown index '{index_name}'"))
                })?;
                if &request.key_condition.field != attribute {
                    return Err(StorageError::InvalidArg(format!(
                        "key condition on '{}' does not match index key '{}'",
                        request.key_condition.field, attribute
                    )));
                }
                Some(index_name.clone())
            }
            None => {
                if request.key_condition.field != schema.primary_key {
                    return Err(StorageError::InvalidArg(format!(
                        "key condition on '{}' does not match primary key '{}'",
                        request.key_condition.field, schema.primary_key
                    )));
                }
                None
            }
        };

        let table = table.to_string();
        let limit = request.limit;
        let rows = self
            .blocking(move |conn| {
                let rows = match index {
                    Some(index_name) => {
                        let mut stmt = conn.prepare(
                            "SELECT i.item FROM kv_index x
                             JOIN kv_items i ON i.table_name = x.table_name AND i.pk = x.pk
                             WHERE x.table_name = ?1 AND x.index_name = ?2 AND x.index_key = ?3
                               AND (?4 IS NULL OR x.pk > ?4)
                             ORDER BY x.pk LIMIT ?5",
                        )?;
                        let rows = stmt
                            .query_map(
                                params![table, index_name, wanted, start, limit_param(limit)],
                                |row| row.get::<_, String>(0),
                            )?
                            .collect::<std::result::Result<Vec<_>, _>>()?;
                        rows
                    }
                    None => {
                        let raw: Option<String> = conn
                            .query_row(
                                "SELECT item FROM kv_items WHERE table_name = ?1 AND pk = ?2
                                   AND (?3 IS NULL OR pk > ?3)",
                                params![table, wanted, start],
                                |row| row.get(0),
                            )
                            .optional()?;
                        raw.into_iter().collect()
                    }
                };
                Ok(rows)
            })
            .await?;

        let mut page = page_from_rows(rows, request.limit, &schema)?;
        page.items = page
            .items
            .iter()
            .map(|item| project(item, request.projection.as_ref()))
            .collect();
        Ok(page)
    }
}
