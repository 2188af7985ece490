use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::value::{AttributeValue, Item};

/// Per-request item cap of a batched write, matching the common store limit.
pub const DEFAULT_MAX_BATCH_ITEMS: usize = 25;

/// Opaque continuation token returned by a paged read.
///
/// It holds the key attributes of the last evaluated item; the engines only
/// test it for presence and hand it back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor(pub Item);

#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Cursor>,
}

/// Equality condition on a single key attribute.
#[derive(Debug, Clone)]
pub struct KeyCondition {
    pub field: String,
    pub value: AttributeValue,
}

/// Projection in the store's expression form: a comma-separated attribute list
/// where `#alias` tokens are resolved through `attribute_names`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionExpression {
    pub expression: String,
    pub attribute_names: BTreeMap<String, String>,
}

impl ProjectionExpression {
    /// Resolves the expression back to concrete attribute names.
    pub fn resolved_names(&self) -> Vec<String> {
        self.expression
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| {
                self.attribute_names
                    .get(token)
                    .cloned()
                    .unwrap_or_else(|| token.to_string())
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub index_name: Option<String>,
    pub key_condition: KeyCondition,
    pub projection: Option<ProjectionExpression>,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Cursor>,
}

impl QueryRequest {
    pub fn new(field: impl Into<String>, value: AttributeValue) -> Self {
        Self {
            index_name: None,
            key_condition: KeyCondition {
                field: field.into(),
                value,
            },
            projection: None,
            limit: None,
            exclusive_start_key: None,
        }
    }

    pub fn on_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    pub fn with_projection(mut self, projection: ProjectionExpression) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// One page of a scan or query.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<Cursor>,
}

/// Outcome of one batched write. Items the store declined to process in this
/// request are handed back so the caller can resubmit them.
#[derive(Debug, Clone, Default)]
pub struct BatchWriteOutcome {
    pub unprocessed: Vec<Item>,
}

/// The remote key-value table as the engines see it.
///
/// Implementations replace an existing item wholesale when a put carries the
/// same primary key.
#[async_trait]
pub trait KvTable: Send + Sync {
    /// Largest number of items accepted by one [`KvTable::batch_put`] call.
    fn max_batch_items(&self) -> usize {
        DEFAULT_MAX_BATCH_ITEMS
    }

    async fn batch_put(&self, table: &str, items: Vec<Item>) -> Result<BatchWriteOutcome>;

    async fn scan_page(&self, table: &str, request: ScanRequest) -> Result<Page>;

    async fn query_page(&self, table: &str, request: QueryRequest) -> Result<Page>;
}

/// Declared key attributes and secondary indexes of one table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub primary_key: String,
    /// Index name to indexed attribute.
    pub indexes: BTreeMap<String, String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn with_index(mut self, index_name: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.indexes.insert(index_name.into(), attribute.into());
        self
    }
}

/// Applies a projection to a stored item; `None` keeps every attribute.
pub(crate) fn project(item: &Item, projection: Option<&ProjectionExpression>) -> Item {
    match projection {
        None => item.clone(),
        Some(projection) => projection
            .resolved_names()
            .into_iter()
            .filter_map(|name| item.get(&name).map(|value| (name, value.clone())))
            .collect(),
    }
}
