use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::errors::{Result, StorageError};
use crate::reserved::is_reserved;
use crate::retry::RetryPolicy;
use crate::table::{Cursor, KvTable, Page, ProjectionExpression, QueryRequest, ScanRequest};
use crate::value::{item_to_json, normalize_item, AttributeValue, Item};

/// Attributes returned by a primary-key query.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Projection {
    #[default]
    All,
    Attributes(Vec<String>),
}

/// Accumulated result of one or more pages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutcome {
    pub items: Vec<Item>,
    /// `None` once the data set is exhausted.
    pub last_cursor: Option<Cursor>,
}

impl ScanOutcome {
    pub fn is_exhausted(&self) -> bool {
        self.last_cursor.is_none()
    }
}

/// JSON view used by the HTTP layer and the CLI.
#[derive(Debug, Serialize)]
pub struct ScanOutcomeJson {
    pub items: Vec<serde_json::Value>,
    pub last_cursor: Option<Cursor>,
}

impl From<ScanOutcome> for ScanOutcomeJson {
    fn from(outcome: ScanOutcome) -> Self {
        Self {
            items: outcome.items.iter().map(item_to_json).collect(),
            last_cursor: outcome.last_cursor,
        }
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Translates attribute names into the store's projection-expression form,
/// aliasing reserved or non-plain names as `#p0`, `#p1`, ...
pub fn build_projection(names: &[String]) -> ProjectionExpression {
    let mut attribute_names = BTreeMap::new();
    let mut tokens = Vec::with_capacity(names.len());
    for name in names {
        if is_plain_name(name) && !is_reserved(name) {
            tokens.push(name.clone());
        } else {
            let alias = format!("#p{}", attribute_names.len());
            attribute_names.insert(alias.clone(), name.clone());
            tokens.push(alias);
        }
    }
    ProjectionExpression {
        expression: tokens.join(", "),
        attribute_names,
    }
}

/// Cursor-driven reads over a [`KvTable`]. Every returned item is normalized.
pub struct Scanner {
    table: Arc<dyn KvTable>,
    retry: RetryPolicy,
}

impl Scanner {
    pub fn new(table: Arc<dyn KvTable>, retry: RetryPolicy) -> Self {
        Self { table, retry }
    }

    async fn scan_page(&self, table_name: &str, limit: usize, cursor: Option<Cursor>) -> Result<Page> {
        let operation = format!("scan of '{table_name}'");
        self.retry
            .run(&operation, || {
                self.table.scan_page(
                    table_name,
                    ScanRequest {
                        limit: Some(limit),
                        exclusive_start_key: cursor.clone(),
                    },
                )
            })
            .await
    }

    async fn query_page(&self, table_name: &str, request: QueryRequest) -> Result<Page> {
        let operation = format!("query of '{table_name}'");
        self.retry
            .run(&operation, || self.table.query_page(table_name, request.clone()))
            .await
    }

    /// Reads pages from `cursor` until at least `minimum_count` items are held
    /// or the table reports no further cursor.
    ///
    /// A returned cursor only ever accompanies a satisfied minimum; callers
    /// resume from it to read on.
    pub async fn scan(
        &self,
        table_name: &str,
        minimum_count: usize,
        cursor: Option<Cursor>,
    ) -> Result<ScanOutcome> {
        if minimum_count == 0 {
            return Err(StorageError::InvalidArg(
                "minimum_count must be at least 1".to_string(),
            ));
        }

        let mut items = Vec::new();
        let mut page = self.scan_page(table_name, minimum_count, cursor).await?;
        loop {
            let Page {
                items: page_items,
                last_evaluated_key,
            } = page;
            items.extend(page_items.into_iter().map(normalize_item));
            log::debug!(
                "Scan of '{}' holds {} items, more available: {}",
                table_name,
                items.len(),
                last_evaluated_key.is_some()
            );

            match last_evaluated_key {
                Some(next) if items.len() < minimum_count => {
                    page = self.scan_page(table_name, minimum_count, Some(next)).await?;
                }
                last_cursor => return Ok(ScanOutcome { items, last_cursor }),
            }
        }
    }

    /// Chains [`Scanner::scan`] until the data set is exhausted.
    pub async fn scan_all(&self, table_name: &str, page_size: usize) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut cursor: Option<Cursor> = None;
        loop {
            let outcome = self.scan(table_name, page_size, cursor.clone()).await?;
            items.extend(outcome.items);
            match outcome.last_cursor {
                None => return Ok(items),
                Some(next) if cursor.as_ref() == Some(&next) => {
                    return Err(StorageError::Upstream(format!(
                        "scan of '{table_name}' returned a cursor that did not advance"
                    )))
                }
                next => cursor = next,
            }
        }
    }

    /// Single-page equality query on the primary key.
    pub async fn query_by_key(
        &self,
        table_name: &str,
        key_field: &str,
        key_value: AttributeValue,
        projection: &Projection,
    ) -> Result<ScanOutcome> {
        let mut request = QueryRequest::new(key_field, key_value);
        if let Projection::Attributes(names) = projection {
            if names.is_empty() {
                return Err(StorageError::InvalidArg(
                    "projection needs at least one attribute".to_string(),
                ));
            }
            request = request.with_projection(build_projection(names));
        }

        let page = self.query_page(table_name, request).await?;
        Ok(ScanOutcome {
            items: page.items.into_iter().map(normalize_item).collect(),
            last_cursor: page.last_evaluated_key,
        })
    }

    /// Single-page equality query against a named secondary index.
    pub async fn query_index_by_key(
        &self,
        index_name: &str,
        table_name: &str,
        key_field: &str,
        key_value: AttributeValue,
    ) -> Result<Vec<Item>> {
        let request = QueryRequest::new(key_field, key_value).on_index(index_name);
        let page = self.query_page(table_name, request).await?;
        Ok(page.items.into_iter().map(normalize_item).collect())
    }
}
