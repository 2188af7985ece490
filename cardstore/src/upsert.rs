use std::collections::HashMap;
use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};

use crate::config::StorageConfig;
use crate::errors::{Result, StorageError};
use crate::retry::RetryPolicy;
use crate::table::KvTable;
use crate::value::{AttributeValue, Item};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Records handed to the engine.
    pub submitted: usize,
    /// Records actually written after collapsing duplicate keys.
    pub written: usize,
    /// Earlier occurrences dropped in favour of a later record with the same key.
    pub deduplicated: usize,
    pub groups: usize,
}

/// Writes arbitrary-length record sets through the table's batched write.
///
/// Records sharing the same `key_fields` values collapse to the one that
/// appears last in the input, before chunking. Groups therefore never share a
/// key, which keeps the outcome deterministic when several groups are in flight.
pub struct BatchUpserter {
    table: Arc<dyn KvTable>,
    batch_size: usize,
    max_concurrent_groups: usize,
    retry: RetryPolicy,
}

impl BatchUpserter {
    pub fn new(table: Arc<dyn KvTable>, config: &StorageConfig) -> Self {
        Self {
            table,
            batch_size: config.batch_size,
            max_concurrent_groups: config.max_concurrent_groups,
            retry: config.retry.clone(),
        }
    }

    /// Items per underlying write: the configured size, bounded by the table cap.
    pub fn group_size(&self) -> usize {
        self.batch_size.min(self.table.max_batch_items()).max(1)
    }

    pub async fn upsert(
        &self,
        table_name: &str,
        records: Vec<Item>,
        key_fields: &[&str],
    ) -> Result<UpsertReport> {
        let submitted = records.len();
        let records = dedup_last_wins(records, key_fields)?;
        let written = records.len();
        let groups = chunk(records, self.group_size());
        let group_count = groups.len();

        log::info!(
            "Upserting {} records ({} after dedup) into '{}' in {} groups of at most {}",
            submitted,
            written,
            table_name,
            group_count,
            self.group_size()
        );

        stream::iter(groups.into_iter().enumerate())
            .map(|(index, group)| self.write_group(table_name, index, group))
            .buffered(self.max_concurrent_groups.max(1))
            .try_collect::<Vec<()>>()
            .await?;

        Ok(UpsertReport {
            submitted,
            written,
            deduplicated: submitted - written,
            groups: group_count,
        })
    }

    async fn write_group(&self, table_name: &str, index: usize, group: Vec<Item>) -> Result<()> {
        let attempts = self.retry.attempts();
        let operation = format!("batch write of group {index} to '{table_name}'");
        let mut pending = group;
        let mut attempt = 0;

        loop {
            attempt += 1;
            log::debug!(
                "Writing group {} ({} items, attempt {}/{})",
                index,
                pending.len(),
                attempt,
                attempts
            );

            let last_error = match self
                .retry
                .timed(&operation, self.table.batch_put(table_name, pending.clone()))
                .await
            {
                Ok(outcome) if outcome.unprocessed.is_empty() => return Ok(()),
                Ok(outcome) => {
                    let message = format!("{} items left unprocessed", outcome.unprocessed.len());
                    // Only the leftovers go back out; the rest already landed.
                    pending = outcome.unprocessed;
                    message
                }
                Err(err) if err.is_retryable() => err.to_string(),
                Err(err) => return Err(err),
            };

            if attempt >= attempts {
                log::error!("{} failed after {} attempts: {}", operation, attempts, last_error);
                return Err(StorageError::RetryExhausted {
                    operation,
                    attempts,
                    last_error,
                });
            }

            let delay = self.retry.delay_for(attempt - 1);
            log::warn!("{} incomplete ({}), retrying in {:?}", operation, last_error, delay);
            tokio::time::sleep(delay).await;
        }
    }
}

fn record_key(record: &Item, key_fields: &[&str], position: usize) -> Result<Vec<String>> {
    key_fields
        .iter()
        .map(|field| {
            record
                .get(*field)
                .filter(|value| !matches!(value, AttributeValue::Null))
                .map(AttributeValue::key_text)
                .ok_or_else(|| {
                    StorageError::InvalidArg(format!(
                        "record {position} is missing key field '{field}'"
                    ))
                })
        })
        .collect()
}

/// Keeps only the last occurrence of each key, at that occurrence's position.
pub fn dedup_last_wins(records: Vec<Item>, key_fields: &[&str]) -> Result<Vec<Item>> {
    if key_fields.is_empty() {
        return Err(StorageError::InvalidArg(
            "at least one key field is required".to_string(),
        ));
    }

    let keys = records
        .iter()
        .enumerate()
        .map(|(position, record)| record_key(record, key_fields, position))
        .collect::<Result<Vec<_>>>()?;

    let mut last_seen: HashMap<&[String], usize> = HashMap::with_capacity(keys.len());
    for (position, key) in keys.iter().enumerate() {
        last_seen.insert(key.as_slice(), position);
    }

    Ok(records
        .into_iter()
        .zip(keys.iter())
        .enumerate()
        .filter(|(position, (_, key))| last_seen.get(key.as_slice()) == Some(position))
        .map(|(_, (record, _))| record)
        .collect())
}

/// Splits `records` into ordered, contiguous groups of at most `size` items.
pub fn chunk(records: Vec<Item>, size: usize) -> Vec<Vec<Item>> {
    let size = size.max(1);
    let mut groups = Vec::with_capacity(records.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for record in records {
        current.push(record);
        if current.len() == size {
            groups.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}
