use serde::Deserialize;

use crate::errors::{Result, StorageError};
use crate::retry::RetryPolicy;
use crate::table::{TableSchema, DEFAULT_MAX_BATCH_ITEMS};

pub const DEFAULT_TABLE_NAME: &str = "loyalty_cards";
pub const DEFAULT_PRIMARY_KEY: &str = "card_number";
pub const DEFAULT_EMAIL_INDEX: &str = "emailIndex";
pub const DEFAULT_EMAIL_FIELD: &str = "email";

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub table_name: String,
    pub primary_key: String,
    pub email_index: String,
    pub email_field: String,
    /// Items per batched write; clamped to the table's own cap at write time.
    pub batch_size: usize,
    /// Minimum items requested per scan call when reading the whole table.
    pub scan_page_size: usize,
    pub max_concurrent_groups: usize,
    pub retry: RetryPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_NAME)
    }
}

impl StorageConfig {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            email_index: DEFAULT_EMAIL_INDEX.to_string(),
            email_field: DEFAULT_EMAIL_FIELD.to_string(),
            batch_size: DEFAULT_MAX_BATCH_ITEMS,
            scan_page_size: DEFAULT_MAX_BATCH_ITEMS,
            max_concurrent_groups: 1,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_email_index(mut self, email_index: impl Into<String>) -> Self {
        self.email_index = email_index.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_scan_page_size(mut self, scan_page_size: usize) -> Self {
        self.scan_page_size = scan_page_size;
        self
    }

    pub fn with_max_concurrent_groups(mut self, max_concurrent_groups: usize) -> Self {
        self.max_concurrent_groups = max_concurrent_groups;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(StorageError::Config("table_name must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(StorageError::Config("batch_size must be at least 1".into()));
        }
        if self.scan_page_size == 0 {
            return Err(StorageError::Config("scan_page_size must be at least 1".into()));
        }
        if self.max_concurrent_groups == 0 {
            return Err(StorageError::Config(
                "max_concurrent_groups must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Key layout the card table is expected to have.
    pub fn table_schema(&self) -> TableSchema {
        TableSchema::new(&self.table_name, &self.primary_key)
            .with_index(&self.email_index, &self.email_field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_partial_config_with_defaults() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"table_name": "cards", "batch_size": 10}"#).unwrap();
        assert_eq!(config.table_name, "cards");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.email_index, DEFAULT_EMAIL_INDEX);
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let config = StorageConfig::new("cards").with_batch_size(0);
        assert!(matches!(config.validate(), Err(StorageError::Config(_))));
    }
}
