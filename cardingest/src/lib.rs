pub mod consumer;
pub mod error;
pub mod events;
pub mod mapper;
pub mod object_store;
pub mod producer;
pub mod queue;
pub mod schema;
pub mod sqlite_queue;

use serde::Deserialize;

pub use crate::consumer::{BatchReport, MessageFailure, QueueConsumer};
pub use crate::producer::{CsvProducer, PublishSummary};
pub use crate::schema::{CardField, ColumnMapping};

/// Settings shared by the producer and the consumer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub columns: ColumnMapping,
    /// Value of the `source` attribute stamped on every published message.
    pub source: String,
    /// Messages requested per receive when draining a queue.
    pub receive_batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            columns: ColumnMapping::default(),
            source: queue::BULK_UPLOAD_SOURCE.to_string(),
            receive_batch_size: 10,
        }
    }
}

impl IngestConfig {
    pub fn with_columns(mut self, columns: ColumnMapping) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_receive_batch_size(mut self, receive_batch_size: usize) -> Self {
        self.receive_batch_size = receive_batch_size.max(1);
        self
    }
}
