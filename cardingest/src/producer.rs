use std::sync::Arc;

use cardstore::models::CardPayload;
use csv::{ReaderBuilder, Trim};
use serde::Serialize;

use crate::error::{IngestError, Result};
use crate::events::FileArrivalEvent;
use crate::mapper::row_to_payload;
use crate::object_store::ObjectStore;
use crate::queue::{MessageQueue, QueueMessage};
use crate::IngestConfig;

/// A row that mapped cleanly but could not be published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRow {
    /// 1-based line where the record starts in the file; the header is line 1.
    pub row_number: usize,
    pub payload: CardPayload,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublishSummary {
    pub bucket: String,
    pub key: String,
    /// Data rows seen, header excluded.
    pub rows: usize,
    pub published: usize,
    /// Rows that could not be decoded or mapped.
    pub rejected: usize,
    pub failed_rows: Vec<FailedRow>,
}

impl PublishSummary {
    pub fn is_complete(&self) -> bool {
        self.rejected == 0 && self.failed_rows.is_empty()
    }
}

/// Turns an uploaded delimited file into one queue message per data row.
pub struct CsvProducer {
    objects: Arc<dyn ObjectStore>,
    queue: Arc<dyn MessageQueue>,
    config: IngestConfig,
}

impl CsvProducer {
    pub fn new(objects: Arc<dyn ObjectStore>, queue: Arc<dyn MessageQueue>, config: IngestConfig) -> Self {
        Self {
            objects,
            queue,
            config,
        }
    }

    /// Handles every object announced by `event`, in order.
    pub async fn on_event(&self, event: &FileArrivalEvent) -> Result<Vec<PublishSummary>> {
        let mut summaries = Vec::new();
        for location in event.locations()? {
            summaries.push(self.on_file_arrival(&location.bucket, &location.key).await?);
        }
        Ok(summaries)
    }

    pub async fn on_file_arrival(&self, bucket: &str, key: &str) -> Result<PublishSummary> {
        let body = self.objects.get_object(bucket, key).await?;
        log::info!("Object uploaded: {}/{} ({} bytes)", bucket, key, body.len());

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(body.as_slice());

        let mut summary = PublishSummary {
            bucket: bucket.to_string(),
            key: key.to_string(),
            ..Default::default()
        };

        let mut last_line = 1;
        for record in reader.records() {
            let row_number = match &record {
                Ok(row) => row.position().map(|position| position.line() as usize),
                Err(err) => err.position().map(|position| position.line() as usize),
            }
            .unwrap_or(last_line + 1);
            last_line = row_number;
            summary.rows += 1;

            let payload = match record
                .map_err(IngestError::from)
                .and_then(|row| row_to_payload(&self.config.columns, &row))
            {
                Ok(payload) => payload,
                Err(err) => {
                    log::warn!("Skipping row {} of {}/{}: {}", row_number, bucket, key, err);
                    summary.rejected += 1;
                    continue;
                }
            };

            let sent = match QueueMessage::for_card(&payload, &self.config.source) {
                Ok(message) => self.queue.send_message(message).await,
                Err(err) => Err(err),
            };
            match sent {
                Ok(message_id) => {
                    log::debug!("Row {} published as message {}", row_number, message_id);
                    summary.published += 1;
                }
                Err(err) => {
                    log::error!("Failed to publish row {} of {}/{}: {}", row_number, bucket, key, err);
                    summary.failed_rows.push(FailedRow {
                        row_number,
                        payload,
                        error: err.to_string(),
                    });
                }
            }
        }

        log::info!(
            "Messages accepted for {}/{}: {} published, {} rejected, {} failed",
            bucket,
            key,
            summary.published,
            summary.rejected,
            summary.failed_rows.len()
        );
        Ok(summary)
    }
}
