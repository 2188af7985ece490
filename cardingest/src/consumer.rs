use std::sync::Arc;

use cardstore::models::LoyaltyCard;
use cardstore::CardStore;
use serde::Serialize;

use crate::error::Result;
use crate::events::InboundMessage;
use crate::queue::{MessageQueue, QueueMessage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageFailure {
    pub message_id: String,
    pub error: String,
    /// Redelivery may succeed; permanent failures are dropped by the drain.
    pub transient: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub failures: Vec<MessageFailure>,
}

impl BatchReport {
    pub fn failure_for(&self, message_id: &str) -> Option<&MessageFailure> {
        self.failures
            .iter()
            .find(|failure| failure.message_id == message_id)
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Written(LoyaltyCard),
    /// The email was already registered.
    Skipped,
}

/// Applies queued card payloads through the same check-then-write path as
/// direct submissions.
pub struct QueueConsumer {
    store: Arc<CardStore>,
}

impl QueueConsumer {
    pub fn new(store: Arc<CardStore>) -> Self {
        Self { store }
    }

    pub async fn handle_message(&self, message: &QueueMessage) -> Result<MessageOutcome> {
        let card = message.payload()?.into_card()?;
        if self.store.email_exists(&card.email).await? {
            log::info!("Email {} already used. Skipping...", card.email);
            return Ok(MessageOutcome::Skipped);
        }

        self.store.upsert_cards(std::slice::from_ref(&card)).await?;
        log::info!("Loyalty card created: {}", card.card_number);
        Ok(MessageOutcome::Written(card))
    }

    /// Handles each message independently; one failure never stops the rest.
    pub async fn on_queue_batch(&self, messages: &[InboundMessage]) -> BatchReport {
        let mut report = BatchReport::default();
        for inbound in messages {
            match self.handle_message(&inbound.message).await {
                Ok(MessageOutcome::Written(_)) => report.processed += 1,
                Ok(MessageOutcome::Skipped) => report.skipped += 1,
                Err(err) => {
                    log::error!("Message {} failed: {}", inbound.message_id, err);
                    report.failures.push(MessageFailure {
                        message_id: inbound.message_id.clone(),
                        error: err.to_string(),
                        transient: err.is_transient(),
                    });
                }
            }
        }
        log::info!(
            "Queue batch of {}: {} processed, {} skipped, {} failed",
            messages.len(),
            report.processed,
            report.skipped,
            report.failures.len()
        );
        report
    }

    /// Receives one batch, handles it, then acknowledges it: handled and
    /// permanently failed messages are deleted, transient failures released.
    pub async fn drain_once(&self, queue: &dyn MessageQueue, max_messages: usize) -> Result<BatchReport> {
        let received = queue.receive_messages(max_messages).await?;
        if received.is_empty() {
            return Ok(BatchReport::default());
        }

        let inbound: Vec<InboundMessage> = received.iter().map(InboundMessage::from).collect();
        let report = self.on_queue_batch(&inbound).await;

        for message in &received {
            match report.failure_for(&message.message_id) {
                Some(failure) if failure.transient => {
                    queue.release_message(&message.receipt_handle).await?;
                }
                Some(failure) => {
                    log::warn!(
                        "Dropping message {} after permanent failure: {}",
                        message.message_id,
                        failure.error
                    );
                    queue.delete_message(&message.receipt_handle).await?;
                }
                None => queue.delete_message(&message.receipt_handle).await?,
            }
        }
        Ok(report)
    }

    /// Drains until the queue is empty or a round makes no progress.
    pub async fn drain(&self, queue: &dyn MessageQueue, max_messages: usize) -> Result<BatchReport> {
        let mut total = BatchReport::default();
        loop {
            let round = self.drain_once(queue, max_messages).await?;
            let settled = round.processed
                + round.skipped
                + round.failures.iter().filter(|failure| !failure.transient).count();
            total.merge(round);
            if settled == 0 {
                return Ok(total);
            }
        }
    }
}
