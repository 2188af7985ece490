use std::sync::Arc;
use std::time::Duration;

use cardingest::{queue::MessageQueue, QueueConsumer};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Periodically drains the ingestion queue into the card table.
pub struct DrainWorker {
    consumer: Arc<QueueConsumer>,
    queue: Arc<dyn MessageQueue>,
    batch_size: usize,
    interval: Duration,
}

impl DrainWorker {
    pub fn new(
        consumer: Arc<QueueConsumer>,
        queue: Arc<dyn MessageQueue>,
        batch_size: usize,
        interval: Duration,
    ) -> Self {
        Self {
            consumer,
            queue,
            batch_size: batch_size.max(1),
            interval,
        }
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Queue drain worker started (every {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Queue drain worker stopped");
    }

    async fn tick(&self) {
        match self.consumer.drain(self.queue.as_ref(), self.batch_size).await {
            Ok(report) if report.processed + report.skipped + report.failures.len() > 0 => {
                info!(
                    "Drained queue: {} processed, {} skipped, {} failed",
                    report.processed,
                    report.skipped,
                    report.failures.len()
                );
            }
            Ok(_) => debug!("Queue empty"),
            Err(err) => error!("Queue drain failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardingest::queue::{MemoryQueue, QueueMessage, BULK_UPLOAD_SOURCE};
    use cardstore::{config::StorageConfig, models::CardPayload, CardStore};

    #[tokio::test]
    async fn worker_drains_then_stops_on_shutdown() {
        let store = Arc::new(CardStore::in_memory(StorageConfig::default()));
        let queue = Arc::new(MemoryQueue::new());
        let payload = CardPayload {
            email: Some("w@x.com".into()),
            ..Default::default()
        };
        queue
            .send_message(QueueMessage::for_card(&payload, BULK_UPLOAD_SOURCE).unwrap())
            .await
            .unwrap();

        let worker = DrainWorker::new(
            Arc::new(QueueConsumer::new(store.clone())),
            queue.clone(),
            10,
            Duration::from_millis(5),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(rx));

        for _ in 0..200 {
            if store.email_exists("w@x.com").await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(store.email_exists("w@x.com").await.unwrap());

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(queue.visible_len(), 0);
    }
}
