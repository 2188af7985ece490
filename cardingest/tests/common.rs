use std::sync::Arc;

use cardingest::{
    object_store::MemoryObjectStore, queue::MemoryQueue, CsvProducer, IngestConfig, QueueConsumer,
};
use cardstore::{config::StorageConfig, retry::RetryPolicy, CardStore};

pub const BUCKET: &str = "uploads";

#[allow(dead_code)]
pub struct TestContext {
    pub objects: Arc<MemoryObjectStore>,
    pub queue: Arc<MemoryQueue>,
    pub store: Arc<CardStore>,
    pub producer: CsvProducer,
    pub consumer: QueueConsumer,
}

#[allow(dead_code)]
pub fn storage_config() -> StorageConfig {
    StorageConfig::default().with_retry(RetryPolicy {
        max_attempts: 2,
        initial_delay_ms: 1,
        max_delay_ms: 2,
        request_timeout_ms: 1_000,
    })
}

#[allow(dead_code)]
pub fn init_test_context() -> TestContext {
    let objects = Arc::new(MemoryObjectStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let store = Arc::new(CardStore::in_memory(storage_config()));
    let producer = CsvProducer::new(objects.clone(), queue.clone(), IngestConfig::default());
    let consumer = QueueConsumer::new(store.clone());
    TestContext {
        objects,
        queue,
        store,
        producer,
        consumer,
    }
}

#[allow(dead_code)]
pub const SAMPLE_CSV: &str = "\
card_number,first_name,last_name,email,membership_tier,points
aaaaaaaaaaaa,Ada,Lovelace,ada@x.com,gold,120
,Grace,Hopper,grace@x.com,silver,
cccccccccccc, Alan , Turing ,alan@x.com
";
