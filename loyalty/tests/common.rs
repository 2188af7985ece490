use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use cardingest::{
    object_store::MemoryObjectStore, queue::MemoryQueue, CsvProducer, IngestConfig, QueueConsumer,
};
use cardstore::{config::StorageConfig, CardStore};
use loyalty::{build_router, AppState};
use serde_json::Value;
use tower::util::ServiceExt;

const BODY_LIMIT: usize = 1 << 20;

#[allow(dead_code)]
pub struct TestContext {
    pub app: Router,
    pub store: Arc<CardStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub queue: Arc<MemoryQueue>,
}

pub fn init_test_context() -> TestContext {
    let store = Arc::new(CardStore::in_memory(StorageConfig::default()));
    let objects = Arc::new(MemoryObjectStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let producer = Arc::new(CsvProducer::new(
        objects.clone(),
        queue.clone(),
        IngestConfig::default(),
    ));
    let consumer = Arc::new(QueueConsumer::new(store.clone()));
    let app = build_router(AppState::new(store.clone(), producer, consumer));
    TestContext {
        app,
        store,
        objects,
        queue,
    }
}

#[allow(dead_code)]
pub async fn get(app: &Router, uri: &str) -> anyhow::Result<(StatusCode, Value)> {
    let request = Request::builder().uri(uri).body(Body::empty())?;
    send(app, request).await
}

#[allow(dead_code)]
pub async fn post_json(app: &Router, uri: &str, body: &str) -> anyhow::Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?;
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> anyhow::Result<(StatusCode, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let body = to_bytes(response.into_body(), BODY_LIMIT).await?;
    let value: Value = serde_json::from_slice(&body)?;
    Ok((status, value))
}
