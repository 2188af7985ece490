pub mod worker;

use std::{collections::HashSet, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::HeaderName, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cardingest::{
    error::IngestError,
    events::{FileArrivalEvent, QueueBatchEvent},
    object_store::LocalObjectStore,
    sqlite_queue::SqliteQueue,
    ColumnMapping, CsvProducer, IngestConfig, QueueConsumer,
};
use cardstore::{
    config::{StorageConfig, DEFAULT_EMAIL_INDEX, DEFAULT_TABLE_NAME},
    errors::StorageError,
    models::{CardPayload, LoyaltyCard},
    value::item_to_json,
    CardStore,
};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::{signal, sync::watch};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::worker::DrainWorker;

const EMAIL_ALREADY_USED: &str = "Email already used";
const CARD_NOT_FOUND: &str = "Loyalty card not found";

/// Runs the command line interface for the loyalty card service.
pub async fn run_cli() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Serve(args)) => run_server(args).await?,
        Some(Command::Import(args)) => run_import(args).await?,
        Some(Command::Drain(args)) => run_drain(args).await?,
        None => {
            println!("No subcommand provided. Use --help to see available commands.");
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Starts the loyalty card HTTP service
    Serve(ServeArgs),
    /// Publishes one queue message per row of an uploaded CSV file
    Import(ImportArgs),
    /// Applies queued card messages until the queue is empty
    Drain(DrainArgs),
}

#[derive(Args)]
struct StoreArgs {
    /// SQLite file holding the card table and the ingestion queue
    #[arg(long, env = "LOYALTY_DB_PATH", default_value = "loyalty.sqlite")]
    db_path: PathBuf,
    /// Name of the loyalty card table
    #[arg(long, env = "LOYALTY_TABLE_NAME", default_value = DEFAULT_TABLE_NAME)]
    table_name: String,
    /// Secondary index used for the email uniqueness check
    #[arg(long, env = "LOYALTY_EMAIL_INDEX", default_value = DEFAULT_EMAIL_INDEX)]
    email_index: String,
    /// Items per batched write
    #[arg(long, env = "LOYALTY_BATCH_SIZE", default_value_t = 25)]
    batch_size: usize,
    /// Directory holding uploaded objects as <bucket>/<key>
    #[arg(long, env = "LOYALTY_OBJECT_ROOT", default_value = "uploads")]
    object_root: PathBuf,
    /// Comma-separated column layout of uploaded CSV files
    #[arg(
        long,
        env = "LOYALTY_CSV_COLUMNS",
        default_value = "card_number,first_name,last_name,email,membership_tier,points"
    )]
    csv_columns: ColumnMapping,
}

#[derive(Args)]
struct ServeArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Socket address to bind the HTTP service
    #[arg(long, env = "LOYALTY_BIND", default_value = "127.0.0.1:3000")]
    bind: String,
    /// Milliseconds between background queue drains; 0 disables the worker
    #[arg(long, env = "LOYALTY_DRAIN_INTERVAL_MS", default_value_t = 1000)]
    drain_interval_ms: u64,
}

#[derive(Args)]
struct ImportArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Bucket the file was uploaded to
    bucket: String,
    /// Object key of the uploaded file
    key: String,
}

#[derive(Args)]
struct DrainArgs {
    #[command(flatten)]
    store: StoreArgs,
}

/// Everything an entry point needs, opened from the CLI settings.
struct Services {
    store: Arc<CardStore>,
    queue: Arc<SqliteQueue>,
    producer: Arc<CsvProducer>,
    consumer: Arc<QueueConsumer>,
    ingest: IngestConfig,
}

impl StoreArgs {
    fn open(&self) -> anyhow::Result<Services> {
        let config = StorageConfig::new(&self.table_name)
            .with_email_index(&self.email_index)
            .with_batch_size(self.batch_size);
        let store = Arc::new(
            CardStore::open_sqlite(&self.db_path, config)
                .with_context(|| format!("failed to open card table at {}", self.db_path.display()))?,
        );
        let queue = Arc::new(
            SqliteQueue::open(&self.db_path)
                .with_context(|| format!("failed to open queue at {}", self.db_path.display()))?,
        );
        let ingest = IngestConfig::default().with_columns(self.csv_columns.clone());
        let objects = Arc::new(LocalObjectStore::new(&self.object_root));
        let producer = Arc::new(CsvProducer::new(objects, queue.clone(), ingest.clone()));
        let consumer = Arc::new(QueueConsumer::new(store.clone()));
        Ok(Services {
            store,
            queue,
            producer,
            consumer,
            ingest,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CardStore>,
    pub producer: Arc<CsvProducer>,
    pub consumer: Arc<QueueConsumer>,
}

impl AppState {
    pub fn new(store: Arc<CardStore>, producer: Arc<CsvProducer>, consumer: Arc<QueueConsumer>) -> Self {
        Self {
            store,
            producer,
            consumer,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Upstream(String),
}

impl ApiError {
    fn from_storage(err: StorageError) -> Self {
        match err {
            StorageError::InvalidArg(msg) => ApiError::Validation(msg),
            other => ApiError::Upstream(other.to_string()),
        }
    }

    fn from_ingest(err: IngestError) -> Self {
        match err {
            IngestError::Storage(storage) => ApiError::from_storage(storage),
            IngestError::InvalidEvent(msg) | IngestError::Mapping(msg) => ApiError::Validation(msg),
            IngestError::Json(err) => ApiError::Validation(err.to_string()),
            other => ApiError::Upstream(other.to_string()),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Conflict(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        let body = Json(json!({ "status": "error", "message": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(value: StorageError) -> Self {
        ApiError::from_storage(value)
    }
}

impl From<IngestError> for ApiError {
    fn from(value: IngestError) -> Self {
        ApiError::from_ingest(value)
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone, Deserialize)]
struct CardQuery {
    #[serde(default)]
    card_number: Option<String>,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let addr: SocketAddr = args.bind.parse().context("failed to parse bind address")?;
    let services = args.store.open()?;
    services
        .queue
        .release_all_in_flight()
        .context("failed to recover in-flight queue messages")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = (args.drain_interval_ms > 0).then(|| {
        let worker = DrainWorker::new(
            services.consumer.clone(),
            services.queue.clone(),
            services.ingest.receive_batch_size,
            Duration::from_millis(args.drain_interval_ms),
        );
        tokio::spawn(worker.run(shutdown_rx))
    });

    let state = AppState::new(services.store, services.producer, services.consumer);
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind loyalty listener")?;

    info!("Loyalty service listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("loyalty server error")?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker {
        handle.await.context("drain worker panicked")?;
    }
    Ok(())
}

async fn run_import(args: ImportArgs) -> anyhow::Result<()> {
    let services = args.store.open()?;
    let summary = services
        .producer
        .on_file_arrival(&args.bucket, &args.key)
        .await
        .with_context(|| format!("failed to import {}/{}", args.bucket, args.key))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_drain(args: DrainArgs) -> anyhow::Result<()> {
    let services = args.store.open()?;
    services.queue.release_all_in_flight()?;
    let report = services
        .consumer
        .drain(services.queue.as_ref(), services.ingest.receive_batch_size)
        .await
        .context("failed to drain queue")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Builds the HTTP router used by the loyalty card service.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/loyalty-cards",
            get(list_loyalty_cards).post(create_loyalty_cards),
        )
        .route("/loyalty-cards/:card_number", get(get_loyalty_card))
        .route("/events/file-arrival", post(file_arrival))
        .route("/events/queue-batch", post(queue_batch))
        .layer(middleware::map_response(cors_headers))
        .with_state(state)
}

async fn cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    for (name, value) in [
        ("access-control-allow-origin", "*"),
        ("access-control-allow-headers", "Content-Type, Authorization, card_number"),
        ("access-control-allow-methods", "GET, POST, OPTIONS"),
        ("access-control-allow-credentials", "true"),
    ] {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    response
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body)
        .map_err(|err| ApiError::Validation(format!("Invalid request body: {err}")))
}

/// Accepts one card object or an array of them.
fn parse_card_payloads(body: &[u8]) -> ApiResult<Vec<CardPayload>> {
    let value: JsonValue = parse_json(body)?;
    let entries = match value {
        JsonValue::Object(_) => vec![value],
        JsonValue::Array(entries) => entries,
        _ => {
            return Err(ApiError::Validation(
                "Invalid request body: Expected a loyalty card or a list of loyalty cards"
                    .to_string(),
            ))
        }
    };
    entries
        .into_iter()
        .enumerate()
        .map(|(position, entry)| {
            if !entry.is_object() {
                return Err(ApiError::Validation(format!(
                    "Invalid request body: entry {position} is not an object"
                )));
            }
            serde_json::from_value(entry).map_err(|err| {
                ApiError::Validation(format!("Invalid request body: entry {position}: {err}"))
            })
        })
        .collect()
}

async fn create_loyalty_cards(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<JsonValue>> {
    let cards = parse_card_payloads(&body)?
        .into_iter()
        .map(CardPayload::into_card)
        .collect::<Result<Vec<LoyaltyCard>, _>>()?;

    let mut numbers = HashSet::with_capacity(cards.len());
    for card in &cards {
        if !numbers.insert(card.card_number.as_str()) {
            return Err(ApiError::Validation(format!(
                "Duplicate card_number in request: {}",
                card.card_number
            )));
        }
    }

    let mut seen = HashSet::with_capacity(cards.len());
    for card in &cards {
        if !seen.insert(card.email.as_str()) || state.store.email_exists(&card.email).await? {
            return Err(ApiError::Conflict(EMAIL_ALREADY_USED.to_string()));
        }
    }

    let report = state.store.upsert_cards(&cards).await?;
    info!("Created {} loyalty cards", report.written);
    Ok(Json(json!({ "status": "success", "loyalty_cards": cards })))
}

async fn list_loyalty_cards(
    State(state): State<AppState>,
    Query(query): Query<CardQuery>,
) -> ApiResult<Json<JsonValue>> {
    if let Some(card_number) = query.card_number.filter(|value| !value.is_empty()) {
        return find_card(&state, &card_number).await;
    }

    let items = state.store.list_cards().await?;
    let items: Vec<JsonValue> = items.iter().map(item_to_json).collect();
    Ok(Json(json!({ "status": "success", "items": items })))
}

async fn get_loyalty_card(
    State(state): State<AppState>,
    Path(card_number): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    find_card(&state, &card_number).await
}

async fn find_card(state: &AppState, card_number: &str) -> ApiResult<Json<JsonValue>> {
    let item = state
        .store
        .get_card(card_number)
        .await?
        .ok_or_else(|| ApiError::NotFound(CARD_NOT_FOUND.to_string()))?;
    Ok(Json(json!({ "status": "success", "item": item_to_json(&item) })))
}

async fn file_arrival(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<JsonValue>> {
    let event: FileArrivalEvent = parse_json(&body)?;
    for summary in state.producer.on_event(&event).await? {
        info!(
            "Queued {} of {} rows from s3://{}/{} ({} rejected, {} failed)",
            summary.published,
            summary.rows,
            summary.bucket,
            summary.key,
            summary.rejected,
            summary.failed_rows.len()
        );
    }
    Ok(Json(json!({
        "status": "success",
        "message": "Messages accepted!",
    })))
}

async fn queue_batch(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<JsonValue>> {
    let event: QueueBatchEvent = parse_json(&body)?;
    let report = state.consumer.on_queue_batch(&event.into_messages()).await;
    let failures: Vec<JsonValue> = report
        .failures
        .iter()
        .map(|failure| json!({ "item_identifier": failure.message_id }))
        .collect();
    Ok(Json(json!({
        "status": "success",
        "message": "Messages processed successfully!",
        "processed": report.processed,
        "skipped": report.skipped,
        "batch_item_failures": failures,
    })))
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received");
}
