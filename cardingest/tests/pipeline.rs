mod common;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use cardingest::{
    error::{IngestError, Result as IngestResult},
    events::{FileArrivalEvent, InboundMessage},
    queue::{MessageQueue, QueueMessage, ReceivedMessage, BULK_UPLOAD_SOURCE},
    CsvProducer, IngestConfig,
};
use cardstore::{
    models::{CardPayload, PointsValue},
    value::AttributeValue,
};
use common::{init_test_context, BUCKET, SAMPLE_CSV};

/// Rejects every `fail_every`-th publish.
struct FailingQueue {
    fail_every: usize,
    sent: Mutex<Vec<QueueMessage>>,
    attempts: Mutex<usize>,
}

#[async_trait]
impl MessageQueue for FailingQueue {
    async fn send_message(&self, message: QueueMessage) -> IngestResult<String> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        if attempt % self.fail_every == 0 {
            return Err(IngestError::Queue("throttled".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(message);
        Ok(format!("m-{}", sent.len()))
    }

    async fn receive_messages(&self, _max_messages: usize) -> IngestResult<Vec<ReceivedMessage>> {
        Ok(Vec::new())
    }

    async fn delete_message(&self, _receipt_handle: &str) -> IngestResult<()> {
        Ok(())
    }

    async fn release_message(&self, _receipt_handle: &str) -> IngestResult<()> {
        Ok(())
    }
}

fn inbound(id: &str, body: &str) -> InboundMessage {
    InboundMessage {
        message_id: id.to_string(),
        message: QueueMessage {
            body: body.to_string(),
            attributes: Default::default(),
        },
    }
}

#[tokio::test]
async fn every_data_row_becomes_one_message() -> Result<()> {
    let ctx = init_test_context();
    ctx.objects.put_object(BUCKET, "cards.csv", SAMPLE_CSV);

    let summary = ctx.producer.on_file_arrival(BUCKET, "cards.csv").await?;
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.published, 3);
    assert!(summary.is_complete());

    let messages = ctx.queue.visible_messages();
    assert_eq!(messages.len(), 3);
    assert!(messages
        .iter()
        .all(|message| message.source() == Some(BULK_UPLOAD_SOURCE)));

    let payloads: Vec<CardPayload> = messages
        .iter()
        .map(QueueMessage::payload)
        .collect::<IngestResult<_>>()?;
    assert_eq!(payloads[0].points, Some(PointsValue::Integer(120)));
    assert_eq!(payloads[1].card_number, None);
    assert_eq!(payloads[1].points, Some(PointsValue::Integer(0)));
    assert_eq!(payloads[2].first_name.as_deref(), Some("Alan"));
    assert_eq!(payloads[2].membership_tier, None);
    assert_eq!(payloads[2].points, Some(PointsValue::Integer(0)));
    Ok(())
}

#[tokio::test]
async fn header_only_file_publishes_nothing() -> Result<()> {
    let ctx = init_test_context();
    ctx.objects
        .put_object(BUCKET, "empty.csv", "card_number,first_name,last_name,email,membership_tier,points\n");

    let summary = ctx.producer.on_file_arrival(BUCKET, "empty.csv").await?;
    assert_eq!(summary.rows, 0);
    assert_eq!(ctx.queue.visible_len(), 0);
    Ok(())
}

#[tokio::test]
async fn bad_rows_and_failed_publishes_do_not_stop_the_file() -> Result<()> {
    let ctx = init_test_context();
    let csv = "\
h1,h2,h3,h4,h5,h6
a1,A,A,a@x.com,,1
b1,B,B,b@x.com,,many
c1,C,C,c@x.com,,3
d1,D,D,d@x.com,,4
";
    ctx.objects.put_object(BUCKET, "mixed.csv", csv);
    let queue = Arc::new(FailingQueue {
        fail_every: 2,
        sent: Mutex::new(Vec::new()),
        attempts: Mutex::new(0),
    });
    let producer = CsvProducer::new(ctx.objects.clone(), queue.clone(), IngestConfig::default());

    let summary = producer.on_file_arrival(BUCKET, "mixed.csv").await?;
    assert_eq!(summary.rows, 4);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.published, 2);
    assert_eq!(summary.failed_rows.len(), 1);

    let failed = &summary.failed_rows[0];
    assert_eq!(failed.row_number, 4);
    assert_eq!(failed.payload.card_number.as_deref(), Some("c1"));
    assert_eq!(queue.sent.lock().unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn failed_rows_report_the_line_they_start_on() -> Result<()> {
    let ctx = init_test_context();
    let csv = "\
h1,h2,h3,h4,h5,h6
a1,A,A,a@x.com,,1

b1,\"Multi
Line\",B,b@x.com,,2
c1,C,C,c@x.com,,3
d1,D,D,d@x.com,,4
";
    ctx.objects.put_object(BUCKET, "lines.csv", csv);
    let queue = Arc::new(FailingQueue {
        fail_every: 2,
        sent: Mutex::new(Vec::new()),
        attempts: Mutex::new(0),
    });
    let producer = CsvProducer::new(ctx.objects.clone(), queue.clone(), IngestConfig::default());

    let summary = producer.on_file_arrival(BUCKET, "lines.csv").await?;
    assert_eq!(summary.rows, 4);
    assert_eq!(summary.published, 2);

    let lines: Vec<(usize, Option<&str>)> = summary
        .failed_rows
        .iter()
        .map(|failed| (failed.row_number, failed.payload.card_number.as_deref()))
        .collect();
    assert_eq!(lines, vec![(4, Some("b1")), (7, Some("d1"))]);
    Ok(())
}

#[tokio::test]
async fn custom_column_mapping_skips_ignored_columns() -> Result<()> {
    let ctx = init_test_context();
    ctx.objects
        .put_object(BUCKET, "export.csv", "email,internal_id,points\nz@x.com,991,7\n");
    let config = IngestConfig::default().with_columns("email,ignore,points".parse()?);
    let producer = CsvProducer::new(ctx.objects.clone(), ctx.queue.clone(), config);

    producer.on_file_arrival(BUCKET, "export.csv").await?;
    let payload = ctx.queue.visible_messages()[0].payload()?;
    assert_eq!(payload.email.as_deref(), Some("z@x.com"));
    assert_eq!(payload.card_number, None);
    assert_eq!(payload.points, Some(PointsValue::Integer(7)));
    Ok(())
}

#[tokio::test]
async fn missing_object_fails_the_signal() -> Result<()> {
    let ctx = init_test_context();
    let event = FileArrivalEvent::single(BUCKET, "nope.csv");
    let err = ctx.producer.on_event(&event).await.unwrap_err();
    assert!(matches!(err, IngestError::ObjectStore(_)));
    Ok(())
}

#[tokio::test]
async fn consumer_counts_each_message_independently() -> Result<()> {
    let ctx = init_test_context();
    let messages = vec![
        inbound("m-1", r#"{"card_number":"abc","email":"a@x.com","points":"5"}"#),
        inbound("m-2", r#"{"email":"a@x.com"}"#),
        inbound("m-3", "not json"),
        inbound("m-4", r#"{"first_name":"No","last_name":"Email"}"#),
        inbound("m-5", r#"{"email":"b@x.com"}"#),
    ];

    let report = ctx.consumer.on_queue_batch(&messages).await;
    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped, 1);
    let failed: Vec<_> = report.failures.iter().map(|f| f.message_id.as_str()).collect();
    assert_eq!(failed, vec!["m-3", "m-4"]);
    assert!(report.failures.iter().all(|f| !f.transient));

    let card = ctx.store.get_card("abc").await?.unwrap();
    assert_eq!(card["points"], AttributeValue::Int(5));

    // The payload without points or a card number got defaults.
    let cards = ctx.store.list_cards().await?;
    assert_eq!(cards.len(), 2);
    let generated = cards
        .iter()
        .find(|card| card["email"] == AttributeValue::from("b@x.com"))
        .unwrap();
    assert_eq!(generated["points"], AttributeValue::Int(0));
    Ok(())
}

#[tokio::test]
async fn file_to_table_through_the_queue() -> Result<()> {
    let ctx = init_test_context();
    ctx.objects.put_object(BUCKET, "new cards.csv", SAMPLE_CSV);

    let event: FileArrivalEvent = serde_json::from_value(serde_json::json!({
        "Records": [{"s3": {"bucket": {"name": BUCKET}, "object": {"key": "new+cards.csv"}}}]
    }))?;
    let summaries = ctx.producer.on_event(&event).await?;
    assert_eq!(summaries[0].published, 3);

    let report = ctx.consumer.drain(ctx.queue.as_ref(), 2).await?;
    assert_eq!(report.processed, 3);
    assert_eq!(ctx.queue.visible_len(), 0);
    assert_eq!(ctx.queue.in_flight_len(), 0);
    assert!(ctx.store.email_exists("grace@x.com").await?);

    // Uploading the same file again only produces skips.
    ctx.producer.on_file_arrival(BUCKET, "new cards.csv").await?;
    let again = ctx.consumer.drain(ctx.queue.as_ref(), 10).await?;
    assert_eq!(again.processed, 0);
    assert_eq!(again.skipped, 3);
    assert_eq!(ctx.store.list_cards().await?.len(), 3);
    Ok(())
}
