use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use cardstore::models::CardPayload;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

pub const SOURCE_ATTRIBUTE: &str = "source";
pub const BULK_UPLOAD_SOURCE: &str = "bulk-upload";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAttribute {
    #[serde(default)]
    pub string_value: Option<String>,
    pub data_type: String,
}

impl MessageAttribute {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            string_value: Some(value.into()),
            data_type: "String".to_string(),
        }
    }
}

/// A message as published: a JSON body plus typed attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub body: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, MessageAttribute>,
}

impl QueueMessage {
    /// One card payload tagged with its `source` marker.
    pub fn for_card(payload: &CardPayload, source: &str) -> Result<Self> {
        let mut attributes = BTreeMap::new();
        attributes.insert(SOURCE_ATTRIBUTE.to_string(), MessageAttribute::string(source));
        Ok(Self {
            body: serde_json::to_string(payload)?,
            attributes,
        })
    }

    pub fn source(&self) -> Option<&str> {
        self.attributes
            .get(SOURCE_ATTRIBUTE)
            .and_then(|attribute| attribute.string_value.as_deref())
    }

    pub fn payload(&self) -> Result<CardPayload> {
        let value: serde_json::Value = serde_json::from_str(&self.body)?;
        if !value.is_object() {
            return Err(IngestError::Mapping(
                "message body must be a JSON object".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// A delivered message, hidden from other receivers until deleted or released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub message: QueueMessage,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Publishes a message and returns its id.
    async fn send_message(&self, message: QueueMessage) -> Result<String>;

    async fn receive_messages(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>>;

    /// Acknowledges a delivery; the message is gone for good.
    async fn delete_message(&self, receipt_handle: &str) -> Result<()>;

    /// Makes a delivered message visible again for redelivery.
    async fn release_message(&self, receipt_handle: &str) -> Result<()>;
}

pub(crate) fn new_receipt_handle(message_id: &str) -> String {
    let token: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("{message_id}:{token}")
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    ready: VecDeque<(String, QueueMessage)>,
    in_flight: HashMap<String, (String, QueueMessage)>,
}

/// FIFO queue held in process memory.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| IngestError::Queue("queue state poisoned".to_string()))
    }

    /// Messages waiting to be received.
    pub fn visible_len(&self) -> usize {
        self.lock().map(|state| state.ready.len()).unwrap_or(0)
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().map(|state| state.in_flight.len()).unwrap_or(0)
    }

    /// Snapshot of the waiting messages, oldest first.
    pub fn visible_messages(&self) -> Vec<QueueMessage> {
        self.lock()
            .map(|state| state.ready.iter().map(|(_, message)| message.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn send_message(&self, message: QueueMessage) -> Result<String> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let message_id = format!("msg-{}", state.next_id);
        state.ready.push_back((message_id.clone(), message));
        Ok(message_id)
    }

    async fn receive_messages(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>> {
        let mut state = self.lock()?;
        let count = max_messages.min(state.ready.len());
        let mut received = Vec::with_capacity(count);
        for _ in 0..count {
            let Some((message_id, message)) = state.ready.pop_front() else {
                break;
            };
            let receipt_handle = new_receipt_handle(&message_id);
            state
                .in_flight
                .insert(receipt_handle.clone(), (message_id.clone(), message.clone()));
            received.push(ReceivedMessage {
                message_id,
                receipt_handle,
                message,
            });
        }
        Ok(received)
    }

    async fn delete_message(&self, receipt_handle: &str) -> Result<()> {
        let mut state = self.lock()?;
        state
            .in_flight
            .remove(receipt_handle)
            .map(|_| ())
            .ok_or_else(|| IngestError::Queue(format!("unknown receipt handle '{receipt_handle}'")))
    }

    async fn release_message(&self, receipt_handle: &str) -> Result<()> {
        let mut state = self.lock()?;
        let entry = state
            .in_flight
            .remove(receipt_handle)
            .ok_or_else(|| IngestError::Queue(format!("unknown receipt handle '{receipt_handle}'")))?;
        state.ready.push_back(entry);
        Ok(())
    }
}
