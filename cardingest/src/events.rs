use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::queue::{MessageAttribute, QueueMessage, ReceivedMessage};

/// Object-store notification announcing one or more uploaded files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileArrivalEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<FileArrivalRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileArrivalRecord {
    pub s3: ObjectNotification,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectNotification {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRef {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

/// Decodes a notification key: form encoding, so `+` is a space.
pub fn decode_object_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|err| IngestError::InvalidEvent(format!("object key '{raw}' is not valid UTF-8: {err}")))
}

impl FileArrivalEvent {
    pub fn single(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            records: vec![FileArrivalRecord {
                s3: ObjectNotification {
                    bucket: BucketRef { name: bucket.into() },
                    object: ObjectRef { key: key.into() },
                },
            }],
        }
    }

    /// Every announced object, keys decoded.
    pub fn locations(&self) -> Result<Vec<ObjectLocation>> {
        if self.records.is_empty() {
            return Err(IngestError::InvalidEvent(
                "file-arrival event has no records".to_string(),
            ));
        }
        self.records
            .iter()
            .map(|record| {
                Ok(ObjectLocation {
                    bucket: record.s3.bucket.name.clone(),
                    key: decode_object_key(&record.s3.object.key)?,
                })
            })
            .collect()
    }
}

/// A batch of delivered queue messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueBatchEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub message_id: String,
    pub body: String,
    #[serde(default)]
    pub message_attributes: BTreeMap<String, MessageAttribute>,
}

/// One message as the consumer sees it, whichever way it was delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: String,
    pub message: QueueMessage,
}

impl From<QueueRecord> for InboundMessage {
    fn from(record: QueueRecord) -> Self {
        Self {
            message_id: record.message_id,
            message: QueueMessage {
                body: record.body,
                attributes: record.message_attributes,
            },
        }
    }
}

impl From<&ReceivedMessage> for InboundMessage {
    fn from(received: &ReceivedMessage) -> Self {
        Self {
            message_id: received.message_id.clone(),
            message: received.message.clone(),
        }
    }
}

impl QueueBatchEvent {
    pub fn into_messages(self) -> Vec<InboundMessage> {
        self.records.into_iter().map(InboundMessage::from).collect()
    }
}
