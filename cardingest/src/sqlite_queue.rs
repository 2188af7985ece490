use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::error::{IngestError, Result};
use crate::queue::{new_receipt_handle, MessageAttribute, MessageQueue, QueueMessage, ReceivedMessage};

/// A durable queue in a local SQLite file.
///
/// A row with a receipt handle is in flight and invisible to receivers.
pub struct SqliteQueue {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteQueue {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let queue = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        queue.initialize_schema()?;
        Ok(queue)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let queue = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        queue.initialize_schema()?;
        Ok(queue)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS queue_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                body TEXT NOT NULL,
                attributes TEXT NOT NULL,
                receipt_handle TEXT UNIQUE,
                receive_count INTEGER NOT NULL DEFAULT 0
            );
            COMMIT;",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IngestError::Queue("sqlite connection mutex poisoned".to_string()))
    }

    /// Messages waiting to be received.
    pub fn visible_len(&self) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM queue_messages WHERE receipt_handle IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Makes every in-flight message visible again. Deliveries left over
    /// from a process that stopped mid-batch would otherwise stay hidden.
    pub fn release_all_in_flight(&self) -> Result<usize> {
        let conn = self.lock()?;
        let released = conn.execute(
            "UPDATE queue_messages SET receipt_handle = NULL WHERE receipt_handle IS NOT NULL",
            [],
        )?;
        if released > 0 {
            log::warn!("Released {} in-flight queue messages", released);
        }
        Ok(released)
    }
}

#[async_trait]
impl MessageQueue for SqliteQueue {
    async fn send_message(&self, message: QueueMessage) -> Result<String> {
        let attributes = serde_json::to_string(&message.attributes)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO queue_messages (body, attributes) VALUES (?1, ?2)",
            params![message.body, attributes],
        )?;
        Ok(conn.last_insert_rowid().to_string())
    }

    async fn receive_messages(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let rows = {
            let mut stmt = tx.prepare(
                "SELECT id, body, attributes FROM queue_messages
                 WHERE receipt_handle IS NULL ORDER BY id LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![max_messages as i64], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut received = Vec::with_capacity(rows.len());
        for (id, body, attributes) in rows {
            let message_id = id.to_string();
            let receipt_handle = new_receipt_handle(&message_id);
            tx.execute(
                "UPDATE queue_messages
                 SET receipt_handle = ?1, receive_count = receive_count + 1
                 WHERE id = ?2",
                params![receipt_handle, id],
            )?;
            let attributes: BTreeMap<String, MessageAttribute> = serde_json::from_str(&attributes)?;
            received.push(ReceivedMessage {
                message_id,
                receipt_handle,
                message: QueueMessage { body, attributes },
            });
        }
        tx.commit()?;
        Ok(received)
    }

    async fn delete_message(&self, receipt_handle: &str) -> Result<()> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM queue_messages WHERE receipt_handle = ?1",
            params![receipt_handle],
        )?;
        if deleted == 0 {
            return Err(IngestError::Queue(format!(
                "unknown receipt handle '{receipt_handle}'"
            )));
        }
        Ok(())
    }

    async fn release_message(&self, receipt_handle: &str) -> Result<()> {
        let conn = self.lock()?;
        let released = conn.execute(
            "UPDATE queue_messages SET receipt_handle = NULL WHERE receipt_handle = ?1",
            params![receipt_handle],
        )?;
        if released == 0 {
            return Err(IngestError::Queue(format!(
                "unknown receipt handle '{receipt_handle}'"
            )));
        }
        Ok(())
    }
}
