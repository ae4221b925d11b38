//! Message lifecycle operations
//!
//! Single authority for message status transitions: send, the atomic
//! receive claim, best-effort delete and the reclamation sweeps all go
//! through here. No other component writes `Message.status`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SqsError;
use crate::model::{MessageRecord, MessageStatus, QueueRecord};
use crate::store::{retry_once, MessageStore, QueueStore};

/// Interval between long-poll re-attempts
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Most messages one receive call may claim
const MAX_BATCH: u32 = 10;

/// Outcome of a send
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
    pub md5_of_body: String,
    pub md5_of_attributes: Option<String>,
}

/// Operations on the message relation
pub struct MessageEngine {
    queues: Arc<dyn QueueStore>,
    messages: Arc<dyn MessageStore>,
}

impl MessageEngine {
    pub fn new(queues: Arc<dyn QueueStore>, messages: Arc<dyn MessageStore>) -> Self {
        Self { queues, messages }
    }

    async fn queue(&self, url: &str) -> Result<QueueRecord, SqsError> {
        retry_once(|| self.queues.get(url))
            .await?
            .ok_or_else(|| SqsError::QueueNotFound(url.to_string()))
    }

    /// Store a message. Created Delayed when the queue has a delay
    /// configured, Initial otherwise.
    pub async fn send(
        &self,
        queue_url: &str,
        body: String,
        attributes: HashMap<String, String>,
    ) -> Result<SendReceipt, SqsError> {
        let queue = self.queue(queue_url).await?;
        if body.len() > queue.attributes.maximum_message_size as usize {
            return Err(SqsError::InvalidParameter(format!(
                "message body exceeds {} bytes",
                queue.attributes.maximum_message_size
            )));
        }

        let now = Utc::now();
        let (status, reset) = if queue.attributes.delay_seconds > 0 {
            let reset = now + chrono::Duration::seconds(i64::from(queue.attributes.delay_seconds));
            (MessageStatus::Delayed, Some(reset))
        } else {
            (MessageStatus::Initial, None)
        };

        let receipt = SendReceipt {
            message_id: Uuid::new_v4().to_string(),
            md5_of_body: md5_hex(body.as_bytes()),
            md5_of_attributes: md5_of_attributes(&attributes),
        };

        let message = MessageRecord {
            id: Uuid::new_v4().to_string(),
            queue_url: queue.url.clone(),
            queue_arn: queue.arn.clone(),
            message_id: receipt.message_id.clone(),
            body,
            attributes,
            md5_of_body: receipt.md5_of_body.clone(),
            md5_of_attributes: receipt.md5_of_attributes.clone(),
            status,
            reset,
            retries: 0,
            receipt_handle: None,
            created: now,
        };

        retry_once(|| self.messages.insert(message.clone())).await?;
        info!(
            queue = %queue.url,
            message_id = %receipt.message_id,
            status = status.as_str(),
            "sent message"
        );
        Ok(receipt)
    }

    /// Claim up to `max_messages` visible messages, making each Invisible
    /// until `visibility_timeout` (the queue default unless overridden)
    /// passes. With a wait time, re-polls until the deadline and returns as
    /// soon as anything is available. Long polling is a bounded re-poll
    /// loop, not a blocking server primitive.
    pub async fn receive(
        &self,
        queue_url: &str,
        max_messages: u32,
        visibility_timeout: Option<u32>,
        wait_time: Option<u32>,
    ) -> Result<Vec<MessageRecord>, SqsError> {
        let queue = self.queue(queue_url).await?;
        let max = max_messages.clamp(1, MAX_BATCH);
        let visibility =
            visibility_timeout.unwrap_or(queue.attributes.visibility_timeout);
        let wait = wait_time
            .unwrap_or(queue.attributes.receive_message_wait_time_seconds)
            .min(20);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(u64::from(wait));

        loop {
            let reset = Utc::now() + chrono::Duration::seconds(i64::from(visibility));
            let handles: Vec<String> = (0..max).map(|_| new_receipt_handle()).collect();
            let claimed = retry_once(|| {
                self.messages.claim(queue_url, handles.clone(), reset)
            })
            .await?;

            if !claimed.is_empty() {
                debug!(queue = %queue_url, count = claimed.len(), "claimed messages");
                return Ok(claimed);
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(claimed);
            }
            tokio::time::sleep(remaining.min(POLL_INTERVAL)).await;
        }
    }

    /// Delete the message whose current receipt handle matches exactly.
    /// Stale or superseded handles match nothing; a miss is not an error.
    pub async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<bool, SqsError> {
        if receipt_handle.is_empty() {
            return Err(SqsError::InvalidParameter(
                "receipt handle must not be empty".into(),
            ));
        }
        self.queue(queue_url).await?;

        let deleted =
            retry_once(|| self.messages.delete_by_receipt(queue_url, receipt_handle)).await?;
        if deleted {
            info!(queue = %queue_url, "deleted message");
        } else {
            debug!(queue = %queue_url, "delete matched no message");
        }
        Ok(deleted)
    }

    /// Sweep: unacknowledged claims whose visibility timeout has passed
    /// become redeliverable.
    pub async fn expire_invisible(&self, queue_url: &str) -> Result<u64, SqsError> {
        self.expire_invisible_at(queue_url, Utc::now()).await
    }

    pub async fn expire_invisible_at(
        &self,
        queue_url: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, SqsError> {
        Ok(retry_once(|| self.messages.release_expired(queue_url, now)).await?)
    }

    /// Sweep: delayed messages whose delay has passed become receivable.
    pub async fn expire_delayed(&self, queue_url: &str) -> Result<u64, SqsError> {
        self.expire_delayed_at(queue_url, Utc::now()).await
    }

    pub async fn expire_delayed_at(
        &self,
        queue_url: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, SqsError> {
        Ok(retry_once(|| self.messages.awaken_delayed(queue_url, now)).await?)
    }

    /// Sweep: messages older than the queue's retention period are removed.
    pub async fn expire_retained(&self, queue_url: &str) -> Result<u64, SqsError> {
        self.expire_retained_at(queue_url, Utc::now()).await
    }

    pub async fn expire_retained_at(
        &self,
        queue_url: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, SqsError> {
        let queue = self.queue(queue_url).await?;
        let cutoff =
            now - chrono::Duration::seconds(i64::from(queue.attributes.message_retention_period));
        Ok(retry_once(|| self.messages.drop_older_than(queue_url, cutoff)).await?)
    }

    /// Sweep: messages claimed more than `max_receive_count` times move to
    /// the dead-letter queue named by `target_arn`, retry counter reset.
    pub async fn redrive(
        &self,
        queue_url: &str,
        target_arn: &str,
        max_receive_count: u32,
    ) -> Result<u64, SqsError> {
        if mockstack_core::arn::parse_queue_arn(target_arn).is_none() {
            return Err(SqsError::InvalidParameter(format!(
                "invalid redrive target ARN: {target_arn}"
            )));
        }
        let target = retry_once(|| self.queues.get_by_arn(target_arn))
            .await?
            .ok_or_else(|| SqsError::QueueNotFound(target_arn.to_string()))?;

        let moved = retry_once(|| {
            self.messages
                .redrive(queue_url, &target.url, &target.arn, max_receive_count)
        })
        .await?;
        if moved > 0 {
            info!(
                queue = %queue_url,
                target = %target.url,
                moved,
                "redrove messages to dead-letter queue"
            );
        }
        Ok(moved)
    }
}

fn new_receipt_handle() -> String {
    // Two UUIDs back to back: unguessable and visibly distinct from
    // message IDs.
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Order-independent digest of an attribute set: key-sorted, each name and
/// value length-prefixed.
fn md5_of_attributes(attributes: &HashMap<String, String>) -> Option<String> {
    if attributes.is_empty() {
        return None;
    }
    let mut keys: Vec<&String> = attributes.keys().collect();
    keys.sort();

    let mut buf: Vec<u8> = Vec::new();
    for key in keys {
        let value = &attributes[key];
        buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf.push(1); // string transport type
        buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        buf.extend_from_slice(value.as_bytes());
    }
    Some(md5_hex(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queues::QueueEngine;
    use crate::store::{MemoryMessageStore, MemoryQueueStore};

    fn engines() -> (QueueEngine, MessageEngine) {
        let queues: Arc<MemoryQueueStore> = Arc::new(MemoryQueueStore::new());
        let messages: Arc<MemoryMessageStore> = Arc::new(MemoryMessageStore::new());
        (
            QueueEngine::new(queues.clone(), messages.clone()),
            MessageEngine::new(queues, messages),
        )
    }

    #[tokio::test]
    async fn test_send_to_missing_queue() {
        let (_, engine) = engines();
        let result = engine
            .send("http://nope", "hello".into(), HashMap::new())
            .await;
        assert!(matches!(result, Err(SqsError::QueueNotFound(_))));
    }

    #[tokio::test]
    async fn test_send_then_receive_then_empty() {
        // Scenario: one message, first receive claims it, second sees none.
        let (queues, engine) = engines();
        let queue = queues
            .create_queue("eu-central-1", "q1", "AKID")
            .await
            .unwrap();

        let receipt = engine
            .send(&queue.url, "hello".into(), HashMap::new())
            .await
            .unwrap();
        assert!(!receipt.md5_of_body.is_empty());
        assert!(receipt.md5_of_attributes.is_none());

        let first = engine
            .receive(&queue.url, 1, Some(30), None)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].body, "hello");
        assert_eq!(first[0].retries, 1);
        let handle = first[0].receipt_handle.clone().unwrap();
        assert!(!handle.is_empty());

        let second = engine
            .receive(&queue.url, 1, Some(30), None)
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_visibility_expiry_redelivers_with_new_handle() {
        // Scenario: unacknowledged claim expires, the sweep releases it, a
        // later receive gets the same message with a fresh handle.
        let (queues, engine) = engines();
        let queue = queues
            .create_queue("eu-central-1", "q1", "AKID")
            .await
            .unwrap();
        engine
            .send(&queue.url, "hello".into(), HashMap::new())
            .await
            .unwrap();

        let first = engine.receive(&queue.url, 1, Some(30), None).await.unwrap();
        let first_handle = first[0].receipt_handle.clone().unwrap();

        let past_visibility = Utc::now() + chrono::Duration::seconds(31);
        let released = engine
            .expire_invisible_at(&queue.url, past_visibility)
            .await
            .unwrap();
        assert_eq!(released, 1);

        let again = engine.receive(&queue.url, 1, Some(30), None).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].message_id, first[0].message_id);
        assert_eq!(again[0].retries, 2);
        assert_ne!(again[0].receipt_handle.as_ref().unwrap(), &first_handle);
    }

    #[tokio::test]
    async fn test_delayed_message_invisible_until_awakened() {
        // Scenario: delay-seconds queue; nothing receivable until the
        // delayed sweep runs past the delay.
        let (queues, engine) = engines();
        let queue = queues
            .create_queue("eu-central-1", "q1", "AKID")
            .await
            .unwrap();
        let mut updates = HashMap::new();
        updates.insert("DelaySeconds".to_string(), "5".to_string());
        queues
            .set_queue_attributes(&queue.url, &updates)
            .await
            .unwrap();

        engine
            .send(&queue.url, "later".into(), HashMap::new())
            .await
            .unwrap();

        let now = engine.receive(&queue.url, 1, Some(30), None).await.unwrap();
        assert!(now.is_empty());

        // Before the delay passes the sweep is a no-op.
        assert_eq!(
            engine.expire_delayed_at(&queue.url, Utc::now()).await.unwrap(),
            0
        );

        let past_delay = Utc::now() + chrono::Duration::seconds(6);
        assert_eq!(
            engine
                .expire_delayed_at(&queue.url, past_delay)
                .await
                .unwrap(),
            1
        );

        let after = engine.receive(&queue.url, 1, Some(30), None).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].body, "later");
    }

    #[tokio::test]
    async fn test_delete_is_best_effort() {
        let (queues, engine) = engines();
        let queue = queues
            .create_queue("eu-central-1", "q1", "AKID")
            .await
            .unwrap();
        engine
            .send(&queue.url, "hello".into(), HashMap::new())
            .await
            .unwrap();

        let claimed = engine.receive(&queue.url, 1, Some(0), None).await.unwrap();
        let handle = claimed[0].receipt_handle.clone().unwrap();

        // The claim expires and the message is re-issued a new handle.
        engine
            .expire_invisible_at(&queue.url, Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        engine.receive(&queue.url, 1, Some(30), None).await.unwrap();

        // The superseded handle matches nothing and that is not an error.
        assert!(!engine.delete(&queue.url, &handle).await.unwrap());
        assert!(!engine.delete(&queue.url, "never-issued").await.unwrap());

        // An empty handle is a structural error, though.
        assert!(engine.delete(&queue.url, "").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_with_current_handle_removes() {
        let (queues, engine) = engines();
        let queue = queues
            .create_queue("eu-central-1", "q1", "AKID")
            .await
            .unwrap();
        engine
            .send(&queue.url, "hello".into(), HashMap::new())
            .await
            .unwrap();

        let claimed = engine.receive(&queue.url, 1, Some(30), None).await.unwrap();
        let handle = claimed[0].receipt_handle.clone().unwrap();

        assert!(engine.delete(&queue.url, &handle).await.unwrap());

        // Gone for good: releasing claims re-delivers nothing.
        engine
            .expire_invisible_at(&queue.url, Utc::now() + chrono::Duration::seconds(60))
            .await
            .unwrap();
        let after = engine.receive(&queue.url, 1, Some(30), None).await.unwrap();
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn test_redrive_threshold() {
        // Scenario: a message received past maxReceiveCount moves to the
        // dead-letter queue and leaves the source queue.
        let (queues, engine) = engines();
        let source = queues
            .create_queue("eu-central-1", "jobs", "AKID")
            .await
            .unwrap();
        let dlq = queues
            .create_queue("eu-central-1", "jobs-dlq", "AKID")
            .await
            .unwrap();

        engine
            .send(&source.url, "poison".into(), HashMap::new())
            .await
            .unwrap();

        // Claim and release four times without deleting.
        for _ in 0..4 {
            let claimed = engine
                .receive(&source.url, 1, Some(0), None)
                .await
                .unwrap();
            assert_eq!(claimed.len(), 1);
            engine
                .expire_invisible_at(&source.url, Utc::now() + chrono::Duration::seconds(1))
                .await
                .unwrap();
        }

        let moved = engine.redrive(&source.url, &dlq.arn, 3).await.unwrap();
        assert_eq!(moved, 1);

        let from_source = engine.receive(&source.url, 1, Some(30), None).await.unwrap();
        assert!(from_source.is_empty());

        let from_dlq = engine.receive(&dlq.url, 1, Some(30), None).await.unwrap();
        assert_eq!(from_dlq.len(), 1);
        assert_eq!(from_dlq[0].body, "poison");
        assert_eq!(from_dlq[0].retries, 1, "retry counter reset on redrive");
    }

    #[tokio::test]
    async fn test_redrive_requires_target_queue() {
        let (queues, engine) = engines();
        let source = queues
            .create_queue("eu-central-1", "jobs", "AKID")
            .await
            .unwrap();

        let result = engine
            .redrive(&source.url, "arn:aws:sqs:eu-central-1:000000000000:missing", 3)
            .await;
        assert!(matches!(result, Err(SqsError::QueueNotFound(_))));

        // A malformed target ARN is a structural error, not a lookup miss.
        let result = engine.redrive(&source.url, "not-an-arn", 3).await;
        assert!(matches!(result, Err(SqsError::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn test_retention_sweep_drops_old_messages() {
        let (queues, engine) = engines();
        let queue = queues
            .create_queue("eu-central-1", "q1", "AKID")
            .await
            .unwrap();
        engine
            .send(&queue.url, "old".into(), HashMap::new())
            .await
            .unwrap();

        // Default retention is 4 days; sweep from 5 days in the future.
        let future = Utc::now() + chrono::Duration::days(5);
        assert_eq!(engine.expire_retained_at(&queue.url, future).await.unwrap(), 1);
        assert!(engine
            .receive(&queue.url, 1, Some(30), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_attribute_checksum_is_order_independent() {
        let mut forward = HashMap::new();
        forward.insert("alpha".to_string(), "1".to_string());
        forward.insert("beta".to_string(), "2".to_string());
        let mut reverse = HashMap::new();
        reverse.insert("beta".to_string(), "2".to_string());
        reverse.insert("alpha".to_string(), "1".to_string());

        assert_eq!(md5_of_attributes(&forward), md5_of_attributes(&reverse));
        assert!(md5_of_attributes(&HashMap::new()).is_none());

        // Different values change the digest.
        let mut other = forward.clone();
        other.insert("beta".to_string(), "3".to_string());
        assert_ne!(md5_of_attributes(&forward), md5_of_attributes(&other));
    }

    #[tokio::test]
    async fn test_send_respects_maximum_message_size() {
        let (queues, engine) = engines();
        let queue = queues
            .create_queue("eu-central-1", "q1", "AKID")
            .await
            .unwrap();
        let mut updates = HashMap::new();
        updates.insert("MaximumMessageSize".to_string(), "1024".to_string());
        queues
            .set_queue_attributes(&queue.url, &updates)
            .await
            .unwrap();

        let result = engine
            .send(&queue.url, "x".repeat(2048), HashMap::new())
            .await;
        assert!(matches!(result, Err(SqsError::InvalidParameter(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_returns_as_soon_as_a_message_lands() {
        let (queues, engine) = engines();
        let queue = queues
            .create_queue("eu-central-1", "q1", "AKID")
            .await
            .unwrap();

        let engine = Arc::new(engine);
        let sender = engine.clone();
        let url = queue.url.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            sender.send(&url, "late arrival".into(), HashMap::new()).await.unwrap();
        });

        let received = engine
            .receive(&queue.url, 1, Some(30), Some(20))
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, "late arrival");
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_gives_up_at_the_deadline() {
        let (queues, engine) = engines();
        let queue = queues
            .create_queue("eu-central-1", "q1", "AKID")
            .await
            .unwrap();

        let received = engine
            .receive(&queue.url, 1, Some(30), Some(2))
            .await
            .unwrap();
        assert!(received.is_empty());
    }
}
