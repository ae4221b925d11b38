//! Abstract store contract and the in-memory backend
//!
//! The engines are written against these traits; each operation that moves a
//! message through its lifecycle is atomic inside the store, so no two
//! callers can claim the same message. The in-memory backend keeps one map
//! entry per queue in the message relation, making `get_mut` the per-queue
//! critical section.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

use crate::model::{MessageRecord, MessageStatus, QueueAttributes, QueueRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("queue already exists: {0}")]
    QueueExists(String),

    /// Transient backend failure; callers retry once before surfacing it
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Run a store operation, retrying once on a transient failure before
/// surfacing it.
pub(crate) async fn retry_once<T, F, Fut>(op: F) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    match op().await {
        Err(StoreError::Unavailable(_)) => op().await,
        other => other,
    }
}

/// Per-status message counts for one queue
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessageCounts {
    pub initial: usize,
    pub delayed: usize,
    pub invisible: usize,
}

/// Durable record of queues; `(region, name)` is the unique identity
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert if absent, atomically; `QueueExists` otherwise
    async fn create(&self, queue: QueueRecord) -> Result<QueueRecord, StoreError>;

    async fn get(&self, url: &str) -> Result<Option<QueueRecord>, StoreError>;

    async fn get_by_name(
        &self,
        region: &str,
        name: &str,
    ) -> Result<Option<QueueRecord>, StoreError>;

    async fn get_by_arn(&self, arn: &str) -> Result<Option<QueueRecord>, StoreError>;

    /// Queues of one region, or every region; ordering is store-defined
    async fn list(&self, region: Option<&str>) -> Result<Vec<QueueRecord>, StoreError>;

    async fn update_attributes(
        &self,
        url: &str,
        attributes: QueueAttributes,
        modified: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Remove the queue record; `false` if it was absent
    async fn delete(&self, url: &str) -> Result<bool, StoreError>;
}

/// Durable record of messages, each referencing its queue by URL
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: MessageRecord) -> Result<(), StoreError>;

    /// Atomically claim up to `handles.len()` Initial messages, oldest
    /// first: each selected message turns Invisible, its retry count is
    /// bumped, the next provided receipt handle is installed and `reset` is
    /// set. Selection and mutation share one critical section, so no two
    /// concurrent claims can take the same message.
    async fn claim(
        &self,
        queue_url: &str,
        handles: Vec<String>,
        reset: DateTime<Utc>,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    /// Delete the message currently carrying this receipt handle; `false`
    /// when nothing matches (stale or unknown handles match nothing)
    async fn delete_by_receipt(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<bool, StoreError>;

    /// Invisible messages whose `reset` has passed turn Initial again, the
    /// receipt handle is cleared
    async fn release_expired(
        &self,
        queue_url: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Delayed messages whose `reset` has passed turn Initial
    async fn awaken_delayed(
        &self,
        queue_url: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Initial messages claimed more than `max_receive_count` times move to
    /// the target queue with their retry count reset to zero
    async fn redrive(
        &self,
        queue_url: &str,
        target_url: &str,
        target_arn: &str,
        max_receive_count: u32,
    ) -> Result<u64, StoreError>;

    /// Remove messages created at or before the cutoff, whatever their status
    async fn drop_older_than(
        &self,
        queue_url: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Remove every message of the queue
    async fn purge(&self, queue_url: &str) -> Result<u64, StoreError>;

    async fn counts(&self, queue_url: &str) -> Result<MessageCounts, StoreError>;
}

/// In-memory queue relation
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    queues: DashMap<String, QueueRecord>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn create(&self, queue: QueueRecord) -> Result<QueueRecord, StoreError> {
        match self.queues.entry(queue.url.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::QueueExists(queue.name))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(queue.clone());
                Ok(queue)
            }
        }
    }

    async fn get(&self, url: &str) -> Result<Option<QueueRecord>, StoreError> {
        Ok(self.queues.get(url).map(|q| q.value().clone()))
    }

    async fn get_by_name(
        &self,
        region: &str,
        name: &str,
    ) -> Result<Option<QueueRecord>, StoreError> {
        Ok(self
            .queues
            .iter()
            .find(|q| q.region == region && q.name == name)
            .map(|q| q.value().clone()))
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<QueueRecord>, StoreError> {
        Ok(self
            .queues
            .iter()
            .find(|q| q.arn == arn)
            .map(|q| q.value().clone()))
    }

    async fn list(&self, region: Option<&str>) -> Result<Vec<QueueRecord>, StoreError> {
        Ok(self
            .queues
            .iter()
            .filter(|q| region.map_or(true, |r| q.region == r))
            .map(|q| q.value().clone())
            .collect())
    }

    async fn update_attributes(
        &self,
        url: &str,
        attributes: QueueAttributes,
        modified: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut queue = self
            .queues
            .get_mut(url)
            .ok_or_else(|| StoreError::QueueNotFound(url.to_string()))?;
        queue.attributes = attributes;
        queue.modified = modified;
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<bool, StoreError> {
        Ok(self.queues.remove(url).is_some())
    }
}

/// In-memory message relation; one entry (and thus one critical section)
/// per queue
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: DashMap<String, Vec<MessageRecord>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, message: MessageRecord) -> Result<(), StoreError> {
        self.messages
            .entry(message.queue_url.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn claim(
        &self,
        queue_url: &str,
        handles: Vec<String>,
        reset: DateTime<Utc>,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let Some(mut messages) = self.messages.get_mut(queue_url) else {
            return Ok(Vec::new());
        };

        let mut handles = handles.into_iter();
        let mut claimed = Vec::new();
        for message in messages.iter_mut() {
            if message.status != MessageStatus::Initial {
                continue;
            }
            let Some(handle) = handles.next() else {
                break;
            };
            message.status = MessageStatus::Invisible;
            message.retries += 1;
            message.receipt_handle = Some(handle);
            message.reset = Some(reset);
            claimed.push(message.clone());
        }
        Ok(claimed)
    }

    async fn delete_by_receipt(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<bool, StoreError> {
        let Some(mut messages) = self.messages.get_mut(queue_url) else {
            return Ok(false);
        };

        let position = messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle));
        match position {
            Some(i) => {
                messages.remove(i);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release_expired(
        &self,
        queue_url: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let Some(mut messages) = self.messages.get_mut(queue_url) else {
            return Ok(0);
        };

        let mut released = 0;
        for message in messages.iter_mut() {
            if message.status == MessageStatus::Invisible
                && message.reset.is_some_and(|reset| reset <= now)
            {
                message.status = MessageStatus::Initial;
                message.receipt_handle = None;
                message.reset = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn awaken_delayed(
        &self,
        queue_url: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let Some(mut messages) = self.messages.get_mut(queue_url) else {
            return Ok(0);
        };

        let mut awakened = 0;
        for message in messages.iter_mut() {
            if message.status == MessageStatus::Delayed
                && message.reset.is_some_and(|reset| reset <= now)
            {
                message.status = MessageStatus::Initial;
                message.reset = None;
                awakened += 1;
            }
        }
        Ok(awakened)
    }

    async fn redrive(
        &self,
        queue_url: &str,
        target_url: &str,
        target_arn: &str,
        max_receive_count: u32,
    ) -> Result<u64, StoreError> {
        // Two phases: the source guard must be dropped before touching the
        // target entry, or two shard locks could be held at once.
        let moved: Vec<MessageRecord> = {
            let Some(mut messages) = self.messages.get_mut(queue_url) else {
                return Ok(0);
            };
            let mut moved = Vec::new();
            let mut i = 0;
            while i < messages.len() {
                if messages[i].status == MessageStatus::Initial
                    && messages[i].retries > max_receive_count
                {
                    let mut message = messages.remove(i);
                    message.queue_url = target_url.to_string();
                    message.queue_arn = target_arn.to_string();
                    message.retries = 0;
                    message.receipt_handle = None;
                    message.reset = None;
                    moved.push(message);
                } else {
                    i += 1;
                }
            }
            moved
        };

        let count = moved.len() as u64;
        if !moved.is_empty() {
            self.messages
                .entry(target_url.to_string())
                .or_default()
                .extend(moved);
        }
        Ok(count)
    }

    async fn drop_older_than(
        &self,
        queue_url: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let Some(mut messages) = self.messages.get_mut(queue_url) else {
            return Ok(0);
        };

        let before = messages.len();
        messages.retain(|m| m.created > cutoff);
        Ok((before - messages.len()) as u64)
    }

    async fn purge(&self, queue_url: &str) -> Result<u64, StoreError> {
        Ok(self
            .messages
            .remove(queue_url)
            .map_or(0, |(_, messages)| messages.len() as u64))
    }

    async fn counts(&self, queue_url: &str) -> Result<MessageCounts, StoreError> {
        let mut counts = MessageCounts::default();
        if let Some(messages) = self.messages.get(queue_url) {
            for message in messages.iter() {
                match message.status {
                    MessageStatus::Initial => counts.initial += 1,
                    MessageStatus::Delayed => counts.delayed += 1,
                    MessageStatus::Invisible => counts.invisible += 1,
                }
            }
        }
        Ok(counts)
    }
}
