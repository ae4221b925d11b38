//! Queue lifecycle operations

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::SqsError;
use crate::model::QueueRecord;
use crate::store::{retry_once, MessageStore, QueueStore};

/// Operations on the queue relation
pub struct QueueEngine {
    queues: Arc<dyn QueueStore>,
    messages: Arc<dyn MessageStore>,
}

impl QueueEngine {
    pub fn new(queues: Arc<dyn QueueStore>, messages: Arc<dyn MessageStore>) -> Self {
        Self { queues, messages }
    }

    pub async fn create_queue(
        &self,
        region: &str,
        name: &str,
        owner: &str,
    ) -> Result<QueueRecord, SqsError> {
        validate_queue_name(name)?;
        let queue = QueueRecord::new(region, name, owner);
        let created = retry_once(|| self.queues.create(queue.clone())).await?;
        info!(region = %region, name = %name, url = %created.url, "created queue");
        Ok(created)
    }

    pub async fn get_queue(&self, url: &str) -> Result<QueueRecord, SqsError> {
        retry_once(|| self.queues.get(url))
            .await?
            .ok_or_else(|| SqsError::QueueNotFound(url.to_string()))
    }

    pub async fn get_queue_url(&self, region: &str, name: &str) -> Result<String, SqsError> {
        retry_once(|| self.queues.get_by_name(region, name))
            .await?
            .map(|queue| queue.url)
            .ok_or_else(|| SqsError::QueueNotFound(name.to_string()))
    }

    /// Attribute map for a queue. `names` containing `"All"` selects every
    /// attribute; unknown explicit names are omitted, not an error.
    pub async fn get_queue_attributes(
        &self,
        url: &str,
        names: &[String],
    ) -> Result<Vec<(String, String)>, SqsError> {
        let queue = self.get_queue(url).await?;
        let counts = retry_once(|| self.messages.counts(url)).await?;

        let mut map = queue.attributes.to_map();
        map.insert("QueueArn".into(), queue.arn);
        map.insert(
            "CreatedTimestamp".into(),
            queue.created.timestamp().to_string(),
        );
        map.insert(
            "LastModifiedTimestamp".into(),
            queue.modified.timestamp().to_string(),
        );
        map.insert(
            "ApproximateNumberOfMessages".into(),
            counts.initial.to_string(),
        );
        map.insert(
            "ApproximateNumberOfMessagesNotVisible".into(),
            counts.invisible.to_string(),
        );
        map.insert(
            "ApproximateNumberOfMessagesDelayed".into(),
            counts.delayed.to_string(),
        );

        let all = names.iter().any(|name| name == "All");
        let mut selected: Vec<(String, String)> = map
            .into_iter()
            .filter(|(key, _)| all || names.contains(key))
            .collect();
        selected.sort();
        Ok(selected)
    }

    /// Partial update; unspecified attributes retain prior values
    pub async fn set_queue_attributes(
        &self,
        url: &str,
        updates: &HashMap<String, String>,
    ) -> Result<(), SqsError> {
        let queue = self.get_queue(url).await?;
        let mut attributes = queue.attributes.clone();
        attributes.apply(updates)?;
        retry_once(|| self.queues.update_attributes(url, attributes.clone(), Utc::now())).await?;
        info!(queue = %url, "updated queue attributes");
        Ok(())
    }

    /// Delete all messages; the queue record itself is untouched
    pub async fn purge_queue(&self, url: &str) -> Result<u64, SqsError> {
        self.get_queue(url).await?;
        let purged = retry_once(|| self.messages.purge(url)).await?;
        info!(queue = %url, purged, "purged queue");
        Ok(purged)
    }

    /// Delete the queue and cascade-delete its messages. Not idempotent:
    /// deleting a missing queue is an error.
    pub async fn delete_queue(&self, url: &str) -> Result<(), SqsError> {
        let deleted = retry_once(|| self.queues.delete(url)).await?;
        if !deleted {
            return Err(SqsError::QueueNotFound(url.to_string()));
        }
        let cascaded = retry_once(|| self.messages.purge(url)).await?;
        info!(queue = %url, cascaded, "deleted queue");
        Ok(())
    }

    pub async fn list_queues(&self, region: Option<&str>) -> Result<Vec<QueueRecord>, SqsError> {
        Ok(retry_once(|| self.queues.list(region)).await?)
    }
}

fn validate_queue_name(name: &str) -> Result<(), SqsError> {
    if name.is_empty() || name.len() > 80 {
        return Err(SqsError::InvalidParameter(
            "queue name must be 1-80 characters".into(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SqsError::InvalidParameter(format!(
            "invalid queue name: {name}"
        )));
    }
    Ok(())
}
