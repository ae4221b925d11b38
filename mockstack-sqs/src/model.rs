//! Queue and message records

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mockstack_core::arn::{queue_arn, queue_url, DEFAULT_ACCOUNT_ID};

use crate::error::SqsError;

/// Where a message sits in its lifecycle. Exactly one holds at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Eligible for receive
    Initial,
    /// Waiting out the queue's delay; becomes Initial once `reset` passes
    Delayed,
    /// Claimed by a receiver; becomes Initial again once `reset` passes
    Invisible,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Delayed => "DELAYED",
            Self::Invisible => "INVISIBLE",
        }
    }
}

/// Dead-letter routing rule, carried as the `RedrivePolicy` queue attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedrivePolicy {
    pub dead_letter_target_arn: String,
    pub max_receive_count: u32,
}

impl RedrivePolicy {
    pub fn from_json(raw: &str) -> Result<Self, SqsError> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| SqsError::InvalidAttribute(format!("invalid RedrivePolicy JSON: {e}")))?;
        let arn = value
            .get("deadLetterTargetArn")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                SqsError::InvalidAttribute("RedrivePolicy must contain deadLetterTargetArn".into())
            })?
            .to_string();
        let max_receive_count = value
            .get("maxReceiveCount")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| {
                SqsError::InvalidAttribute("RedrivePolicy must contain maxReceiveCount".into())
            })?;
        if max_receive_count < 1 {
            return Err(SqsError::InvalidAttribute(
                "maxReceiveCount must be at least 1".into(),
            ));
        }
        Ok(Self {
            dead_letter_target_arn: arn,
            max_receive_count: u32::try_from(max_receive_count)
                .map_err(|_| SqsError::InvalidAttribute("maxReceiveCount out of range".into()))?,
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "deadLetterTargetArn": self.dead_letter_target_arn,
            "maxReceiveCount": self.max_receive_count,
        })
        .to_string()
    }
}

/// Mutable queue attributes; unspecified keys keep their prior values on
/// update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAttributes {
    pub visibility_timeout: u32,
    pub delay_seconds: u32,
    pub message_retention_period: u32,
    pub maximum_message_size: u32,
    pub receive_message_wait_time_seconds: u32,
    pub redrive_policy: Option<RedrivePolicy>,
}

impl Default for QueueAttributes {
    fn default() -> Self {
        Self {
            visibility_timeout: 30,
            delay_seconds: 0,
            message_retention_period: 345_600, // 4 days
            maximum_message_size: 262_144,     // 256KB
            receive_message_wait_time_seconds: 0,
            redrive_policy: None,
        }
    }
}

impl QueueAttributes {
    /// Partial update from wire attribute names; unknown names are rejected,
    /// out-of-range values too.
    pub fn apply(&mut self, attrs: &HashMap<String, String>) -> Result<(), SqsError> {
        for (key, value) in attrs {
            match key.as_str() {
                "VisibilityTimeout" => {
                    let v = parse_range(key, value, 0, 43_200)?;
                    self.visibility_timeout = v;
                }
                "DelaySeconds" => {
                    let v = parse_range(key, value, 0, 900)?;
                    self.delay_seconds = v;
                }
                "MessageRetentionPeriod" => {
                    let v = parse_range(key, value, 60, 1_209_600)?;
                    self.message_retention_period = v;
                }
                "MaximumMessageSize" => {
                    let v = parse_range(key, value, 1_024, 262_144)?;
                    self.maximum_message_size = v;
                }
                "ReceiveMessageWaitTimeSeconds" => {
                    let v = parse_range(key, value, 0, 20)?;
                    self.receive_message_wait_time_seconds = v;
                }
                "RedrivePolicy" => {
                    self.redrive_policy = if value.is_empty() {
                        None
                    } else {
                        Some(RedrivePolicy::from_json(value)?)
                    };
                }
                _ => {
                    return Err(SqsError::InvalidAttribute(format!(
                        "unknown attribute: {key}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Wire attribute map
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(
            "VisibilityTimeout".into(),
            self.visibility_timeout.to_string(),
        );
        map.insert("DelaySeconds".into(), self.delay_seconds.to_string());
        map.insert(
            "MessageRetentionPeriod".into(),
            self.message_retention_period.to_string(),
        );
        map.insert(
            "MaximumMessageSize".into(),
            self.maximum_message_size.to_string(),
        );
        map.insert(
            "ReceiveMessageWaitTimeSeconds".into(),
            self.receive_message_wait_time_seconds.to_string(),
        );
        if let Some(policy) = &self.redrive_policy {
            map.insert("RedrivePolicy".into(), policy.to_json());
        }
        map
    }
}

fn parse_range(key: &str, value: &str, min: u32, max: u32) -> Result<u32, SqsError> {
    let parsed: u32 = value
        .parse()
        .map_err(|_| SqsError::InvalidAttribute(format!("invalid {key}: {value}")))?;
    if !(min..=max).contains(&parsed) {
        return Err(SqsError::InvalidAttribute(format!(
            "{key} must be between {min} and {max}"
        )));
    }
    Ok(parsed)
}

/// One queue. Name is unique within a region; URL and ARN are derived from
/// `(region, name)` at creation and never change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: String,
    pub region: String,
    pub name: String,
    pub owner: String,
    pub url: String,
    pub arn: String,
    pub attributes: QueueAttributes,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl QueueRecord {
    pub fn new(region: &str, name: &str, owner: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            region: region.to_string(),
            name: name.to_string(),
            owner: owner.to_string(),
            url: queue_url(region, DEFAULT_ACCOUNT_ID, name),
            arn: queue_arn(region, DEFAULT_ACCOUNT_ID, name),
            attributes: QueueAttributes::default(),
            created: now,
            modified: now,
        }
    }
}

/// One message, referencing its queue by URL (lookup only; queue deletion
/// cascades explicitly).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub queue_url: String,
    pub queue_arn: String,
    pub message_id: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    pub md5_of_body: String,
    pub md5_of_attributes: Option<String>,
    pub status: MessageStatus,
    /// Instant a Delayed or Invisible message becomes eligible again
    pub reset: Option<DateTime<Utc>>,
    /// Number of receive claims so far
    pub retries: u32,
    /// Valid only while Invisible; regenerated on every successful receive
    pub receipt_handle: Option<String>,
    pub created: DateTime<Utc>,
}
