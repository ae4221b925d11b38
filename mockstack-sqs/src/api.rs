//! Wire-facing queue service handler
//!
//! Requests arrive as XML-ish envelopes with the action named by the
//! `X-Amz-Target` header. The action is parsed into [`SqsAction`] once and
//! matched; handler bodies never compare action strings.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use tracing::{debug, warn};

use mockstack_core::error::{xml_escape, ApiError, ErrorCode};
use mockstack_gateway::handler::{ServiceHandler, ServiceRequest, ServiceResponse};

use crate::messages::MessageEngine;
use crate::model::MessageRecord;
use crate::queues::QueueEngine;

/// Supported queue service actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqsAction {
    CreateQueue,
    GetQueueUrl,
    GetQueueAttributes,
    SetQueueAttributes,
    ListQueues,
    DeleteQueue,
    PurgeQueue,
    SendMessage,
    ReceiveMessage,
    DeleteMessage,
}

impl SqsAction {
    /// Accepts `AmazonSQS.CreateQueue` or a bare action name
    pub fn from_target(target: &str) -> Option<Self> {
        let action = target.rsplit('.').next().unwrap_or(target);
        match action {
            "CreateQueue" => Some(Self::CreateQueue),
            "GetQueueUrl" => Some(Self::GetQueueUrl),
            "GetQueueAttributes" => Some(Self::GetQueueAttributes),
            "SetQueueAttributes" => Some(Self::SetQueueAttributes),
            "ListQueues" => Some(Self::ListQueues),
            "DeleteQueue" => Some(Self::DeleteQueue),
            "PurgeQueue" => Some(Self::PurgeQueue),
            "SendMessage" => Some(Self::SendMessage),
            "ReceiveMessage" => Some(Self::ReceiveMessage),
            "DeleteMessage" => Some(Self::DeleteMessage),
            _ => None,
        }
    }
}

/// The queue service behind the gateway routing table
pub struct SqsHandler {
    queues: Arc<QueueEngine>,
    messages: Arc<MessageEngine>,
}

impl SqsHandler {
    pub fn new(queues: Arc<QueueEngine>, messages: Arc<MessageEngine>) -> Self {
        Self { queues, messages }
    }

    async fn create_queue(
        &self,
        request: &ServiceRequest,
        body: &str,
    ) -> Result<ServiceResponse, ApiError> {
        let name = require(body, "QueueName")?;
        let attributes = xml_attribute_map(body, "Attribute");

        let queue = self
            .queues
            .create_queue(&request.region, &name, &request.user)
            .await?;
        if !attributes.is_empty() {
            self.queues
                .set_queue_attributes(&queue.url, &attributes)
                .await?;
        }

        Ok(ServiceResponse::xml(
            StatusCode::OK,
            format!(
                "<CreateQueueResponse><CreateQueueResult><QueueUrl>{}</QueueUrl></CreateQueueResult></CreateQueueResponse>",
                xml_escape(&queue.url)
            ),
        ))
    }

    async fn get_queue_url(
        &self,
        request: &ServiceRequest,
        body: &str,
    ) -> Result<ServiceResponse, ApiError> {
        let name = require(body, "QueueName")?;
        let url = self.queues.get_queue_url(&request.region, &name).await?;

        Ok(ServiceResponse::xml(
            StatusCode::OK,
            format!(
                "<GetQueueUrlResponse><GetQueueUrlResult><QueueUrl>{}</QueueUrl></GetQueueUrlResult></GetQueueUrlResponse>",
                xml_escape(&url)
            ),
        ))
    }

    async fn get_queue_attributes(&self, body: &str) -> Result<ServiceResponse, ApiError> {
        let url = require(body, "QueueUrl")?;
        let mut names = xml_values(body, "AttributeName");
        if names.is_empty() {
            names.push("All".to_string());
        }

        let attributes = self.queues.get_queue_attributes(&url, &names).await?;
        let mut xml = String::from("<GetQueueAttributesResponse><GetQueueAttributesResult>");
        for (name, value) in attributes {
            xml.push_str(&format!(
                "<Attribute><Name>{}</Name><Value>{}</Value></Attribute>",
                xml_escape(&name),
                xml_escape(&value)
            ));
        }
        xml.push_str("</GetQueueAttributesResult></GetQueueAttributesResponse>");
        Ok(ServiceResponse::xml(StatusCode::OK, xml))
    }

    async fn set_queue_attributes(&self, body: &str) -> Result<ServiceResponse, ApiError> {
        let url = require(body, "QueueUrl")?;
        let attributes = xml_attribute_map(body, "Attribute");
        if attributes.is_empty() {
            return Err(ApiError::new(
                ErrorCode::MissingParameter,
                "at least one Attribute is required",
            ));
        }

        self.queues.set_queue_attributes(&url, &attributes).await?;
        Ok(ServiceResponse::xml(
            StatusCode::OK,
            "<SetQueueAttributesResponse></SetQueueAttributesResponse>".to_string(),
        ))
    }

    async fn list_queues(&self, request: &ServiceRequest) -> Result<ServiceResponse, ApiError> {
        let queues = self.queues.list_queues(Some(&request.region)).await?;

        let mut xml = String::from("<ListQueuesResponse><ListQueuesResult>");
        for queue in queues {
            xml.push_str(&format!("<QueueUrl>{}</QueueUrl>", xml_escape(&queue.url)));
        }
        xml.push_str("</ListQueuesResult></ListQueuesResponse>");
        Ok(ServiceResponse::xml(StatusCode::OK, xml))
    }

    async fn delete_queue(&self, body: &str) -> Result<ServiceResponse, ApiError> {
        let url = require(body, "QueueUrl")?;
        self.queues.delete_queue(&url).await?;
        Ok(ServiceResponse::xml(
            StatusCode::OK,
            "<DeleteQueueResponse></DeleteQueueResponse>".to_string(),
        ))
    }

    async fn purge_queue(&self, body: &str) -> Result<ServiceResponse, ApiError> {
        let url = require(body, "QueueUrl")?;
        self.queues.purge_queue(&url).await?;
        Ok(ServiceResponse::xml(
            StatusCode::OK,
            "<PurgeQueueResponse></PurgeQueueResponse>".to_string(),
        ))
    }

    async fn send_message(&self, body: &str) -> Result<ServiceResponse, ApiError> {
        let url = require(body, "QueueUrl")?;
        let message_body = require(body, "MessageBody")?;
        let attributes = xml_attribute_map(body, "MessageAttribute");

        let receipt = self.messages.send(&url, message_body, attributes).await?;

        let mut xml = String::from("<SendMessageResponse><SendMessageResult>");
        xml.push_str(&format!(
            "<MD5OfMessageBody>{}</MD5OfMessageBody>",
            receipt.md5_of_body
        ));
        if let Some(md5) = &receipt.md5_of_attributes {
            xml.push_str(&format!(
                "<MD5OfMessageAttributes>{md5}</MD5OfMessageAttributes>"
            ));
        }
        xml.push_str(&format!("<MessageId>{}</MessageId>", receipt.message_id));
        xml.push_str("</SendMessageResult></SendMessageResponse>");
        Ok(ServiceResponse::xml(StatusCode::OK, xml))
    }

    async fn receive_message(&self, body: &str) -> Result<ServiceResponse, ApiError> {
        let url = require(body, "QueueUrl")?;
        let max = opt_u32(body, "MaxNumberOfMessages")?.unwrap_or(1);
        let visibility = opt_u32(body, "VisibilityTimeout")?;
        let wait = opt_u32(body, "WaitTimeSeconds")?;

        let messages = self.messages.receive(&url, max, visibility, wait).await?;

        let mut xml = String::from("<ReceiveMessageResponse><ReceiveMessageResult>");
        for message in &messages {
            xml.push_str(&render_message(message));
        }
        xml.push_str("</ReceiveMessageResult></ReceiveMessageResponse>");
        Ok(ServiceResponse::xml(StatusCode::OK, xml))
    }

    async fn delete_message(&self, body: &str) -> Result<ServiceResponse, ApiError> {
        let url = require(body, "QueueUrl")?;
        let receipt_handle = require(body, "ReceiptHandle")?;

        // Best-effort: a stale handle matches nothing and is still a success.
        self.messages.delete(&url, &receipt_handle).await?;
        Ok(ServiceResponse::xml(
            StatusCode::OK,
            "<DeleteMessageResponse></DeleteMessageResponse>".to_string(),
        ))
    }
}

#[async_trait]
impl ServiceHandler for SqsHandler {
    async fn handle(&self, request: ServiceRequest) -> ServiceResponse {
        let target = request.header("x-amz-target").to_string();
        let Some(action) = SqsAction::from_target(&target) else {
            warn!(target = %target, "unknown queue operation");
            return ServiceResponse::from_error(&ApiError::new(
                ErrorCode::UnknownOperation,
                format!("unknown operation: {target}"),
            ));
        };

        debug!(action = ?action, region = %request.region, "queue service request");
        let body = String::from_utf8_lossy(&request.body).to_string();

        let result = match action {
            SqsAction::CreateQueue => self.create_queue(&request, &body).await,
            SqsAction::GetQueueUrl => self.get_queue_url(&request, &body).await,
            SqsAction::GetQueueAttributes => self.get_queue_attributes(&body).await,
            SqsAction::SetQueueAttributes => self.set_queue_attributes(&body).await,
            SqsAction::ListQueues => self.list_queues(&request).await,
            SqsAction::DeleteQueue => self.delete_queue(&body).await,
            SqsAction::PurgeQueue => self.purge_queue(&body).await,
            SqsAction::SendMessage => self.send_message(&body).await,
            SqsAction::ReceiveMessage => self.receive_message(&body).await,
            SqsAction::DeleteMessage => self.delete_message(&body).await,
        };

        result.unwrap_or_else(|error| ServiceResponse::from_error(&error))
    }
}

fn render_message(message: &MessageRecord) -> String {
    let mut xml = String::from("<Message>");
    xml.push_str(&format!("<MessageId>{}</MessageId>", message.message_id));
    if let Some(handle) = &message.receipt_handle {
        xml.push_str(&format!("<ReceiptHandle>{handle}</ReceiptHandle>"));
    }
    xml.push_str(&format!("<MD5OfBody>{}</MD5OfBody>", message.md5_of_body));
    xml.push_str(&format!("<Body>{}</Body>", xml_escape(&message.body)));
    xml.push_str("<Attributes>");
    xml.push_str(&format!(
        "<ApproximateReceiveCount>{}</ApproximateReceiveCount>",
        message.retries
    ));
    xml.push_str(&format!(
        "<SentTimestamp>{}</SentTimestamp>",
        message.created.timestamp_millis()
    ));
    xml.push_str("</Attributes>");
    xml.push_str("</Message>");
    xml
}

// === Tag-scan body extraction ===

fn xml_value(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)?;
    Some(body[start..start + end].trim().to_string())
}

fn xml_values(body: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let mut values = Vec::new();
    let mut offset = 0;
    while let Some(found) = body[offset..].find(&open) {
        let start = offset + found + open.len();
        let Some(end) = body[start..].find(&close) else {
            break;
        };
        values.push(body[start..start + end].trim().to_string());
        offset = start + end + close.len();
    }
    values
}

/// Collect `<tag><Name>..</Name><Value>..</Value></tag>` entries
fn xml_attribute_map(body: &str, tag: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for block in xml_values(body, tag) {
        if let (Some(name), Some(value)) = (xml_value(&block, "Name"), xml_value(&block, "Value")) {
            map.insert(name, value);
        }
    }
    map
}

fn require(body: &str, tag: &str) -> Result<String, ApiError> {
    xml_value(body, tag).ok_or_else(|| {
        ApiError::new(ErrorCode::MissingParameter, format!("{tag} is required"))
    })
}

fn opt_u32(body: &str, tag: &str) -> Result<Option<u32>, ApiError> {
    match xml_value(body, tag) {
        None => Ok(None),
        Some(raw) => raw.parse::<u32>().map(Some).map_err(|_| {
            ApiError::new(
                ErrorCode::InvalidParameterValue,
                format!("invalid {tag}: {raw}"),
            )
        }),
    }
}
