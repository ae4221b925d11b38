//! Error taxonomy and wire formatting

use thiserror::Error;

/// Error codes surfaced to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Gateway
    AccessDenied,
    NotImplemented,
    BadRequest,
    RequestTooLarge,

    // Queueing
    QueueDoesNotExist,
    QueueNameExists,
    MissingParameter,
    InvalidParameterValue,
    InvalidAttributeValue,
    UnknownOperation,

    // Store
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessDenied => "AccessDenied",
            Self::NotImplemented => "NotImplemented",
            Self::BadRequest => "BadRequest",
            Self::RequestTooLarge => "RequestTooLarge",
            Self::QueueDoesNotExist => "QueueDoesNotExist",
            Self::QueueNameExists => "QueueNameExists",
            Self::MissingParameter => "MissingParameter",
            Self::InvalidParameterValue => "InvalidParameterValue",
            Self::InvalidAttributeValue => "InvalidAttributeValue",
            Self::UnknownOperation => "UnknownOperationException",
            Self::ServiceUnavailable => "ServiceUnavailable",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::AccessDenied => 403,
            Self::NotImplemented => 501,
            Self::BadRequest
            | Self::RequestTooLarge
            | Self::QueueDoesNotExist
            | Self::QueueNameExists
            | Self::MissingParameter
            | Self::InvalidParameterValue
            | Self::InvalidAttributeValue
            | Self::UnknownOperation => 400,
            Self::ServiceUnavailable => 503,
        }
    }

    /// Whether the condition is the sender's fault (vs. the service's)
    pub fn is_sender_fault(&self) -> bool {
        !matches!(self, Self::ServiceUnavailable)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client-visible error with its wire representation
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Format as the XML error envelope
    pub fn to_xml(&self) -> String {
        let fault = if self.code.is_sender_fault() {
            "Sender"
        } else {
            "Receiver"
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ErrorResponse>
  <Error>
    <Type>{}</Type>
    <Code>{}</Code>
    <Message>{}</Message>
  </Error>
  <RequestId>{}</RequestId>
</ErrorResponse>"#,
            fault,
            self.code.as_str(),
            xml_escape(&self.message),
            self.request_id
        )
    }
}

/// Escape text for embedding in an XML body
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_xml_format() {
        let error = ApiError::new(ErrorCode::QueueDoesNotExist, "The specified queue does not exist")
            .with_request_id("test-request-id");

        let xml = error.to_xml();
        assert!(xml.contains("<Type>Sender</Type>"));
        assert!(xml.contains("<Code>QueueDoesNotExist</Code>"));
        assert!(xml.contains("<RequestId>test-request-id</RequestId>"));
    }

    #[test]
    fn test_error_xml_escapes_message() {
        let error = ApiError::new(ErrorCode::BadRequest, "bad <target>");
        assert!(error.to_xml().contains("bad &lt;target&gt;"));
    }

    #[test]
    fn test_receiver_fault() {
        let error = ApiError::new(ErrorCode::ServiceUnavailable, "store unavailable");
        assert!(error.to_xml().contains("<Type>Receiver</Type>"));
        assert_eq!(error.code.http_status(), 503);
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(ErrorCode::NotImplemented.http_status(), 501);
        assert_eq!(ErrorCode::AccessDenied.http_status(), 403);
        assert_eq!(ErrorCode::QueueDoesNotExist.http_status(), 400);
        assert_eq!(ErrorCode::RequestTooLarge.http_status(), 400);
    }
}
