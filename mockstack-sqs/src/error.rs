//! Queue service errors

use thiserror::Error;

use mockstack_core::ErrorCode;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SqsError {
    #[error("Queue does not exist: {0}")]
    QueueNotFound(String),

    #[error("Queue already exists: {0}")]
    QueueExists(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl SqsError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::QueueNotFound(_) => ErrorCode::QueueDoesNotExist,
            Self::QueueExists(_) => ErrorCode::QueueNameExists,
            Self::InvalidParameter(_) => ErrorCode::InvalidParameterValue,
            Self::InvalidAttribute(_) => ErrorCode::InvalidAttributeValue,
            Self::Unavailable(_) => ErrorCode::ServiceUnavailable,
        }
    }
}

impl From<SqsError> for mockstack_core::ApiError {
    fn from(err: SqsError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl From<StoreError> for SqsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::QueueNotFound(name) => Self::QueueNotFound(name),
            StoreError::QueueExists(name) => Self::QueueExists(name),
            StoreError::Unavailable(message) => Self::Unavailable(message),
        }
    }
}
