//! Core types shared across MockStack services
//!
//! This crate provides the error taxonomy, request IDs and ARN/URL
//! derivation used by the gateway and the service backends.

pub mod arn;
pub mod error;
pub mod request_id;

pub use arn::{queue_arn, queue_url, DEFAULT_ACCOUNT_ID};
pub use error::{ApiError, ErrorCode};
pub use request_id::RequestId;
