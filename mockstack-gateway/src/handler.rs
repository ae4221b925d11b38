//! Service handler contract
//!
//! Each emulated service implements [`ServiceHandler`]; the gateway makes no
//! assumption about handler internals beyond this contract.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use mockstack_core::error::{xml_escape, ApiError};

/// A validated request handed to a service backend
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Region taken from the credential scope
    pub region: String,
    /// Access key of the caller (parsed, never verified)
    pub user: String,
}

impl ServiceRequest {
    /// Look up a header as a string, empty if absent or non-UTF-8
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }
}

/// A complete response produced by a service backend
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl ServiceResponse {
    pub fn xml(status: StatusCode, body: String) -> Self {
        Self {
            status,
            content_type: "application/xml",
            body: Bytes::from(body),
        }
    }

    pub fn json(status: StatusCode, body: String) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: Bytes::from(body),
        }
    }

    pub fn from_error(error: &ApiError) -> Self {
        let status = StatusCode::from_u16(error.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::xml(status, error.to_xml())
    }
}

/// A service backend reachable through the routing table
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, request: ServiceRequest) -> ServiceResponse;
}

/// Placeholder for services the gateway knows about but does not implement
pub struct StubHandler {
    service: &'static str,
}

impl StubHandler {
    pub fn new(service: &'static str) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ServiceHandler for StubHandler {
    async fn handle(&self, _request: ServiceRequest) -> ServiceResponse {
        ServiceResponse::xml(
            StatusCode::NOT_IMPLEMENTED,
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
    <Code>NotImplemented</Code>
    <Message>Service '{}' is not implemented</Message>
</Error>"#,
                xml_escape(self.service)
            ),
        )
    }
}
