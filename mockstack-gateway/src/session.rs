//! Per-connection gateway session
//!
//! Lifecycle per connection: read a request, dispatch it as an independent
//! task, queue its response slot, repeat. The write loop drains the queue in
//! FIFO order, so responses leave in request order even when handlers finish
//! out of order. The queue bound is the pipelining backpressure: a full
//! queue suspends the read loop until the writer catches up.

use std::sync::Arc;

use http::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use mockstack_auth::parse_authorization_header;
use mockstack_core::error::{ApiError, ErrorCode};
use mockstack_core::RequestId;

use crate::handler::{ServiceRequest, ServiceResponse};
use crate::routes::RoutingTable;
use crate::wire::{self, HttpRequest};

/// Limits applied to each connection
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest accepted request body
    pub max_body_bytes: usize,
    /// In-flight responses per connection before reads stop
    pub pipeline_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 8 * 1024 * 1024,
            pipeline_depth: 64,
        }
    }
}

/// One response slot in the per-connection FIFO
enum Pending {
    /// Resolved at the session boundary (validation, auth, routing failures)
    Ready(ServiceResponse),
    /// Being produced by a dispatched handler task
    Dispatched(oneshot::Receiver<ServiceResponse>),
}

struct Queued {
    pending: Pending,
    request_id: RequestId,
    close: bool,
}

/// Owns one accepted connection
pub struct GatewaySession {
    routes: Arc<RoutingTable>,
    config: SessionConfig,
}

impl GatewaySession {
    pub fn new(routes: Arc<RoutingTable>, config: SessionConfig) -> Self {
        Self { routes, config }
    }

    /// Drive the connection until the peer goes away or a close-marked
    /// response is written.
    pub async fn run<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let (queue_tx, queue_rx) = mpsc::channel::<Queued>(self.config.pipeline_depth.max(1));
        let writer = tokio::spawn(write_loop(write_half, queue_rx));

        loop {
            match wire::read_request(&mut reader, self.config.max_body_bytes).await {
                Ok(Some(request)) => {
                    let request_id = RequestId::new();
                    let close = !request.keep_alive();
                    let pending = self.accept(request, &request_id);
                    if queue_tx
                        .send(Queued {
                            pending,
                            request_id,
                            close,
                        })
                        .await
                        .is_err()
                    {
                        // Writer stopped: the peer is gone.
                        break;
                    }
                    if close {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    // The stream is out of sync; answer once and close.
                    let request_id = RequestId::new();
                    warn!(error = %err, "failed to read request, closing connection");
                    let error = ApiError::new(err.error_code(), err.to_string())
                        .with_request_id(request_id.as_str());
                    let _ = queue_tx
                        .send(Queued {
                            pending: Pending::Ready(ServiceResponse::from_error(&error)),
                            request_id,
                            close: true,
                        })
                        .await;
                    break;
                }
            }
        }

        drop(queue_tx);
        let _ = writer.await;
    }

    /// Classify one request: resolved immediately or dispatched to a handler.
    fn accept(&self, request: HttpRequest, request_id: &RequestId) -> Pending {
        if request.method == Method::GET
            && matches!(request.target.as_str(), "/health" | "/_mockstack/health")
        {
            return Pending::Ready(health_response(&self.routes));
        }

        if let Err((code, message)) = wire::validate_request(&request) {
            debug!(target = %request.target, message = %message, "rejected request");
            return Pending::Ready(error_response(code, message, request_id));
        }

        let Some(auth) = request.header("authorization") else {
            return Pending::Ready(error_response(
                ErrorCode::AccessDenied,
                "missing authorization header".to_string(),
                request_id,
            ));
        };
        let credential = match parse_authorization_header(auth) {
            Ok(credential) => credential,
            Err(err) => {
                debug!(error = %err, "unparsable credential");
                return Pending::Ready(error_response(
                    ErrorCode::AccessDenied,
                    err.to_string(),
                    request_id,
                ));
            }
        };

        let Some(service_handler) = self.routes.resolve(&credential.service) else {
            debug!(service = %credential.service, "no handler for service");
            return Pending::Ready(error_response(
                ErrorCode::NotImplemented,
                format!("no handler registered for service '{}'", credential.service),
                request_id,
            ));
        };

        let service_request = ServiceRequest {
            method: request.method,
            path: request.target,
            headers: request.headers,
            body: request.body,
            region: credential.region,
            user: credential.access_key,
        };

        let (response_tx, response_rx) = oneshot::channel();
        tokio::spawn(async move {
            let response = service_handler.handle(service_request).await;
            // The receiver is gone if the peer disconnected; the handler ran
            // to completion and its output is discarded.
            let _ = response_tx.send(response);
        });

        Pending::Dispatched(response_rx)
    }
}

/// Drain the response FIFO sequentially, preserving request order.
async fn write_loop<W>(mut writer: W, mut queue: mpsc::Receiver<Queued>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = queue.recv().await {
        let response = match item.pending {
            Pending::Ready(response) => response,
            Pending::Dispatched(receiver) => receiver.await.unwrap_or_else(|_| {
                ServiceResponse::from_error(
                    &ApiError::new(ErrorCode::ServiceUnavailable, "handler task failed")
                        .with_request_id(item.request_id.as_str()),
                )
            }),
        };

        if let Err(err) =
            wire::write_response(&mut writer, &response, item.request_id.as_str(), item.close)
                .await
        {
            debug!(error = %err, "response write failed, discarding remaining output");
            break;
        }
        if item.close {
            let _ = writer.shutdown().await;
            break;
        }
    }
}

fn error_response(code: ErrorCode, message: String, request_id: &RequestId) -> ServiceResponse {
    ServiceResponse::from_error(&ApiError::new(code, message).with_request_id(request_id.as_str()))
}

fn health_response(routes: &RoutingTable) -> ServiceResponse {
    let services = routes
        .service_names()
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ");
    ServiceResponse::json(
        StatusCode::OK,
        format!(r#"{{"status": "running", "services": [{services}]}}"#),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::StubHandler;

    #[test]
    fn test_health_response_lists_services() {
        let routes = RoutingTable::builder()
            .register("sqs", Arc::new(StubHandler::new("sqs")))
            .register("s3", Arc::new(StubHandler::new("s3")))
            .build();

        let response = health_response(&routes);
        assert_eq!(response.status, StatusCode::OK);
        let body = String::from_utf8_lossy(&response.body).to_string();
        assert_eq!(body, r#"{"status": "running", "services": ["s3", "sqs"]}"#);
    }

    #[test]
    fn test_default_limits() {
        let config = SessionConfig::default();
        assert!(config.max_body_bytes >= 1024 * 1024);
        assert!(config.pipeline_depth >= 1);
    }
}
