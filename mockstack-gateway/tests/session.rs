//! Gateway session tests over in-process connections
//!
//! Exercises the per-connection contract: pipelined responses stay in
//! request order, single bad requests do not tear the connection down, and
//! framing failures do.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{Method, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use mockstack_gateway::{
    GatewaySession, RoutingTable, ServiceHandler, ServiceRequest, ServiceResponse, SessionConfig,
};

/// Echoes method and path; PUT requests are artificially slowed
struct EchoHandler {
    put_delay: Duration,
}

#[async_trait]
impl ServiceHandler for EchoHandler {
    async fn handle(&self, request: ServiceRequest) -> ServiceResponse {
        if request.method == Method::PUT {
            tokio::time::sleep(self.put_delay).await;
        }
        ServiceResponse::xml(
            StatusCode::OK,
            format!("echo {} {}", request.method, request.path),
        )
    }
}

fn authorization(service: &str) -> String {
    format!(
        "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240101/eu-central-1/{service}/aws4_request, \
         SignedHeaders=host;x-amz-date, Signature=abc123"
    )
}

fn request(method: &str, path: &str, service: &str, body: &str, close: bool) -> String {
    let connection = if close { "connection: close\r\n" } else { "" };
    format!(
        "{method} {path} HTTP/1.1\r\nauthorization: {}\r\ncontent-length: {}\r\n{connection}\r\n{body}",
        authorization(service),
        body.len(),
    )
}

fn spawn_session(handler: Arc<dyn ServiceHandler>, config: SessionConfig) -> DuplexStream {
    let routes = Arc::new(RoutingTable::builder().register("test", handler).build());
    let (client, server) = tokio::io::duplex(64 * 1024);
    let session = GatewaySession::new(routes, config);
    tokio::spawn(async move { session.run(server).await });
    client
}

fn echo_session() -> DuplexStream {
    spawn_session(
        Arc::new(EchoHandler {
            put_delay: Duration::from_millis(200),
        }),
        SessionConfig::default(),
    )
}

async fn exchange(client: &mut DuplexStream, raw: String) -> String {
    client.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn test_pipelined_responses_keep_request_order() {
    // Scenario: GET / slow PUT / GET pipelined on one connection; the slow
    // PUT must not let the trailing GET's response jump ahead.
    let mut client = echo_session();

    let pipelined = [
        request("GET", "/first", "test", "", false),
        request("PUT", "/second", "test", "payload", false),
        request("GET", "/third", "test", "", true),
    ]
    .concat();

    let raw = exchange(&mut client, pipelined).await;

    let first = raw.find("echo GET /first").expect("first response");
    let second = raw.find("echo PUT /second").expect("second response");
    let third = raw.find("echo GET /third").expect("third response");
    assert!(first < second && second < third, "responses out of order: {raw}");
}

#[tokio::test]
async fn test_order_holds_under_minimal_pipeline_depth() {
    let mut client = spawn_session(
        Arc::new(EchoHandler {
            put_delay: Duration::from_millis(50),
        }),
        SessionConfig {
            pipeline_depth: 1,
            ..SessionConfig::default()
        },
    );

    let mut pipelined = String::new();
    for i in 0..5 {
        let method = if i % 2 == 0 { "PUT" } else { "GET" };
        pipelined.push_str(&request(method, &format!("/r{i}"), "test", "", i == 4));
    }

    let raw = exchange(&mut client, pipelined).await;
    let positions: Vec<usize> = (0..5)
        .map(|i| raw.find(&format!("/r{i}")).expect("response present"))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_unknown_service_gets_501_and_connection_survives() {
    let mut client = echo_session();

    let pipelined = [
        request("POST", "/", "dynamodb", "", false),
        request("GET", "/after", "test", "", true),
    ]
    .concat();

    let raw = exchange(&mut client, pipelined).await;
    assert!(raw.contains("501 Not Implemented"));
    assert!(raw.contains("dynamodb"));
    assert!(raw.contains("echo GET /after"));
}

#[tokio::test]
async fn test_malformed_credential_is_rejected() {
    let mut client = echo_session();

    let raw = "POST / HTTP/1.1\r\nauthorization: NotASignature\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
    let raw = exchange(&mut client, raw.to_string()).await;
    assert!(raw.contains("403 Forbidden"));
    assert!(raw.contains("AccessDenied"));
}

#[tokio::test]
async fn test_missing_credential_is_rejected() {
    let mut client = echo_session();

    let raw = exchange(
        &mut client,
        "GET /queue HTTP/1.1\r\nconnection: close\r\n\r\n".to_string(),
    )
    .await;
    assert!(raw.contains("403 Forbidden"));
}

#[tokio::test]
async fn test_bad_method_keeps_connection_open() {
    let mut client = echo_session();

    let pipelined = [
        request("PATCH", "/queue", "test", "", false),
        request("GET", "/after", "test", "", true),
    ]
    .concat();

    let raw = exchange(&mut client, pipelined).await;
    assert!(raw.contains("400 Bad Request"));
    assert!(raw.contains("echo GET /after"));
}

#[tokio::test]
async fn test_traversal_target_is_rejected_before_routing() {
    let mut client = echo_session();

    let raw = exchange(
        &mut client,
        request("GET", "/queues/../secrets", "test", "", true),
    )
    .await;
    assert!(raw.contains("400 Bad Request"));
    assert!(!raw.contains("echo"));
}

#[tokio::test]
async fn test_oversized_body_closes_connection() {
    let mut client = spawn_session(
        Arc::new(EchoHandler {
            put_delay: Duration::ZERO,
        }),
        SessionConfig {
            max_body_bytes: 16,
            ..SessionConfig::default()
        },
    );

    // A valid request is pipelined behind the oversized one; the session
    // must close before reaching it.
    let pipelined = [
        request("POST", "/big", "test", "0123456789abcdef0123456789abcdef", false),
        request("GET", "/after", "test", "", true),
    ]
    .concat();

    let raw = exchange(&mut client, pipelined).await;
    assert!(raw.contains("RequestTooLarge"));
    assert!(raw.contains("connection: close"));
    assert!(!raw.contains("echo GET /after"));
}

#[tokio::test]
async fn test_health_answers_without_credentials() {
    let mut client = echo_session();

    let raw = exchange(
        &mut client,
        "GET /health HTTP/1.1\r\nconnection: close\r\n\r\n".to_string(),
    )
    .await;
    assert!(raw.contains("200 OK"));
    assert!(raw.contains(r#""services": ["test"]"#));
}

#[tokio::test]
async fn test_close_is_honored_after_response() {
    let mut client = echo_session();

    let raw = exchange(&mut client, request("GET", "/one", "test", "", true)).await;
    assert!(raw.contains("connection: close"));
    assert!(raw.contains("echo GET /one"));
}

#[tokio::test]
async fn test_every_response_carries_a_request_id() {
    let mut client = echo_session();

    let pipelined = [
        request("GET", "/a", "test", "", false),
        request("GET", "/b", "test", "", true),
    ]
    .concat();

    let raw = exchange(&mut client, pipelined).await;
    assert_eq!(raw.matches("x-amzn-requestid:").count(), 2);
}
