//! HTTP/1.1 framing for the gateway session
//!
//! The session owns the raw connection (pipelining order is enforced one
//! layer up), so request reading and response writing are implemented
//! directly over `tokio::io` with the ecosystem `http` types.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Version};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use mockstack_core::error::ErrorCode;

use crate::handler::ServiceResponse;

/// Longest accepted request line or header line
const MAX_LINE_BYTES: usize = 8192;

/// Most headers accepted per request
const MAX_HEADERS: usize = 128;

/// Methods the gateway accepts
const ALLOWED_METHODS: [Method; 5] = [
    Method::GET,
    Method::PUT,
    Method::POST,
    Method::DELETE,
    Method::HEAD,
];

/// Failures while reading one request off the wire
///
/// Any of these desynchronizes the stream, so the session answers once and
/// closes the connection.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("malformed request line")]
    MalformedRequestLine,

    #[error("malformed header line")]
    MalformedHeader,

    #[error("request line or header too long")]
    LineTooLong,

    #[error("too many headers")]
    TooManyHeaders,

    #[error("unsupported HTTP version: {0}")]
    UnsupportedVersion(String),

    #[error("invalid content length")]
    InvalidContentLength,

    #[error("chunked transfer encoding is not supported")]
    UnsupportedTransferEncoding,

    #[error("request body exceeds limit of {0} bytes")]
    BodyTooLarge(usize),

    #[error("connection closed mid-request")]
    UnexpectedEof,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReadError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::BodyTooLarge(_) => ErrorCode::RequestTooLarge,
            _ => ErrorCode::BadRequest,
        }
    }
}

/// One parsed request
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequest {
    /// Whether the client expects the connection to stay open afterwards
    pub fn keep_alive(&self) -> bool {
        let connection = self
            .headers
            .get(http::header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if self.version == Version::HTTP_10 {
            connection.eq_ignore_ascii_case("keep-alive")
        } else {
            !connection.eq_ignore_ascii_case("close")
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Validate the request line against the gateway's method and target rules.
///
/// Runs after framing, so a violation leaves the stream usable: the session
/// answers `400` and keeps reading.
pub fn validate_request(request: &HttpRequest) -> Result<(), (ErrorCode, String)> {
    if !ALLOWED_METHODS.contains(&request.method) {
        return Err((
            ErrorCode::BadRequest,
            format!("method not allowed: {}", request.method),
        ));
    }

    let path = request.target.split('?').next().unwrap_or("");
    if !path.starts_with('/') {
        return Err((
            ErrorCode::BadRequest,
            format!("request target must be an absolute path: {}", request.target),
        ));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err((
            ErrorCode::BadRequest,
            "request target must not contain traversal sequences".to_string(),
        ));
    }

    Ok(())
}

/// Read one request, or `None` on a clean end-of-stream before the next
/// request line.
pub async fn read_request<R>(
    reader: &mut R,
    max_body_bytes: usize,
) -> Result<Option<HttpRequest>, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(request_line) = read_line(reader).await? else {
        return Ok(None);
    };

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ReadError::MalformedRequestLine);
    };
    if parts.next().is_some() {
        return Err(ReadError::MalformedRequestLine);
    }

    let method =
        Method::from_bytes(method.as_bytes()).map_err(|_| ReadError::MalformedRequestLine)?;
    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        other => return Err(ReadError::UnsupportedVersion(other.to_string())),
    };

    let mut headers = HeaderMap::new();
    loop {
        let line = read_line(reader).await?.ok_or(ReadError::UnexpectedEof)?;
        if line.is_empty() {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(ReadError::TooManyHeaders);
        }

        let (name, value) = line.split_once(':').ok_or(ReadError::MalformedHeader)?;
        let name =
            HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| ReadError::MalformedHeader)?;
        let value =
            HeaderValue::from_str(value.trim()).map_err(|_| ReadError::MalformedHeader)?;
        headers.append(name, value);
    }

    if headers
        .get(http::header::TRANSFER_ENCODING)
        .is_some()
    {
        return Err(ReadError::UnsupportedTransferEncoding);
    }

    let content_length = match headers.get(http::header::CONTENT_LENGTH) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or(ReadError::InvalidContentLength)?,
        None => 0,
    };
    if content_length > max_body_bytes {
        return Err(ReadError::BodyTooLarge(max_body_bytes));
    }

    let body = if content_length > 0 {
        let mut buf = vec![0u8; content_length];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|_| ReadError::UnexpectedEof)?;
        Bytes::from(buf)
    } else {
        Bytes::new()
    };

    Ok(Some(HttpRequest {
        method,
        target: target.to_string(),
        version,
        headers,
        body,
    }))
}

/// Read one CRLF-terminated line with a length cap.
///
/// `None` means the stream ended before any byte of the line.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line: Vec<u8> = Vec::new();
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            if line.is_empty() {
                return Ok(None);
            }
            return Err(ReadError::UnexpectedEof);
        }

        match buf.iter().position(|&b| b == b'\n') {
            Some(i) => {
                line.extend_from_slice(&buf[..i]);
                reader.consume(i + 1);
                if line.len() > MAX_LINE_BYTES {
                    return Err(ReadError::LineTooLong);
                }
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                let line = String::from_utf8(line).map_err(|_| ReadError::MalformedHeader)?;
                return Ok(Some(line));
            }
            None => {
                let n = buf.len();
                line.extend_from_slice(buf);
                reader.consume(n);
                if line.len() > MAX_LINE_BYTES {
                    return Err(ReadError::LineTooLong);
                }
            }
        }
    }
}

/// Serialize one response onto the wire
pub async fn write_response<W>(
    writer: &mut W,
    response: &ServiceResponse,
    request_id: &str,
    close: bool,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let reason = response.status.canonical_reason().unwrap_or("");
    let mut head = format!(
        "HTTP/1.1 {} {}\r\ncontent-type: {}\r\ncontent-length: {}\r\nx-amzn-requestid: {}\r\n",
        response.status.as_u16(),
        reason,
        response.content_type,
        response.body.len(),
        request_id,
    );
    if close {
        head.push_str("connection: close\r\n");
    }
    head.push_str("\r\n");

    writer.write_all(head.as_bytes()).await?;
    writer.write_all(&response.body).await?;
    writer.flush().await
}
