//! HTTP/1.1 handshake: request building and response head parsing

use crate::chunked::ChunkedDecoder;
use crate::error::{StreamError, StreamResult};
use cloudtap_core::StreamSettings;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest response head accepted
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Largest error body kept for diagnostics
pub const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

const MAX_HEADERS: usize = 64;

/// Build the streaming GET request
pub fn build_request(settings: &StreamSettings, token: &str) -> String {
    let mut request = format!("GET {} HTTP/1.1\r\n", settings.request_path());
    request.push_str(&format!("Host: {}\r\n", settings.host));
    request.push_str("Accept: */*\r\n");
    request.push_str(&format!("Authorization: Bearer {}\r\n", token));
    request.push_str(&format!("User-Agent: {}\r\n", settings.user_agent));
    request.push_str("\r\n");
    request
}

/// Parsed response status line and headers
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// First header with this name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the body uses chunked framing
    ///
    /// `chunked` must be the final transfer coding.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("transfer-encoding"))
            .filter_map(|(_, v)| v.rsplit(',').next())
            .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Status line, as the server sent it
    pub fn status_line(&self) -> String {
        format!("{} {} {}", self.version, self.status, self.reason)
    }

    /// Headers one per line, for diagnostics
    pub fn header_block(&self) -> String {
        self.headers
            .iter()
            .map(|(n, v)| format!("{}: {}\n", n, v))
            .collect()
    }
}

/// Read and parse a response head.
///
/// Returns the head and any body bytes read past it.
pub async fn read_response_head<R>(reader: &mut R) -> StreamResult<(ResponseHead, Vec<u8>)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        if let Some((head, consumed)) = parse_response_head(&buf)? {
            let leftover = buf.split_off(consumed);
            return Ok((head, leftover));
        }

        if buf.len() > MAX_HEAD_BYTES {
            return Err(StreamError::InvalidResponse(format!(
                "response head exceeds {} bytes",
                MAX_HEAD_BYTES
            )));
        }

        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(StreamError::InvalidResponse(
                "connection closed before response head was complete".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Parse a complete head from `data`, or `None` if more bytes are needed
pub fn parse_response_head(data: &[u8]) -> StreamResult<Option<(ResponseHead, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);

    match resp.parse(data) {
        Ok(httparse::Status::Complete(consumed)) => {
            let headers = resp
                .headers
                .iter()
                .map(|h| {
                    (
                        h.name.to_string(),
                        String::from_utf8_lossy(h.value).trim().to_string(),
                    )
                })
                .collect();

            let head = ResponseHead {
                version: format!("HTTP/1.{}", resp.version.unwrap_or(1)),
                status: resp.code.unwrap_or(0),
                reason: resp.reason.unwrap_or("").to_string(),
                headers,
            };
            Ok(Some((head, consumed)))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(StreamError::InvalidResponse(format!(
            "malformed response head: {}",
            e
        ))),
    }
}

/// Drain an error response body for diagnostics.
///
/// Reads at most [`MAX_ERROR_BODY_BYTES`] and gives up after `wait`; what was
/// read by then is returned. Read errors end the drain quietly.
pub async fn drain_body<R>(
    reader: &mut R,
    head: &ResponseHead,
    leftover: Vec<u8>,
    wait: Duration,
) -> String
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut body = Vec::new();
    let _ = tokio::time::timeout(wait, collect_body(reader, head, leftover, &mut body)).await;
    body.truncate(MAX_ERROR_BODY_BYTES);
    String::from_utf8_lossy(&body).trim().to_string()
}

async fn collect_body<R>(
    reader: &mut R,
    head: &ResponseHead,
    leftover: Vec<u8>,
    body: &mut Vec<u8>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut chunk = [0u8; 4096];

    if head.is_chunked() {
        let mut decoder = ChunkedDecoder::new();
        let mut input = leftover;
        loop {
            if decoder.decode(&input, body).is_err() || decoder.is_done() {
                return Ok(());
            }
            if body.len() >= MAX_ERROR_BODY_BYTES {
                return Ok(());
            }
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            input = chunk[..n].to_vec();
        }
    }

    let limit = head
        .content_length()
        .unwrap_or(usize::MAX)
        .min(MAX_ERROR_BODY_BYTES);

    body.extend_from_slice(&leftover);
    while body.len() < limit {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(limit);
    Ok(())
}
