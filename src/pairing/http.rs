//! Minimal HTTP/1.1 client for the AirPlay pairing endpoints
//!
//! One keep-alive connection, POST only, bodies delimited by
//! `Content-Length`. This is all the pairing endpoints need; anything
//! fancier belongs to a real HTTP crate.

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::transport::TransportError;

const USER_AGENT: &str = "AirPlay/320.20";

/// A parsed HTTP response
#[derive(Debug)]
pub struct HttpResponse {
    /// Status code from the status line
    pub status: u16,
    /// Response body (may be empty)
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Whether the status is 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A keep-alive HTTP connection to a device's AirPlay port
pub struct HttpConnection {
    stream: TcpStream,
    buf: BytesMut,
}

impl HttpConnection {
    /// Connect to `addr`
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the connect fails.
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(4 * 1024),
        })
    }

    /// POST `body` to `path` and read the reply
    ///
    /// # Errors
    ///
    /// Returns an I/O error on socket failure or `Closed` if the peer
    /// hangs up mid-response.
    pub async fn post(
        &mut self,
        path: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<HttpResponse, TransportError> {
        let mut request = Vec::with_capacity(256 + body.len());
        request.extend_from_slice(format!("POST {path} HTTP/1.1\r\n").as_bytes());
        request.extend_from_slice(format!("User-Agent: {USER_AGENT}\r\n").as_bytes());
        request.extend_from_slice(b"Connection: keep-alive\r\n");
        request.extend_from_slice(b"X-Apple-HKP: 3\r\n");
        if let Some(content_type) = content_type {
            request.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        request.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        request.extend_from_slice(b"\r\n");
        request.extend_from_slice(body);

        self.stream.write_all(&request).await?;
        self.stream.flush().await?;

        self.read_response().await
    }

    async fn read_response(&mut self) -> Result<HttpResponse, TransportError> {
        // Accumulate until the header/body separator shows up
        let header_end = loop {
            if let Some(at) = find_headers_end(&self.buf) {
                break at;
            }
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(TransportError::Closed);
            }
        };

        let header_bytes = self.buf.split_to(header_end + 4);
        let headers = String::from_utf8_lossy(&header_bytes);
        let status = parse_status(&headers)?;
        let content_length = parse_content_length(&headers);

        while self.buf.len() < content_length {
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(TransportError::Closed);
            }
        }
        let body = self.buf.split_to(content_length).to_vec();

        Ok(HttpResponse { status, body })
    }
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_status(headers: &str) -> Result<u16, TransportError> {
    // "HTTP/1.1 200 OK"
    headers
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "malformed status line",
            ))
        })
}

fn parse_content_length(headers: &str) -> usize {
    headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())?
        })
        .unwrap_or(0)
}
