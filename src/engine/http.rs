//! Minimal HTTP/1.1 over the engine's local stream socket.
//!
//! Every call opens a fresh connection, sends one request with
//! `Connection: close`, and reads the response to completion, so no
//! connection is ever left half-consumed.

use crate::engine::EngineError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

const USER_AGENT: &str = concat!("watchz/", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names lowercased; last value wins on duplicates.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct UnixTransport {
    socket_path: PathBuf,
}

impl UnixTransport {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// One request/response round trip on a fresh connection.
    pub async fn request(
        &self,
        method: &str,
        path_and_query: &str,
        extra_headers: &[(&str, String)],
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, EngineError> {
        let mut stream = UnixStream::connect(&self.socket_path).await.map_err(|err| {
            EngineError::Unavailable {
                path: self.socket_path.display().to_string(),
                message: err.to_string(),
            }
        })?;

        let mut head = format!(
            "{method} {path_and_query} HTTP/1.1\r\nHost: localhost\r\nUser-Agent: {USER_AGENT}\r\nConnection: close\r\n"
        );
        for (name, value) in extra_headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        match body {
            Some(body) => head.push_str(&format!("Content-Length: {}\r\n", body.len())),
            // Bodyless POST/DELETE still declare an explicit zero length.
            None if method != "GET" && method != "HEAD" => {
                head.push_str("Content-Length: 0\r\n")
            }
            None => {}
        }
        head.push_str("\r\n");

        stream.write_all(head.as_bytes()).await?;
        if let Some(body) = body {
            stream.write_all(body).await?;
        }
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        read_response(&mut reader).await
    }
}

/// Parse a full HTTP/1.1 response: status line, headers, then a body
/// framed by `Content-Length`, `Transfer-Encoding: chunked`, or
/// connection close.
pub(crate) async fn read_response<R>(reader: &mut BufReader<R>) -> Result<HttpResponse, EngineError>
where
    R: AsyncRead + Unpin,
{
    let status_line = read_crlf_line(reader).await?;
    let status = parse_status_line(&status_line)?;

    let mut headers = HashMap::new();
    loop {
        let line = read_crlf_line(reader).await?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| EngineError::Protocol(format!("malformed header line '{line}'")))?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    let chunked = headers
        .get("transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));

    let body = if chunked {
        read_chunked_body(reader).await?
    } else if let Some(length) = headers.get("content-length") {
        let length: usize = length
            .parse()
            .map_err(|_| EngineError::Protocol(format!("invalid Content-Length '{length}'")))?;
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await.map_err(|_| {
            EngineError::Protocol("connection closed before the declared body length".into())
        })?;
        body
    } else {
        // Connection: close framing; the peer signals the end by EOF.
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await?;
        body
    };

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

fn parse_status_line(line: &str) -> Result<u16, EngineError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/1.") => code
            .parse()
            .map_err(|_| EngineError::Protocol(format!("invalid status code in '{line}'"))),
        _ => Err(EngineError::Protocol(format!(
            "invalid status line '{line}'"
        ))),
    }
}

/// Chunked transfer decoding: hex length line, CRLF, data, CRLF,
/// repeated until the zero-length chunk; trailers are read and dropped.
async fn read_chunked_body<R>(reader: &mut BufReader<R>) -> Result<Vec<u8>, EngineError>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let size_line = read_crlf_line(reader).await?;
        let size_field = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_field, 16).map_err(|_| {
            EngineError::Protocol(format!("invalid chunk size line '{size_line}'"))
        })?;
        if size == 0 {
            loop {
                let trailer = read_crlf_line(reader).await?;
                if trailer.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader
            .read_exact(&mut body[start..])
            .await
            .map_err(|_| EngineError::Protocol("connection closed inside a chunk".into()))?;
        let mut crlf = [0u8; 2];
        reader
            .read_exact(&mut crlf)
            .await
            .map_err(|_| EngineError::Protocol("connection closed after a chunk".into()))?;
        if &crlf != b"\r\n" {
            return Err(EngineError::Protocol("missing CRLF after chunk data".into()));
        }
    }
}

async fn read_crlf_line<R>(reader: &mut BufReader<R>) -> Result<String, EngineError>
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        return Err(EngineError::Protocol("unexpected end of stream".into()));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}
