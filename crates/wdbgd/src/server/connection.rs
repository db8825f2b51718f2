//! Request reading and response writing for one JSON-lines stream.
//!
//! One request object per line in, one response object per line out.
//! Responses are written through a shared writer so that concurrently
//! running tool calls never interleave their lines.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Malformed input produces an error response, never a disconnect

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter,
};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use wdbg_protocol::{ClientRequest, ErrorKind, ServerMessage};

/// Maximum message size (1 MB)
pub const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared, serialized response writer.
pub type ResponseWriter<W> = Arc<Mutex<BufWriter<W>>>;

/// Errors on the request/response stream.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Message is not valid UTF-8")]
    InvalidUtf8,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("End of input")]
    Eof,
}

/// A request line that could not be turned into a `ClientRequest`.
#[derive(Debug)]
pub struct Rejected {
    /// Request id, when the line was JSON with a numeric `id`.
    pub id: Option<u64>,
    pub error: ConnectionError,
}

impl Rejected {
    /// Error response for the rejected line.
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::error(self.id, ErrorKind::Protocol, self.error.to_string())
    }
}

/// Outcome of reading one line.
#[derive(Debug)]
pub enum Incoming {
    Request(ClientRequest),
    Rejected(Rejected),
    Blank,
}

/// Reads and decodes request lines.
pub struct RequestReader<R> {
    reader: R,
}

impl<R: AsyncBufRead + Unpin> RequestReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next line.
    ///
    /// Never buffers more than `MAX_MESSAGE_SIZE + 1` bytes of one line;
    /// the rest of an oversized line is skipped.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Eof` at end of input
    /// - `ConnectionError::Io` if reading fails
    pub async fn next(&mut self) -> Result<Incoming, ConnectionError> {
        let mut buf = Vec::new();

        let bytes_read = (&mut self.reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if buf.len() > MAX_MESSAGE_SIZE {
            let mut size = buf.len();
            if buf.last() != Some(&b'\n') {
                size += self.skip_line().await?;
            }
            return Ok(Incoming::Rejected(Rejected {
                id: None,
                error: ConnectionError::MessageTooLarge {
                    size,
                    max: MAX_MESSAGE_SIZE,
                },
            }));
        }

        let Ok(line) = String::from_utf8(buf) else {
            return Ok(Incoming::Rejected(Rejected {
                id: None,
                error: ConnectionError::InvalidUtf8,
            }));
        };

        if line.trim().is_empty() {
            return Ok(Incoming::Blank);
        }

        Ok(decode(&line))
    }

    /// Discards input up to and including the next newline.
    async fn skip_line(&mut self) -> Result<usize, ConnectionError> {
        let mut skipped = 0;
        loop {
            let available = self
                .reader
                .fill_buf()
                .await
                .map_err(|e| ConnectionError::Io(e.to_string()))?;
            if available.is_empty() {
                return Ok(skipped);
            }
            let (used, done) = match available.iter().position(|b| *b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (available.len(), false),
            };
            self.reader.consume(used);
            skipped += used;
            if done {
                return Ok(skipped);
            }
        }
    }
}

/// Decodes one request line.
pub fn decode(line: &str) -> Incoming {
    match serde_json::from_str::<ClientRequest>(line) {
        Ok(request) => {
            if let Err(e) = request.protocol_version.check() {
                return Incoming::Rejected(Rejected {
                    id: Some(request.id),
                    error: ConnectionError::ParseError(e.to_string()),
                });
            }
            debug!(id = request.id, tool = request.call.name(), "Received request");
            Incoming::Request(request)
        }
        Err(e) => {
            let id = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|value| value.get("id").and_then(serde_json::Value::as_u64));
            Incoming::Rejected(Rejected {
                id,
                error: ConnectionError::ParseError(e.to_string()),
            })
        }
    }
}

/// Writes one response line.
///
/// # Errors
///
/// - `ConnectionError::WriteTimeout` if the peer stops reading
/// - `ConnectionError::Io` if the write fails
pub async fn send_message<W: AsyncWrite + Unpin>(
    writer: &ResponseWriter<W>,
    msg: &ServerMessage,
) -> Result<(), ConnectionError> {
    let json =
        serde_json::to_string(msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}
