//! Tool server: JSON-lines requests in, JSON-lines responses out.
//!
//! The server reads requests from any `AsyncRead` (stdin in production)
//! and runs each on its own task, so a slow command on one session never
//! blocks calls on another. Responses carry the request `id` and may be
//! written out of order.
//!
//! The loop ends at end of input or when the cancellation token fires.
//! In-flight calls get a short grace period to write their responses.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A panicking tool task is logged and does not stop the server

mod connection;

pub use connection::{
    decode, send_message, ConnectionError, Incoming, Rejected, RequestReader, ResponseWriter,
    MAX_MESSAGE_SIZE,
};

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite, BufWriter};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wdbg_protocol::{ClientRequest, ServerMessage, ToolCall};

use crate::tools::Tools;

/// How long in-flight calls may keep running after input ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that end the server loop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to read requests: {0}")]
    Read(#[source] ConnectionError),
}

/// The tool server.
pub struct ToolServer {
    tools: Tools,
    cancel_token: CancellationToken,
}

impl ToolServer {
    pub fn new(tools: Tools, cancel_token: CancellationToken) -> Self {
        Self {
            tools,
            cancel_token,
        }
    }

    /// Serves requests until end of input or cancellation.
    ///
    /// # Errors
    ///
    /// - `ServerError::Read` if the input stream fails
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<(), ServerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut requests = RequestReader::new(reader);
        let writer: ResponseWriter<W> = Arc::new(Mutex::new(BufWriter::new(writer)));
        let mut in_flight = JoinSet::new();
        let mut handled: u64 = 0;

        info!("Tool server ready");

        let result = loop {
            let incoming = tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Tool server shutting down");
                    break Ok(());
                }
                incoming = requests.next() => incoming,
            };

            // Reap finished tasks so the set doesn't grow without bound.
            while let Some(joined) = in_flight.try_join_next() {
                log_join(joined);
            }

            match incoming {
                Ok(Incoming::Request(request)) => {
                    handled += 1;
                    self.dispatch(request, &writer, &mut in_flight);
                }
                Ok(Incoming::Rejected(rejected)) => {
                    warn!(id = ?rejected.id, error = %rejected.error, "Rejected request");
                    if let Err(e) = send_message(&writer, &rejected.to_message()).await {
                        warn!(error = %e, "Failed to write response");
                    }
                }
                Ok(Incoming::Blank) => {}
                Err(ConnectionError::Eof) => {
                    info!(handled, "Input closed");
                    break Ok(());
                }
                Err(e) => break Err(ServerError::Read(e)),
            }
        };

        self.drain(&mut in_flight).await;
        result
    }

    fn dispatch<W>(
        &self,
        request: ClientRequest,
        writer: &ResponseWriter<W>,
        in_flight: &mut JoinSet<()>,
    ) where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let ClientRequest { id, call, .. } = request;

        if let ToolCall::Ping { seq } = call {
            let writer = Arc::clone(writer);
            in_flight.spawn(async move {
                if let Err(e) = send_message(&writer, &ServerMessage::pong(id, seq)).await {
                    warn!(id, error = %e, "Failed to write pong");
                }
            });
            return;
        }

        let tools = self.tools.clone();
        let writer = Arc::clone(writer);
        in_flight.spawn(async move {
            let tool = call.name();
            let response = match tools.call(call).await {
                Ok(output) => {
                    debug!(id, tool, "Tool call succeeded");
                    ServerMessage::result(id, output)
                }
                Err(e) => {
                    warn!(id, tool, error = %e, "Tool call failed");
                    ServerMessage::error(Some(id), e.kind(), e.to_string())
                }
            };
            if let Err(e) = send_message(&writer, &response).await {
                warn!(id, error = %e, "Failed to write response");
            }
        });
    }

    async fn drain(&self, in_flight: &mut JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }
        debug!(pending = in_flight.len(), "Waiting for in-flight calls");

        let waited = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while let Some(joined) = in_flight.join_next().await {
                log_join(joined);
            }
        })
        .await;

        if waited.is_err() {
            warn!(pending = in_flight.len(), "Abandoning in-flight calls");
            in_flight.abort_all();
        }
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Tool task panicked");
        }
    }
}
