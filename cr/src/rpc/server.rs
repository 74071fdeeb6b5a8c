//! RPC server
//!
//! Accepts TCP connections, reads one request line per connection and
//! dispatches it to the [`RelayService`]. A `Subscribe` connection stays open,
//! gets a `Subscribed` line once the subscription is positioned and then one
//! `Batch` line per delivered batch; the client closing its side of the
//! connection cancels the subscription.

use std::net::SocketAddr;

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::messages::{RelayRequest, RelayResponse};
use crate::domain::Message;
use crate::error::{RelayError, RelayResult};
use crate::service::RelayService;
use crate::subscription::{BatchSink, CancelHandle, cancellation};

/// Maximum request line size
pub const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// TCP front end of a [`RelayService`]
pub struct RelayServer {
    listener: TcpListener,
    service: RelayService,
}

impl RelayServer {
    /// Bind the listening socket
    pub async fn bind(addr: &str, service: RelayService) -> Result<Self> {
        debug!(%addr, "bind: called");
        let listener = TcpListener::bind(addr)
            .await
            .context(format!("Failed to bind {}", addr))?;
        Ok(Self { listener, service })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("Failed to read local address")
    }

    /// Serve connections until a shutdown signal arrives
    ///
    /// Open connections (including live subscriptions) are aborted on
    /// shutdown, which releases their registrations.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        debug!("run: called");
        info!(addr = ?self.listener.local_addr().ok(), "RelayServer listening");
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!(%peer, "run: connection accepted");
                            let service = self.service.clone();
                            connections.spawn(async move {
                                if let Err(e) = handle_connection(service, stream).await {
                                    warn!(%peer, error = %e, "run: connection error");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "run: accept error");
                        }
                    }
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        warn!(error = %e, "run: connection task panicked");
                    }
                }

                _ = shutdown_rx.recv() => {
                    debug!("run: shutdown signal received");
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!(open = connections.len(), "Closing open connections");
        connections.shutdown().await;
        debug!("run: complete");
        Ok(())
    }
}

/// Serve the single request carried by a connection
async fn handle_connection(service: RelayService, stream: TcpStream) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request = match read_request(&mut reader).await {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "handle_connection: bad request");
            write_response(&mut write_half, &RelayResponse::from(&e)).await?;
            return Ok(());
        }
    };
    debug!(?request, "handle_connection: received request");

    let response = match request {
        RelayRequest::Publish { sender, body } => match service.publish(&Message::new(sender, body)).await {
            Ok(_) => RelayResponse::Ok,
            Err(e) => RelayResponse::from(&e),
        },
        RelayRequest::ReadBacklog => match service.read_backlog().await {
            Ok(messages) => RelayResponse::Backlog { messages },
            Err(e) => RelayResponse::from(&e),
        },
        RelayRequest::ActiveSubscriptionCount => RelayResponse::Count {
            count: service.active_subscription_count(),
        },
        RelayRequest::Subscribe => {
            return serve_subscription(service, reader, write_half).await;
        }
    };

    write_response(&mut write_half, &response).await?;
    Ok(())
}

/// Stream batches to the client until it hangs up or the subscription fails
async fn serve_subscription(
    service: RelayService,
    reader: BufReader<OwnedReadHalf>,
    write_half: OwnedWriteHalf,
) -> Result<()> {
    let (handle, cancel) = cancellation();
    let watcher = tokio::spawn(cancel_on_hangup(reader, handle));
    let mut writer = ResponseWriter { inner: write_half };

    let result = service.subscribe(&mut writer, cancel).await;
    watcher.abort();

    match result {
        Ok(summary) => {
            debug!(session_id = %summary.id, "serve_subscription: client hung up");
        }
        // The client is gone, nobody to tell
        Err(RelayError::Delivery(_)) => {}
        Err(e) => {
            write_response(&mut writer.inner, &RelayResponse::from(&e))
                .await
                .context("Failed to report subscription error")?;
        }
    }
    Ok(())
}

/// Fire the cancel handle once the peer closes its side of the connection
async fn cancel_on_hangup<R: AsyncRead + Unpin>(mut reader: R, handle: CancelHandle) {
    let mut buf = [0u8; 256];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("cancel_on_hangup: peer closed connection");
                break;
            }
            // Anything sent after the request line is ignored
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "cancel_on_hangup: read error");
                break;
            }
        }
    }
    handle.cancel();
}

/// Read and parse one request line of at most [`MAX_REQUEST_SIZE`] bytes
async fn read_request<R: AsyncBufRead + Unpin>(reader: &mut R) -> RelayResult<RelayRequest> {
    let mut line = String::new();
    let mut limited = reader.take(MAX_REQUEST_SIZE as u64 + 1);
    limited
        .read_line(&mut line)
        .await
        .map_err(|e| RelayError::Protocol(format!("Failed to read request: {}", e)))?;

    if line.len() > MAX_REQUEST_SIZE {
        return Err(RelayError::Protocol(format!(
            "Request too large: more than {} bytes",
            MAX_REQUEST_SIZE
        )));
    }
    if line.trim().is_empty() {
        return Err(RelayError::Protocol("Empty request received".to_string()));
    }

    serde_json::from_str(line.trim()).map_err(|e| RelayError::Protocol(format!("Failed to parse request: {}", e)))
}

/// Write one response line
async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &RelayResponse) -> std::io::Result<()> {
    let mut json = serde_json::to_string(response)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Batch sink writing `Subscribed` and `Batch` lines to the connection
struct ResponseWriter {
    inner: OwnedWriteHalf,
}

#[async_trait]
impl BatchSink for ResponseWriter {
    async fn started(&mut self) -> RelayResult<()> {
        write_response(&mut self.inner, &RelayResponse::Subscribed)
            .await
            .map_err(|e| RelayError::Delivery(e.to_string()))
    }

    async fn send_batch(&mut self, batch: Vec<Message>) -> RelayResult<()> {
        let response = RelayResponse::Batch { messages: batch };
        write_response(&mut self.inner, &response)
            .await
            .map_err(|e| RelayError::Delivery(e.to_string()))
    }
}
