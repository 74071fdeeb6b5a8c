//! RPC client for talking to a relay server
//!
//! One TCP connection per request, mirroring the server. A subscription keeps
//! its connection open; dropping the [`RemoteSubscription`] closes it, which
//! the server treats as cancellation.

use std::time::Duration;

use eyre::{Context, Result};
use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use super::messages::{RelayRequest, RelayResponse};
use super::server::MAX_REQUEST_SIZE;
use crate::config::DEFAULT_LISTEN;
use crate::domain::Message;

/// Default timeout for RPC operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for a relay server
#[derive(Debug, Clone)]
pub struct RelayClient {
    addr: String,
    timeout: Duration,
}

impl Default for RelayClient {
    fn default() -> Self {
        Self::new(DEFAULT_LISTEN)
    }
}

impl RelayClient {
    /// Create a client for the server at `addr`
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Publish a message
    pub async fn publish(&self, sender: &str, body: &str) -> Result<()> {
        debug!(%sender, "RelayClient: publishing message");
        let request = RelayRequest::Publish {
            sender: sender.to_string(),
            body: body.to_string(),
        };
        match self.request(request).await? {
            RelayResponse::Ok => Ok(()),
            RelayResponse::Error { kind, message } => Err(relay_error(&kind, &message)),
            other => Err(eyre::eyre!("Unexpected response: {:?}", other)),
        }
    }

    /// Fetch the full backlog, oldest first
    pub async fn read_backlog(&self) -> Result<Vec<Message>> {
        debug!("RelayClient: reading backlog");
        match self.request(RelayRequest::ReadBacklog).await? {
            RelayResponse::Backlog { messages } => Ok(messages),
            RelayResponse::Error { kind, message } => Err(relay_error(&kind, &message)),
            other => Err(eyre::eyre!("Unexpected response: {:?}", other)),
        }
    }

    /// Number of live subscriptions on the server
    pub async fn active_subscription_count(&self) -> Result<usize> {
        debug!("RelayClient: querying subscription count");
        match self.request(RelayRequest::ActiveSubscriptionCount).await? {
            RelayResponse::Count { count } => Ok(count),
            RelayResponse::Error { kind, message } => Err(relay_error(&kind, &message)),
            other => Err(eyre::eyre!("Unexpected response: {:?}", other)),
        }
    }

    /// Open a live subscription
    ///
    /// Returns once the server has positioned the subscription, so every
    /// message published after this returns is delivered to it.
    pub async fn subscribe(&self) -> Result<RemoteSubscription> {
        debug!("RelayClient: subscribing");
        let mut stream = self.connect().await?;
        self.write_request(&mut stream, &RelayRequest::Subscribe).await?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut line = String::new();
        let bytes_read = tokio::time::timeout(self.timeout, reader.read_line(&mut line))
            .await
            .context("Subscribe timeout")?
            .context("Failed to read subscribe acknowledgment")?;
        if bytes_read == 0 {
            return Err(eyre::eyre!("Server closed the connection before subscribing"));
        }
        match parse_response(&line)? {
            RelayResponse::Subscribed => {
                debug!("RelayClient: subscription positioned");
                Ok(RemoteSubscription {
                    reader,
                    _writer: write_half,
                })
            }
            RelayResponse::Error { kind, message } => Err(relay_error(&kind, &message)),
            other => Err(eyre::eyre!("Unexpected response: {:?}", other)),
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .context("Connection timeout")?
            .context(format!("Failed to connect to relay at {}", self.addr))
    }

    /// Send a request on a fresh connection and wait for the single response
    async fn request(&self, request: RelayRequest) -> Result<RelayResponse> {
        debug!(addr = %self.addr, ?request, "RelayClient: sending request");
        let mut stream = self.connect().await?;
        self.write_request(&mut stream, &request).await?;

        let mut reader = BufReader::new(&mut stream);
        let mut response_line = String::new();
        tokio::time::timeout(self.timeout, reader.read_line(&mut response_line))
            .await
            .context("Read timeout")?
            .context("Failed to read response")?;

        let response = parse_response(&response_line)?;
        debug!(?response, "RelayClient: received response");
        Ok(response)
    }

    async fn write_request(&self, stream: &mut TcpStream, request: &RelayRequest) -> Result<()> {
        let request_json = serde_json::to_string(request).context("Failed to serialize request")?;

        // Validate request size
        if request_json.len() >= MAX_REQUEST_SIZE {
            return Err(eyre::eyre!("Request too large: {} bytes", request_json.len()));
        }

        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(request_json.as_bytes())
                .await
                .context("Failed to write request")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;
        Ok(())
    }
}

/// Live subscription held open over a TCP connection
pub struct RemoteSubscription {
    reader: BufReader<OwnedReadHalf>,
    // Held open; dropping it half-closes the connection and cancels
    _writer: OwnedWriteHalf,
}

impl RemoteSubscription {
    /// Next delivered batch
    ///
    /// Returns `Ok(None)` when the server closed the stream and an error when
    /// the server reported the subscription failed.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Message>>> {
        let mut line = String::new();
        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .context("Failed to read from subscription")?;
        if bytes_read == 0 {
            debug!("RemoteSubscription: server closed stream");
            return Ok(None);
        }

        match parse_response(&line)? {
            RelayResponse::Batch { messages } => Ok(Some(messages)),
            RelayResponse::Error { kind, message } => Err(relay_error(&kind, &message)),
            other => Err(eyre::eyre!("Unexpected response: {:?}", other)),
        }
    }

    /// Turn the subscription into a stream of batches
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<Message>>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut sub = state?;
            match sub.next_batch().await {
                Ok(Some(batch)) => Some((Ok(batch), Some(sub))),
                Ok(None) => None,
                // Yield the error, then end the stream
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

fn parse_response(line: &str) -> Result<RelayResponse> {
    serde_json::from_str(line.trim()).context("Failed to parse relay response")
}

fn relay_error(kind: &str, message: &str) -> eyre::Report {
    eyre::eyre!("Relay error ({}): {}", kind, message)
}
