//! Transport layer - byte stream exchange with the server
//!
//! The bridge opens an ephemeral loopback listener and tells the server to
//! connect back to it; the accepted socket becomes the communication
//! channel. The transport moves raw byte chunks only - message framing is
//! layered on top.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{error, trace};

/// Core transport trait for bidirectional byte exchange
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a chunk of bytes
    async fn send(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receive the next chunk of bytes, as large as the peer delivered it
    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Check if the transport is still active
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Socket Transport
// ============================================================================

/// Error types for the socket transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("No connection accepted within {timeout:?}")]
    AcceptTimeout { timeout: Duration },
}

/// Listener bound to an ephemeral loopback port, accepting exactly one
/// server connection
pub struct SocketListener {
    listener: TcpListener,
    port: u16,
}

impl SocketListener {
    /// Bind to an ephemeral port on the loopback interface
    pub async fn bind() -> Result<Self, TransportError> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        trace!("SocketListener: listening on 127.0.0.1:{}", port);
        Ok(Self { listener, port })
    }

    /// The port the server should be told to connect to
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept the server's connection. Consumes the listener so at most one
    /// connection is ever accepted.
    pub async fn accept(self, timeout: Duration) -> Result<SocketTransport, TransportError> {
        match tokio::time::timeout(timeout, self.listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                trace!("SocketListener: accepted connection from {}", peer);
                Ok(SocketTransport::new(stream))
            }
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Err(TransportError::AcceptTimeout { timeout }),
        }
    }
}

/// Transport over an accepted loopback socket
pub struct SocketTransport {
    /// Channel for sending bytes to the socket
    write_sender: Option<mpsc::UnboundedSender<Vec<u8>>>,

    /// Channel for receiving bytes from the socket
    read_receiver: Option<mpsc::UnboundedReceiver<Vec<u8>>>,

    /// Connection status
    connected: bool,
}

impl SocketTransport {
    /// Create a transport from a connected stream
    pub fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (write_sender, write_receiver) = mpsc::unbounded_channel();
        let (read_sender, read_receiver) = mpsc::unbounded_channel();

        tokio::spawn(Self::writer_task(write_half, write_receiver));
        tokio::spawn(Self::reader_task(read_half, read_sender));

        Self {
            write_sender: Some(write_sender),
            read_receiver: Some(read_receiver),
            connected: true,
        }
    }

    /// Background task that writes outbound bytes to the socket
    async fn writer_task(
        mut write_half: tokio::net::tcp::OwnedWriteHalf,
        mut receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(data) = receiver.recv().await {
            trace!("SocketTransport: writing {} bytes", data.len());

            if let Err(e) = write_half.write_all(&data).await {
                error!("Failed to write to socket: {}", e);
                break;
            }

            if let Err(e) = write_half.flush().await {
                error!("Failed to flush socket: {}", e);
                break;
            }
        }

        trace!("SocketTransport: writer task finished");
    }

    /// Background task that reads inbound bytes from the socket
    async fn reader_task(
        mut read_half: tokio::net::tcp::OwnedReadHalf,
        sender: mpsc::UnboundedSender<Vec<u8>>,
    ) {
        let mut buffer = [0u8; 8192];

        loop {
            match read_half.read(&mut buffer).await {
                Ok(0) => {
                    trace!("SocketTransport: peer closed the connection");
                    break;
                }
                Ok(n) => {
                    trace!("SocketTransport: read {} bytes", n);
                    if sender.send(buffer[..n].to_vec()).is_err() {
                        trace!("SocketTransport: receiver dropped, stopping reader");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read from socket: {}", e);
                    break;
                }
            }
        }

        trace!("SocketTransport: reader task finished");
    }
}

#[async_trait]
impl Transport for SocketTransport {
    type Error = TransportError;

    async fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        let sender = self
            .write_sender
            .as_ref()
            .ok_or(TransportError::Disconnected)?;

        sender
            .send(data.to_vec())
            .map_err(|e| TransportError::Channel(e.to_string()))?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        let receiver = self
            .read_receiver
            .as_mut()
            .ok_or(TransportError::Disconnected)?;

        receiver.recv().await.ok_or(TransportError::Disconnected)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        self.write_sender.take();
        self.read_receiver.take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Mock Transport Implementation
// ============================================================================

/// Error type for mock transport
#[derive(Debug, thiserror::Error)]
pub enum MockTransportError {
    #[error("Transport is disconnected")]
    Disconnected,
    #[error("No more responses available")]
    NoMoreResponses,
}

/// Mock transport for testing - records sent bytes and replays scripted
/// responses
pub struct MockTransport {
    sent: Vec<Vec<u8>>,
    responses: std::collections::VecDeque<Vec<u8>>,
    connected: bool,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            responses: std::collections::VecDeque::new(),
            connected: true,
        }
    }

    /// Create a mock transport with predefined response chunks
    pub fn with_responses(responses: Vec<Vec<u8>>) -> Self {
        let mut transport = Self::new();
        transport.responses.extend(responses);
        transport
    }

    /// Queue a response chunk for the next receive() call
    pub fn add_response(&mut self, response: Vec<u8>) {
        self.responses.push_back(response);
    }

    /// All bytes sent via this transport, concatenated
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.sent.concat()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }
        self.sent.push(data.to_vec());
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }
        self.responses
            .pop_front()
            .ok_or(MockTransportError::NoMoreResponses)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Tests
// ============================================================================
