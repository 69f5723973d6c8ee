//! LSP message framing layer
//!
//! Handles LSP-specific message framing using Content-Length headers
//! as specified in the Language Server Protocol specification.
//!
//! LSP message framing format:
//! Content-Length: <length>\r\n\r\n<content>

use crate::io::transport::Transport;
use std::collections::VecDeque;
use tracing::trace;

/// Error types for LSP framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError<T: std::error::Error + Send + Sync + 'static> {
    #[error("Transport error: {0}")]
    Transport(T),

    #[error("Invalid LSP message format: {0}")]
    InvalidFormat(String),

    #[error("Invalid content length: {0}")]
    InvalidContentLength(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Message content is not valid UTF-8")]
    InvalidUtf8,
}

/// Maximum message size to prevent memory exhaustion
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// LSP message framing wrapper
///
/// Wraps any transport to handle LSP message framing with Content-Length
/// headers. The underlying transport moves raw byte chunks; this wrapper
/// reassembles them into complete messages regardless of how the peer split
/// them.
pub struct LspFraming<T: Transport> {
    /// Underlying transport
    transport: T,

    /// Buffer for accumulating partial messages
    receive_buffer: Vec<u8>,

    /// Queue of complete messages ready to be returned
    message_queue: VecDeque<String>,
}

impl<T: Transport> LspFraming<T> {
    /// Create a new LSP framing wrapper around a transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            receive_buffer: Vec::new(),
            message_queue: VecDeque::new(),
        }
    }

    /// Get a reference to the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Frame a message with the Content-Length header
    pub fn frame_message(content: &str) -> Vec<u8> {
        let mut framed = format!("Content-Length: {}\r\n\r\n", content.len()).into_bytes();
        framed.extend_from_slice(content.as_bytes());
        framed
    }

    /// Send a message with framing
    pub async fn send(&mut self, message: &str) -> Result<(), FramingError<T::Error>> {
        let framed = Self::frame_message(message);
        self.transport
            .send(&framed)
            .await
            .map_err(FramingError::Transport)
    }

    /// Receive the next complete message, reading more transport chunks as
    /// needed
    pub async fn receive(&mut self) -> Result<String, FramingError<T::Error>> {
        loop {
            if let Some(message) = self.message_queue.pop_front() {
                return Ok(message);
            }

            while let Some(message) = self.try_parse_message()? {
                self.message_queue.push_back(message);
            }

            if let Some(message) = self.message_queue.pop_front() {
                return Ok(message);
            }

            let chunk = self
                .transport
                .receive()
                .await
                .map_err(FramingError::Transport)?;
            self.receive_buffer.extend_from_slice(&chunk);
        }
    }

    /// Close the underlying transport
    pub async fn close(&mut self) -> Result<(), FramingError<T::Error>> {
        self.transport
            .close()
            .await
            .map_err(FramingError::Transport)
    }

    /// Check if the underlying transport is connected
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Parse one LSP message from the receive buffer.
    ///
    /// Returns Some(message) if a complete message was parsed,
    /// None if more data is needed.
    fn try_parse_message(&mut self) -> Result<Option<String>, FramingError<T::Error>> {
        let Some(header_end) = find_subsequence(&self.receive_buffer, HEADER_SEPARATOR) else {
            return Ok(None);
        };

        let header = String::from_utf8_lossy(&self.receive_buffer[..header_end]).to_string();
        let content_start = header_end + HEADER_SEPARATOR.len();

        let content_length = self.parse_content_length(&header)?;

        if content_length > MAX_MESSAGE_SIZE {
            return Err(FramingError::MessageTooLarge {
                size: content_length,
                max: MAX_MESSAGE_SIZE,
            });
        }

        // Check if we have the complete message
        let available = self.receive_buffer.len() - content_start;
        if available < content_length {
            trace!(
                "LspFraming: incomplete message - need {} more bytes",
                content_length - available
            );
            return Ok(None);
        }

        let content = self.receive_buffer[content_start..content_start + content_length].to_vec();
        self.receive_buffer.drain(..content_start + content_length);

        let message = String::from_utf8(content).map_err(|_| FramingError::InvalidUtf8)?;
        trace!("LspFraming: parsed complete message ({} bytes)", message.len());
        Ok(Some(message))
    }

    /// Parse Content-Length from LSP headers
    fn parse_content_length(&self, header: &str) -> Result<usize, FramingError<T::Error>> {
        for line in header.lines() {
            if let Some(value) = line
                .strip_prefix("Content-Length:")
                .or_else(|| line.strip_prefix("content-length:"))
            {
                return value
                    .trim()
                    .parse()
                    .map_err(|_| FramingError::InvalidContentLength(value.trim().to_string()));
            }
        }

        Err(FramingError::InvalidFormat(
            "missing Content-Length header".to_string(),
        ))
    }
}

/// Find the first occurrence of `needle` in `haystack`
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
