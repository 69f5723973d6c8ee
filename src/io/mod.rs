//! I/O layer - process management and transport
//!
//! Fundamental abstractions that are not specific to any protocol:
//!
//! - **Process**: external server process lifecycle with piped output and a
//!   termination event
//! - **Transport**: loopback socket byte exchange with the server
//!
//! The protocol layer (`crate::lsp`) builds message framing and JSON-RPC on
//! top of these.

pub mod process;
pub mod transport;

// Re-export main types for convenience
pub use process::{LaunchError, NbLauncher, OutputChunk, ServerHandle, ServerLauncher};
pub use transport::{MockTransport, SocketListener, SocketTransport, Transport, TransportError};
