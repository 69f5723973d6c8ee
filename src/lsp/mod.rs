//! Protocol layer for talking to the server
//!
//! Layered the usual way: byte transports (`crate::io`) are wrapped by
//! Content-Length framing, JSON-RPC 2.0 on top of that, and a typed client
//! at the surface:
//!
//! - **Framing**: LSP message framing (Content-Length headers)
//! - **Rpc**: JSON-RPC 2.0 with request correlation and server requests
//! - **Protocol**: the NetBeans-specific message types
//! - **Client**: handshake and editor-facing message relay

pub mod client;
pub mod framing;
pub mod protocol;
pub mod rpc;

// Re-export main types for convenience
pub use client::{BridgeClient, ClientError, UiHooks};
