//! JSON-RPC 2.0 protocol layer
//!
//! Implements JSON-RPC 2.0 with request/response matching, notification
//! handling, server-initiated requests (the NetBeans server asks the editor
//! for quick picks and input boxes), and a closed signal the supervisor
//! watches to schedule reconnects.

use crate::lsp::framing::LspFraming;
use crate::io::transport::Transport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, trace};

// ============================================================================
// JSON-RPC Types
// ============================================================================

/// JSON-RPC 2.0 request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier
    pub id: serde_json::Value,

    /// Method name
    pub method: String,

    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier (matches the request)
    pub id: serde_json::Value,

    /// Result (present if successful)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error (present if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    /// Build a success response for a request id
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response for a request id
    pub fn failure(id: serde_json::Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC 2.0 notification message (no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Method name
    pub method: String,

    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    /// Error code
    pub code: i32,

    /// Error message
    pub message: String,

    /// Optional additional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// JSON-RPC error codes as defined in the specification
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC error type
#[derive(Debug, thiserror::Error)]
pub enum JsonRpcError {
    #[error("JSON-RPC server error ({code}): {message}")]
    Server {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(serde_json::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(serde_json::Error),

    #[error("Request timeout")]
    Timeout,

    #[error("Request was cancelled")]
    RequestCancelled,

    #[error("Missing result in response")]
    MissingResult,
}

// ============================================================================
// JSON-RPC Client
// ============================================================================

/// Type alias for notification handler to reduce complexity
type NotificationHandler = Arc<dyn Fn(JsonRpcNotification) + Send + Sync>;

/// Server-initiated requests resolve asynchronously (they usually wait on
/// user input), so the handler returns a boxed future
type RequestFuture = Pin<Box<dyn Future<Output = JsonRpcResponse> + Send>>;
type RequestHandler = Arc<dyn Fn(JsonRpcRequest) -> RequestFuture + Send + Sync>;

/// JSON-RPC client with request/response correlation
pub struct JsonRpcClient<T: Transport> {
    /// Channel for sending outbound messages (requests and notifications)
    outbound_sender: mpsc::UnboundedSender<String>,

    /// Request ID counter
    request_id: AtomicU64,

    /// Pending requests waiting for responses
    pending_requests: Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<JsonRpcResponse>>>>,

    /// Notification handler (shared with transport task)
    notification_handler: Arc<Mutex<Option<NotificationHandler>>>,

    /// Server-request handler (shared with transport task)
    request_handler: Arc<Mutex<Option<RequestHandler>>>,

    /// Flips to true when the transport loop ends for any reason
    closed: watch::Receiver<bool>,

    /// Type parameter marker
    _phantom: std::marker::PhantomData<T>,
}

impl<T: Transport + 'static> JsonRpcClient<T> {
    /// Create a new JSON-RPC client over a framed transport
    pub fn new(transport: T) -> Self {
        let framed_transport = LspFraming::new(transport);
        let transport_arc = Arc::new(Mutex::new(framed_transport));
        let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<String>();
        let pending_requests = Arc::new(Mutex::new(HashMap::new()));

        let notification_handler = Arc::new(Mutex::new(None::<NotificationHandler>));
        let request_handler = Arc::new(Mutex::new(None::<RequestHandler>));

        let (closed_tx, closed_rx) = watch::channel(false);

        // Transport handler task for bidirectional communication
        let transport_clone = Arc::clone(&transport_arc);
        let pending_clone = Arc::clone(&pending_requests);
        let notification_clone = Arc::clone(&notification_handler);
        let request_clone = Arc::clone(&request_handler);
        let loop_sender = outbound_sender.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Outbound messages (prioritized)
                    Some(message) = outbound_receiver.recv() => {
                        let mut transport = transport_clone.lock().await;
                        if let Err(e) = transport.send(&message).await {
                            error!("Failed to send message: {}", e);
                            break;
                        }
                        drop(transport);
                    }
                    // Inbound messages
                    result = async {
                        let mut transport = transport_clone.lock().await;
                        transport.receive().await
                    } => {
                        match result {
                            Ok(message) => {
                                Self::process_inbound_message(
                                    message,
                                    &pending_clone,
                                    &notification_clone,
                                    &request_clone,
                                    &loop_sender,
                                ).await;
                            }
                            Err(e) => {
                                error!("Failed to receive message: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
            trace!("Transport handler task finished");
            let _ = closed_tx.send(true);
        });

        Self {
            outbound_sender,
            request_id: AtomicU64::new(1),
            pending_requests,
            notification_handler,
            request_handler,
            closed: closed_rx,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Set notification handler
    pub async fn on_notification<F>(&self, handler: F)
    where
        F: Fn(JsonRpcNotification) + Send + Sync + 'static,
    {
        *self.notification_handler.lock().await = Some(Arc::new(handler));
    }

    /// Set server-request handler. The handler's future is awaited on its
    /// own task so slow prompts never stall the transport loop.
    pub async fn on_request<F>(&self, handler: F)
    where
        F: Fn(JsonRpcRequest) -> RequestFuture + Send + Sync + 'static,
    {
        *self.request_handler.lock().await = Some(Arc::new(handler));
    }

    /// A watch that flips to true when the connection is gone
    pub fn closed_watch(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    /// Process an inbound message (response, notification, or request)
    async fn process_inbound_message(
        message: String,
        pending_requests: &Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<JsonRpcResponse>>>>,
        notification_handler: &Arc<Mutex<Option<NotificationHandler>>>,
        request_handler: &Arc<Mutex<Option<RequestHandler>>>,
        outbound: &mpsc::UnboundedSender<String>,
    ) {
        trace!("JsonRpcClient: Received message: {}", message);

        let Ok(value) = serde_json::from_str::<Value>(&message) else {
            debug!("Received unparseable message: {}", message);
            return;
        };

        // A method field distinguishes requests/notifications from responses
        match (value.get("method").is_some(), value.get("id").is_some()) {
            (true, true) => {
                let Ok(request) = serde_json::from_value::<JsonRpcRequest>(value) else {
                    debug!("Received malformed request: {}", message);
                    return;
                };

                let handler = request_handler.lock().await.clone();
                let outbound = outbound.clone();

                tokio::spawn(async move {
                    let response = match handler {
                        Some(handler) => handler(request).await,
                        None => JsonRpcResponse::failure(
                            request.id,
                            METHOD_NOT_FOUND,
                            format!("Method not found: {}", request.method),
                        ),
                    };

                    match serde_json::to_string(&response) {
                        Ok(json) => {
                            let _ = outbound.send(json);
                        }
                        Err(e) => error!("Failed to serialize response: {}", e),
                    }
                });
            }
            (true, false) => {
                let Ok(notification) = serde_json::from_value::<JsonRpcNotification>(value) else {
                    debug!("Received malformed notification: {}", message);
                    return;
                };

                debug!("Received notification: {}", notification.method);
                if let Some(handler) = notification_handler.lock().await.clone() {
                    handler(notification);
                }
            }
            (false, _) => {
                let Ok(response) = serde_json::from_value::<JsonRpcResponse>(value) else {
                    debug!("Received malformed response: {}", message);
                    return;
                };

                if let Some(id) = response.id.as_u64() {
                    let mut pending = pending_requests.lock().await;
                    if let Some(sender) = pending.remove(&id) {
                        if sender.send(response).is_err() {
                            debug!("Response receiver dropped for request {}", id);
                        }
                    } else {
                        debug!("Received response for unknown request {}", id);
                    }
                }
            }
        }
    }

    /// Send a JSON-RPC request with default timeout (30 seconds)
    pub async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R, JsonRpcError>
    where
        P: serde::Serialize,
        R: for<'de> serde::Deserialize<'de>,
    {
        self.request_with_timeout(method, params, std::time::Duration::from_secs(30))
            .await
    }

    /// Send a JSON-RPC request with custom timeout
    pub async fn request_with_timeout<P, R>(
        &self,
        method: &str,
        params: Option<P>,
        timeout: std::time::Duration,
    ) -> Result<R, JsonRpcError>
    where
        P: serde::Serialize,
        R: for<'de> serde::Deserialize<'de>,
    {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let (response_sender, mut response_receiver) = mpsc::unbounded_channel();

        // Register pending request
        {
            let mut pending = self.pending_requests.lock().await;
            pending.insert(id, response_sender);
        }

        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Value::Number(serde_json::Number::from(id)),
            method: method.to_string(),
            params: params
                .map(|p| serde_json::to_value(p).map_err(JsonRpcError::Serialization))
                .transpose()?,
        };

        let request_json = serde_json::to_string(&request).map_err(JsonRpcError::Serialization)?;
        debug!("JsonRpcClient: Sending request: {}", request_json);

        self.outbound_sender
            .send(request_json)
            .map_err(|_| JsonRpcError::Transport("Outbound channel closed".to_string()))?;

        // Wait for response with timeout
        let response_result = tokio::time::timeout(timeout, response_receiver.recv()).await;

        let response = match response_result {
            Ok(Some(response)) => response,
            Ok(None) => {
                let mut pending = self.pending_requests.lock().await;
                pending.remove(&id);
                return Err(JsonRpcError::RequestCancelled);
            }
            Err(_) => {
                let mut pending = self.pending_requests.lock().await;
                pending.remove(&id);
                return Err(JsonRpcError::Timeout);
            }
        };

        if let Some(error) = response.error {
            return Err(JsonRpcError::Server {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        match response.result {
            // Null results (e.g. shutdown) deserialize as R when R is ()
            Some(result) => serde_json::from_value(result).map_err(JsonRpcError::Deserialization),
            None => Err(JsonRpcError::MissingResult),
        }
    }

    /// Send a JSON-RPC notification
    pub async fn notify<P>(&self, method: &str, params: Option<P>) -> Result<(), JsonRpcError>
    where
        P: serde::Serialize,
    {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: params
                .map(|p| serde_json::to_value(p).map_err(JsonRpcError::Serialization))
                .transpose()?,
        };

        let notification_json =
            serde_json::to_string(&notification).map_err(JsonRpcError::Serialization)?;
        debug!("JsonRpcClient: Sending notification: {}", notification_json);

        self.outbound_sender
            .send(notification_json)
            .map_err(|_| JsonRpcError::Transport("Outbound channel closed".to_string()))?;

        Ok(())
    }

    /// Check if transport is connected
    pub fn is_connected(&self) -> bool {
        !self.outbound_sender.is_closed() && !*self.closed.borrow()
    }

    /// Clean up all pending requests (e.g., during restart)
    pub async fn cleanup_pending_requests(&self) {
        let mut pending = self.pending_requests.lock().await;
        for (id, sender) in pending.drain() {
            debug!("JsonRpcClient: Cleaning up pending request ID {}", id);
            let _ = sender.send(JsonRpcResponse::failure(
                Value::Number(serde_json::Number::from(id)),
                INTERNAL_ERROR,
                "Request cancelled due to connection restart",
            ));
        }
    }

    /// Close the connection
    pub async fn close(&self) -> Result<(), JsonRpcError> {
        self.cleanup_pending_requests().await;
        // The transport handler exits when the outbound channel closes
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
