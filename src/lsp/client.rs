//! High-level client for the NetBeans language server
//!
//! `BridgeClient` wraps the JSON-RPC layer with the initialize/shutdown
//! handshake and relays the server's custom messages to the editor frontend:
//! status bar messages, quick picks, input boxes, log output, and test
//! progress. It is the "client handle" of the supervisor - created only once
//! the server is ready, invalid once the server terminates.

use lsp_types::{
    ClientCapabilities, InitializeParams, InitializeResult, InitializedParams, LogMessageParams,
    MessageType, WorkspaceClientCapabilities,
};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::editor::{EditorUi, decorate_status_message};
use crate::io::transport::Transport;
use crate::lsp::protocol::{
    INPUT_BOX_METHOD, InputBoxParams, QUICK_PICK_METHOD, QuickPickParams,
    SHOW_STATUS_MESSAGE_METHOD, ShowStatusMessageParams, TEST_PROGRESS_METHOD, TestProgressParams,
};
use crate::lsp::rpc::{INTERNAL_ERROR, JsonRpcClient, JsonRpcError, JsonRpcResponse};

// ============================================================================
// Client Errors
// ============================================================================

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("Client not initialized")]
    NotInitialized,

    #[error("Client already initialized")]
    AlreadyInitialized,

    #[error("Request timeout: {method}")]
    RequestTimeout { method: String },
}

// ============================================================================
// UI Hooks
// ============================================================================

/// Extra sinks installed alongside the editor wiring
#[derive(Default)]
pub struct UiHooks {
    /// Called with the raw message text of every error-severity status
    /// message; the supervisor uses this to spot the recoverable
    /// missing-dependency condition
    pub on_status_error: Option<Arc<dyn Fn(String) + Send + Sync>>,

    /// Receives test progress notifications for the test adapter
    pub test_progress: Option<mpsc::UnboundedSender<TestProgressParams>>,
}

// ============================================================================
// Bridge Client
// ============================================================================

/// High-level client over any transport
pub struct BridgeClient<T: Transport> {
    /// JSON-RPC client for communication
    rpc: JsonRpcClient<T>,

    /// Initialization state
    initialized: AtomicBool,
}

impl<T: Transport + 'static> BridgeClient<T> {
    /// Create a new client with a transport
    pub fn new(transport: T) -> Self {
        Self {
            rpc: JsonRpcClient::new(transport),
            initialized: AtomicBool::new(false),
        }
    }

    /// Perform the initialize handshake.
    ///
    /// Announces the bridge's custom capabilities so the server starts
    /// sending status bar messages and test results.
    pub async fn initialize(
        &self,
        root_uri: Option<String>,
    ) -> Result<InitializeResult, ClientError> {
        if self.initialized.load(Ordering::SeqCst) {
            return Err(ClientError::AlreadyInitialized);
        }

        info!("Initializing language client");

        let params = InitializeParams {
            process_id: Some(std::process::id()),
            #[allow(deprecated)]
            root_path: None,
            #[allow(deprecated)]
            root_uri: root_uri.and_then(|uri| uri.parse().ok()),
            initialization_options: Some(serde_json::json!({
                "nbcodeCapabilities": {
                    "statusBarMessageSupport": true,
                    "testResultsSupport": true,
                }
            })),
            work_done_progress_params: lsp_types::WorkDoneProgressParams::default(),
            capabilities: ClientCapabilities {
                workspace: Some(WorkspaceClientCapabilities {
                    workspace_folders: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            },
            trace: None,
            workspace_folders: None,
            client_info: Some(lsp_types::ClientInfo {
                name: "nbls-bridge".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            locale: None,
        };

        let result: InitializeResult = match self.rpc.request("initialize", Some(params)).await {
            Ok(result) => result,
            Err(JsonRpcError::Timeout) => {
                return Err(ClientError::RequestTimeout {
                    method: "initialize".to_string(),
                });
            }
            Err(e) => return Err(ClientError::JsonRpc(e)),
        };

        debug!("Server capabilities: {:?}", result.capabilities);

        self.rpc
            .notify("initialized", Some(InitializedParams {}))
            .await?;

        self.initialized.store(true, Ordering::SeqCst);
        info!("Language client initialized");

        Ok(result)
    }

    /// Install the editor-facing message handlers.
    ///
    /// Custom notifications go to the editor's UI surfaces; quick pick and
    /// input box requests resolve through the editor's prompts.
    pub async fn wire_editor(&self, editor: Arc<dyn EditorUi>, hooks: UiHooks) {
        let notification_editor = Arc::clone(&editor);
        let on_status_error = hooks.on_status_error.clone();
        let test_progress = hooks.test_progress.clone();

        self.rpc
            .on_notification(move |notification| {
                match notification.method.as_str() {
                    SHOW_STATUS_MESSAGE_METHOD => {
                        let Some(params) = notification.params else {
                            return;
                        };
                        match serde_json::from_value::<ShowStatusMessageParams>(params) {
                            Ok(params) => {
                                if params.kind == MessageType::ERROR {
                                    if let Some(hook) = &on_status_error {
                                        hook(params.message.clone());
                                    }
                                }
                                let (text, timeout) = decorate_status_message(&params);
                                notification_editor.set_status_message(&text, timeout);
                            }
                            Err(e) => warn!("Malformed status message: {}", e),
                        }
                    }
                    "window/logMessage" => {
                        if let Some(params) = notification.params {
                            if let Ok(params) =
                                serde_json::from_value::<LogMessageParams>(params)
                            {
                                notification_editor.append_log(&params.message);
                                notification_editor.append_log("\n");
                            }
                        }
                    }
                    TEST_PROGRESS_METHOD => {
                        let Some(params) = notification.params else {
                            return;
                        };
                        match serde_json::from_value::<TestProgressParams>(params) {
                            Ok(params) => {
                                if let Some(sink) = &test_progress {
                                    let _ = sink.send(params);
                                }
                            }
                            Err(e) => warn!("Malformed test progress: {}", e),
                        }
                    }
                    other => debug!("Unhandled notification: {}", other),
                }
            })
            .await;

        self.rpc
            .on_request(move |request| {
                let editor = Arc::clone(&editor);
                Box::pin(async move {
                    match request.method.as_str() {
                        QUICK_PICK_METHOD => {
                            let params = request
                                .params
                                .and_then(|p| serde_json::from_value::<QuickPickParams>(p).ok());
                            let Some(params) = params else {
                                return JsonRpcResponse::failure(
                                    request.id,
                                    INTERNAL_ERROR,
                                    "Malformed quick pick parameters",
                                );
                            };

                            let picked = editor.show_quick_pick(params).await;
                            JsonRpcResponse::success(
                                request.id,
                                serde_json::to_value(picked).unwrap_or(Value::Null),
                            )
                        }
                        INPUT_BOX_METHOD => {
                            let params = request
                                .params
                                .and_then(|p| serde_json::from_value::<InputBoxParams>(p).ok());
                            let Some(params) = params else {
                                return JsonRpcResponse::failure(
                                    request.id,
                                    INTERNAL_ERROR,
                                    "Malformed input box parameters",
                                );
                            };

                            let entered = editor.show_input_box(params).await;
                            JsonRpcResponse::success(
                                request.id,
                                serde_json::to_value(entered).unwrap_or(Value::Null),
                            )
                        }
                        other => JsonRpcResponse::failure(
                            request.id,
                            crate::lsp::rpc::METHOD_NOT_FOUND,
                            format!("Method not found: {other}"),
                        ),
                    }
                })
            })
            .await;
    }

    /// Shutdown the connection gracefully
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        info!("Shutting down language client");

        let _: Option<Value> = match self.rpc.request("shutdown", None::<Value>).await {
            Ok(result) => result,
            Err(JsonRpcError::Timeout) => {
                return Err(ClientError::RequestTimeout {
                    method: "shutdown".to_string(),
                });
            }
            Err(e) => return Err(ClientError::JsonRpc(e)),
        };

        self.rpc.notify("exit", None::<Value>).await?;

        self.initialized.store(false, Ordering::SeqCst);
        info!("Language client shutdown complete");

        Ok(())
    }

    /// Check if the client is initialized
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Check if the connection is active
    pub fn is_connected(&self) -> bool {
        self.rpc.is_connected()
    }

    /// A watch that flips to true when the connection is gone
    pub fn closed_watch(&self) -> watch::Receiver<bool> {
        self.rpc.closed_watch()
    }

    /// Close the connection (does not stop the external process)
    pub async fn close(&self) -> Result<(), ClientError> {
        self.rpc.close().await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
