//! Editor frontend interface
//!
//! The bridge never talks to its host editor directly; everything goes
//! through the traits in this module. `EditorUi` covers prompts, status bar
//! text and the server log view, `SettingsProvider` covers configuration
//! lookups, and `CommandBus` covers command execution for the test adapter.
//! A recording implementation for tests lives at the bottom of the file.

use async_trait::async_trait;
use lsp_types::MessageType;

use crate::lsp::protocol::{InputBoxParams, QuickPickItem, QuickPickParams, ShowStatusMessageParams};

/// Default display duration for informational status messages (ms)
const DEFAULT_INFO_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// Host Traits
// ============================================================================

/// Read access to the host editor's configuration
pub trait SettingsProvider: Send + Sync {
    /// Look up a string setting by key, e.g. `netbeans.jdkhome`
    fn get(&self, key: &str) -> Option<String>;
}

/// Errors surfaced by command execution on the host
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Command failed: {0}")]
    Failed(String),
}

/// Execution of named editor/server commands
#[async_trait]
pub trait CommandBus: Send + Sync {
    /// Execute a command with JSON arguments and return its JSON result
    async fn execute_command(
        &self,
        command: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CommandError>;
}

/// UI surface of the host editor
#[async_trait]
pub trait EditorUi: Send + Sync {
    /// Show a transient message in the status area. A `timeout_ms` of zero
    /// means the message stays until replaced.
    fn set_status_message(&self, text: &str, timeout_ms: u64);

    /// Informational popup, fire and forget
    fn show_info_message(&self, text: &str);

    /// Warning popup, fire and forget
    fn show_warning_message(&self, text: &str);

    /// Error popup with optional action items; resolves to the chosen action
    async fn show_error_message(&self, text: &str, actions: &[String]) -> Option<String>;

    /// Quick pick prompt; `None` means the user dismissed it
    async fn show_quick_pick(&self, params: QuickPickParams) -> Option<Vec<QuickPickItem>>;

    /// Input box prompt; `None` means the user dismissed it
    async fn show_input_box(&self, params: InputBoxParams) -> Option<String>;

    /// Append text to the server log view (no newline added)
    fn append_log(&self, text: &str);

    /// Bring the server log view to front
    fn reveal_log(&self) {}
}

// ============================================================================
// Status Message Decoration
// ============================================================================

/// Decorate a status message per its severity and compute the effective
/// display duration. Errors and warnings get an icon prefix and stick until
/// replaced unless the server asked for a specific duration.
pub fn decorate_status_message(params: &ShowStatusMessageParams) -> (String, u64) {
    let (decorated, default_timeout) = if params.kind == MessageType::ERROR {
        (format!("$(error) {}", params.message), 0)
    } else if params.kind == MessageType::WARNING {
        (format!("$(warning) {}", params.message), 0)
    } else {
        (params.message.clone(), DEFAULT_INFO_TIMEOUT_MS)
    };

    // An explicit timeout wins even when it is zero
    let timeout = params.timeout.unwrap_or(default_timeout);
    (decorated, timeout)
}

// ============================================================================
// Recording Editor (for testing)
// ============================================================================

/// Editor implementation that records every interaction and replays scripted
/// answers for prompts. Shared across the crate's tests.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct RecordingEditor {
        pub status_messages: Mutex<Vec<(String, u64)>>,
        pub info_messages: Mutex<Vec<String>>,
        pub warning_messages: Mutex<Vec<String>>,
        pub error_messages: Mutex<Vec<String>>,
        pub log: Mutex<String>,
        error_replies: Mutex<VecDeque<Option<String>>>,
        quick_pick_replies: Mutex<VecDeque<Option<Vec<QuickPickItem>>>>,
        input_box_replies: Mutex<VecDeque<Option<String>>>,
    }

    impl RecordingEditor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Script the reply to the next error popup
        pub fn push_error_reply(&self, reply: Option<&str>) {
            self.error_replies
                .lock()
                .unwrap()
                .push_back(reply.map(|s| s.to_string()));
        }

        pub fn push_quick_pick_reply(&self, reply: Option<Vec<QuickPickItem>>) {
            self.quick_pick_replies.lock().unwrap().push_back(reply);
        }

        pub fn push_input_box_reply(&self, reply: Option<&str>) {
            self.input_box_replies
                .lock()
                .unwrap()
                .push_back(reply.map(|s| s.to_string()));
        }

        pub fn logged_text(&self) -> String {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EditorUi for RecordingEditor {
        fn set_status_message(&self, text: &str, timeout_ms: u64) {
            self.status_messages
                .lock()
                .unwrap()
                .push((text.to_string(), timeout_ms));
        }

        fn show_info_message(&self, text: &str) {
            self.info_messages.lock().unwrap().push(text.to_string());
        }

        fn show_warning_message(&self, text: &str) {
            self.warning_messages.lock().unwrap().push(text.to_string());
        }

        async fn show_error_message(&self, text: &str, _actions: &[String]) -> Option<String> {
            self.error_messages.lock().unwrap().push(text.to_string());
            self.error_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(None)
        }

        async fn show_quick_pick(&self, _params: QuickPickParams) -> Option<Vec<QuickPickItem>> {
            self.quick_pick_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(None)
        }

        async fn show_input_box(&self, params: InputBoxParams) -> Option<String> {
            self.input_box_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Some(params.value))
        }

        fn append_log(&self, text: &str) {
            self.log.lock().unwrap().push_str(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(kind: MessageType, timeout: Option<u64>) -> ShowStatusMessageParams {
        ShowStatusMessageParams {
            kind,
            message: "build finished".to_string(),
            timeout,
        }
    }

    #[test]
    fn test_error_messages_are_decorated_and_sticky() {
        let (text, timeout) = decorate_status_message(&message(MessageType::ERROR, None));
        assert_eq!(text, "$(error) build finished");
        assert_eq!(timeout, 0);
    }

    #[test]
    fn test_warning_messages_are_decorated_and_sticky() {
        let (text, timeout) = decorate_status_message(&message(MessageType::WARNING, None));
        assert_eq!(text, "$(warning) build finished");
        assert_eq!(timeout, 0);
    }

    #[test]
    fn test_info_messages_get_default_timeout() {
        let (text, timeout) = decorate_status_message(&message(MessageType::INFO, None));
        assert_eq!(text, "build finished");
        assert_eq!(timeout, DEFAULT_INFO_TIMEOUT_MS);
    }

    #[test]
    fn test_explicit_timeout_wins_even_when_zero() {
        let (_, timeout) = decorate_status_message(&message(MessageType::INFO, Some(0)));
        assert_eq!(timeout, 0);

        let (_, timeout) = decorate_status_message(&message(MessageType::ERROR, Some(2_000)));
        assert_eq!(timeout, 2_000);
    }
}
