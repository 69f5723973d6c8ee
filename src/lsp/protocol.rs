//! Message types the NetBeans server layers on top of standard LSP
//!
//! The server reuses the LSP wire format for a handful of editor-facing
//! extensions: status bar messages, quick picks, input boxes, and test
//! progress. The shapes here mirror what the server actually sends.

use lsp_types::MessageType;
use serde::{Deserialize, Serialize};

// ============================================================================
// Method Names
// ============================================================================

/// Notification: transient status bar message
pub const SHOW_STATUS_MESSAGE_METHOD: &str = "window/showStatusBarMessage";

/// Request: quick pick selection, response is the picked items (or null)
pub const QUICK_PICK_METHOD: &str = "window/showQuickPick";

/// Request: free-form input box, response is the entered string (or null)
pub const INPUT_BOX_METHOD: &str = "window/showInputBox";

/// Notification: test suite/case progress for the test explorer
pub const TEST_PROGRESS_METHOD: &str = "window/notifyTestProgress";

// ============================================================================
// Status Bar Messages
// ============================================================================

/// Parameters of `window/showStatusBarMessage`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowStatusMessageParams {
    /// Message severity
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// The message text
    pub message: String,

    /// Display duration in milliseconds. `None` selects a severity default;
    /// an explicit zero means "show until replaced".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

// ============================================================================
// Quick Pick
// ============================================================================

/// A single selectable quick pick entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickPickItem {
    /// Human readable label
    pub label: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Preselected in the pick list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picked: Option<bool>,

    /// Opaque payload echoed back to the server with the selection
    #[serde(rename = "userData", skip_serializing_if = "Option::is_none")]
    pub user_data: Option<serde_json::Value>,
}

/// Parameters of `window/showQuickPick`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickPickParams {
    /// Placeholder text shown in the pick list
    #[serde(rename = "placeHolder")]
    pub place_holder: String,

    /// Allow selecting more than one item
    #[serde(rename = "canPickMany", skip_serializing_if = "Option::is_none")]
    pub can_pick_many: Option<bool>,

    /// Items to pick from
    pub items: Vec<QuickPickItem>,
}

// ============================================================================
// Input Box
// ============================================================================

/// Parameters of `window/showInputBox`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputBoxParams {
    /// Prompt shown above the input field
    pub prompt: String,

    /// Pre-filled value
    #[serde(default)]
    pub value: String,
}

// ============================================================================
// Test Progress
// ============================================================================

/// Lifecycle state of a test suite or test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    Enqueued,
    Loaded,
    Running,
    Completed,
    Errored,
    Passed,
    Failed,
    Skipped,
}

/// A single test case reported by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseInfo {
    /// Stable identifier, unique within the suite
    pub id: String,

    /// Short display name
    #[serde(rename = "shortName")]
    pub short_name: String,

    /// Fully qualified name (tooltip text)
    #[serde(rename = "fullName")]
    pub full_name: String,

    /// Source file URI, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// 1-based line in `file`, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    /// Current state
    pub state: TestState,

    /// Failure stack trace, one frame per element
    #[serde(rename = "stackTrace", skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Vec<String>>,
}

/// A test suite with its (possibly partial) set of test cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteInfo {
    /// Suite name, used as the tree identifier
    #[serde(rename = "suiteName")]
    pub suite_name: String,

    /// Source file URI, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// 1-based line in `file`, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    /// Current state
    pub state: TestState,

    /// Test cases; absent while only the suite-level state changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<Vec<TestCaseInfo>>,
}

/// Parameters of `window/notifyTestProgress`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestProgressParams {
    /// Workspace folder URI the progress belongs to
    pub uri: String,

    /// The suite being reported
    pub suite: TestSuiteInfo,
}
