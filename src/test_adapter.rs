//! Test explorer adapter
//!
//! Keeps the suite/test tree the test explorer shows and translates the
//! server's `window/notifyTestProgress` notifications into explorer events.
//! Running and debugging delegate to the commands the server registers with
//! the editor; the adapter itself only does tree bookkeeping and failure
//! decoration.

use regex::Regex;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tokio::sync::mpsc;
use tracing::debug;

use crate::editor::{CommandBus, CommandError};
use crate::lsp::protocol::{TestCaseInfo, TestState, TestSuiteInfo};

/// Command loading the workspace's test classes
const LOAD_TESTS_COMMAND: &str = "java.load.workspace.tests";

/// Command running all tests of the workspace
const RUN_ALL_COMMAND: &str = "java.run.test";

/// Command running one file (optionally one method)
const RUN_SINGLE_COMMAND: &str = "java.run.single";

/// Command debugging one file (optionally one method)
const DEBUG_SINGLE_COMMAND: &str = "java.debug.single";

/// Identifier of the synthetic root suite ("run everything")
pub const ROOT_SUITE_ID: &str = "*";

/// Frame of a Java stack trace pointing into a source file,
/// e.g. `    at com.example.CalcTest.div(CalcTest.java:42)`
static STACK_FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*at\s*\S*\((\S*):(\d*)\)$").expect("frame pattern is valid"));

// ============================================================================
// Tree Model
// ============================================================================

/// A test case in the explorer tree
#[derive(Debug, Clone, PartialEq)]
pub struct TestNode {
    pub id: String,
    pub label: String,
    pub tooltip: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// A suite in the explorer tree
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteNode {
    pub id: String,
    pub label: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub children: Vec<TestNode>,
}

/// An editor decoration on a failing line
#[derive(Debug, Clone, PartialEq)]
pub struct Decoration {
    /// 0-based line in the test file
    pub line: u32,
    pub message: String,
}

/// Events emitted toward the test explorer frontend
#[derive(Debug, Clone, PartialEq)]
pub enum TestEvent {
    LoadStarted,
    /// Discovery finished; carries the full tree (possibly empty)
    LoadFinished { suites: Vec<SuiteNode> },
    RunStarted { tests: Vec<String> },
    RunFinished { error: Option<String> },
    SuiteState {
        suite: String,
        state: TestState,
        message: Option<String>,
    },
    TestState {
        test: String,
        state: TestState,
        message: Option<String>,
        decorations: Vec<Decoration>,
    },
}

// ============================================================================
// Adapter
// ============================================================================

/// Adapter between the server's test progress and a test explorer
pub struct NbTestAdapter {
    /// Workspace folder this adapter serves
    workspace_uri: String,

    /// Command execution on the host
    commands: Arc<dyn CommandBus>,

    /// Current suite tree
    suites: Vec<SuiteNode>,

    /// Events toward the frontend
    events: mpsc::UnboundedSender<TestEvent>,
}

impl NbTestAdapter {
    /// Create an adapter for one workspace folder; the returned receiver
    /// feeds the explorer frontend
    pub fn new(
        workspace_uri: impl Into<String>,
        commands: Arc<dyn CommandBus>,
    ) -> (Self, mpsc::UnboundedReceiver<TestEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                workspace_uri: workspace_uri.into(),
                commands,
                suites: Vec::new(),
                events,
            },
            receiver,
        )
    }

    /// The workspace folder this adapter serves
    pub fn workspace_uri(&self) -> &str {
        &self.workspace_uri
    }

    /// Current suite tree snapshot
    pub fn suites(&self) -> &[SuiteNode] {
        &self.suites
    }

    /// Discover the workspace's tests through the server
    pub async fn load(&mut self) -> Result<(), CommandError> {
        self.emit(TestEvent::LoadStarted);

        let loaded = self
            .commands
            .execute_command(
                LOAD_TESTS_COMMAND,
                vec![serde_json::Value::from(self.workspace_uri.clone())],
            )
            .await?;

        self.suites.clear();
        if let Ok(suites) = serde_json::from_value::<Vec<TestSuiteInfo>>(loaded) {
            for suite in &suites {
                self.update_tests(suite);
            }
        }

        self.emit(TestEvent::LoadFinished {
            suites: self.suites.clone(),
        });
        Ok(())
    }

    /// Run the given test selection (one id, or the root id for everything)
    pub async fn run(&mut self, tests: &[String]) -> Result<(), CommandError> {
        self.emit(TestEvent::RunStarted {
            tests: tests.to_vec(),
        });

        let [selection] = tests else {
            self.emit(TestEvent::RunFinished {
                error: Some("Failed to run multiple tests".to_string()),
            });
            return Ok(());
        };

        if selection.as_str() == ROOT_SUITE_ID {
            self.commands
                .execute_command(
                    RUN_ALL_COMMAND,
                    vec![serde_json::Value::from(self.workspace_uri.clone())],
                )
                .await?;
            self.emit(TestEvent::RunFinished { error: None });
            return Ok(());
        }

        self.run_selection(selection, RUN_SINGLE_COMMAND, "run").await
    }

    /// Debug the given test selection
    pub async fn debug(&mut self, tests: &[String]) -> Result<(), CommandError> {
        self.emit(TestEvent::RunStarted {
            tests: tests.to_vec(),
        });

        let [selection] = tests else {
            self.emit(TestEvent::RunFinished {
                error: Some("Failed to debug multiple tests".to_string()),
            });
            return Ok(());
        };

        self.run_selection(selection, DEBUG_SINGLE_COMMAND, "debug")
            .await
    }

    /// Resolve a `suite` or `suite:method` selection and execute it
    async fn run_selection(
        &mut self,
        selection: &str,
        command: &str,
        verb: &str,
    ) -> Result<(), CommandError> {
        let (suite_name, method_name) = match selection.split_once(':') {
            Some((suite, method)) => (suite, Some(method)),
            None => (selection, None),
        };

        let file = self
            .suites
            .iter()
            .find(|s| s.id == suite_name)
            .and_then(|s| s.file.clone());

        let Some(file) = file else {
            self.emit(TestEvent::RunFinished {
                error: Some(format!("Cannot find suite to {verb}: {selection}")),
            });
            return Ok(());
        };

        let mut args = vec![serde_json::Value::from(file_uri(&file))];
        if let Some(method) = method_name {
            args.push(serde_json::Value::from(method));
        }
        self.commands.execute_command(command, args).await?;

        self.emit(TestEvent::RunFinished { error: None });
        Ok(())
    }

    /// Dispatch one progress notification from the server
    pub fn test_progress(&mut self, suite: TestSuiteInfo) {
        match suite.state {
            TestState::Loaded => {
                if self.update_tests(&suite) {
                    self.emit(TestEvent::LoadFinished {
                        suites: self.suites.clone(),
                    });
                }
            }
            TestState::Running => {
                self.emit(TestEvent::SuiteState {
                    suite: suite.suite_name.clone(),
                    state: suite.state,
                    message: None,
                });
            }
            TestState::Completed | TestState::Errored => {
                self.finish_suite(suite);
            }
            other => {
                debug!(
                    "Ignoring suite progress in state {:?} for {}",
                    other, suite.suite_name
                );
            }
        }
    }

    /// Report individual test results, then the suite result
    fn finish_suite(&mut self, suite: TestSuiteInfo) {
        let mut suite_state = suite.state;
        let mut error_message = None;

        if let Some(tests) = &suite.tests {
            let known_ids: Vec<String> = self
                .suites
                .iter()
                .find(|s| s.id == suite.suite_name)
                .map(|s| s.children.iter().map(|t| t.id.clone()).collect())
                .unwrap_or_default();

            for test in tests {
                let message = test
                    .stack_trace
                    .as_ref()
                    .map(|frames| frames.join("\n"));
                let decorations = failure_decorations(test);

                if known_ids.iter().any(|id| id == &test.id) {
                    self.emit(TestEvent::TestState {
                        test: test.id.clone(),
                        state: test.state,
                        message,
                        decorations,
                    });
                } else if test.state != TestState::Passed
                    && message.is_some()
                    && error_message.is_none()
                {
                    // A failure in a test the tree does not know (e.g. an
                    // initializer) degrades the whole suite
                    suite_state = TestState::Errored;
                    error_message = message;
                }
            }
        }

        self.emit(TestEvent::SuiteState {
            suite: suite.suite_name,
            state: suite_state,
            message: error_message,
        });
    }

    /// Merge a reported suite into the tree. Returns whether anything
    /// changed.
    fn update_tests(&mut self, suite: &TestSuiteInfo) -> bool {
        let mut changed = false;

        let Some(current) = self.suites.iter_mut().find(|s| s.id == suite.suite_name) else {
            let children = suite
                .tests
                .as_ref()
                .map(|tests| tests.iter().map(test_node).collect())
                .unwrap_or_default();

            self.suites.push(SuiteNode {
                id: suite.suite_name.clone(),
                label: suite.suite_name.clone(),
                file: suite.file.as_deref().map(uri_path),
                line: suite.line,
                children,
            });
            return true;
        };

        if let Some(file) = suite.file.as_deref().map(uri_path) {
            if current.file.as_deref() != Some(file.as_str()) {
                current.file = Some(file);
                changed = true;
            }
        }
        if suite.line.is_some() && current.line != suite.line {
            current.line = suite.line;
            changed = true;
        }

        if let Some(tests) = &suite.tests {
            let mut ids = Vec::with_capacity(tests.len());

            for test in tests {
                ids.push(test.id.clone());

                if let Some(existing) = current.children.iter_mut().find(|t| t.id == test.id) {
                    if let Some(file) = test.file.as_deref().map(uri_path) {
                        if existing.file.as_deref() != Some(file.as_str()) {
                            existing.file = Some(file);
                            changed = true;
                        }
                    }
                    if test.line.is_some() && existing.line != test.line {
                        existing.line = test.line;
                        changed = true;
                    }
                } else {
                    current.children.push(test_node(test));
                    changed = true;
                }
            }

            // Prune tests the server no longer reports
            if current.children.len() != ids.len() {
                current.children.retain(|t| ids.contains(&t.id));
                changed = true;
            }
        }

        changed
    }

    fn emit(&self, event: TestEvent) {
        let _ = self.events.send(event);
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_node(test: &TestCaseInfo) -> TestNode {
    TestNode {
        id: test.id.clone(),
        label: test.short_name.clone(),
        tooltip: test.full_name.clone(),
        file: test.file.as_deref().map(uri_path),
        line: test.line,
    }
}

/// Path portion of a file URI; non-URIs pass through unchanged
fn uri_path(uri: &str) -> String {
    uri.strip_prefix("file://").unwrap_or(uri).to_string()
}

/// File URI for a path
fn file_uri(path: &str) -> String {
    format!("file://{path}")
}

/// Decorate the failing line: the first stack frame located in the test's
/// own file wins
fn failure_decorations(test: &TestCaseInfo) -> Vec<Decoration> {
    let (Some(frames), Some(file)) = (&test.stack_trace, &test.file) else {
        return Vec::new();
    };

    let file_name = Path::new(&uri_path(file))
        .file_name()
        .map(|n| n.to_string_lossy().to_string());
    let Some(file_name) = file_name else {
        return Vec::new();
    };

    let line = frames.iter().find_map(|frame| {
        let captures = STACK_FRAME.captures(frame)?;
        if captures.get(1)?.as_str() == file_name {
            captures.get(2)?.as_str().parse::<u32>().ok()
        } else {
            None
        }
    });

    match (line, frames.first()) {
        (Some(line), Some(first)) if line > 0 => vec![Decoration {
            line: line - 1,
            message: first.clone(),
        }],
        _ => Vec::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records executed commands and replays scripted results
    struct RecordingCommandBus {
        calls: Mutex<Vec<(String, Vec<serde_json::Value>)>>,
        results: Mutex<Vec<serde_json::Value>>,
    }

    impl RecordingCommandBus {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                results: Mutex::new(Vec::new()),
            }
        }

        fn push_result(&self, result: serde_json::Value) {
            self.results.lock().unwrap().push(result);
        }

        fn calls(&self) -> Vec<(String, Vec<serde_json::Value>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandBus for RecordingCommandBus {
        async fn execute_command(
            &self,
            command: &str,
            args: Vec<serde_json::Value>,
        ) -> Result<serde_json::Value, CommandError> {
            self.calls
                .lock()
                .unwrap()
                .push((command.to_string(), args));
            let mut results = self.results.lock().unwrap();
            Ok(if results.is_empty() {
                serde_json::Value::Null
            } else {
                results.remove(0)
            })
        }
    }

    fn suite(name: &str, state: TestState, tests: Option<Vec<TestCaseInfo>>) -> TestSuiteInfo {
        TestSuiteInfo {
            suite_name: name.to_string(),
            file: Some(format!("file:///work/src/{name}.java")),
            line: Some(3),
            state,
            tests,
        }
    }

    fn case(id: &str, state: TestState, stack_trace: Option<Vec<String>>) -> TestCaseInfo {
        TestCaseInfo {
            id: id.to_string(),
            short_name: id.to_string(),
            full_name: format!("com.example.{id}"),
            file: Some("file:///work/src/CalcTest.java".to_string()),
            line: Some(12),
            state,
            stack_trace,
        }
    }

    fn adapter() -> (
        NbTestAdapter,
        mpsc::UnboundedReceiver<TestEvent>,
        Arc<RecordingCommandBus>,
    ) {
        let commands = Arc::new(RecordingCommandBus::new());
        let (adapter, events) = NbTestAdapter::new(
            "file:///work",
            Arc::clone(&commands) as Arc<dyn CommandBus>,
        );
        (adapter, events, commands)
    }

    #[test]
    fn test_loaded_progress_builds_tree_and_emits() {
        let (mut adapter, mut events, _) = adapter();

        adapter.test_progress(suite(
            "CalcTest",
            TestState::Loaded,
            Some(vec![case("add", TestState::Loaded, None)]),
        ));

        match events.try_recv().unwrap() {
            TestEvent::LoadFinished { suites } => {
                assert_eq!(suites.len(), 1);
                assert_eq!(suites[0].id, "CalcTest");
                assert_eq!(suites[0].file.as_deref(), Some("/work/src/CalcTest.java"));
                assert_eq!(suites[0].children.len(), 1);
                assert_eq!(suites[0].children[0].label, "add");
            }
            other => panic!("expected LoadFinished, got {other:?}"),
        }
    }

    #[test]
    fn test_update_merges_and_prunes() {
        let (mut adapter, mut events, _) = adapter();

        adapter.test_progress(suite(
            "CalcTest",
            TestState::Loaded,
            Some(vec![
                case("add", TestState::Loaded, None),
                case("sub", TestState::Loaded, None),
            ]),
        ));
        let _ = events.try_recv();

        // Same content again: no change, no event
        adapter.test_progress(suite(
            "CalcTest",
            TestState::Loaded,
            Some(vec![
                case("add", TestState::Loaded, None),
                case("sub", TestState::Loaded, None),
            ]),
        ));
        assert!(events.try_recv().is_err());

        // One test disappeared, one appeared
        adapter.test_progress(suite(
            "CalcTest",
            TestState::Loaded,
            Some(vec![
                case("add", TestState::Loaded, None),
                case("mul", TestState::Loaded, None),
            ]),
        ));
        match events.try_recv().unwrap() {
            TestEvent::LoadFinished { suites } => {
                let ids: Vec<_> = suites[0].children.iter().map(|t| t.id.as_str()).collect();
                assert_eq!(ids, vec!["add", "mul"]);
            }
            other => panic!("expected LoadFinished, got {other:?}"),
        }
    }

    #[test]
    fn test_running_progress_emits_suite_state() {
        let (mut adapter, mut events, _) = adapter();

        adapter.test_progress(suite("CalcTest", TestState::Running, None));

        assert_eq!(
            events.try_recv().unwrap(),
            TestEvent::SuiteState {
                suite: "CalcTest".to_string(),
                state: TestState::Running,
                message: None,
            }
        );
    }

    #[test]
    fn test_completed_reports_known_test_with_decoration() {
        let (mut adapter, mut events, _) = adapter();

        adapter.test_progress(suite(
            "CalcTest",
            TestState::Loaded,
            Some(vec![case("div", TestState::Loaded, None)]),
        ));
        let _ = events.try_recv();

        let trace = vec![
            "java.lang.ArithmeticException: / by zero".to_string(),
            "	at com.example.CalcTest.div(CalcTest.java:42)".to_string(),
            "	at java.base/jdk.internal.reflect.DirectMethodHandleAccessor.invoke(DirectMethodHandleAccessor.java:103)".to_string(),
        ];
        adapter.test_progress(suite(
            "CalcTest",
            TestState::Completed,
            Some(vec![case("div", TestState::Failed, Some(trace.clone()))]),
        ));

        match events.try_recv().unwrap() {
            TestEvent::TestState {
                test,
                state,
                message,
                decorations,
            } => {
                assert_eq!(test, "div");
                assert_eq!(state, TestState::Failed);
                assert_eq!(message.unwrap(), trace.join("\n"));
                assert_eq!(
                    decorations,
                    vec![Decoration {
                        line: 41,
                        message: trace[0].clone(),
                    }]
                );
            }
            other => panic!("expected TestState, got {other:?}"),
        }

        assert_eq!(
            events.try_recv().unwrap(),
            TestEvent::SuiteState {
                suite: "CalcTest".to_string(),
                state: TestState::Completed,
                message: None,
            }
        );
    }

    #[test]
    fn test_unknown_failing_test_degrades_suite() {
        let (mut adapter, mut events, _) = adapter();

        adapter.test_progress(suite("CalcTest", TestState::Loaded, Some(vec![])));
        let _ = events.try_recv();

        adapter.test_progress(suite(
            "CalcTest",
            TestState::Completed,
            Some(vec![case(
                "initializationError",
                TestState::Failed,
                Some(vec!["java.lang.NoClassDefFoundError: Calc".to_string()]),
            )]),
        ));

        match events.try_recv().unwrap() {
            TestEvent::SuiteState {
                suite,
                state,
                message,
            } => {
                assert_eq!(suite, "CalcTest");
                assert_eq!(state, TestState::Errored);
                assert!(message.unwrap().contains("NoClassDefFoundError"));
            }
            other => panic!("expected SuiteState, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_executes_discovery_command() {
        let (mut adapter, mut events, commands) = adapter();
        commands.push_result(serde_json::json!([{
            "suiteName": "CalcTest",
            "state": "loaded",
            "tests": [{"id": "add", "shortName": "add",
                       "fullName": "com.example.add", "state": "loaded"}]
        }]));

        adapter.load().await.unwrap();

        let calls = commands.calls();
        assert_eq!(calls[0].0, LOAD_TESTS_COMMAND);
        assert_eq!(calls[0].1, vec![serde_json::json!("file:///work")]);

        assert_eq!(events.try_recv().unwrap(), TestEvent::LoadStarted);
        match events.try_recv().unwrap() {
            TestEvent::LoadFinished { suites } => assert_eq!(suites.len(), 1),
            other => panic!("expected LoadFinished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_everything_uses_workspace_command() {
        let (mut adapter, mut events, commands) = adapter();

        adapter.run(&[ROOT_SUITE_ID.to_string()]).await.unwrap();

        let calls = commands.calls();
        assert_eq!(calls[0].0, RUN_ALL_COMMAND);
        assert_eq!(calls[0].1, vec![serde_json::json!("file:///work")]);

        let _ = events.try_recv(); // RunStarted
        assert_eq!(
            events.try_recv().unwrap(),
            TestEvent::RunFinished { error: None }
        );
    }

    #[tokio::test]
    async fn test_run_single_method_passes_file_and_method() {
        let (mut adapter, mut events, commands) = adapter();

        adapter.test_progress(suite("CalcTest", TestState::Loaded, Some(vec![])));
        let _ = events.try_recv();

        adapter.run(&["CalcTest:add".to_string()]).await.unwrap();

        let calls = commands.calls();
        assert_eq!(calls[0].0, RUN_SINGLE_COMMAND);
        assert_eq!(
            calls[0].1,
            vec![
                serde_json::json!("file:///work/src/CalcTest.java"),
                serde_json::json!("add"),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_unknown_suite_reports_error() {
        let (mut adapter, mut events, commands) = adapter();

        adapter.run(&["NoSuchTest".to_string()]).await.unwrap();

        assert!(commands.calls().is_empty());
        let _ = events.try_recv(); // RunStarted
        match events.try_recv().unwrap() {
            TestEvent::RunFinished { error } => {
                assert_eq!(error.unwrap(), "Cannot find suite to run: NoSuchTest");
            }
            other => panic!("expected RunFinished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_multiple_selections_rejected() {
        let (mut adapter, mut events, commands) = adapter();

        adapter
            .run(&["A".to_string(), "B".to_string()])
            .await
            .unwrap();

        assert!(commands.calls().is_empty());
        let _ = events.try_recv();
        match events.try_recv().unwrap() {
            TestEvent::RunFinished { error } => {
                assert_eq!(error.unwrap(), "Failed to run multiple tests");
            }
            other => panic!("expected RunFinished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_debug_single_suite_uses_debug_command() {
        let (mut adapter, mut events, commands) = adapter();

        adapter.test_progress(suite("CalcTest", TestState::Loaded, Some(vec![])));
        let _ = events.try_recv();

        adapter.debug(&["CalcTest".to_string()]).await.unwrap();

        let calls = commands.calls();
        assert_eq!(calls[0].0, DEBUG_SINGLE_COMMAND);
        assert_eq!(
            calls[0].1,
            vec![serde_json::json!("file:///work/src/CalcTest.java")]
        );
    }

    #[test]
    fn test_stack_frame_extraction_ignores_foreign_files() {
        let test = TestCaseInfo {
            id: "div".to_string(),
            short_name: "div".to_string(),
            full_name: "com.example.CalcTest.div".to_string(),
            file: Some("file:///work/src/CalcTest.java".to_string()),
            line: Some(12),
            state: TestState::Failed,
            stack_trace: Some(vec![
                "java.lang.ArithmeticException: / by zero".to_string(),
                "	at org.junit.Assert.fail(Assert.java:89)".to_string(),
                "	at com.example.CalcTest.div(CalcTest.java:42)".to_string(),
            ]),
        };

        let decorations = failure_decorations(&test);
        assert_eq!(decorations.len(), 1);
        assert_eq!(decorations[0].line, 41);
    }

    #[test]
    fn test_no_decoration_without_matching_frame() {
        let test = TestCaseInfo {
            id: "div".to_string(),
            short_name: "div".to_string(),
            full_name: "com.example.CalcTest.div".to_string(),
            file: Some("file:///work/src/CalcTest.java".to_string()),
            line: Some(12),
            state: TestState::Failed,
            stack_trace: Some(vec!["no frames here".to_string()]),
        };

        assert!(failure_decorations(&test).is_empty());
    }
}
