//! Server readiness detection
//!
//! The server does not announce readiness over any protocol; instead a fixed
//! marker shows up in its output once the language server module is loaded
//! and enabled. The scanner accumulates stdout text until the marker appears
//! and then stops accumulating. If the process exits first, the last output
//! line mentioning the module is extracted as a diagnostic and the activation
//! fails with a "not enabled" error.

use regex::Regex;
use std::sync::LazyLock;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::io::process::OutputChunk;

/// Marker substring signaling the language server module is up
pub const READINESS_MARKER: &str = "org.netbeans.modules.java.lsp.server";

/// Upper bound for the diagnostic log kept for failure extraction
const MAX_DIAGNOSTIC_BUFFER: usize = 64 * 1024;

/// Last output line mentioning the language server module
static DIAGNOSTIC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"org\.netbeans\.modules\.java\.lsp\.server[^\n]*")
        .expect("diagnostic pattern is valid")
});

// ============================================================================
// Errors
// ============================================================================

/// Readiness failure
#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    /// The process terminated before producing the marker
    #[error("Language server not enabled (process exited with {exit_code})")]
    NotEnabled {
        exit_code: i32,
        /// Last output line mentioning the module, if any
        diagnostic: Option<String>,
    },
}

// ============================================================================
// Scanner
// ============================================================================

/// Synchronous marker scanner, bound to one process's output.
///
/// Only stdout text counts toward the marker; stderr still feeds the
/// diagnostic log so a failure can be explained.
pub struct ReadinessScanner {
    /// Accumulated stdout; `None` once the marker was found
    stdout: Option<String>,

    /// Tail of all output kept for diagnostic extraction
    diagnostic_log: String,
}

impl ReadinessScanner {
    pub fn new() -> Self {
        Self {
            stdout: Some(String::new()),
            diagnostic_log: String::new(),
        }
    }

    /// Feed one output chunk. Returns the accumulated stdout text exactly
    /// once, when the marker first becomes visible.
    pub fn push(&mut self, chunk: &OutputChunk) -> Option<String> {
        if self.diagnostic_log.len() < MAX_DIAGNOSTIC_BUFFER {
            self.diagnostic_log.push_str(chunk.text());
        }

        let buffer = self.stdout.as_mut()?;

        if chunk.is_stdout() {
            buffer.push_str(chunk.text());
        }

        if buffer.contains(READINESS_MARKER) {
            trace!("Readiness marker found");
            return self.stdout.take();
        }

        None
    }

    /// Whether the marker was already seen
    pub fn is_resolved(&self) -> bool {
        self.stdout.is_none()
    }

    /// Last output line mentioning the module, for failure diagnostics
    pub fn diagnostic_line(&self) -> Option<String> {
        DIAGNOSTIC_LINE
            .find_iter(&self.diagnostic_log)
            .last()
            .map(|m| m.as_str().to_string())
    }
}

impl Default for ReadinessScanner {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Async Driver
// ============================================================================

/// Drive a scanner against a process's output stream and termination event.
///
/// `on_chunk` fires for every chunk before it is scanned; the supervisor
/// uses it to clear the activation-pending flag, mirror output to the log
/// view, and feed the debug-port scanner.
pub async fn await_ready<F>(
    output: &mut mpsc::UnboundedReceiver<OutputChunk>,
    mut exit: watch::Receiver<Option<i32>>,
    mut on_chunk: F,
) -> Result<String, ReadinessError>
where
    F: FnMut(&OutputChunk),
{
    let mut scanner = ReadinessScanner::new();

    let exit_code = loop {
        tokio::select! {
            chunk = output.recv() => {
                match chunk {
                    Some(chunk) => {
                        on_chunk(&chunk);
                        if let Some(log) = scanner.push(&chunk) {
                            return Ok(log);
                        }
                    }
                    // Output streams closed; the exit code follows shortly
                    None => {
                        let code = exit
                            .wait_for(|status| status.is_some())
                            .await
                            .map(|status| status.unwrap_or(-1))
                            .unwrap_or(-1);
                        break code;
                    }
                }
            }
            changed = exit.changed() => {
                let code = match changed {
                    Ok(()) => exit.borrow().unwrap_or(-1),
                    Err(_) => -1,
                };

                // Chunks may still be in flight behind the termination
                // event; drain them with a short grace window
                loop {
                    let grace = std::time::Duration::from_millis(200);
                    match tokio::time::timeout(grace, output.recv()).await {
                        Ok(Some(chunk)) => {
                            on_chunk(&chunk);
                            if let Some(log) = scanner.push(&chunk) {
                                return Ok(log);
                            }
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
                break code;
            }
        }
    };

    let diagnostic = scanner.diagnostic_line();
    debug!(
        "Server exited before readiness marker (code {}), diagnostic: {:?}",
        exit_code, diagnostic
    );

    Err(ReadinessError::NotEnabled {
        exit_code,
        diagnostic,
    })
}

// ============================================================================
// Tests
// ============================================================================
