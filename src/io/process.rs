//! Process management layer
//!
//! Launches the external server binary and exposes it as a `ServerHandle`:
//! a stream of output chunks, a termination event, and a kill hook. The
//! launcher itself is a trait so the supervisor can be driven by a scripted
//! implementation in tests.

use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, trace, warn};

use crate::nbls::config::{EXTRA_CLUSTERS_ENV, LaunchConfig};
use crate::nbls::error::LaunchConfigError;

/// Exit code reported when the process was terminated by a signal
pub const SIGNAL_EXIT_CODE: i32 = -1;

// ============================================================================
// Output Chunks
// ============================================================================

/// A chunk of process output, as it arrived on the pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

impl OutputChunk {
    /// The chunk text regardless of stream
    pub fn text(&self) -> &str {
        match self {
            OutputChunk::Stdout(text) | OutputChunk::Stderr(text) => text,
        }
    }

    /// Whether the chunk came from standard output
    pub fn is_stdout(&self) -> bool {
        matches!(self, OutputChunk::Stdout(_))
    }
}

// ============================================================================
// Launch Errors
// ============================================================================

/// Error types for launching the server process
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] LaunchConfigError),

    #[error("Spawned process reported no PID")]
    NoPid,

    #[error("Stdout not available")]
    StdoutNotAvailable,

    #[error("Stderr not available")]
    StderrNotAvailable,
}

// ============================================================================
// Server Handle
// ============================================================================

/// Termination hook installed by the launcher; returns whether the signal
/// was delivered
pub type KillFn = Box<dyn Fn() -> bool + Send + Sync>;

/// Handle to a spawned server process.
///
/// Owned exclusively by the supervisor; the process is killed before a
/// replacement handle is ever created.
pub struct ServerHandle {
    /// Process identifier
    pid: u32,

    /// Output chunks from stdout and stderr, in arrival order per stream
    output: Option<mpsc::UnboundedReceiver<OutputChunk>>,

    /// Termination event; `None` while running, then the exit code
    exit: watch::Receiver<Option<i32>>,

    /// Termination hook; returns whether the signal was delivered
    kill_fn: KillFn,
}

impl ServerHandle {
    /// Assemble a handle from its parts. Used by launcher implementations.
    pub fn new(
        pid: u32,
        output: mpsc::UnboundedReceiver<OutputChunk>,
        exit: watch::Receiver<Option<i32>>,
        kill_fn: KillFn,
    ) -> Self {
        Self {
            pid,
            output: Some(output),
            exit,
            kill_fn,
        }
    }

    /// Process identifier
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Take the output stream. Each handle has exactly one consumer; a second
    /// take returns `None`.
    pub fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<OutputChunk>> {
        self.output.take()
    }

    /// Exit code if the process has terminated
    pub fn exit_status(&self) -> Option<i32> {
        *self.exit.borrow()
    }

    /// Whether the termination event has fired
    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    /// A clonable view of the termination event
    pub fn exit_watch(&self) -> watch::Receiver<Option<i32>> {
        self.exit.clone()
    }

    /// Wait for the termination event and return the exit code
    pub async fn wait_for_exit(&self) -> i32 {
        let mut exit = self.exit.clone();
        match exit.wait_for(|status| status.is_some()).await {
            Ok(status) => status.unwrap_or(SIGNAL_EXIT_CODE),
            // Sender gone without reporting: the process is not coming back
            Err(_) => SIGNAL_EXIT_CODE,
        }
    }

    /// Request termination. Returns `true` when the signal was delivered;
    /// the termination event fires asynchronously afterwards.
    pub fn kill(&self) -> bool {
        info!("Killing server process {}", self.pid);
        (self.kill_fn)()
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("pid", &self.pid)
            .field("exited", &self.has_exited())
            .finish()
    }
}

/// Fallback cleanup when a handle is dropped with the process still running
impl Drop for ServerHandle {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!(
                "ServerHandle for {} dropped while process still running - killing",
                self.pid
            );
            (self.kill_fn)();
        }
    }
}

// ============================================================================
// Server Launcher
// ============================================================================

/// Trait for launching the external server process
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    /// Validate the configuration, prepare the userdir, and spawn the server
    /// with the given extra arguments appended to the command line
    async fn launch(
        &self,
        config: &LaunchConfig,
        extra_args: &[String],
    ) -> Result<ServerHandle, LaunchError>;
}

/// Launcher spawning the real server binary
pub struct NbLauncher;

impl NbLauncher {
    /// Pump one pipe into the shared output channel as chunks
    async fn pump_stream<R, F>(mut stream: R, sender: mpsc::UnboundedSender<OutputChunk>, wrap: F)
    where
        R: tokio::io::AsyncRead + Unpin,
        F: Fn(String) -> OutputChunk,
    {
        let mut buffer = [0u8; 4096];

        loop {
            match stream.read(&mut buffer).await {
                Ok(0) => {
                    trace!("NbLauncher: output stream reached EOF");
                    break;
                }
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buffer[..n]).to_string();
                    if sender.send(wrap(text)).is_err() {
                        trace!("NbLauncher: output receiver dropped, stopping pump");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read server output: {}", e);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ServerLauncher for NbLauncher {
    async fn launch(
        &self,
        config: &LaunchConfig,
        extra_args: &[String],
    ) -> Result<ServerHandle, LaunchError> {
        let userdir = config.prepare_userdir()?;
        let args = config.command_args(extra_args);

        info!(
            "Launching server: {} {:?}",
            config.server_path.display(),
            args
        );

        let mut child = Command::new(&config.server_path)
            .args(&args)
            .current_dir(&userdir)
            .env(EXTRA_CLUSTERS_ENV, config.cluster_path_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child.id().ok_or(LaunchError::NoPid)?;
        info!("Server process started with PID {}", pid);

        let stdout = child.stdout.take().ok_or(LaunchError::StdoutNotAvailable)?;
        let stderr = child.stderr.take().ok_or(LaunchError::StderrNotAvailable)?;

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::pump_stream(
            stdout,
            output_tx.clone(),
            OutputChunk::Stdout,
        ));
        tokio::spawn(Self::pump_stream(stderr, output_tx, OutputChunk::Stderr));

        // The wait task consumes the child and fires the termination event
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    let code = status.code().unwrap_or(SIGNAL_EXIT_CODE);
                    info!("Server process {} terminated with {}", pid, code);
                    let _ = exit_tx.send(Some(code));
                }
                Err(e) => {
                    error!("Error waiting for server process {}: {}", pid, e);
                    let _ = exit_tx.send(Some(SIGNAL_EXIT_CODE));
                }
            }
        });

        let kill_fn: KillFn = Box::new(move || {
            #[cfg(unix)]
            {
                // The wait task observes the resulting exit
                unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
            }
            #[cfg(not(unix))]
            {
                warn!("Process termination not implemented on this platform");
                false
            }
        });

        Ok(ServerHandle::new(pid, output_rx, exit_rx, kill_fn))
    }
}

// ============================================================================
// Scripted Launcher (for testing)
// ============================================================================


// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nbls::config::LaunchConfigBuilder;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    #[cfg(feature = "test-logging")]
    #[ctor::ctor]
    fn init_test_logging() {
        let _ = crate::logging::init_logging(crate::logging::LogConfig::default());
    }

    #[cfg(unix)]
    fn fake_server(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("nbcode");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn config_for(script_dir: &Path, script: &str) -> LaunchConfig {
        LaunchConfigBuilder::new()
            .server_path(fake_server(script_dir, script))
            .storage_dir(script_dir.join("storage"))
            .add_cluster("/ext/java/nbcode/java")
            .build()
            .unwrap()
    }

    async fn collect_output(handle: &mut ServerHandle) -> Vec<OutputChunk> {
        let mut output = handle.take_output().unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = output.recv().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_captures_both_streams_and_exit() {
        let temp = tempdir().unwrap();
        let config = config_for(
            temp.path(),
            "echo 'server starting'; echo 'trouble' >&2; exit 3",
        );

        let mut handle = NbLauncher.launch(&config, &[]).await.unwrap();
        assert!(handle.pid() > 0);

        let chunks = collect_output(&mut handle).await;
        let stdout: String = chunks
            .iter()
            .filter(|c| c.is_stdout())
            .map(|c| c.text())
            .collect();
        let stderr: String = chunks
            .iter()
            .filter(|c| !c.is_stdout())
            .map(|c| c.text())
            .collect();

        assert!(stdout.contains("server starting"));
        assert!(stderr.contains("trouble"));
        assert_eq!(handle.wait_for_exit().await, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_passes_clusters_via_environment() {
        let temp = tempdir().unwrap();
        let config = config_for(temp.path(), "echo \"clusters=$extra_clusters\"");

        let mut handle = NbLauncher.launch(&config, &[]).await.unwrap();
        let chunks = collect_output(&mut handle).await;
        let stdout: String = chunks.iter().map(|c| c.text()).collect();

        assert!(stdout.contains("clusters=/ext/java/nbcode/java"));
        handle.wait_for_exit().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_creates_userdir() {
        let temp = tempdir().unwrap();
        let config = config_for(temp.path(), "exit 0");

        let handle = NbLauncher.launch(&config, &[]).await.unwrap();
        assert!(config.userdir().is_dir());
        handle.wait_for_exit().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_fires_termination_event() {
        let temp = tempdir().unwrap();
        let config = config_for(temp.path(), "sleep 30");

        let handle = NbLauncher.launch(&config, &[]).await.unwrap();
        assert!(!handle.has_exited());
        assert!(handle.kill());

        assert_eq!(handle.wait_for_exit().await, SIGNAL_EXIT_CODE);
        assert!(handle.has_exited());
    }

    #[tokio::test]
    async fn test_launch_fails_for_missing_binary() {
        let temp = tempdir().unwrap();

        let result = LaunchConfigBuilder::new()
            .server_path(temp.path().join("missing"))
            .storage_dir(temp.path())
            .build();

        // Validation happens at configuration time
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_output_can_only_be_taken_once() {
        let launcher = testing::ScriptedLauncher::new();
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("nbcode"), "").unwrap();
        let config = LaunchConfigBuilder::new()
            .server_path(temp.path().join("nbcode"))
            .storage_dir(temp.path())
            .build()
            .unwrap();

        let mut handle = launcher.launch(&config, &[]).await.unwrap();
        assert!(handle.take_output().is_some());
        assert!(handle.take_output().is_none());

        launcher.control(0).exit(0);
        handle.wait_for_exit().await;
    }

    #[tokio::test]
    async fn test_scripted_launcher_records_events() {
        let launcher = testing::ScriptedLauncher::new();
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("nbcode"), "").unwrap();
        let config = LaunchConfigBuilder::new()
            .server_path(temp.path().join("nbcode"))
            .storage_dir(temp.path())
            .build()
            .unwrap();

        let handle = launcher.launch(&config, &[]).await.unwrap();
        assert_eq!(launcher.spawn_count(), 1);

        handle.kill();
        assert_eq!(handle.wait_for_exit().await, SIGNAL_EXIT_CODE);
        assert!(launcher.control(0).was_killed());

        let events = launcher.events();
        assert_eq!(events[0], format!("spawn:{}", handle.pid()));
        assert!(events.contains(&format!("kill:{}", handle.pid())));
    }
}
