//! Launch configuration for the NetBeans language server
//!
//! Provides `LaunchConfig` with a validating builder: where the server binary
//! lives, where its per-instance user directory goes, which clusters are
//! passed along, and the knobs the supervisor uses for timeouts and restart
//! backoff.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::nbls::error::LaunchConfigError;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default delay before an automatic restart after an unexpected close (10 s)
pub const DEFAULT_RESTART_DELAY_SECS: u64 = 10;

/// Default timeout for the server to connect back and finish the LSP
/// handshake once the readiness marker was seen (30 s)
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Maximum allowed handshake timeout (5 minutes)
pub const MAX_HANDSHAKE_TIMEOUT_SECS: u64 = 300;

/// Name of the per-instance user directory below the storage directory
pub const USERDIR_NAME: &str = "userdir";

/// Environment variable the server reads additional cluster paths from
pub const EXTRA_CLUSTERS_ENV: &str = "extra_clusters";

// ============================================================================
// Launch Configuration
// ============================================================================

/// Complete configuration for launching and supervising the server
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Path to the server launcher binary
    pub server_path: PathBuf,

    /// Storage directory; the server's userdir is created below it
    pub storage_dir: PathBuf,

    /// Module cluster directories contributed by other extensions
    pub clusters: Vec<PathBuf>,

    /// JDK to run the server on; `None` uses the system default
    pub jdk_home: Option<PathBuf>,

    /// Pass the console-logger flag to the server
    pub verbose: bool,

    /// Delay before an automatic restart after an unexpected close
    pub restart_delay: Duration,

    /// Timeout for connection establishment plus LSP handshake
    pub handshake_timeout: Duration,
}

impl LaunchConfig {
    /// The server's user directory below the storage directory
    pub fn userdir(&self) -> PathBuf {
        self.storage_dir.join(USERDIR_NAME)
    }

    /// Create the userdir if needed and verify it is a directory.
    ///
    /// Fails when a same-named non-directory is in the way or the directory
    /// cannot be created.
    pub fn prepare_userdir(&self) -> Result<PathBuf, LaunchConfigError> {
        let userdir = self.userdir();

        if let Err(source) = std::fs::create_dir_all(&userdir) {
            return Err(LaunchConfigError::StorageValidation {
                storage_dir: userdir,
                source,
            });
        }

        if !userdir.is_dir() {
            return Err(LaunchConfigError::StorageValidation {
                storage_dir: userdir,
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "userdir path exists but is not a directory",
                ),
            });
        }

        Ok(userdir)
    }

    /// Assemble the server command line, ending with the caller's extra
    /// arguments (e.g. a connect directive with a port number)
    pub fn command_args(&self, extra_args: &[String]) -> Vec<String> {
        let mut args = vec![
            "--userdir".to_string(),
            self.userdir().to_string_lossy().to_string(),
        ];

        if let Some(jdk) = &self.jdk_home {
            args.push("--jdkhome".to_string());
            args.push(jdk.to_string_lossy().to_string());
        }

        if self.verbose {
            args.push("-J-Dnetbeans.logger.console=true".to_string());
        }

        args.extend(extra_args.iter().cloned());
        args
    }

    /// Cluster paths joined with the platform path separator, for the
    /// `extra_clusters` environment variable
    pub fn cluster_path_env(&self) -> String {
        let separator = if cfg!(windows) { ";" } else { ":" };
        self.clusters
            .iter()
            .map(|c| c.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for `LaunchConfig` with validation and defaults
#[derive(Debug, Default)]
pub struct LaunchConfigBuilder {
    server_path: Option<PathBuf>,
    storage_dir: Option<PathBuf>,
    clusters: Vec<PathBuf>,
    jdk_home: Option<PathBuf>,
    verbose: bool,
    restart_delay: Option<Duration>,
    handshake_timeout: Option<Duration>,
}

impl LaunchConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server launcher binary
    pub fn server_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_path = Some(path.into());
        self
    }

    /// Set the storage directory holding the userdir
    pub fn storage_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(path.into());
        self
    }

    /// Add a cluster directory
    pub fn add_cluster(mut self, path: impl Into<PathBuf>) -> Self {
        self.clusters.push(path.into());
        self
    }

    /// Replace the cluster set
    pub fn clusters(mut self, clusters: impl IntoIterator<Item = PathBuf>) -> Self {
        self.clusters = clusters.into_iter().collect();
        self
    }

    /// Set the JDK the server runs on
    pub fn jdk_home(mut self, path: Option<PathBuf>) -> Self {
        self.jdk_home = path;
        self
    }

    /// Pass the console-logger flag to the server
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// Set the automatic restart delay
    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = Some(delay);
        self
    }

    /// Set the connection/handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<LaunchConfig, LaunchConfigError> {
        let server_path = self
            .server_path
            .ok_or_else(|| LaunchConfigError::missing_field("server_path"))?;

        let storage_dir = self
            .storage_dir
            .ok_or_else(|| LaunchConfigError::missing_field("storage_dir"))?;

        Self::validate_server_path(&server_path)?;

        let restart_delay = self
            .restart_delay
            .unwrap_or(Duration::from_secs(DEFAULT_RESTART_DELAY_SECS));

        let handshake_timeout = self
            .handshake_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS));

        Self::validate_handshake_timeout(handshake_timeout)?;

        Ok(LaunchConfig {
            server_path,
            storage_dir,
            clusters: self.clusters,
            jdk_home: self.jdk_home,
            verbose: self.verbose,
            restart_delay,
            handshake_timeout,
        })
    }

    /// The binary must exist as a regular file
    fn validate_server_path(path: &Path) -> Result<(), LaunchConfigError> {
        if !path.is_file() {
            return Err(LaunchConfigError::ServerBinaryValidation {
                server_path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "server binary does not exist or is not a regular file",
                ),
            });
        }
        Ok(())
    }

    // The restart delay is not validated; zero means retry immediately
    fn validate_handshake_timeout(handshake_timeout: Duration) -> Result<(), LaunchConfigError> {
        if handshake_timeout.is_zero() {
            return Err(LaunchConfigError::invalid_timeout(
                handshake_timeout,
                "handshake timeout must be greater than zero",
            ));
        }

        if handshake_timeout > Duration::from_secs(MAX_HANDSHAKE_TIMEOUT_SECS) {
            return Err(LaunchConfigError::invalid_timeout(
                handshake_timeout,
                "handshake timeout too long (max 5 minutes)",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
