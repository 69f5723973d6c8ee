//! Supervision of the NetBeans language server process
//!
//! The heart of the bridge: launch configuration, readiness detection from
//! process output, the activation/restart state machine, the maintenance
//! gate for the remedial install, and the debug adapter glue.
//!
//! # Usage
//!
//! ```ignore
//! use nbls::{LaunchConfigBuilder, Supervisor};
//!
//! let config = LaunchConfigBuilder::new()
//!     .server_path("/opt/netbeans/bin/nbcode")
//!     .storage_dir("/home/user/.cache/nbls-bridge")
//!     .build()?;
//!
//! let supervisor = Supervisor::new(config, launcher, editor);
//! supervisor.request_activation(false);
//! ```

pub mod config;
pub mod debug;
pub mod error;
pub mod maintenance;
pub mod readiness;
pub mod supervisor;

pub use config::{LaunchConfig, LaunchConfigBuilder};
pub use error::{LaunchConfigError, SupervisorError};
pub use supervisor::{Phase, Supervisor};
