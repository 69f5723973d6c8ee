//! Maintenance gate
//!
//! When the server reports that optional Java support is missing and the
//! user accepts the offered install, normal restart handling is suspended
//! while an install subprocess runs. The gate is the synchronization
//! primitive for that window: activation chains wait on it, and it resolves
//! exactly once when the install subprocess terminates. Waiters registered
//! after resolution pass through immediately.

use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

/// Error message prefix signaling the recoverable missing-dependency
/// condition
pub const NO_JAVA_SUPPORT_PREFIX: &str = "Cannot initialize Java support";

/// Action label offered to the user for the remedial install
pub const INSTALL_ACTION: &str = "Install GPLv2+CPEx code";

/// Arguments for the install subprocess
pub const INSTALL_ARGS: [&str; 4] = [
    "-J-Dnetbeans.close=true",
    "--modules",
    "--install",
    ".*nbjavac.*",
];

/// One-shot gate guarding the maintenance window
#[derive(Clone)]
pub struct MaintenanceGate {
    /// Whether the gate has resolved
    resolved: Arc<Mutex<bool>>,

    /// Wakes waiters on resolution
    notify: Arc<Notify>,
}

impl MaintenanceGate {
    pub fn new() -> Self {
        debug!("Opening maintenance gate");
        Self {
            resolved: Arc::new(Mutex::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Wait until the gate resolves. Returns immediately if it already has.
    pub async fn wait(&self) {
        let state = self.resolved.lock().await;
        if *state {
            trace!("MaintenanceGate: already resolved");
            return;
        }

        // Register for notification before releasing the lock so a
        // concurrent resolve cannot be missed
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        drop(state);

        notified.await;
        trace!("MaintenanceGate: resolved, waiter released");
    }

    /// Resolve the gate. Later calls are ignored.
    pub async fn resolve(&self) {
        let mut state = self.resolved.lock().await;
        if !*state {
            *state = true;
            debug!("Maintenance gate resolved");
            self.notify.notify_waiters();
        }
    }

    /// Whether the gate has resolved
    pub async fn is_resolved(&self) -> bool {
        *self.resolved.lock().await
    }
}

impl Default for MaintenanceGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MaintenanceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceGate").finish()
    }
}
