//! Debug adapter glue
//!
//! The server hosts its own debug adapter and prints the port it listens on
//! to stdout. The supervisor feeds stdout text through `scan_debug_port` and
//! publishes the port on a watch; debug sessions wait on it with a bounded
//! retry. Launch configurations for the `java8+` and `nativeimage` debuggers
//! get their defaults filled here.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// How often the descriptor wait polls for the port
pub const DEBUG_PORT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How many polls before giving up on the debug adapter
pub const DEBUG_PORT_POLL_ATTEMPTS: u32 = 10;

static DEBUG_PORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Debug Server Adapter listening at port (\d+)")
        .expect("debug port pattern is valid")
});

/// Errors for debug adapter resolution
#[derive(Debug, thiserror::Error)]
pub enum DebugPortError {
    #[error("Debug server adapter not yet initialized. Please wait for a while and try again.")]
    NotInitialized,
}

/// Extract the debug adapter port from a piece of stdout text
pub fn scan_debug_port(text: &str) -> Option<u16> {
    let captures = DEBUG_PORT_LINE.captures(text)?;
    let port = captures.get(1)?.as_str().parse().ok()?;
    debug!("Debug server adapter listening on port {}", port);
    Some(port)
}

/// Wait for the debug adapter port to be published, polling up to
/// `DEBUG_PORT_POLL_ATTEMPTS` times
pub async fn wait_for_debug_port(
    port: watch::Receiver<Option<u16>>,
) -> Result<u16, DebugPortError> {
    wait_for_debug_port_with(port, DEBUG_PORT_POLL_ATTEMPTS, DEBUG_PORT_POLL_INTERVAL).await
}

async fn wait_for_debug_port_with(
    port: watch::Receiver<Option<u16>>,
    attempts: u32,
    interval: Duration,
) -> Result<u16, DebugPortError> {
    let mut remaining = attempts;

    loop {
        if let Some(port) = *port.borrow() {
            return Ok(port);
        }

        if remaining == 0 {
            return Err(DebugPortError::NotInitialized);
        }
        remaining -= 1;

        tokio::time::sleep(interval).await;
    }
}

// ============================================================================
// Launch Configuration Defaults
// ============================================================================

fn fill_default(config: &mut Value, key: &str, value: Value) {
    let Some(object) = config.as_object_mut() else {
        return;
    };
    object.entry(key.to_string()).or_insert(value);
}

/// Fill defaults for a `java8+` debug configuration
pub fn resolve_debug_config(mut config: Value) -> Value {
    fill_default(&mut config, "type", Value::from("java8+"));
    fill_default(&mut config, "request", Value::from("launch"));
    fill_default(&mut config, "mainClass", Value::from("${file}"));
    fill_default(&mut config, "classPaths", serde_json::json!(["any"]));
    fill_default(&mut config, "console", Value::from("internalConsole"));
    config
}

/// Fill defaults for a `nativeimage` debug configuration
pub fn resolve_native_debug_config(mut config: Value) -> Value {
    fill_default(&mut config, "type", Value::from("nativeimage"));
    fill_default(&mut config, "request", Value::from("launch"));
    fill_default(
        &mut config,
        "nativeImagePath",
        Value::from("${workspaceFolder}/build/native-image/application"),
    );
    fill_default(&mut config, "miDebugger", Value::from("gdb"));
    fill_default(&mut config, "console", Value::from("internalConsole"));
    config
}

// ============================================================================
// Tests
// ============================================================================
