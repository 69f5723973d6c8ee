//! Server supervision state machine
//!
//! Owns the single "current process" and "current client" slots and drives
//! every transition through the same sequential chain: stop the old client,
//! kill the old process and wait for its termination event, then launch,
//! detect readiness, accept the socket connection, and perform the
//! handshake. Overlapping activation requests are dropped while one is in
//! flight; requests arriving during a maintenance window are chained after
//! it. An unexpected connection close schedules one delayed restart.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info};

use crate::editor::EditorUi;
use crate::io::process::{OutputChunk, ServerHandle, ServerLauncher};
use crate::io::transport::{SocketListener, SocketTransport, TransportError};
use crate::lsp::client::{BridgeClient, UiHooks};
use crate::lsp::protocol::TestProgressParams;
use crate::nbls::config::LaunchConfig;
use crate::nbls::debug::scan_debug_port;
use crate::nbls::error::SupervisorError;
use crate::nbls::maintenance::{
    INSTALL_ACTION, INSTALL_ARGS, MaintenanceGate, NO_JAVA_SUPPORT_PREFIX,
};
use crate::nbls::readiness::{self, ReadinessError};

// ============================================================================
// Phases
// ============================================================================

/// Supervisor lifecycle phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No server running, no activation in flight
    Idle,
    /// An activation chain is running
    Activating,
    /// Handshake completed, client usable
    Ready,
    /// Activation failed or the supervisor was shut down
    Closed,
}

// ============================================================================
// Supervisor
// ============================================================================

/// State mutated only inside the supervisor's sequential chains
struct Shared {
    config: LaunchConfig,
    phase: Phase,
    process: Option<ServerHandle>,
    client: Option<Arc<BridgeClient<SocketTransport>>>,
    maintenance: Option<MaintenanceGate>,
}

/// Supervisor for the external language server process
pub struct Supervisor {
    /// Handle back to the owning Arc, for spawning chains from `&self`
    self_ref: Weak<Supervisor>,

    launcher: Arc<dyn ServerLauncher>,
    editor: Arc<dyn EditorUi>,
    shared: Mutex<Shared>,

    /// Activation in progress; cleared when the server produces its first
    /// output or the activation fails
    activation_pending: AtomicBool,

    /// Delayed restarts become no-ops while maintenance runs
    restarts_suspended: AtomicBool,

    /// Published for external observers once the handshake completed
    ready: watch::Sender<bool>,

    /// Debug adapter port extracted from server output
    debug_port: watch::Sender<Option<u16>>,

    /// Sink for test progress notifications, installed per client
    test_progress: std::sync::Mutex<Option<mpsc::UnboundedSender<TestProgressParams>>>,
}

impl Supervisor {
    /// Create a supervisor. Nothing is launched until the first activation
    /// request.
    pub fn new(
        config: LaunchConfig,
        launcher: Arc<dyn ServerLauncher>,
        editor: Arc<dyn EditorUi>,
    ) -> Arc<Self> {
        let (ready, _) = watch::channel(false);
        let (debug_port, _) = watch::channel(None);

        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            launcher,
            editor,
            shared: Mutex::new(Shared {
                config,
                phase: Phase::Idle,
                process: None,
                client: None,
                maintenance: None,
            }),
            activation_pending: AtomicBool::new(false),
            restarts_suspended: AtomicBool::new(false),
            ready,
            debug_port,
            test_progress: std::sync::Mutex::new(None),
        })
    }

    /// The owning Arc; `None` only during teardown
    fn strong(&self) -> Option<Arc<Self>> {
        self.self_ref.upgrade()
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Current lifecycle phase
    pub async fn phase(&self) -> Phase {
        self.shared.lock().await.phase
    }

    /// Whether an activation is currently pending
    pub fn activation_pending(&self) -> bool {
        self.activation_pending.load(Ordering::SeqCst)
    }

    /// Flips to true once the handshake completed, false on every restart
    pub fn ready_watch(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Debug adapter port, once the server printed it
    pub fn debug_port_watch(&self) -> watch::Receiver<Option<u16>> {
        self.debug_port.subscribe()
    }

    /// The current client, when `Ready`
    pub async fn client(&self) -> Option<Arc<BridgeClient<SocketTransport>>> {
        self.shared.lock().await.client.clone()
    }

    /// Install the sink receiving test progress notifications. Applies to
    /// clients created by subsequent activations.
    pub fn set_test_progress_sink(&self, sink: mpsc::UnboundedSender<TestProgressParams>) {
        *self.test_progress.lock().unwrap() = Some(sink);
    }

    // ------------------------------------------------------------------
    // Restart Triggers
    // ------------------------------------------------------------------

    /// Request a (re)activation of the server.
    ///
    /// A request arriving while another activation is pending is dropped,
    /// not queued. A request arriving during maintenance is chained after
    /// the maintenance window.
    pub fn request_activation(&self, notify_kill: bool) {
        if self.activation_pending.swap(true, Ordering::SeqCst) {
            // do not activate more than once in parallel
            info!("Server activation requested repeatedly, ignoring...");
            return;
        }

        let _ = self.ready.send(false);

        let Some(supervisor) = self.strong() else {
            return;
        };
        tokio::spawn(async move {
            supervisor.activation_chain(notify_kill).await;
        });
    }

    /// Switch to a different JDK and restart if it actually changed
    pub async fn update_jdk(&self, jdk_home: Option<PathBuf>) {
        {
            let mut shared = self.shared.lock().await;
            if shared.config.jdk_home == jdk_home {
                return;
            }
            shared.config.jdk_home = jdk_home;
        }
        self.request_activation(true);
    }

    /// Replace the cluster set and restart if it actually changed
    pub async fn update_clusters(&self, clusters: Vec<PathBuf>) {
        {
            let mut shared = self.shared.lock().await;
            if shared.config.clusters == clusters {
                return;
            }
            shared.config.clusters = clusters;
        }
        self.request_activation(true);
    }

    /// Schedule an activation after a delay. No-op while maintenance runs.
    pub fn schedule_restart(&self, delay: Duration) {
        if self.restarts_suspended.load(Ordering::SeqCst) {
            info!("Ignoring request for restart of Apache NetBeans Language Server");
            return;
        }

        info!(
            "Restart of Apache NetBeans Language Server requested in {} s.",
            delay.as_secs_f64()
        );

        let Some(supervisor) = self.strong() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            supervisor.request_activation(false);
        });
    }

    /// Deliberate shutdown; kills the server and does not schedule restarts
    pub async fn shutdown(&self) {
        info!("Shutting down supervisor");

        let client = {
            let mut shared = self.shared.lock().await;
            shared.phase = Phase::Closed;
            shared.client.take()
        };

        let _ = self.kill_process(false, None).await;
        Self::stop_client(client).await;
        let _ = self.ready.send(false);
    }

    // ------------------------------------------------------------------
    // Activation Chain
    // ------------------------------------------------------------------

    async fn activation_chain(self: Arc<Self>, notify_kill: bool) {
        let (gate, old_client) = {
            let mut shared = self.shared.lock().await;
            shared.phase = Phase::Activating;
            (shared.maintenance.clone(), shared.client.take())
        };

        // Chain the restart after termination of a pending maintenance
        if let Some(gate) = gate {
            info!(
                "Server activation initiated while in maintenance mode, scheduling after maintenance"
            );
            gate.wait().await;
        } else {
            info!("Initiating server activation");
        }

        Self::stop_client(old_client).await;

        if let Err(e) = self.kill_process(notify_kill, None).await {
            error!("Failed to kill previous server: {}", e);
        }

        match self.do_activate().await {
            Ok(client) => {
                {
                    let mut shared = self.shared.lock().await;
                    shared.client = Some(client);
                    shared.phase = Phase::Ready;
                }
                self.activation_pending.store(false, Ordering::SeqCst);
                let _ = self.ready.send(true);
            }
            Err(e) => {
                self.activation_pending.store(false, Ordering::SeqCst);
                {
                    let mut shared = self.shared.lock().await;
                    if shared.phase == Phase::Activating {
                        shared.phase = Phase::Closed;
                    }
                }
                error!("Server activation failed: {}", e);
                self.editor
                    .show_error_message(&format!("Error initializing {e}"), &[])
                    .await;
            }
        }
    }

    /// Launch, await readiness, connect, and perform the handshake
    async fn do_activate(&self) -> Result<Arc<BridgeClient<SocketTransport>>, SupervisorError> {
        let strong = self.strong().ok_or(SupervisorError::Closed)?;

        let config = {
            let mut shared = self.shared.lock().await;
            shared.maintenance = None;
            shared.config.clone()
        };
        self.restarts_suspended.store(false, Ordering::SeqCst);

        let jdk_label = config
            .jdk_home
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "default system JDK".to_string());
        let launch_msg = format!("Launching Apache NetBeans Language Server with {jdk_label}");
        info!("{}", launch_msg);
        self.editor.set_status_message(&launch_msg, 2_000);

        let _ = self.debug_port.send(None);

        // The server is told to connect back to an ephemeral loopback port
        let listener = SocketListener::bind().await.map_err(|e| {
            SupervisorError::unexpected(format!("cannot open loopback listener: {e}"))
        })?;
        let port = listener.port();
        let extra_args = vec![
            format!("--start-java-language-server=connect:{port}"),
            "--start-java-debug-adapter-server=listen:0".to_string(),
        ];

        let mut handle = self.launcher.launch(&config, &extra_args).await?;
        let pid = handle.pid();
        info!("LSP server launching: {}", pid);

        let mut output = handle
            .take_output()
            .ok_or_else(|| SupervisorError::unexpected("no output stream to parse"))?;
        let exit_watch = handle.exit_watch();

        {
            let mut shared = self.shared.lock().await;
            shared.process = Some(handle);
        }

        // Mirror output to the log while scanning for the readiness marker.
        // The first chunk clears the pending flag so a wedged server can
        // still be restarted by a later trigger.
        let hook = {
            let supervisor = Arc::clone(&strong);
            move |chunk: &OutputChunk| {
                supervisor.activation_pending.store(false, Ordering::SeqCst);
                supervisor.editor.append_log(chunk.text());
                if chunk.is_stdout() {
                    supervisor.publish_debug_port(chunk.text());
                }
            }
        };

        if let Err(e) = readiness::await_ready(&mut output, exit_watch, hook).await {
            let ReadinessError::NotEnabled { diagnostic, .. } = &e;
            match diagnostic {
                Some(line) => self.editor.append_log(&format!("{line}\n")),
                None => self
                    .editor
                    .append_log("Cannot find org.netbeans.modules.java.lsp.server in the log!\n"),
            }
            self.editor.reveal_log();
            let _ = self.kill_process(false, Some(pid)).await;
            return Err(e.into());
        }

        // Keep mirroring output after readiness resolved
        {
            let supervisor = Arc::clone(&strong);
            tokio::spawn(async move {
                while let Some(chunk) = output.recv().await {
                    supervisor.editor.append_log(chunk.text());
                    if chunk.is_stdout() {
                        supervisor.publish_debug_port(chunk.text());
                    }
                }
            });
        }

        let transport = listener
            .accept(config.handshake_timeout)
            .await
            .map_err(|e| match e {
                TransportError::AcceptTimeout { timeout } => {
                    SupervisorError::ConnectTimeout { timeout }
                }
                other => SupervisorError::unexpected(format!("accept failed: {other}")),
            })?;

        let client = Arc::new(BridgeClient::new(transport));

        // Wire custom messages before the handshake so nothing is missed
        let hooks = UiHooks {
            on_status_error: Some({
                let supervisor = Arc::clone(&strong);
                Arc::new(move |message: String| {
                    let supervisor = Arc::clone(&supervisor);
                    tokio::spawn(async move {
                        supervisor.check_install_missing(message).await;
                    });
                })
            }),
            test_progress: self.test_progress.lock().unwrap().clone(),
        };
        client.wire_editor(Arc::clone(&self.editor), hooks).await;

        info!("Language Client: Starting");
        tokio::time::timeout(config.handshake_timeout, client.initialize(None))
            .await
            .map_err(|_| SupervisorError::ConnectTimeout {
                timeout: config.handshake_timeout,
            })??;
        info!("Language Client: Ready");

        self.monitor_connection(Arc::clone(&client), config.restart_delay);

        Ok(client)
    }

    /// Stop a client gracefully; skipped when its connection is already gone
    async fn stop_client(client: Option<Arc<BridgeClient<SocketTransport>>>) {
        let Some(client) = client else {
            return;
        };

        if client.is_connected() {
            match tokio::time::timeout(Duration::from_secs(5), client.shutdown()).await {
                Ok(Ok(())) => debug!("Client shutdown completed"),
                Ok(Err(e)) => debug!("Client shutdown error: {}", e),
                Err(_) => debug!("Client shutdown timed out"),
            }
        }
        let _ = client.close().await;
    }

    /// Kill the tracked server process and wait for its termination event.
    ///
    /// With `expected_pid` set, the kill only applies when that process is
    /// still the tracked one; stale requests are no-ops.
    async fn kill_process(
        &self,
        notify_kill: bool,
        expected_pid: Option<u32>,
    ) -> Result<(), SupervisorError> {
        debug!("Request to kill LSP server.");

        let handle = {
            let mut shared = self.shared.lock().await;
            match &shared.process {
                Some(current) if expected_pid.is_none_or(|pid| pid == current.pid()) => {
                    shared.process.take()
                }
                _ => None,
            }
        };

        let Some(handle) = handle else {
            debug!(
                "Cannot kill: requested {:?}, no matching current process",
                expected_pid
            );
            return Ok(());
        };

        if notify_kill {
            self.editor
                .set_status_message("Restarting Apache NetBeans Language Server.", 2_000);
        }

        info!("Killing LSP server {}", handle.pid());
        if !handle.kill() {
            return Err(SupervisorError::KillFailed { pid: handle.pid() });
        }

        let code = handle.wait_for_exit().await;
        info!("LSP server {} terminated with {}", handle.pid(), code);
        Ok(())
    }

    /// React to an unexpected connection close with one delayed restart
    fn monitor_connection(
        &self,
        client: Arc<BridgeClient<SocketTransport>>,
        restart_delay: Duration,
    ) {
        let Some(supervisor) = self.strong() else {
            return;
        };
        let mut closed = client.closed_watch();

        tokio::spawn(async move {
            if closed.wait_for(|closed| *closed).await.is_err() {
                return;
            }

            // Stale guard: only the current client may trigger a restart
            let is_current = {
                let mut shared = supervisor.shared.lock().await;
                match &shared.client {
                    Some(current) if Arc::ptr_eq(current, &client) => {
                        shared.client = None;
                        shared.phase = Phase::Idle;
                        true
                    }
                    _ => false,
                }
            };
            if !is_current {
                return;
            }

            info!("Connection to Apache NetBeans Language Server closed.");
            let _ = supervisor.ready.send(false);

            if !supervisor.activation_pending.load(Ordering::SeqCst) {
                supervisor.schedule_restart(restart_delay);
            }
        });
    }

    /// Publish the debug adapter port the first time it shows up in output
    fn publish_debug_port(&self, text: &str) {
        if self.debug_port.borrow().is_some() {
            return;
        }
        if let Some(port) = scan_debug_port(text) {
            let _ = self.debug_port.send(Some(port));
        }
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Probe an error status message for the recoverable missing-dependency
    /// condition and offer the remedial install
    async fn check_install_missing(&self, message: String) {
        if !message.starts_with(NO_JAVA_SUPPORT_PREFIX) {
            return;
        }

        let reply = self
            .editor
            .show_error_message(
                "Additional Java Support is needed",
                &[INSTALL_ACTION.to_string()],
            )
            .await;

        if reply.as_deref() != Some(INSTALL_ACTION) {
            return;
        }

        self.editor.set_status_message(
            "Preparing Apache NetBeans Language Server for additional installation",
            2_000,
        );
        self.begin_maintenance().await;
    }

    /// Open the maintenance gate and run the install subprocess
    async fn begin_maintenance(&self) {
        let gate = {
            let mut shared = self.shared.lock().await;
            if shared.maintenance.is_some() {
                debug!("Maintenance already pending, ignoring");
                return;
            }
            let gate = MaintenanceGate::new();
            shared.maintenance = Some(gate.clone());
            gate
        };

        self.restarts_suspended.store(true, Ordering::SeqCst);

        let Some(supervisor) = self.strong() else {
            return;
        };
        tokio::spawn(async move {
            supervisor.run_install(gate).await;
        });
    }

    async fn run_install(self: Arc<Self>, gate: MaintenanceGate) {
        let _ = self.kill_process(false, None).await;

        let config = { self.shared.lock().await.config.clone() };
        let install_args: Vec<String> = INSTALL_ARGS.iter().map(|s| s.to_string()).collect();

        match self.launcher.launch(&config, &install_args).await {
            Ok(mut handle) => {
                info!("Launching installation process: {}", handle.pid());

                // The installer spawns children that inherit the pipes; the
                // stream only closes once the last child terminated, so
                // drain until end of stream before declaring completion
                if let Some(mut output) = handle.take_output() {
                    while let Some(chunk) = output.recv().await {
                        self.editor.append_log(chunk.text());
                    }
                }
                let code = handle.wait_for_exit().await;

                info!("Installation completed: {}", handle.pid());
                info!("Additional Java Support installed with exit code {}", code);

                // Requested before the gate resolves: when an activation was
                // already chained during maintenance the pending flag drops
                // this one, otherwise it becomes the single deferred restart
                self.request_activation(false);
                gate.resolve().await;
            }
            Err(e) => {
                error!("Installation process failed to start: {}", e);
                gate.resolve().await;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::testing::RecordingEditor;
    use crate::io::process::testing::ScriptedLauncher;
    use crate::io::transport::SocketTransport;
    use crate::lsp::framing::LspFraming;
    use crate::lsp::rpc::{JsonRpcRequest, JsonRpcResponse};
    use crate::nbls::config::LaunchConfigBuilder;
    use crate::nbls::readiness::READINESS_MARKER;
    use tempfile::TempDir;
    use tokio::net::TcpStream;

    struct Harness {
        supervisor: Arc<Supervisor>,
        launcher: Arc<ScriptedLauncher>,
        editor: Arc<RecordingEditor>,
        _temp: TempDir,
    }

    fn harness() -> Harness {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("nbcode"), "").unwrap();

        let config = LaunchConfigBuilder::new()
            .server_path(temp.path().join("nbcode"))
            .storage_dir(temp.path().join("storage"))
            .restart_delay(Duration::from_millis(10))
            .handshake_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let launcher = Arc::new(ScriptedLauncher::new());
        let editor = Arc::new(RecordingEditor::new());
        let supervisor = Supervisor::new(
            config,
            Arc::clone(&launcher) as Arc<dyn ServerLauncher>,
            Arc::clone(&editor) as Arc<dyn EditorUi>,
        );

        Harness {
            supervisor,
            launcher,
            editor,
            _temp: temp,
        }
    }

    /// Poll until a condition holds, failing the test after two seconds
    async fn wait_until<F: Fn() -> bool>(what: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !what() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Extract the connect-back port from a scripted launch's arguments
    fn connect_port(args: &[String]) -> u16 {
        let directive = args
            .iter()
            .find(|a| a.starts_with("--start-java-language-server=connect:"))
            .expect("connect directive present");
        directive
            .rsplit(':')
            .next()
            .unwrap()
            .parse()
            .expect("port parses")
    }

    /// Play the server's side of the socket handshake
    async fn complete_handshake(port: u16) -> LspFraming<SocketTransport> {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut framing = LspFraming::new(SocketTransport::new(stream));

        let raw = framing.receive().await.unwrap();
        let request: JsonRpcRequest = serde_json::from_str(&raw).unwrap();
        assert_eq!(request.method, "initialize");

        let response =
            JsonRpcResponse::success(request.id, serde_json::json!({"capabilities": {}}));
        framing
            .send(&serde_json::to_string(&response).unwrap())
            .await
            .unwrap();

        // initialized notification
        let raw = framing.receive().await.unwrap();
        assert!(raw.contains("initialized"));

        framing
    }

    /// Drive one activation all the way to `Ready`
    async fn activate_to_ready(h: &Harness) -> LspFraming<SocketTransport> {
        h.supervisor.request_activation(false);

        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() >= 1).await;
        let control = h.launcher.control(h.launcher.spawn_count() - 1);

        let port = connect_port(&control.extra_args);
        control.emit_stdout(&format!("{READINESS_MARKER} ready\n"));

        let framing = complete_handshake(port).await;

        let supervisor = Arc::clone(&h.supervisor);
        wait_until(move || *supervisor.ready_watch().borrow()).await;
        assert_eq!(h.supervisor.phase().await, Phase::Ready);

        framing
    }

    #[tokio::test]
    async fn test_overlapping_requests_are_dropped() {
        let h = harness();

        h.supervisor.request_activation(false);
        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() == 1).await;

        // Server has produced no output yet, so the activation is pending
        // and every further trigger is dropped
        for _ in 0..4 {
            h.supervisor.request_activation(false);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.launcher.spawn_count(), 1);
        assert!(h.supervisor.activation_pending());
    }

    #[tokio::test]
    async fn test_new_process_spawns_only_after_old_termination() {
        let h = harness();

        h.supervisor.request_activation(false);
        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() == 1).await;
        let first = h.launcher.control(0);

        // First output clears the pending flag, so a new trigger is honored
        first.emit_stdout("module list follows\n");
        let supervisor = Arc::clone(&h.supervisor);
        wait_until(move || !supervisor.activation_pending()).await;

        h.supervisor.request_activation(false);
        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() == 2).await;

        let events = h.launcher.events();
        let first_pid = first.pid;
        let kill_index = events
            .iter()
            .position(|e| e == &format!("kill:{first_pid}"))
            .expect("old process killed");
        let respawn_index = events
            .iter()
            .position(|e| e.starts_with("spawn:") && e != &format!("spawn:{first_pid}"))
            .expect("new process spawned");

        assert!(
            kill_index < respawn_index,
            "kill must precede the new spawn: {events:?}"
        );
    }

    #[tokio::test]
    async fn test_exit_before_marker_fails_activation_with_diagnostic() {
        let h = harness();

        h.supervisor.request_activation(false);
        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() == 1).await;
        let control = h.launcher.control(0);

        control.emit_stdout("starting platform\n");
        control.emit_stderr("org.netbeans.modules.java.lsp.server [disabled]\n");
        control.exit(1);

        let supervisor = Arc::clone(&h.supervisor);
        wait_until(move || !supervisor.activation_pending()).await;
        let editor = Arc::clone(&h.editor);
        wait_until(move || !editor.error_messages.lock().unwrap().is_empty()).await;

        // Diagnostic line was surfaced into the log
        assert!(
            h.editor
                .logged_text()
                .contains("org.netbeans.modules.java.lsp.server [disabled]")
        );

        // The error was surfaced to the user
        assert!(
            h.editor
                .error_messages
                .lock()
                .unwrap()
                .iter()
                .any(|m| m.contains("Error initializing"))
        );

        assert_eq!(h.supervisor.phase().await, Phase::Closed);

        // A later trigger can retry
        h.supervisor.request_activation(false);
        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() == 2).await;
    }

    #[tokio::test]
    async fn test_maintenance_defers_exactly_one_activation() {
        let h = harness();

        h.supervisor.begin_maintenance().await;

        // The install subprocess is the first launch
        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() == 1).await;
        let install = h.launcher.control(0);
        assert_eq!(install.extra_args, INSTALL_ARGS.to_vec());

        // Triggers during the maintenance window are chained, not run
        for _ in 0..3 {
            h.supervisor.request_activation(false);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.launcher.spawn_count(), 1, "no activation during install");

        // Delayed restarts are no-ops while the gate is open
        h.supervisor.schedule_restart(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.launcher.spawn_count(), 1);

        // Install termination resolves the gate and releases exactly one
        // activation
        install.emit_stdout("installed nbjavac\n");
        install.exit(0);

        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() == 2).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.launcher.spawn_count(), 2, "exactly one post-gate spawn");

        let events = h.launcher.events();
        let install_exit = events
            .iter()
            .position(|e| e == &format!("exit:{}", install.pid))
            .unwrap();
        let server_spawn = events
            .iter()
            .rposition(|e| e.starts_with("spawn:"))
            .unwrap();
        assert!(
            install_exit < server_spawn,
            "activation only after install termination: {events:?}"
        );
    }

    #[tokio::test]
    async fn test_maintenance_without_chained_trigger_still_activates_once() {
        let h = harness();

        h.supervisor.begin_maintenance().await;
        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() == 1).await;

        h.launcher.control(0).exit(0);

        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() == 2).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.launcher.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_install_offer_declined_means_no_maintenance() {
        let h = harness();

        h.editor.push_error_reply(None);
        h.supervisor
            .check_install_missing("Cannot initialize Java support: nbjavac missing".to_string())
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.launcher.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_install_offer_accepted_runs_install() {
        let h = harness();

        h.editor.push_error_reply(Some(INSTALL_ACTION));
        h.supervisor
            .check_install_missing("Cannot initialize Java support: nbjavac missing".to_string())
            .await;

        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() == 1).await;
        assert_eq!(h.launcher.control(0).extra_args, INSTALL_ARGS.to_vec());
    }

    #[tokio::test]
    async fn test_unrelated_error_status_does_not_offer_install() {
        let h = harness();

        h.supervisor
            .check_install_missing("Out of memory".to_string())
            .await;

        assert!(h.editor.error_messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_activation_reaches_ready() {
        let h = harness();
        let _connection = activate_to_ready(&h).await;

        assert!(h.supervisor.client().await.is_some());
        assert!(!h.supervisor.activation_pending());
    }

    #[tokio::test]
    async fn test_debug_port_published_from_stdout() {
        let h = harness();

        h.supervisor.request_activation(false);
        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() == 1).await;
        let control = h.launcher.control(0);

        control.emit_stdout("Debug Server Adapter listening at port 45454\n");

        let mut port = h.supervisor.debug_port_watch();
        tokio::time::timeout(Duration::from_secs(2), port.wait_for(|p| p.is_some()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*h.supervisor.debug_port_watch().borrow(), Some(45454));
    }

    #[tokio::test]
    async fn test_connection_close_schedules_restart() {
        let h = harness();
        let connection = activate_to_ready(&h).await;

        // Peer drops the socket: unexpected close
        drop(connection);

        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() == 2).await;

        let supervisor = Arc::clone(&h.supervisor);
        wait_until(move || supervisor.activation_pending()).await;
    }

    #[tokio::test]
    async fn test_shutdown_kills_server_without_restart() {
        let h = harness();
        let mut connection = activate_to_ready(&h).await;

        // Answer the graceful shutdown request on the server side
        let responder = tokio::spawn(async move {
            while let Ok(raw) = connection.receive().await {
                if let Ok(request) = serde_json::from_str::<JsonRpcRequest>(&raw) {
                    if request.method == "shutdown" {
                        let response =
                            JsonRpcResponse::success(request.id, serde_json::Value::Null);
                        let _ = connection
                            .send(&serde_json::to_string(&response).unwrap())
                            .await;
                    }
                }
            }
        });

        h.supervisor.shutdown().await;
        responder.abort();

        assert_eq!(h.supervisor.phase().await, Phase::Closed);
        assert!(h.launcher.control(h.launcher.spawn_count() - 1).was_killed());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.launcher.spawn_count(), 1, "no restart after shutdown");
        assert!(!*h.supervisor.ready_watch().borrow());
    }

    #[tokio::test]
    async fn test_update_jdk_unchanged_is_a_noop() {
        let h = harness();

        h.supervisor.update_jdk(None).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.launcher.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_update_jdk_change_triggers_activation() {
        let h = harness();

        h.supervisor
            .update_jdk(Some(PathBuf::from("/opt/jdk-21")))
            .await;

        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() == 1).await;
    }

    #[tokio::test]
    async fn test_update_clusters_change_triggers_activation() {
        let h = harness();

        h.supervisor
            .update_clusters(vec![PathBuf::from("/ext/a/nbcode/java")])
            .await;

        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.spawn_count() == 1).await;
    }
}
