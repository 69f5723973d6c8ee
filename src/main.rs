use async_trait::async_trait;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use nbls_bridge::clusters::find_clusters;
use nbls_bridge::editor::{EditorUi, SettingsProvider};
use nbls_bridge::io::NbLauncher;
use nbls_bridge::jdk::find_jdk;
use nbls_bridge::logging::{LogConfig, init_logging};
use nbls_bridge::lsp::protocol::{InputBoxParams, QuickPickItem, QuickPickParams};
use nbls_bridge::{LaunchConfigBuilder, Supervisor};

/// CLI arguments for the standalone bridge runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the nbcode launcher binary
    #[arg(long, value_name = "PATH")]
    server_path: PathBuf,

    /// Storage directory for the server's userdir (defaults to
    /// .nbls-bridge under the current directory)
    #[arg(long, value_name = "DIR")]
    storage_dir: Option<PathBuf>,

    /// JDK to run the server on (overrides JDK_HOME/JAVA_HOME discovery)
    #[arg(long, value_name = "PATH")]
    jdkhome: Option<PathBuf>,

    /// Additional cluster directory (repeatable)
    #[arg(long = "cluster", value_name = "DIR")]
    clusters: Vec<PathBuf>,

    /// Extension installation directory to scan for clusters (repeatable)
    #[arg(long = "extension-root", value_name = "DIR")]
    extension_roots: Vec<PathBuf>,

    /// Pass the console-logger flag to the server
    #[arg(long)]
    verbose: bool,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides NBLS_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

/// Settings source for the standalone runner: nothing is configured, so JDK
/// discovery falls through to the environment variables
struct NoSettings;

impl SettingsProvider for NoSettings {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Editor surface for the standalone runner: server output goes to stdout,
/// prompts are declined
struct ConsoleEditor;

#[async_trait]
impl EditorUi for ConsoleEditor {
    fn set_status_message(&self, text: &str, _timeout_ms: u64) {
        info!("status: {}", text);
    }

    fn show_info_message(&self, text: &str) {
        info!("{}", text);
    }

    fn show_warning_message(&self, text: &str) {
        warn!("{}", text);
    }

    async fn show_error_message(&self, text: &str, _actions: &[String]) -> Option<String> {
        error!("{}", text);
        None
    }

    async fn show_quick_pick(&self, _params: QuickPickParams) -> Option<Vec<QuickPickItem>> {
        None
    }

    async fn show_input_box(&self, _params: InputBoxParams) -> Option<String> {
        None
    }

    fn append_log(&self, text: &str) {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_config = LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let storage_dir = args.storage_dir.unwrap_or_else(|| {
        std::env::current_dir()
            .unwrap_or_else(|e| {
                eprintln!("Failed to get current directory: {e}");
                std::process::exit(1);
            })
            .join(".nbls-bridge")
    });

    // Clusters: explicit ones plus whatever the extension roots contribute
    let mut clusters = args.clusters.clone();
    clusters.extend(find_clusters(&args.extension_roots, &storage_dir));
    clusters.sort();
    clusters.dedup();

    let jdk_home = args.jdkhome.clone().or_else(|| find_jdk(&NoSettings));
    match &jdk_home {
        Some(jdk) => info!("Using JDK at {}", jdk.display()),
        None => info!("Using default system JDK"),
    }

    let config = match LaunchConfigBuilder::new()
        .server_path(&args.server_path)
        .storage_dir(&storage_dir)
        .clusters(clusters)
        .jdk_home(jdk_home)
        .verbose(args.verbose)
        .build()
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid launch configuration: {e}");
            std::process::exit(1);
        }
    };

    info!(
        "Supervising {} with storage at {}",
        args.server_path.display(),
        storage_dir.display()
    );

    let supervisor = Supervisor::new(config, Arc::new(NbLauncher), Arc::new(ConsoleEditor));
    supervisor.request_activation(false);

    // Report readiness transitions in the background
    {
        let mut ready = supervisor.ready_watch();
        tokio::spawn(async move {
            while ready.changed().await.is_ok() {
                if *ready.borrow() {
                    info!("Language server ready");
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");
    supervisor.shutdown().await;

    Ok(())
}
