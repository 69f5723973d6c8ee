//! Editor-side supervisor and protocol bridge for the Apache NetBeans Java
//! language server
//!
//! An editor host embeds this crate to run the `nbcode` server: JDK and
//! cluster discovery, process launch and supervision with readiness
//! detection, the loopback socket channel with its LSP handshake, the custom
//! editor-facing messages (status bar, quick pick, input box, test
//! progress), and the test explorer adapter.
//!
//! The host plugs in through three traits: [`editor::EditorUi`] for prompts
//! and status surfaces, [`editor::SettingsProvider`] for configuration, and
//! [`editor::CommandBus`] for command execution. Everything else is driven
//! by the [`nbls::Supervisor`].

pub mod clusters;
pub mod editor;
pub mod io;
pub mod jdk;
pub mod logging;
pub mod lsp;
pub mod nbls;
pub mod test_adapter;

pub use nbls::{LaunchConfig, LaunchConfigBuilder, Phase, Supervisor};
