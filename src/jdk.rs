//! JDK discovery
//!
//! The server runs on a JDK that the user may configure in several places.
//! Candidates are checked in priority order: the `netbeans.jdkhome` setting,
//! the `java.home` setting, then the `JDK_HOME` and `JAVA_HOME` environment
//! variables. A tracker compares consecutive discoveries so a configuration
//! change can trigger a server restart.

use std::path::PathBuf;

use crate::editor::SettingsProvider;

/// Primary setting consulted for the JDK location
pub const JDKHOME_SETTING: &str = "netbeans.jdkhome";

/// Secondary setting, shared with other Java tooling
pub const JAVA_HOME_SETTING: &str = "java.home";

/// Environment variables consulted after the settings, in order
const JDK_ENV_VARS: [&str; 2] = ["JDK_HOME", "JAVA_HOME"];

/// Discover the JDK to launch the server with, or `None` for the system default
pub fn find_jdk(settings: &dyn SettingsProvider) -> Option<PathBuf> {
    find_jdk_with_env(settings, |name| std::env::var(name).ok())
}

fn find_jdk_with_env<E>(settings: &dyn SettingsProvider, env: E) -> Option<PathBuf>
where
    E: Fn(&str) -> Option<String>,
{
    let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());

    non_empty(settings.get(JDKHOME_SETTING))
        .or_else(|| non_empty(settings.get(JAVA_HOME_SETTING)))
        .or_else(|| JDK_ENV_VARS.iter().find_map(|name| non_empty(env(name))))
        .map(PathBuf::from)
}

/// Tracks the effective JDK across configuration changes
#[derive(Debug)]
pub struct JdkTracker {
    current: Option<PathBuf>,
}

impl JdkTracker {
    /// Run an initial discovery
    pub fn new(settings: &dyn SettingsProvider) -> Self {
        Self {
            current: find_jdk(settings),
        }
    }

    /// The JDK found by the most recent discovery
    pub fn current(&self) -> Option<&PathBuf> {
        self.current.as_ref()
    }

    /// Re-run discovery after a configuration change. Returns `true` when the
    /// effective JDK changed, in which case the caller should restart.
    pub fn refresh(&mut self, settings: &dyn SettingsProvider) -> bool {
        let next = find_jdk(settings);
        if next != self.current {
            self.current = next;
            true
        } else {
            false
        }
    }
}
