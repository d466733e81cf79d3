//! Plugin lifecycle states and the transition graph.
//!
//! The state machine:
//!
//! ```text
//! register() ──► Installed ──initialize──► Initialized ──start──► Started
//!                                                         ▲          │stop
//!                                                         │          ▼
//!                                            Failed ──────┘       Stopped ──start──► Started
//!
//! any state ──hook failure──► Failed
//! any state ──unregister───► Uninstalled (terminal)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginState {
    /// Registered, `initialize` not yet run.
    Installed,
    /// `initialize` succeeded; not running.
    Initialized,
    /// `start` succeeded; running.
    Started,
    /// `stop` succeeded after having been started.
    Stopped,
    /// A lifecycle hook failed; the plugin stays addressable for
    /// re-start or uninstall.
    Failed,
    /// Removed from the registry. Terminal.
    Uninstalled,
}

impl PluginState {
    /// Whether the transition `self → next` is allowed by the graph.
    pub fn can_transition_to(self, next: PluginState) -> bool {
        use PluginState::*;
        match (self, next) {
            // Uninstalled is terminal.
            (Uninstalled, _) => false,
            // Failure and uninstall are reachable from every live state.
            (_, Failed) | (_, Uninstalled) => true,
            (Installed, Initialized) => true,
            (Initialized, Started) => true,
            (Started, Stopped) => true,
            (Stopped, Started) => true,
            (Failed, Started) => true,
            _ => false,
        }
    }

    /// Canonical uppercase name, matching the wire encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Installed => "INSTALLED",
            Self::Initialized => "INITIALIZED",
            Self::Started => "STARTED",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
            Self::Uninstalled => "UNINSTALLED",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::PluginState::*;

    #[test]
    fn happy_path_is_allowed() {
        assert!(Installed.can_transition_to(Initialized));
        assert!(Initialized.can_transition_to(Started));
        assert!(Started.can_transition_to(Stopped));
        assert!(Stopped.can_transition_to(Started));
        assert!(Failed.can_transition_to(Started));
    }

    #[test]
    fn failure_and_uninstall_from_anywhere_live() {
        for state in [Installed, Initialized, Started, Stopped, Failed] {
            assert!(state.can_transition_to(Failed));
            assert!(state.can_transition_to(Uninstalled));
        }
    }

    #[test]
    fn forbidden_transitions() {
        assert!(!Started.can_transition_to(Initialized));
        assert!(!Installed.can_transition_to(Started));
        assert!(!Stopped.can_transition_to(Initialized));
        assert!(!Uninstalled.can_transition_to(Started));
        assert!(!Uninstalled.can_transition_to(Failed));
    }

    #[test]
    fn wire_names() {
        assert_eq!(
            serde_json::to_string(&Started).unwrap(),
            "\"STARTED\""
        );
        let back: super::PluginState = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(back, Failed);
    }
}
