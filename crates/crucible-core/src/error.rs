//! Unified error types for the Crucible runtime.
//!
//! Every subsystem surfaces errors through [`PluginError`]; the facade
//! returns them to callers unchanged. Configuration errors live in the
//! runtime crate.

use thiserror::Error;

/// Errors surfaced at the plugin-runtime boundary.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No plugin with the given id is registered.
    #[error("plugin '{id}' not found")]
    NotFound {
        /// The missing plugin id.
        id: String,
    },

    /// A plugin with the given id is already registered.
    #[error("plugin '{id}' is already registered")]
    Duplicate {
        /// The duplicate plugin id.
        id: String,
    },

    /// An argument was malformed (bad version, bad constraint, bad
    /// configuration shape).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required dependency id is absent from the resolver input.
    #[error("plugin '{plugin}' requires '{dependency}', which is not present")]
    DependencyNotFound {
        /// The plugin declaring the dependency.
        plugin: String,
        /// The missing dependency id.
        dependency: String,
    },

    /// A dependency is present but its version violates the constraint.
    #[error(
        "plugin '{plugin}' requires '{dependency}{constraint}', found version '{found}'"
    )]
    IncompatibleDependency {
        /// The plugin declaring the dependency.
        plugin: String,
        /// The dependency id.
        dependency: String,
        /// The violated constraint, in `<op><version>` form.
        constraint: String,
        /// The version actually present.
        found: String,
    },

    /// A dependency cycle was detected.
    #[error("circular dependency: {}", path.join(" -> "))]
    CircularDependency {
        /// The cycle, starting and ending at the same plugin id.
        path: Vec<String>,
    },

    /// The operation is forbidden in the plugin's current state.
    #[error("plugin '{id}': cannot {operation} while {state}")]
    StateViolation {
        /// The plugin id.
        id: String,
        /// The attempted operation.
        operation: String,
        /// The state the plugin was in.
        state: String,
    },

    /// A lifecycle hook returned an error.
    #[error("plugin '{id}': {hook} hook failed: {message}")]
    HookFailed {
        /// The plugin whose hook failed.
        id: String,
        /// The hook name (`initialize`, `start`, `stop`, `uninstall`).
        hook: &'static str,
        /// The failure message from the hook.
        message: String,
    },

    /// A lifecycle hook exceeded the configured timeout.
    #[error("plugin '{id}': {hook} hook timed out after {timeout_ms}ms")]
    Timeout {
        /// The plugin whose hook timed out.
        id: String,
        /// The hook name.
        hook: &'static str,
        /// The timeout that expired, in milliseconds.
        timeout_ms: u64,
    },

    /// The event-bus transport failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// An event could not be encoded or decoded.
    #[error("event serialization failed: {0}")]
    Serialization(String),

    /// The operation was attempted after shutdown.
    #[error("runtime is shut down")]
    Shutdown,
}

impl PluginError {
    /// Creates a not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a duplicate-id error.
    pub fn duplicate(id: impl Into<String>) -> Self {
        Self::Duplicate { id: id.into() }
    }

    /// Creates an invalid-argument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates a hook-failure error from any error value.
    pub fn hook(id: impl Into<String>, hook: &'static str, err: impl std::fmt::Display) -> Self {
        Self::HookFailed {
            id: id.into(),
            hook,
            message: err.to_string(),
        }
    }

    /// Creates a transport-failure error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

/// Result type for plugin-runtime operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Error type returned by plugin hooks themselves.
///
/// Hooks report failures as boxed errors; the registry wraps them into
/// [`PluginError::HookFailed`] with the plugin id and hook name attached.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for plugin hook implementations.
pub type HookResult = Result<(), HookError>;
