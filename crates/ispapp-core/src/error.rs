// ── Core error types ──
//
// Errors raised by handlers, modules and the supervisor. Handler errors end
// up in a Response's `error`/`stderr` fields; module and supervisor errors
// surface to the binary.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single inbound request. Never affects the connection.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("'{program}' timed out after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("key '{0}' cannot be changed remotely")]
    Forbidden(String),

    #[error(transparent)]
    Config(#[from] ispapp_config::ConfigError),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Internal(String),
}

/// Failure while starting or stopping a module.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module '{name}' failed to start: {reason}")]
    Start { name: String, reason: String },

    #[error(transparent)]
    Api(#[from] ispapp_api::Error),

    #[error(transparent)]
    Task(#[from] HandlerError),

    #[error(transparent)]
    Config(#[from] ispapp_config::ConfigError),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("supervisor is already running")]
    AlreadyRunning,

    #[error("supervisor is not running")]
    NotRunning,

    #[error("no modules registered")]
    NoModules,

    /// Every registered module failed to start. The only fatal condition.
    #[error("all {count} modules failed to start")]
    AllModulesFailed { count: usize },

    /// Cooperative shutdown did not finish in time; the named modules were
    /// still running when the deadline passed.
    #[error("shutdown exceeded {timeout:?}; still running: {}", .pending.join(", "))]
    ShutdownTimeout {
        timeout: Duration,
        pending: Vec<String>,
    },
}
