//! Fatal startup errors with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use ispapp_config::ConfigError;
use ispapp_core::SupervisorError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const STARTUP: i32 = 3;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("invalid runtime options")]
    #[diagnostic(
        code(ispapp::options),
        help("Check {path} and any ISPAPP_* environment variables.")
    )]
    Options {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("device configuration in {dir} is unusable")]
    #[diagnostic(
        code(ispapp::store),
        help("Fix or remove the offending file; a missing file is recreated with defaults.")
    )]
    Store {
        dir: String,
        #[source]
        source: ConfigError,
    },

    // ── Startup ──────────────────────────────────────────────────────
    #[error("agent could not be wired up: {0}")]
    #[diagnostic(code(ispapp::setup))]
    Setup(String),

    #[error(transparent)]
    #[diagnostic(
        code(ispapp::startup),
        help("Every module failed to start; run with -vv for details.")
    )]
    Startup(#[from] SupervisorError),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Options { .. } | Self::Store { .. } => exit_code::CONFIG,
            Self::Startup(_) => exit_code::STARTUP,
            Self::Setup(_) => exit_code::GENERAL,
        }
    }
}
