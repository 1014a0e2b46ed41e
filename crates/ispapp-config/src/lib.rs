//! Device configuration for the ISPApp agent.
//!
//! - **[`ConfigStore`]**: transactional key/value + list persistence over
//!   the UCI text format (`config` / `option` / `list`). Mutations stay
//!   pending until [`commit()`](ConfigStore::commit), which replaces each
//!   changed file atomically; [`revert()`](ConfigStore::revert) restores the
//!   last committed state.
//!
//! - **[`Package`] / [`Section`]**: the parsed in-memory form of one config
//!   file, with strict line-numbered parse errors.
//!
//! - **[`Settings`] / [`StoredCredentials`]**: typed views over the `ispapp`
//!   package, with documented defaults for every missing key.
//!
//! - **[`AgentOptions`]**: process runtime tuning layered through figment
//!   (defaults, optional TOML file, `ISPAPP_*` environment).

pub mod options;
pub mod settings;
pub mod store;
pub mod uci;

use std::path::PathBuf;

use thiserror::Error;

pub use options::AgentOptions;
pub use settings::{Settings, StoredCredentials, ensure_defaults, set_connected, update_tokens};
pub use store::ConfigStore;
pub use uci::{OptionValue, Package, ParseError, Section};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config '{config}': {source}")]
    Parse {
        config: String,
        #[source]
        source: ParseError,
    },

    #[error("invalid config name '{0}'")]
    InvalidName(String),

    #[error("section '{section}' already exists in config '{config}'")]
    AlreadyExists { config: String, section: String },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Commit could not write the backing file. The pending changes are
    /// kept so the next commit retries them.
    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("option loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}
