// ── Runtime options ──
//
// Process tuning that is not device state: where the store lives, logging,
// timers and queue bounds. Layered defaults → TOML file → `ISPAPP_*` env.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

pub const DEFAULT_OPTIONS_PATH: &str = "/etc/ispapp/agent.toml";
pub const ENV_PREFIX: &str = "ISPAPP_";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentOptions {
    /// Directory holding UCI config files.
    pub config_dir: PathBuf,
    /// Default tracing filter when neither `RUST_LOG` nor `-v` is given.
    pub log_level: String,
    pub shutdown_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub read_deadline_secs: u64,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_multiplier: f64,
    pub reconnect_max_secs: u64,
    pub ws_path: String,
    /// Accept self-signed control-plane certificates. Lab use only.
    pub insecure_tls: bool,
    /// PEM bundle to trust instead of the built-in web PKI roots.
    pub ca_cert: Option<PathBuf>,
    pub outbox_capacity: usize,
    pub max_concurrent_handlers: usize,
    pub command_timeout_secs: u64,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/config"),
            log_level: "warn".into(),
            shutdown_timeout_secs: 15,
            heartbeat_interval_secs: 30,
            read_deadline_secs: 60,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            reconnect_initial_ms: 5_000,
            reconnect_multiplier: 1.5,
            reconnect_max_secs: 300,
            ws_path: "/agent/ws".into(),
            insecure_tls: false,
            ca_cert: None,
            outbox_capacity: 256,
            max_concurrent_handlers: 16,
            command_timeout_secs: 60,
        }
    }
}

impl AgentOptions {
    /// Layered figment for `path` (a missing file is skipped).
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let options: Self = figment.extract()?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| {
            Err(ConfigError::Validation {
                field: field.into(),
                reason: reason.into(),
            })
        };

        if self.heartbeat_interval_secs == 0 {
            return invalid("heartbeat_interval_secs", "must be positive");
        }
        if self.read_deadline_secs <= self.heartbeat_interval_secs {
            return invalid(
                "read_deadline_secs",
                "must exceed heartbeat_interval_secs so a pong can arrive",
            );
        }
        if self.reconnect_initial_ms == 0 {
            return invalid("reconnect_initial_ms", "must be positive");
        }
        if !self.reconnect_multiplier.is_finite() || self.reconnect_multiplier < 1.0 {
            return invalid("reconnect_multiplier", "must be a finite number >= 1.0");
        }
        if Duration::from_secs(self.reconnect_max_secs) < self.reconnect_initial() {
            return invalid("reconnect_max_secs", "must not be below reconnect_initial_ms");
        }
        if self.outbox_capacity == 0 {
            return invalid("outbox_capacity", "must be positive");
        }
        if self.max_concurrent_handlers == 0 {
            return invalid("max_concurrent_handlers", "must be positive");
        }
        if !self.ws_path.starts_with('/') {
            return invalid("ws_path", "must start with '/'");
        }
        Ok(())
    }

    // ── Durations ────────────────────────────────────────────────────

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.read_deadline_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
