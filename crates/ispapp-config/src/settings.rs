//! Typed views over the `ispapp` package.
//!
//! The agent keeps its identity, credentials and tunables in
//! `/etc/config/ispapp`. Every key has a documented default so a partially
//! written file never stops the agent.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::{ConfigError, ConfigStore};

// ── Names ───────────────────────────────────────────────────────────

pub const PACKAGE: &str = "ispapp";
pub const SETTINGS_TYPE: &str = "settings";
/// First `settings` section, whatever it is named.
pub const SETTINGS: &str = "@settings[0]";
pub const OVERVIEW_TYPE: &str = "overview";
pub const OVERVIEW: &str = "@overview[0]";

/// Placeholder identity shipped in firmware images; replaced on first start.
pub const ZERO_LOGIN: &str = "00000000-0000-0000-0000-000000000000";

pub mod keys {
    pub const ENABLED: &str = "enabled";
    pub const LOGIN: &str = "login";
    pub const KEY: &str = "Key";
    pub const DOMAIN: &str = "Domain";
    pub const LISTENER_PORT: &str = "ListenerPort";
    pub const ACCESS_TOKEN: &str = "accessToken";
    pub const REFRESH_TOKEN: &str = "refreshToken";
    pub const UPDATE_INTERVAL: &str = "updateInterval";
    pub const IPERF_SERVER: &str = "IperfServer";
    pub const PING_TARGETS: &str = "pingTargets";
    pub const CONNECTED: &str = "connected";
    pub const SEQUENCE_NUMBER: &str = "sequenceNumber";
    pub const LAST_CONFIG_REQUEST: &str = "lastConfigRequest";

    pub const HIGH_REFRESH: &str = "highrefresh";
    pub const REFRESH_INTERVAL: &str = "refreshInterval";

    /// Keys whose values never leave the device.
    pub const SECRETS: [&str; 3] = [KEY, ACCESS_TOKEN, REFRESH_TOKEN];
}

pub const DEFAULT_DOMAIN: &str = "prv.cloud.ispapp.co";
pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_UPDATE_INTERVAL_MINS: u64 = 1;
pub const DEFAULT_PING_TARGETS: [&str; 5] = [
    "cloud.ispapp.co",
    "aws-eu-west-2-ping.ispapp.co",
    "aws-sa-east-1-ping.ispapp.co",
    "aws-us-east-1-ping.ispapp.co",
    "aws-us-west-1-ping.ispapp.co",
];

// ── Settings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub enabled: bool,
    pub login: String,
    pub domain: String,
    pub listener_port: u16,
    pub update_interval: Duration,
    pub iperf_server: Option<String>,
    pub ping_targets: Vec<String>,
    pub connected: bool,
    pub overview: Overview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overview {
    pub enabled: bool,
    pub high_refresh: bool,
    pub refresh_interval: u32,
}

impl Default for Overview {
    fn default() -> Self {
        Self {
            enabled: true,
            high_refresh: false,
            refresh_interval: 0,
        }
    }
}

impl Settings {
    /// Read settings, substituting the default for every absent or
    /// unparseable key.
    pub fn from_store(store: &ConfigStore) -> Self {
        let get = |key: &str| store.get_first(PACKAGE, SETTINGS, key);
        let get_ov = |key: &str| store.get_first(PACKAGE, OVERVIEW, key);

        let update_mins = get(keys::UPDATE_INTERVAL)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&m| m > 0)
            .unwrap_or(DEFAULT_UPDATE_INTERVAL_MINS);

        let ping_targets = store
            .get(PACKAGE, SETTINGS, keys::PING_TARGETS)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_PING_TARGETS.map(str::to_owned).to_vec());

        Self {
            enabled: get(keys::ENABLED).is_none_or(|v| parse_bool(&v)),
            login: get(keys::LOGIN).unwrap_or_else(|| ZERO_LOGIN.to_owned()),
            domain: get(keys::DOMAIN)
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DOMAIN.to_owned()),
            listener_port: get(keys::LISTENER_PORT)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_PORT),
            update_interval: Duration::from_secs(update_mins * 60),
            iperf_server: get(keys::IPERF_SERVER).filter(|s| !s.trim().is_empty()),
            ping_targets,
            connected: get(keys::CONNECTED).is_some_and(|v| parse_bool(&v)),
            overview: Overview {
                enabled: get_ov(keys::ENABLED).is_none_or(|v| parse_bool(&v)),
                high_refresh: get_ov(keys::HIGH_REFRESH).is_some_and(|v| parse_bool(&v)),
                refresh_interval: get_ov(keys::REFRESH_INTERVAL)
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0),
            },
        }
    }

    /// `true` once a real identity has replaced the placeholder.
    pub fn has_identity(&self) -> bool {
        !self.login.is_empty() && self.login != ZERO_LOGIN
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

// ── Credentials ─────────────────────────────────────────────────────

/// Device credentials as persisted. Empty tokens mean "not yet issued".
#[derive(Debug, Clone)]
pub struct StoredCredentials {
    pub login: String,
    pub key: SecretString,
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

impl StoredCredentials {
    pub fn load(store: &ConfigStore) -> Self {
        let secret = |key: &str| {
            SecretString::from(store.get_first(PACKAGE, SETTINGS, key).unwrap_or_default())
        };
        Self {
            login: store
                .get_first(PACKAGE, SETTINGS, keys::LOGIN)
                .unwrap_or_else(|| ZERO_LOGIN.to_owned()),
            key: secret(keys::KEY),
            access_token: secret(keys::ACCESS_TOKEN),
            refresh_token: secret(keys::REFRESH_TOKEN),
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.expose_secret().is_empty()
    }
}

// ── Mutators ────────────────────────────────────────────────────────

/// Make sure the `ispapp` package has every section and key the agent
/// needs, generating a device identity if none exists, and commit.
///
/// Returns `true` when anything had to be written.
pub fn ensure_defaults(store: &ConfigStore) -> Result<bool, ConfigError> {
    store.ensure_loaded(PACKAGE)?;

    if store.section(PACKAGE, SETTINGS).is_none() {
        store.add_section(PACKAGE, SETTINGS_TYPE, SETTINGS_TYPE)?;
    }
    if store.section(PACKAGE, OVERVIEW).is_none() {
        store.add_section(PACKAGE, OVERVIEW_TYPE, OVERVIEW_TYPE)?;
    }

    let login = store.get_first(PACKAGE, SETTINGS, keys::LOGIN).unwrap_or_default();
    if login.trim().is_empty() || login == ZERO_LOGIN {
        let generated = uuid::Uuid::new_v4().to_string();
        info!(login = %generated, "generated device identity");
        store.set(PACKAGE, SETTINGS, keys::LOGIN, [generated]);
    }

    let port = DEFAULT_PORT.to_string();
    let interval = DEFAULT_UPDATE_INTERVAL_MINS.to_string();
    let defaults: [(&str, &str); 9] = [
        (keys::ENABLED, "1"),
        (keys::DOMAIN, DEFAULT_DOMAIN),
        (keys::LISTENER_PORT, port.as_str()),
        (keys::KEY, ""),
        (keys::ACCESS_TOKEN, ""),
        (keys::REFRESH_TOKEN, ""),
        (keys::UPDATE_INTERVAL, interval.as_str()),
        (keys::IPERF_SERVER, ""),
        (keys::CONNECTED, "0"),
    ];
    for (key, value) in defaults {
        if store.get_value(PACKAGE, SETTINGS, key).is_none() {
            store.set(PACKAGE, SETTINGS, key, [value]);
        }
    }
    if store.get_value(PACKAGE, SETTINGS, keys::PING_TARGETS).is_none() {
        for target in DEFAULT_PING_TARGETS {
            store.add_list(PACKAGE, SETTINGS, keys::PING_TARGETS, target);
        }
    }

    for (key, value) in [
        (keys::ENABLED, "1"),
        (keys::HIGH_REFRESH, "0"),
        (keys::REFRESH_INTERVAL, "0"),
    ] {
        if store.get_value(PACKAGE, OVERVIEW, key).is_none() {
            store.set(PACKAGE, OVERVIEW, key, [value]);
        }
    }

    let changed = store.changes().iter().any(|c| c == PACKAGE);
    if changed {
        store.commit()?;
    }
    Ok(changed)
}

/// Store a freshly issued token pair and commit.
pub fn update_tokens(
    store: &ConfigStore,
    access_token: &SecretString,
    refresh_token: &SecretString,
) -> Result<(), ConfigError> {
    store.ensure_loaded(PACKAGE)?;
    if store.section(PACKAGE, SETTINGS).is_none() {
        store.add_section(PACKAGE, SETTINGS_TYPE, SETTINGS_TYPE)?;
    }
    store.set(PACKAGE, SETTINGS, keys::ACCESS_TOKEN, [access_token.expose_secret()]);
    store.set(PACKAGE, SETTINGS, keys::REFRESH_TOKEN, [refresh_token.expose_secret()]);
    store.commit()
}

/// Record whether the session is currently connected. Only commits on change.
pub fn set_connected(store: &ConfigStore, connected: bool) -> Result<(), ConfigError> {
    let value = if connected { "1" } else { "0" };
    if store.get_first(PACKAGE, SETTINGS, keys::CONNECTED).as_deref() == Some(value) {
        return Ok(());
    }
    if store.section(PACKAGE, SETTINGS).is_none() {
        return Ok(());
    }
    store.set(PACKAGE, SETTINGS, keys::CONNECTED, [value]);
    store.commit()
}
