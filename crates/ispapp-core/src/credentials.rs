// ── Store-backed credential source ──
//
// Bridges the session's `CredentialSource` to the `ispapp` config package.
// Reads happen per connection attempt, so edits pushed through the `config`
// handler apply on the next reconnect.

use std::sync::Arc;

use ispapp_api::{CredentialSource, Credentials, Endpoint, Error, TokenPair};
use ispapp_config::{ConfigStore, Settings, StoredCredentials};
use tracing::warn;

pub struct StoreCredentials {
    store: Arc<ConfigStore>,
}

impl StoreCredentials {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }
}

impl CredentialSource for StoreCredentials {
    fn endpoint(&self) -> Result<Endpoint, Error> {
        let settings = Settings::from_store(&self.store);
        if !settings.enabled {
            return Err(Error::Credentials("agent is disabled in settings".into()));
        }
        Ok(Endpoint {
            host: settings.domain,
            port: settings.listener_port,
        })
    }

    fn credentials(&self) -> Result<Credentials, Error> {
        let settings = Settings::from_store(&self.store);
        if !settings.has_identity() {
            return Err(Error::Credentials("device login is not set".into()));
        }
        let stored = StoredCredentials::load(&self.store);
        Ok(Credentials {
            login: stored.login,
            key: stored.key,
            access_token: stored.access_token,
            refresh_token: stored.refresh_token,
        })
    }

    fn store_tokens(&self, tokens: &TokenPair) -> Result<(), Error> {
        ispapp_config::update_tokens(&self.store, &tokens.access_token, &tokens.refresh_token)
            .map_err(|e| Error::Credentials(format!("failed to persist tokens: {e}")))
    }

    fn connection_changed(&self, connected: bool) {
        if let Err(e) = ispapp_config::set_connected(&self.store, connected) {
            warn!(error = %e, connected, "failed to record connection state");
        }
    }
}
