// ── Agent context ──
//
// Explicit, cloneable bundle of the collaborators every handler and module
// shares. Built once by the binary and injected; there are no globals.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use ispapp_api::SessionState;
use ispapp_config::ConfigStore;
use tokio::sync::watch;

use crate::capability::{CommandRunner, FileReader};

pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AgentContext {
    pub store: Arc<ConfigStore>,
    pub commands: Arc<dyn CommandRunner>,
    pub files: Arc<dyn FileReader>,
    started: Instant,
    session_state: Arc<OnceLock<watch::Receiver<SessionState>>>,
}

impl AgentContext {
    pub fn new(
        store: Arc<ConfigStore>,
        commands: Arc<dyn CommandRunner>,
        files: Arc<dyn FileReader>,
    ) -> Self {
        Self {
            store,
            commands,
            files,
            started: Instant::now(),
            session_state: Arc::new(OnceLock::new()),
        }
    }

    /// Wire in the session's state feed. The session is built after the
    /// registry, so this happens once the client exists. Later calls are
    /// ignored.
    pub fn attach_session(&self, state: watch::Receiver<SessionState>) {
        let _ = self.session_state.set(state);
    }

    /// Current session state; `Disconnected` before a session is attached.
    pub fn session_state(&self) -> SessionState {
        self.session_state
            .get()
            .map_or(SessionState::Disconnected, |rx| rx.borrow().clone())
    }

    pub fn agent_uptime(&self) -> Duration {
        self.started.elapsed()
    }
}
