// ── Update poller ──
//
// Degraded fallback for the push session: while the session is not
// connected, poll `GET /update` every `updateInterval`, drain the
// `/terminal` command queue and act on the update instructions. While the
// session is up, ticks are skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ispapp_api::{
    CommandResult, ControlPlaneClient, Endpoint, Error as ApiError, QueuedCommand,
    SessionConfig, SessionState, UpdateInstructions,
};
use ispapp_config::settings::{PACKAGE, SETTINGS, keys};
use ispapp_config::{Settings, StoredCredentials};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::AgentContext;
use crate::error::ModuleError;
use crate::handlers::run_speedtest;
use crate::module::Module;

/// Poll interval while the control plane asks for fast updates.
pub const FAST_INTERVAL: Duration = Duration::from_secs(5);
const REBOOT_DELAY: Duration = Duration::from_secs(3);
const FW_UPGRADE: &str = "upgrade";
const SHELL: &str = "/bin/sh";

pub struct UpdatePollerModule {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    ctx: AgentContext,
    config: SessionConfig,
    http: reqwest::Client,
    session: watch::Receiver<SessionState>,
    fast: AtomicBool,
}

impl UpdatePollerModule {
    /// `config` supplies the transport settings and URL scheme shared with
    /// the session; `session` gates polling.
    pub fn new(
        ctx: AgentContext,
        config: SessionConfig,
        session: watch::Receiver<SessionState>,
    ) -> Result<Self, ModuleError> {
        let http = config.transport.build_client()?;
        Ok(Self {
            inner: Arc::new(PollerInner {
                ctx,
                config,
                http,
                session,
                fast: AtomicBool::new(false),
            }),
        })
    }

    /// Fetch instructions once and act on them.
    pub async fn poll_once(&self) -> Result<UpdateInstructions, ModuleError> {
        self.inner.poll_once().await
    }

    /// Wait before the next poll.
    pub fn interval(&self) -> Duration {
        self.inner.interval()
    }
}

#[async_trait]
impl Module for UpdatePollerModule {
    fn name(&self) -> &str {
        "update-poller"
    }

    async fn start(&self, cancel: CancellationToken) -> Result<Option<JoinHandle<()>>, ModuleError> {
        let inner = Arc::clone(&self.inner);
        Ok(Some(tokio::spawn(inner.run(cancel))))
    }
}

impl PollerInner {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let wait = self.interval();
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }

            if *self.session.borrow() == SessionState::Connected {
                debug!("session connected, skipping update poll");
                continue;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.poll_once() => {
                    match result {
                        Ok(_) => {}
                        Err(ModuleError::Api(e)) if e.is_transient() => {
                            debug!(error = %e, "update poll failed, will retry");
                        }
                        Err(e) => warn!(error = %e, "update poll failed"),
                    }
                }
            }
        }
        debug!("update poller exited");
    }

    fn interval(&self) -> Duration {
        if self.fast.load(Ordering::Relaxed) {
            FAST_INTERVAL
        } else {
            Settings::from_store(&self.ctx.store).update_interval
        }
    }

    async fn poll_once(&self) -> Result<UpdateInstructions, ModuleError> {
        let settings = Settings::from_store(&self.ctx.store);
        let endpoint = Endpoint {
            host: settings.domain,
            port: settings.listener_port,
        };
        let client =
            ControlPlaneClient::from_reqwest(&self.config.api_base(&endpoint), self.http.clone())?;

        let token = StoredCredentials::load(&self.ctx.store).access_token;
        if token.expose_secret().is_empty() {
            return Err(ApiError::Credentials("no access token issued yet".into()).into());
        }

        let update = client.check_update(&token).await?;
        debug!(?update, "update instructions");
        if let Err(e) = self.drain_terminal(&client, &token).await {
            warn!(error = %e, "terminal queue not processed");
        }
        self.apply(&update, &client, &token).await;
        Ok(update)
    }

    async fn apply(&self, update: &UpdateInstructions, client: &ControlPlaneClient, token: &SecretString) {
        if self.fast.swap(update.update_fast, Ordering::Relaxed) != update.update_fast {
            info!(fast = update.update_fast, "update interval mode changed");
        }

        if update.fw_status.as_deref() == Some(FW_UPGRADE) {
            info!("firmware upgrade requested");
        }

        if update.execute_speedtest {
            if let Err(e) = self.speedtest(client, token).await {
                warn!(error = %e, "requested speed test failed");
            }
        }

        if update.reboot {
            info!(delay_secs = REBOOT_DELAY.as_secs(), "reboot requested by control plane");
            tokio::time::sleep(REBOOT_DELAY).await;
            if let Err(e) = self.ctx.commands.run("reboot", &[]).await {
                warn!(error = %e, "reboot failed");
            }
        }
    }

    async fn speedtest(&self, client: &ControlPlaneClient, token: &SecretString) -> Result<(), ModuleError> {
        let result = run_speedtest(&self.ctx).await?;
        let assigned = client.report_bandwidth(token, &result.to_report()).await?;

        if let Some(server) = assigned.filter(|s| !s.trim().is_empty() && *s != result.server) {
            info!(server = %server, "control plane assigned a new iperf server");
            let store = &self.ctx.store;
            store.set(PACKAGE, SETTINGS, keys::IPERF_SERVER, [server]);
            store.commit()?;
        }
        Ok(())
    }

    /// Run every queued shell command in order and post the results back.
    async fn drain_terminal(&self, client: &ControlPlaneClient, token: &SecretString) -> Result<(), ModuleError> {
        let queue = client.terminal_queue(token).await?;
        if queue.is_empty() {
            debug!("terminal queue empty");
            return Ok(());
        }

        let mut results = Vec::with_capacity(queue.len());
        for QueuedCommand { id, cmd } in queue {
            info!(%id, command = %cmd, "running queued command");
            let args = ["-c".to_owned(), cmd.clone()];
            let (stdout, stderr) = match self.ctx.commands.run(SHELL, &args).await {
                Ok(out) if out.success() => (out.stdout, out.stderr),
                Ok(out) => {
                    let stderr = match (out.stderr.is_empty(), out.exit_code) {
                        (false, _) => out.stderr,
                        (true, Some(code)) => format!("exit status {code}"),
                        (true, None) => "terminated by signal".to_owned(),
                    };
                    warn!(%id, %stderr, "queued command failed");
                    (out.stdout, stderr)
                }
                Err(e) => {
                    warn!(%id, error = %e, "queued command failed");
                    (String::new(), e.to_string())
                }
            };
            results.push(CommandResult {
                id,
                cmd,
                timestamp: chrono::Utc::now().timestamp(),
                stdout,
                stderr,
                executed: true,
            });
        }

        client.report_terminal(token, &results).await?;
        info!(count = results.len(), "queued commands executed");
        Ok(())
    }
}
