// ── Supervisor ──
//
// Owns every module's lifecycle. Start is best-effort: a module that fails
// to start is recorded and skipped. Stop is two-phase: broadcast
// cancellation, then wait for module tasks up to a hard deadline. Tasks
// still running at the deadline are reported, not aborted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::SupervisorError;
use crate::module::Module;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ModuleState {
    Idle,
    Running,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleStatus {
    pub name: String,
    pub state: ModuleState,
}

struct Slot {
    module: Arc<dyn Module>,
    state: ModuleState,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Inner {
    slots: Vec<Slot>,
    cancel: Option<CancellationToken>,
}

#[derive(Default)]
pub struct Supervisor {
    inner: Mutex<Inner>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. Modules start in registration order.
    pub async fn register(&self, module: Arc<dyn Module>) {
        self.inner.lock().await.slots.push(Slot {
            module,
            state: ModuleState::Idle,
            task: None,
        });
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.cancel.is_some()
    }

    /// Start every registered module.
    ///
    /// Fails only when nothing could be started; individual failures are
    /// logged and visible through [`status`](Self::status).
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let mut inner = self.inner.lock().await;
        if inner.cancel.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }
        if inner.slots.is_empty() {
            return Err(SupervisorError::NoModules);
        }

        let cancel = CancellationToken::new();
        let mut started = 0usize;
        for slot in &mut inner.slots {
            let name = slot.module.name().to_owned();
            match slot.module.start(cancel.child_token()).await {
                Ok(task) => {
                    info!(module = %name, "module started");
                    slot.task = task;
                    slot.state = ModuleState::Running;
                    started += 1;
                }
                Err(e) => {
                    error!(module = %name, error = %e, "module failed to start");
                    slot.task = None;
                    slot.state = ModuleState::Failed;
                }
            }
        }

        if started == 0 {
            cancel.cancel();
            return Err(SupervisorError::AllModulesFailed {
                count: inner.slots.len(),
            });
        }

        info!(started, total = inner.slots.len(), "supervisor running");
        inner.cancel = Some(cancel);
        Ok(())
    }

    /// Cancel every module and wait up to `timeout` for them to finish.
    ///
    /// Returns [`SupervisorError::ShutdownTimeout`] naming the modules whose
    /// tasks were still running at the deadline. Those tasks are left
    /// detached.
    pub async fn stop(&self, timeout: Duration) -> Result<(), SupervisorError> {
        let deadline = Instant::now() + timeout;
        let (cancel, running) = {
            let mut inner = self.inner.lock().await;
            let cancel = inner.cancel.take().ok_or(SupervisorError::NotRunning)?;
            let running: Vec<(usize, Arc<dyn Module>, Option<JoinHandle<()>>)> = inner
                .slots
                .iter_mut()
                .enumerate()
                .filter(|(_, slot)| slot.state == ModuleState::Running)
                .map(|(idx, slot)| (idx, Arc::clone(&slot.module), slot.task.take()))
                .collect();
            (cancel, running)
        };

        // Phase 1: broadcast.
        info!(timeout_ms = timeout.as_millis(), "stopping modules");
        cancel.cancel();
        for (_, module, _) in &running {
            match tokio::time::timeout_at(deadline, module.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(module = %module.name(), error = %e, "module stop hook failed"),
                Err(_) => warn!(module = %module.name(), "module stop hook timed out"),
            }
        }

        // Phase 2: wait with a hard ceiling.
        let mut pending = Vec::new();
        let mut outcomes = Vec::with_capacity(running.len());
        for (idx, module, task) in running {
            let name = module.name().to_owned();
            let state = match task {
                None => ModuleState::Stopped,
                Some(mut task) => match tokio::time::timeout_at(deadline, &mut task).await {
                    Ok(Ok(())) => {
                        debug!(module = %name, "module stopped");
                        ModuleState::Stopped
                    }
                    Ok(Err(e)) => {
                        error!(module = %name, error = %e, "module task panicked");
                        ModuleState::Failed
                    }
                    Err(_) => {
                        warn!(module = %name, "module did not stop before the deadline");
                        pending.push(name);
                        ModuleState::Failed
                    }
                },
            };
            outcomes.push((idx, state));
        }

        let mut inner = self.inner.lock().await;
        for (idx, state) in outcomes {
            if let Some(slot) = inner.slots.get_mut(idx) {
                slot.state = state;
            }
        }
        drop(inner);

        if pending.is_empty() {
            info!("all modules stopped");
            Ok(())
        } else {
            Err(SupervisorError::ShutdownTimeout { timeout, pending })
        }
    }

    /// Lifecycle state of every registered module, in registration order.
    /// A running module whose task has already ended reports `Stopped`.
    pub async fn status(&self) -> Vec<ModuleStatus> {
        self.inner
            .lock()
            .await
            .slots
            .iter()
            .map(|slot| {
                let ended = slot.task.as_ref().is_some_and(JoinHandle::is_finished);
                let state = if slot.state == ModuleState::Running && ended {
                    ModuleState::Stopped
                } else {
                    slot.state
                };
                ModuleStatus {
                    name: slot.module.name().to_owned(),
                    state,
                }
            })
            .collect()
    }
}
