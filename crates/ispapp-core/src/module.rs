use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ModuleError;

/// A long-running subsystem with a uniform start/stop lifecycle.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Bring the module up.
    ///
    /// Long-running work is spawned and its handle returned; that task must
    /// finish once `cancel` fires. Modules with nothing to run in the
    /// background return `None`. An `Err` marks only this module as failed.
    async fn start(&self, cancel: CancellationToken) -> Result<Option<JoinHandle<()>>, ModuleError>;

    /// Called after cancellation has been broadcast, before the supervisor
    /// waits for the module's task.
    async fn stop(&self) -> Result<(), ModuleError> {
        Ok(())
    }
}
