use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::AgentContext;
use crate::error::ModuleError;
use crate::module::Module;
use crate::probe::DeviceInfo;

/// Logs what the agent is running on. Nothing to keep running.
pub struct SystemModule {
    ctx: AgentContext,
}

impl SystemModule {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Module for SystemModule {
    fn name(&self) -> &str {
        "system"
    }

    async fn start(&self, _cancel: CancellationToken) -> Result<Option<JoinHandle<()>>, ModuleError> {
        let info = DeviceInfo::collect(self.ctx.files.as_ref()).await;
        info!(device = %info.summary(), uptime_secs = ?info.uptime_secs, "device probed");
        debug!(?info, "device details");
        Ok(None)
    }
}
