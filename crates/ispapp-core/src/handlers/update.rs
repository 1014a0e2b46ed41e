use async_trait::async_trait;
use ispapp_api::Envelope;
use serde_json::json;

use crate::context::{AGENT_VERSION, AgentContext};
use crate::error::HandlerError;
use crate::probe::DeviceInfo;
use crate::registry::{Handler, Reply};

/// `getupdate`: agent version, uptimes, session state and device facts.
pub struct GetUpdateHandler {
    ctx: AgentContext,
}

impl GetUpdateHandler {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Handler for GetUpdateHandler {
    async fn handle(&self, _request: &Envelope) -> Result<Reply, HandlerError> {
        let device = DeviceInfo::collect(self.ctx.files.as_ref()).await;
        Ok(Reply::data(json!({
            "version": AGENT_VERSION,
            "agentUptime": self.ctx.agent_uptime().as_secs(),
            "uptime": device.uptime_secs,
            "session": self.ctx.session_state().to_string(),
            "device": device,
        })))
    }
}
