use async_trait::async_trait;
use ispapp_api::Envelope;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::context::AgentContext;
use crate::error::HandlerError;
use crate::probe::DeviceInfo;
use crate::registry::{Handler, Reply};

/// `command`: `{"command": "reboot" | "status"}`.
pub struct CommandHandler {
    ctx: AgentContext,
}

impl CommandHandler {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    command: String,
}

#[async_trait]
impl Handler for CommandHandler {
    async fn handle(&self, request: &Envelope) -> Result<Reply, HandlerError> {
        let CommandRequest { command } = serde_json::from_value(request.data.clone())
            .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;

        match command.as_str() {
            "reboot" => {
                info!("reboot requested by control plane");
                let output = self.ctx.commands.run("reboot", &[]).await?;
                if !output.success() {
                    return Err(HandlerError::Command(format!(
                        "reboot exited with {:?}: {}",
                        output.exit_code,
                        output.stderr.trim()
                    )));
                }
                Ok(Reply {
                    stdout: output.stdout,
                    data: json!({ "rebooting": true }),
                    ..Reply::default()
                })
            }
            "status" => {
                let device = DeviceInfo::collect(self.ctx.files.as_ref()).await;
                Ok(Reply::data(json!({
                    "session": self.ctx.session_state().to_string(),
                    "device": device,
                })))
            }
            other => {
                warn!(command = other, "unknown command");
                Err(HandlerError::InvalidPayload(format!("unknown command '{other}'")))
            }
        }
    }
}
