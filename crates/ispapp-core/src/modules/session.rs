use async_trait::async_trait;
use ispapp_api::SessionClient;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::ModuleError;
use crate::module::Module;

/// Runs the control-plane session until cancelled. A session client runs
/// once, so the module cannot be started again after a stop.
pub struct SessionModule {
    client: SessionClient,
}

impl SessionModule {
    pub fn new(client: SessionClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &SessionClient {
        &self.client
    }
}

#[async_trait]
impl Module for SessionModule {
    fn name(&self) -> &str {
        "session"
    }

    async fn start(&self, cancel: CancellationToken) -> Result<Option<JoinHandle<()>>, ModuleError> {
        // The outbox receiver is handed to the first run and cannot be recovered.
        if self.client.has_run() {
            return Err(ModuleError::Start {
                name: self.name().into(),
                reason: "session client already ran; restart the agent".into(),
            });
        }
        let client = self.client.clone();
        info!(path = %client.config().ws_path, "starting session");
        Ok(Some(tokio::spawn(async move {
            if let Err(e) = client.run(cancel).await {
                error!(error = %e, "session ended with error");
            }
        })))
    }

    async fn stop(&self) -> Result<(), ModuleError> {
        self.client.stop();
        Ok(())
    }
}
