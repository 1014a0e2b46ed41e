// ── Wiring ──
//
// Turns runtime options plus a loaded store into a supervisor with every
// module registered. Nothing is started here.

use std::sync::Arc;

use ispapp_api::{HeartbeatConfig, ReconnectConfig, SessionClient, SessionConfig, TlsMode, TransportConfig};
use ispapp_config::{AgentOptions, ConfigStore};
use ispapp_core::handlers::register_defaults;
use ispapp_core::{
    AgentContext, FsFileReader, HandlerRegistry, SessionModule, StoreCredentials, Supervisor,
    SystemCommandRunner, SystemModule, UpdatePollerModule,
};
use tracing::debug;

use crate::error::CliError;

pub fn session_config(options: &AgentOptions) -> SessionConfig {
    let tls = if options.insecure_tls {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ca) = &options.ca_cert {
        TlsMode::CustomCa(ca.clone())
    } else {
        TlsMode::System
    };

    SessionConfig {
        use_tls: true,
        ws_path: options.ws_path.clone(),
        api_url: None,
        reconnect: ReconnectConfig {
            initial_delay: options.reconnect_initial(),
            multiplier: options.reconnect_multiplier,
            max_delay: options.reconnect_max(),
        },
        heartbeat: HeartbeatConfig {
            interval: options.heartbeat_interval(),
            read_deadline: options.read_deadline(),
        },
        transport: TransportConfig {
            tls,
            timeout: options.request_timeout(),
            connect_timeout: options.connect_timeout(),
        },
        outbox_capacity: options.outbox_capacity,
    }
}

pub async fn build(options: &AgentOptions, store: Arc<ConfigStore>) -> Result<Supervisor, CliError> {
    let ctx = AgentContext::new(
        Arc::clone(&store),
        Arc::new(SystemCommandRunner::new(options.command_timeout())),
        Arc::new(FsFileReader),
    );

    let registry = register_defaults(
        HandlerRegistry::builder().max_concurrent(options.max_concurrent_handlers),
        &ctx,
    )
    .build();
    debug!(kinds = ?registry.kinds(), "handlers registered");

    let config = session_config(options);
    let session = SessionClient::new(
        config.clone(),
        Arc::new(StoreCredentials::new(store)),
        Arc::new(registry),
    )
    .map_err(|e| CliError::Setup(e.to_string()))?;
    ctx.attach_session(session.subscribe_state());

    let poller = UpdatePollerModule::new(ctx.clone(), config, session.subscribe_state())
        .map_err(|e| CliError::Setup(e.to_string()))?;

    let supervisor = Supervisor::new();
    supervisor.register(Arc::new(SystemModule::new(ctx))).await;
    supervisor.register(Arc::new(SessionModule::new(session))).await;
    supervisor.register(Arc::new(poller)).await;
    Ok(supervisor)
}
