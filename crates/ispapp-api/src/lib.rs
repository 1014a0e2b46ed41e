// ispapp-api: control-plane protocol, auth client and reconnecting session

pub mod control;
pub mod error;
pub mod outbox;
pub mod protocol;
pub mod session;
pub mod transport;

pub use control::{
    BandwidthReport, CommandResult, ControlPlaneClient, QueuedCommand, TokenPair,
    UpdateInstructions,
};
pub use error::Error;
pub use outbox::Outbox;
pub use protocol::{Envelope, Response};
pub use session::{
    CredentialSource, Credentials, Dispatcher, Endpoint, HeartbeatConfig, ReconnectConfig,
    SessionClient, SessionConfig, SessionState,
};
pub use transport::{TlsMode, TransportConfig};
