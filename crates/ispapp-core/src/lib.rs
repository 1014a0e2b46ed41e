// ispapp-core: handler registry, device modules and supervisor for the agent.

pub mod capability;
pub mod context;
pub mod credentials;
pub mod error;
pub mod handlers;
pub mod module;
pub mod modules;
pub mod probe;
pub mod registry;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use capability::{CommandOutput, CommandRunner, FileReader, FsFileReader, SystemCommandRunner};
pub use context::{AGENT_VERSION, AgentContext};
pub use credentials::StoreCredentials;
pub use error::{HandlerError, ModuleError, SupervisorError};
pub use module::Module;
pub use modules::{SessionModule, SystemModule, UpdatePollerModule};
pub use probe::DeviceInfo;
pub use registry::{Handler, HandlerRegistry, HandlerRegistryBuilder, Reply};
pub use supervisor::{ModuleState, ModuleStatus, Supervisor};
