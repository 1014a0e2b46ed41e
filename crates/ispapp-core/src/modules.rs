// ── Shipped modules ──

pub mod poller;
pub mod session;
pub mod system;

pub use poller::UpdatePollerModule;
pub use session::SessionModule;
pub use system::SystemModule;
