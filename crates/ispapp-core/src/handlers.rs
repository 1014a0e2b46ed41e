// ── Message handlers ──
//
// One handler per inbound envelope type. `register_defaults` wires the full
// set into a registry builder.

pub mod command;
pub mod config;
pub mod speedtest;
pub mod terminal;
pub mod update;

pub use command::CommandHandler;
pub use config::{GetConfigHandler, SetConfigHandler};
pub use speedtest::{SpeedtestHandler, SpeedtestResult, run_speedtest};
pub use terminal::TerminalHandler;
pub use update::GetUpdateHandler;

use crate::context::AgentContext;
use crate::registry::HandlerRegistryBuilder;

pub const TERMINAL: &str = "terminal";
pub const COMMAND: &str = "command";
pub const GET_CONFIG: &str = "getconfig";
pub const CONFIG: &str = "config";
pub const GET_UPDATE: &str = "getupdate";
pub const SPEEDTEST: &str = "speedtest";

pub fn register_defaults(builder: HandlerRegistryBuilder, ctx: &AgentContext) -> HandlerRegistryBuilder {
    builder
        .register(TERMINAL, TerminalHandler::new(ctx.clone()))
        .register(COMMAND, CommandHandler::new(ctx.clone()))
        .register(GET_CONFIG, GetConfigHandler::new(ctx.clone()))
        .register(CONFIG, SetConfigHandler::new(ctx.clone()))
        .register(GET_UPDATE, GetUpdateHandler::new(ctx.clone()))
        .register(SPEEDTEST, SpeedtestHandler::new(ctx.clone()))
}
