//! Lifecycle controller for externally hosted game servers: start/stop
//! supervision, SteamCMD installs, configuration files and the audit trail.

pub mod audit;
pub mod config;
pub mod config_store;
pub mod error;
pub mod games;
pub mod lifecycle;
pub mod process;
pub mod registry;
pub mod retry;
pub mod services;
pub mod telemetry;
pub mod tool_runner;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use hearth_process::{Actor, LogLevel, Operation, ServerStatus};
pub use lifecycle::ServerController;
pub use registry::ControllerRegistry;
pub use services::AgentServices;
