//! Supervises a local toxiproxy server process and mirrors its proxy
//! registry.
//!
//! [`ControlSurface`] is the entry point: it starts the server on demand,
//! keeps a liveness flag in step with the process, runs the toxiproxy CLI
//! and forwards proxy and toxic changes to the control API.

mod cache;
mod client;
mod control;
mod executor;
mod factory;
mod liveness;
mod logging;
mod probe;
mod supervisor;

#[cfg(test)]
mod testing;

pub use cache::StateCache;
pub use client::ToxiproxyClient;
pub use control::{ControlSurface, ServerStatus, StatusReport, StopOutcome};
pub use executor::{CommandExecutor, ExecuteOutcome};
pub use factory::{PlatformLauncher, PlatformLauncherFactory};
pub use liveness::{LivenessCell, LivenessFlag};
pub use logging::{ENV_LOG_FORMAT, ENV_LOG_LEVEL, LogFormat, LoggingConfig, init_logging};
pub use probe::HttpHealthProbe;
pub use supervisor::{ProcessSupervisor, ServerEvent, StartOutcome, SupervisorState};

// Re-export core functionality
pub use toxiwarden_core::*;
