use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

/// Unique identifier for a process
pub type ProcessId = u32;

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExitCode {
    /// Process exited on its own with the given code
    Code(i32),
    /// Process was terminated by a signal (Unix)
    Signal(i32),
    /// The exit status could not be collected
    Unknown,
}

impl ExitCode {
    pub fn success(&self) -> bool {
        matches!(self, ExitCode::Code(0))
    }
}

impl From<std::process::ExitStatus> for ExitCode {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitCode::Code(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitCode::Signal(signal);
            }
        }

        ExitCode::Unknown
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCode::Code(code) => write!(f, "code {code}"),
            ExitCode::Signal(signal) => write!(f, "signal {signal}"),
            ExitCode::Unknown => f.write_str("unknown status"),
        }
    }
}

/// Output and lifecycle notifications produced by a launched process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    Exited(ExitCode),
}

/// Channel a launcher reports a process' events on. Exactly one
/// [`ProcessEvent::Exited`] is sent per launched process.
pub type ProcessEventSender = mpsc::UnboundedSender<ProcessEvent>;

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Termination signal was delivered
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Permission denied (insufficient privileges)
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

/// Error types for process operations
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Trait representing a handle to a process this crate launched
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if the OS did not report one)
    fn pid(&self) -> Option<ProcessId>;

    /// Ask the process to terminate. Returns once the signal is sent; the
    /// exit itself is reported through the launch's event channel.
    async fn terminate(&mut self) -> TerminationResult;
}

/// Spawns processes and wires their output and exit into an event channel
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// The type of process handle this launcher produces
    type Handle: ProcessHandle + 'static;

    /// Spawn `command` with `args`. Standard output, standard error and the
    /// final exit are delivered on `events` until the process is gone.
    async fn launch(
        &self,
        command: &str,
        args: &[String],
        events: ProcessEventSender,
    ) -> Result<Self::Handle, ProcessError>;
}

/// Factory trait for creating platform-specific launchers
pub trait ProcessLauncherFactory {
    /// The type of launcher this factory creates
    type Launcher: ProcessLauncher;

    /// Create a launcher for the current platform
    fn create_launcher() -> Self::Launcher;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_display() {
        assert_eq!(ExitCode::Code(3).to_string(), "code 3");
        assert_eq!(ExitCode::Signal(15).to_string(), "signal 15");
        assert!(ExitCode::Code(0).success());
        assert!(!ExitCode::Signal(9).success());
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_from_status() {
        use std::os::unix::process::ExitStatusExt;

        // Raw wait statuses: exit code lives in the high byte, signal in the low bits
        assert_eq!(
            ExitCode::from(std::process::ExitStatus::from_raw(2 << 8)),
            ExitCode::Code(2)
        );
        assert_eq!(
            ExitCode::from(std::process::ExitStatus::from_raw(15)),
            ExitCode::Signal(15)
        );
    }
}
