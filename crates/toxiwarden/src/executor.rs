use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;
use toxiwarden_core::{ExitCode, SupervisorOptions, WardenError};
use tracing::{debug, error};

/// What a toxiproxy CLI invocation produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecuteOutcome {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> Result<String, WardenError> {
        if self.success {
            Ok(self.output.unwrap_or_default())
        } else {
            Err(WardenError::Command(self.error.unwrap_or_default()))
        }
    }
}

/// Runs the toxiproxy CLI with caller supplied arguments.
///
/// Arguments go to the binary as argv, never through a shell. Calls are
/// independent of each other and of the supervisor.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    cli_binary: String,
}

impl CommandExecutor {
    pub fn new(cli_binary: impl Into<String>) -> Self {
        Self {
            cli_binary: cli_binary.into(),
        }
    }

    pub fn from_options(options: &SupervisorOptions) -> Self {
        Self::new(options.cli_binary.clone())
    }

    pub fn cli_binary(&self) -> &str {
        &self.cli_binary
    }

    /// Human readable form of an invocation, for logs
    pub fn command_line<S: AsRef<str>>(&self, args: &[S]) -> String {
        std::iter::once(self.cli_binary.as_str())
            .chain(args.iter().map(|arg| arg.as_ref()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub async fn execute<S: AsRef<str>>(&self, args: &[S]) -> ExecuteOutcome {
        let command_line = self.command_line(args);
        debug!("Executing: {command_line}");

        let output = match Command::new(&self.cli_binary)
            .args(args.iter().map(|arg| arg.as_ref()))
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let message = format!("Failed to execute {}: {e}", self.cli_binary);
                error!("Command execution error: {message}");
                return ExecuteOutcome::failed(message);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            let combined = format!("{stdout}{stderr}");
            debug!("Command output: {}", combined.trim_end());
            return ExecuteOutcome::succeeded(combined);
        }

        let code = ExitCode::from(output.status);
        let message = [stderr.trim(), stdout.trim()]
            .into_iter()
            .find(|text| !text.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{command_line} exited with {code}"));
        error!("Command execution error ({code}): {message}");
        ExecuteOutcome::failed(message)
    }
}
