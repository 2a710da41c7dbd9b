use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::process::Command;
use toxiwarden_core::{
    ExitCode, OutputKind, ProcessError, ProcessEvent, ProcessEventSender, ProcessHandle,
    ProcessId, ProcessLauncher, TerminationResult, forward_output,
};
use tracing::{debug, info, warn};

/// How long the exit reporter waits for buffered output to drain
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Unix-specific process handle implementation
pub struct UnixProcessHandle {
    pid: Option<ProcessId>,
    command: String,
    exited: Arc<AtomicBool>,
    signalled: bool,
}

impl UnixProcessHandle {
    fn signal_group(&self, sig: Signal) -> TerminationResult {
        let Some(pid) = self.pid else {
            return TerminationResult::ProcessNotFound;
        };
        if self.exited.load(Ordering::SeqCst) {
            return TerminationResult::ProcessNotFound;
        }

        // The child leads its own group, so the group id is its pid
        let pgid = NixPid::from_raw(pid as i32);
        match signal::killpg(pgid, sig) {
            Ok(()) => {
                info!("Sent {:?} to process group {}", sig, pid);
                TerminationResult::Success
            }
            Err(nix::errno::Errno::ESRCH) => {
                info!("Process group {} not found (already terminated)", pid);
                TerminationResult::ProcessNotFound
            }
            Err(nix::errno::Errno::EPERM) => {
                warn!("Permission denied to signal process group {}", pid);
                TerminationResult::AccessDenied
            }
            Err(e) => {
                warn!("Failed to send {:?} to process group {}: {}", sig, pid, e);
                TerminationResult::Failed(format!("{sig:?} failed: {e}"))
            }
        }
    }
}

#[async_trait]
impl ProcessHandle for UnixProcessHandle {
    fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    async fn terminate(&mut self) -> TerminationResult {
        let result = self.signal_group(Signal::SIGTERM);
        if matches!(
            result,
            TerminationResult::Success | TerminationResult::ProcessNotFound
        ) {
            self.signalled = true;
        }
        result
    }
}

impl Drop for UnixProcessHandle {
    fn drop(&mut self) {
        if self.signalled || self.exited.load(Ordering::SeqCst) {
            return;
        }

        // Emergency cleanup: a handle dropped while its process still runs
        warn!(
            "Dropping handle of running process {:?} ({}), sending SIGTERM",
            self.pid, self.command
        );
        if let TerminationResult::Failed(reason) = self.signal_group(Signal::SIGTERM) {
            tracing::error!("Emergency cleanup failed for {:?}: {}", self.pid, reason);
        }
    }
}

/// Unix launcher: every process gets its own process group, piped
/// output and an exit reporter task
#[derive(Debug, Default)]
pub struct UnixProcessLauncher;

impl UnixProcessLauncher {
    pub fn new() -> Self {
        info!("Initializing Unix process launcher");
        Self
    }
}

#[async_trait]
impl ProcessLauncher for UnixProcessLauncher {
    type Handle = UnixProcessHandle;

    async fn launch(
        &self,
        command: &str,
        args: &[String],
        events: ProcessEventSender,
    ) -> Result<UnixProcessHandle, ProcessError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Create new process group so termination reaches the whole tree
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| spawn_error(command, e))?;
        let pid = child.id();

        info!(
            "Spawned Unix process: {} (PID: {:?}) with args: {:?}",
            command, pid, args
        );

        let mut forwarders = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(tokio::spawn(forward(
                stdout,
                OutputKind::Stdout,
                events.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(tokio::spawn(forward(
                stderr,
                OutputKind::Stderr,
                events.clone(),
            )));
        }

        let exited = Arc::new(AtomicBool::new(false));
        let exit_flag = exited.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => ExitCode::from(status),
                Err(e) => {
                    warn!("Failed to collect exit status: {}", e);
                    ExitCode::Unknown
                }
            };
            exit_flag.store(true, Ordering::SeqCst);

            for forwarder in forwarders {
                let _ = tokio::time::timeout(OUTPUT_DRAIN_GRACE, forwarder).await;
            }

            let _ = events.send(ProcessEvent::Exited(code));
        });

        Ok(UnixProcessHandle {
            pid,
            command: command.to_string(),
            exited,
            signalled: false,
        })
    }
}

async fn forward<R: AsyncRead + Unpin>(io: R, kind: OutputKind, events: ProcessEventSender) {
    if let Err(e) = forward_output(io, kind, events).await {
        debug!("Stopped forwarding {:?}: {}", kind, e);
    }
}

fn spawn_error(command: &str, e: std::io::Error) -> ProcessError {
    match e.kind() {
        std::io::ErrorKind::NotFound => {
            ProcessError::SpawnFailed(format!("{command}: command not found"))
        }
        std::io::ErrorKind::PermissionDenied => ProcessError::PermissionDenied(command.to_string()),
        _ => ProcessError::IoError(e),
    }
}
