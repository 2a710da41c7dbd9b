use crate::liveness::{LivenessCell, LivenessFlag};
use backon::{ConstantBuilder, Retryable};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use toxiwarden_core::{
    ExitCode, HealthProbe, ProcessEvent, ProcessHandle, ProcessId, ProcessLauncher,
    SupervisorOptions, TerminationResult, WardenError,
};
use tracing::{debug, error, info, warn};

/// How long a restart waits for the previous server to exit before
/// launching its replacement
const RESTART_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Output and exit notifications of the managed server
pub type ServerEvent = ProcessEvent;

/// Lifecycle of the process this supervisor launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    /// No owned process, either never launched or stopped on purpose
    Stopped,
    /// Launched, waiting for the first successful probe
    Starting,
    Running,
    /// The owned process exited without being asked to
    Crashed,
}

/// Result of [`ProcessSupervisor::start`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum StartOutcome {
    /// A server already answered the health probe; nothing was launched
    AlreadyRunning,
    /// The server answered after `attempts` readiness probes
    Ready { attempts: u32 },
    /// The server never answered; the process is kept attached
    Exhausted { attempts: u32 },
    /// The launched process died before it became ready
    Exited { attempts: u32, code: ExitCode },
    AutoStartDisabled,
    SpawnFailed { reason: String },
}

impl StartOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StartOutcome::AlreadyRunning | StartOutcome::Ready { .. })
    }
}

struct ProcessSlot<H> {
    state: SupervisorState,
    handle: Option<H>,
    /// Identifies the launch whose exit may clear `handle`
    launch_id: u64,
    last_exit: Option<ExitCode>,
}

#[derive(Debug)]
struct NotReady;

/// Owns at most one toxiproxy server process and keeps the shared
/// liveness flag in step with it.
///
/// All operations may be called concurrently; the process slot is only
/// ever touched under its lock and never across an await point.
pub struct ProcessSupervisor<L: ProcessLauncher> {
    options: Arc<SupervisorOptions>,
    launcher: L,
    probe: Arc<dyn HealthProbe>,
    liveness: Arc<LivenessCell>,
    slot: Arc<Mutex<ProcessSlot<L::Handle>>>,
    launches: AtomicU64,
    /// Last launch id whose exit was observed
    exits: Arc<watch::Sender<u64>>,
    subscriber: Option<mpsc::UnboundedSender<ServerEvent>>,
}

impl<L: ProcessLauncher> ProcessSupervisor<L> {
    pub fn new(options: SupervisorOptions, launcher: L, probe: Arc<dyn HealthProbe>) -> Self {
        let (exits, _) = watch::channel(0);
        Self {
            options: Arc::new(options),
            launcher,
            probe,
            liveness: Arc::new(LivenessCell::new()),
            slot: Arc::new(Mutex::new(ProcessSlot {
                state: SupervisorState::Stopped,
                handle: None,
                launch_id: 0,
                last_exit: None,
            })),
            launches: AtomicU64::new(0),
            exits: Arc::new(exits),
            subscriber: None,
        }
    }

    /// Forward every output line and exit of launched servers to `events`
    pub fn with_subscriber(mut self, events: mpsc::UnboundedSender<ServerEvent>) -> Self {
        self.subscriber = Some(events);
        self
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    pub fn liveness(&self) -> LivenessFlag {
        self.liveness.flag()
    }

    /// The flag shared with whoever needs to read it, such as the state cache
    pub fn liveness_cell(&self) -> Arc<LivenessCell> {
        self.liveness.clone()
    }

    pub fn state(&self) -> SupervisorState {
        self.lock_slot().state
    }

    pub fn owns_process(&self) -> bool {
        self.lock_slot().handle.is_some()
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.lock_slot().handle.as_ref().and_then(|handle| handle.pid())
    }

    pub fn last_exit(&self) -> Option<ExitCode> {
        self.lock_slot().last_exit
    }

    /// Whether a toxiproxy server answers at the configured address.
    ///
    /// A confirmed flag is answered from memory, as is a stop forced by an
    /// observed exit. Anything else costs one health probe.
    pub async fn is_running(&self) -> bool {
        if let Some(known) = self.liveness.settled() {
            return known;
        }
        self.probe_and_record().await
    }

    /// Make sure a server is running, launching one if needed, and wait
    /// until it answers or the readiness budget runs out.
    pub async fn start(&self) -> StartOutcome {
        if self.is_running().await {
            debug!("Toxiproxy server already running, nothing to start");
            return StartOutcome::AlreadyRunning;
        }

        if !self.options.auto_start {
            error!("Toxiproxy server is not running and auto-start is disabled");
            return StartOutcome::AutoStartDisabled;
        }

        let launch_id = match self.attached_launch() {
            Some(launch_id) => {
                info!("Toxiproxy server process already attached, waiting for it to answer");
                launch_id
            }
            None => match self.spawn_server().await {
                Ok(launch_id) => launch_id,
                Err(reason) => return StartOutcome::SpawnFailed { reason },
            },
        };

        self.await_ready(launch_id).await
    }

    /// Terminate the owned server. Returns false when there is none, even
    /// if some other server answers at the configured address.
    pub async fn stop(&self) -> bool {
        let Some(mut handle) = self.release_handle(SupervisorState::Stopped) else {
            warn!("Cannot stop toxiproxy server that was not started by this supervisor");
            return false;
        };

        info!("Stopping toxiproxy server (PID: {:?})...", handle.pid());
        report_termination(handle.terminate().await);
        self.liveness.force_stopped();
        true
    }

    /// Kill the owned server if there is one, then start again
    pub async fn restart(&self) -> StartOutcome {
        info!("Toxiproxy server is restarting");
        self.liveness.reset();

        let launch_id = self.lock_slot().launch_id;
        match self.release_handle(SupervisorState::Stopped) {
            Some(mut handle) => {
                let mut exits = self.exits.subscribe();
                report_termination(handle.terminate().await);
                drop(handle);

                let exited = exits.wait_for(|observed| *observed >= launch_id);
                if tokio::time::timeout(RESTART_EXIT_GRACE, exited).await.is_err() {
                    warn!(
                        "Previous toxiproxy server did not exit within {:?}",
                        RESTART_EXIT_GRACE
                    );
                }
            }
            None => debug!("No owned toxiproxy server to kill before restarting"),
        }

        self.start().await
    }

    async fn probe_and_record(&self) -> bool {
        let epoch = self.liveness.epoch();
        let alive = self.probe.probe().await;
        let running = self.liveness.record_probe(epoch, alive) == LivenessFlag::ConfirmedRunning;
        if running {
            self.promote_attached();
        }
        running
    }

    async fn spawn_server(&self) -> Result<u64, String> {
        info!("Starting toxiproxy server...");
        let launch_id = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let args = self.options.server_args();

        self.lock_slot().state = SupervisorState::Starting;
        let handle = match self.launcher.launch(&self.options.server_binary, &args, tx).await {
            Ok(handle) => handle,
            Err(e) => {
                let error = WardenError::spawn(&self.options.server_binary, e);
                error!("{error}");
                self.lock_slot().state = SupervisorState::Stopped;
                return Err(error.to_string());
            }
        };

        info!("Toxiproxy server spawned (PID: {:?})", handle.pid());
        {
            let mut slot = self.lock_slot();
            slot.launch_id = launch_id;
            slot.handle = Some(handle);
            slot.last_exit = None;
        }

        tokio::spawn(watch_process(
            launch_id,
            rx,
            self.slot.clone(),
            self.liveness.clone(),
            self.exits.clone(),
            self.subscriber.clone(),
        ));
        Ok(launch_id)
    }

    /// Poll the health probe on a fixed interval until the server answers,
    /// the attempts run out or the launched process exits.
    async fn await_ready(&self, launch_id: u64) -> StartOutcome {
        let retry = &self.options.retry;
        let attempts = AtomicU32::new(0);

        tokio::time::sleep(retry.interval()).await;

        let counter = &attempts;
        let poll = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if self.probe_and_record().await {
                Ok(())
            } else {
                Err(NotReady)
            }
        };

        let polled = poll
            .retry(
                ConstantBuilder::default()
                    .with_delay(retry.interval())
                    .with_max_times(retry.max_attempts.saturating_sub(1) as usize),
            )
            .when(|_: &NotReady| self.owns_launch(launch_id))
            .notify(|_: &NotReady, delay: Duration| {
                debug!("Toxiproxy server not ready yet, probing again in {delay:?}");
            })
            .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match polled {
            Ok(()) => {
                info!("Toxiproxy server is ready after {attempts} probe(s)");
                StartOutcome::Ready { attempts }
            }
            Err(NotReady) => match self.exit_of(launch_id) {
                Some(code) => {
                    error!("Toxiproxy server exited with {code} before becoming ready");
                    StartOutcome::Exited { attempts, code }
                }
                None => {
                    error!(
                        "Failed to start toxiproxy server: no answer after {attempts} probe(s) within {:?}",
                        retry.max_wait()
                    );
                    StartOutcome::Exhausted { attempts }
                }
            },
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, ProcessSlot<L::Handle>> {
        lock(&self.slot)
    }

    fn attached_launch(&self) -> Option<u64> {
        let slot = self.lock_slot();
        slot.handle.is_some().then_some(slot.launch_id)
    }

    fn owns_launch(&self, launch_id: u64) -> bool {
        let slot = self.lock_slot();
        slot.launch_id == launch_id && slot.handle.is_some()
    }

    fn exit_of(&self, launch_id: u64) -> Option<ExitCode> {
        let slot = self.lock_slot();
        if slot.launch_id == launch_id {
            slot.last_exit
        } else {
            None
        }
    }

    /// An attached process still waiting for its first answer is up now,
    /// however late that answer came
    fn promote_attached(&self) {
        let mut slot = self.lock_slot();
        if slot.handle.is_some() && slot.state == SupervisorState::Starting {
            slot.state = SupervisorState::Running;
        }
    }

    fn release_handle(&self, next: SupervisorState) -> Option<L::Handle> {
        let mut slot = self.lock_slot();
        let handle = slot.handle.take();
        if handle.is_some() {
            slot.state = next;
        }
        handle
    }
}

impl<L: ProcessLauncher> Drop for ProcessSupervisor<L> {
    fn drop(&mut self) {
        // Dropping the handle sends the emergency termination signal
        let orphan = lock(&self.slot).handle.take();
        if orphan.is_some() {
            warn!("Supervisor dropped while owning a toxiproxy server process");
        }
        drop(orphan);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn report_termination(result: TerminationResult) {
    match result {
        TerminationResult::Success => debug!("Termination signal delivered"),
        TerminationResult::ProcessNotFound => debug!("Toxiproxy server already gone"),
        TerminationResult::AccessDenied => {
            warn!("Not permitted to terminate toxiproxy server")
        }
        TerminationResult::Failed(reason) => {
            warn!("Failed to terminate toxiproxy server: {reason}")
        }
    }
}

/// Drains one launch's events until the launcher closes the channel.
/// The slot is updated before the event reaches the subscriber, so a
/// subscriber that saw `Exited` also sees the cleared handle.
async fn watch_process<H: ProcessHandle + 'static>(
    launch_id: u64,
    mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    slot: Arc<Mutex<ProcessSlot<H>>>,
    liveness: Arc<LivenessCell>,
    exits: Arc<watch::Sender<u64>>,
    subscriber: Option<mpsc::UnboundedSender<ServerEvent>>,
) {
    while let Some(event) = events.recv().await {
        match &event {
            ProcessEvent::Stdout(text) => debug!("toxiproxy-server: {}", text.trim_end()),
            ProcessEvent::Stderr(text) => debug!("toxiproxy-server stderr: {}", text.trim_end()),
            ProcessEvent::Exited(code) => {
                observe_exit(&slot, &liveness, launch_id, *code);
                exits.send_modify(|observed| *observed = (*observed).max(launch_id));
            }
        }

        if let Some(subscriber) = &subscriber {
            let _ = subscriber.send(event);
        }
    }
}

fn observe_exit<H>(
    slot: &Mutex<ProcessSlot<H>>,
    liveness: &LivenessCell,
    launch_id: u64,
    code: ExitCode,
) {
    let released = {
        let mut slot = lock(slot);
        if slot.launch_id != launch_id {
            debug!("Ignoring exit ({code}) of superseded toxiproxy launch {launch_id}");
            return;
        }

        slot.last_exit = Some(code);
        let released = slot.handle.take();
        if released.is_some() {
            slot.state = if code.success() {
                SupervisorState::Stopped
            } else {
                SupervisorState::Crashed
            };
            liveness.force_stopped();
            warn!("Toxiproxy server exited unexpectedly with {code}");
        } else {
            info!("Toxiproxy server exited with {code}");
        }
        released
    };
    drop(released);
}
