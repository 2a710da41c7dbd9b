use crate::cache::StateCache;
use crate::client::ToxiproxyClient;
use crate::executor::{CommandExecutor, ExecuteOutcome};
use crate::factory::{PlatformLauncher, PlatformLauncherFactory};
use crate::liveness::LivenessFlag;
use crate::probe::HttpHealthProbe;
use crate::supervisor::{ProcessSupervisor, ServerEvent, StartOutcome, SupervisorState};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use toxiwarden_core::{
    HealthProbe, NewProxy, NewToxic, ProcessId, ProcessLauncher, ProcessLauncherFactory, Proxy,
    ProxyRegistry, SupervisorOptions, Toxic, ToxicUpdate, WardenError,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Running,
    Stopped,
}

/// Snapshot answered to status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: ServerStatus,
    pub auto_start: bool,
    pub host: String,
    pub port: u16,
    pub supervisor: SupervisorState,
    pub pid: Option<ProcessId>,
}

/// Result of [`ControlSurface::stop_server`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    AlreadyStopped,
    Stopped,
    /// A server answers, but this supervisor did not launch it
    NotOwned,
}

/// Single entry point over the supervisor, the state cache, the CLI
/// executor and the control API.
///
/// Every mutation that succeeds is followed by a best-effort sync, so the
/// cached registry reflects it without the caller asking.
pub struct ControlSurface<L: ProcessLauncher = PlatformLauncher> {
    supervisor: Arc<ProcessSupervisor<L>>,
    cache: Arc<StateCache>,
    executor: CommandExecutor,
    client: ToxiproxyClient,
    /// Background restart kicked off by a failed proxy creation
    recovery: Mutex<Option<JoinHandle<()>>>,
}

impl ControlSurface<PlatformLauncher> {
    pub fn new(options: SupervisorOptions) -> Result<Self, WardenError> {
        Self::with_launcher(options, PlatformLauncherFactory::create_launcher(), None)
    }

    /// Like [`ControlSurface::new`], also delivering server output and exits
    /// to `events`
    pub fn with_events(
        options: SupervisorOptions,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<Self, WardenError> {
        Self::with_launcher(
            options,
            PlatformLauncherFactory::create_launcher(),
            Some(events),
        )
    }
}

impl<L: ProcessLauncher + 'static> ControlSurface<L> {
    pub fn with_launcher(
        options: SupervisorOptions,
        launcher: L,
        events: Option<mpsc::UnboundedSender<ServerEvent>>,
    ) -> Result<Self, WardenError> {
        options.validate()?;
        let client = ToxiproxyClient::new(&options)?;
        let probe = Arc::new(HttpHealthProbe::new(client.clone()));
        Ok(Self::from_parts(options, launcher, probe, client, events))
    }

    pub fn from_parts(
        options: SupervisorOptions,
        launcher: L,
        probe: Arc<dyn HealthProbe>,
        client: ToxiproxyClient,
        events: Option<mpsc::UnboundedSender<ServerEvent>>,
    ) -> Self {
        let executor = CommandExecutor::from_options(&options);
        let mut supervisor = ProcessSupervisor::new(options, launcher, probe);
        if let Some(events) = events {
            supervisor = supervisor.with_subscriber(events);
        }
        let cache = StateCache::new(Arc::new(client.clone()), supervisor.liveness_cell());

        Self {
            supervisor: Arc::new(supervisor),
            cache: Arc::new(cache),
            executor,
            client,
            recovery: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        self.supervisor.options()
    }

    pub fn supervisor(&self) -> &ProcessSupervisor<L> {
        &self.supervisor
    }

    pub fn client(&self) -> &ToxiproxyClient {
        &self.client
    }

    pub fn liveness(&self) -> LivenessFlag {
        self.supervisor.liveness()
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.is_running().await
    }

    /// Start the server if needed, syncing the registry once it answers
    pub async fn start(&self) -> StartOutcome {
        let outcome = self.supervisor.start().await;
        if outcome.is_success() {
            self.refresh().await;
        }
        outcome
    }

    pub async fn stop(&self) -> bool {
        self.supervisor.stop().await
    }

    pub async fn restart(&self) -> StartOutcome {
        let outcome = self.supervisor.restart().await;
        if outcome.is_success() {
            self.refresh().await;
        }
        outcome
    }

    pub async fn sync(&self) -> bool {
        self.cache.sync().await
    }

    pub async fn execute<S: AsRef<str>>(&self, args: &[S]) -> ExecuteOutcome {
        self.executor.execute(args).await
    }

    /// Cached registry as of the last successful sync
    pub fn proxies(&self) -> Arc<ProxyRegistry> {
        self.cache.proxies()
    }

    pub fn cached_proxy(&self, name: &str) -> Option<Proxy> {
        self.cache.proxy(name)
    }

    pub async fn status(&self) -> StatusReport {
        let status = if self.is_running().await {
            ServerStatus::Running
        } else {
            ServerStatus::Stopped
        };
        let options = self.options();
        StatusReport {
            status,
            auto_start: options.auto_start,
            host: options.host.clone(),
            port: options.port,
            supervisor: self.supervisor.state(),
            pid: self.supervisor.pid(),
        }
    }

    pub async fn stop_server(&self) -> StopOutcome {
        if !self.is_running().await {
            return StopOutcome::AlreadyStopped;
        }
        if self.stop().await {
            StopOutcome::Stopped
        } else {
            StopOutcome::NotOwned
        }
    }

    /// Succeed only once a server answers, launching one if allowed
    pub async fn ensure_running(&self) -> Result<(), WardenError> {
        if self.start().await.is_success() {
            Ok(())
        } else {
            Err(WardenError::Unavailable)
        }
    }

    /// Live view of one proxy, straight from the server
    pub async fn proxy(&self, name: &str) -> Result<Proxy, WardenError> {
        self.client.proxy(name).await
    }

    /// Create a proxy. An unreachable server fails the call with
    /// [`WardenError::Unavailable`] right away and is restarted in the
    /// background.
    pub async fn create_proxy(&self, proxy: NewProxy) -> Result<Proxy, WardenError> {
        match self.client.create_proxy(&proxy).await {
            Ok(created) => {
                info!("Created proxy {} ({} -> {})", created.name, created.listen, created.upstream);
                self.refresh().await;
                Ok(created)
            }
            Err(WardenError::Unreachable(reason)) => {
                warn!("Toxiproxy is down ({reason}), trying to restart");
                self.recover();
                Err(WardenError::Unavailable)
            }
            Err(e) => Err(e),
        }
    }

    /// Flip a proxy between enabled and disabled
    pub async fn toggle_proxy(&self, name: &str) -> Result<Proxy, WardenError> {
        let mut proxy = self.client.proxy(name).await?;
        proxy.enabled = !proxy.enabled;
        let updated = self.client.update_proxy(&proxy).await?;
        info!(
            "Proxy {} is now {}",
            updated.name,
            if updated.enabled { "enabled" } else { "disabled" }
        );
        self.refresh().await;
        Ok(updated)
    }

    pub async fn delete_proxy(&self, name: &str) -> Result<(), WardenError> {
        self.client.delete_proxy(name).await?;
        info!("Deleted proxy {name}");
        self.refresh().await;
        Ok(())
    }

    pub async fn toxics(&self, proxy: &str) -> Result<Vec<Toxic>, WardenError> {
        self.client.toxics(proxy).await
    }

    pub async fn create_toxic(&self, proxy: &str, toxic: NewToxic) -> Result<Toxic, WardenError> {
        let created = self.client.create_toxic(proxy, toxic).await?;
        info!("Added {} toxic {} to proxy {proxy}", created.kind, created.name);
        self.refresh().await;
        Ok(created)
    }

    pub async fn update_toxic(
        &self,
        proxy: &str,
        toxic: &str,
        update: ToxicUpdate,
    ) -> Result<Toxic, WardenError> {
        let updated = self.client.update_toxic(proxy, toxic, &update).await?;
        self.refresh().await;
        Ok(updated)
    }

    pub async fn delete_toxic(&self, proxy: &str, toxic: &str) -> Result<(), WardenError> {
        self.client.delete_toxic(proxy, toxic).await?;
        info!("Removed toxic {toxic} from proxy {proxy}");
        self.refresh().await;
        Ok(())
    }

    /// Enable all proxies and remove all toxics
    pub async fn reset(&self) -> Result<(), WardenError> {
        self.client.reset().await?;
        info!("Reset all proxies");
        self.refresh().await;
        Ok(())
    }

    /// Wait for a pending recovery, then stop the owned server, if any
    pub async fn shutdown(&self) {
        let recovery = self.lock_recovery().take();
        if let Some(task) = recovery {
            debug!("Waiting for pending toxiproxy restart");
            if let Err(e) = task.await {
                warn!("Toxiproxy restart task failed: {e}");
            }
        }

        if self.supervisor.owns_process() {
            info!("Shutting down toxiproxy server");
            self.stop().await;
        }
    }

    /// Restart the server off the caller's path. At most one restart is
    /// in flight.
    fn recover(&self) {
        let mut recovery = self.lock_recovery();
        if recovery.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Toxiproxy restart already in progress");
            return;
        }

        let supervisor = self.supervisor.clone();
        let cache = self.cache.clone();
        *recovery = Some(tokio::spawn(async move {
            let outcome = supervisor.restart().await;
            if outcome.is_success() {
                cache.sync().await;
            }
            debug!("Restart after failed proxy creation: {outcome:?}");
        }));
    }

    fn lock_recovery(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.recovery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn refresh(&self) {
        if !self.cache.sync().await {
            debug!("Proxy registry not refreshed");
        }
    }
}
