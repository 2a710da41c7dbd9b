//! Fakes shared by the unit tests: a scripted health probe, an in-memory
//! process launcher and an axum server standing in for toxiproxy.

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use toxiwarden_core::{
    ExitCode, HealthProbe, ProcessError, ProcessEvent, ProcessEventSender, ProcessHandle,
    ProcessId, ProcessLauncher, SupervisorOptions, TerminationResult,
};

/// Answers `answer`, or while held, parks every probe until released
pub struct GatedProbe {
    answer: AtomicBool,
    held: AtomicBool,
    entered: Notify,
    released: Notify,
}

impl GatedProbe {
    pub fn new(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer: AtomicBool::new(answer),
            held: AtomicBool::new(false),
            entered: Notify::new(),
            released: Notify::new(),
        })
    }

    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Resolves once a held probe is in flight
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the held probe finish with `answer`
    pub fn release(&self, answer: bool) {
        self.answer.store(answer, Ordering::SeqCst);
        self.held.store(false, Ordering::SeqCst);
        self.released.notify_one();
    }
}

#[async_trait]
impl HealthProbe for GatedProbe {
    async fn probe(&self) -> bool {
        if self.held.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.released.notified().await;
        }
        self.answer.load(Ordering::SeqCst)
    }
}

/// Launches a real `sleep 30` whatever it is asked to run
#[cfg(unix)]
#[derive(Default)]
pub struct SleepingLauncher {
    inner: toxiwarden_unix::UnixProcessLauncher,
}

#[cfg(unix)]
#[async_trait]
impl ProcessLauncher for SleepingLauncher {
    type Handle = toxiwarden_unix::UnixProcessHandle;

    async fn launch(
        &self,
        _command: &str,
        _args: &[String],
        events: ProcessEventSender,
    ) -> Result<Self::Handle, ProcessError> {
        self.inner.launch("sleep", &["30".to_string()], events).await
    }
}

/// Answers from a fixed script, then with `fallback` forever
pub struct ScriptedProbe {
    script: Mutex<VecDeque<bool>>,
    fallback: bool,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(script: impl IntoIterator<Item = bool>, fallback: bool) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(alive: bool) -> Arc<Self> {
        Self::new([], alive)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

struct FakeLaunch {
    command: String,
    args: Vec<String>,
    events: ProcessEventSender,
    terminated: Arc<AtomicBool>,
}

#[derive(Default)]
struct FakeLauncherState {
    launches: Mutex<Vec<FakeLaunch>>,
    spawn_error: Option<String>,
    exit_on_launch: Option<ExitCode>,
}

/// Records launches instead of spawning anything. Clones share state, so a
/// test keeps one clone to drive and inspect the processes.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Arc<FakeLauncherState>,
}

impl FakeLauncher {
    pub fn failing(reason: &str) -> Self {
        Self {
            state: Arc::new(FakeLauncherState {
                spawn_error: Some(reason.to_string()),
                ..Default::default()
            }),
        }
    }

    /// Every launched process exits immediately with `code`
    pub fn exiting_with(code: ExitCode) -> Self {
        Self {
            state: Arc::new(FakeLauncherState {
                exit_on_launch: Some(code),
                ..Default::default()
            }),
        }
    }

    pub fn launch_count(&self) -> usize {
        self.state.launches.lock().unwrap().len()
    }

    pub fn command_of(&self, index: usize) -> String {
        self.state.launches.lock().unwrap()[index].command.clone()
    }

    pub fn args_of(&self, index: usize) -> Vec<String> {
        self.state.launches.lock().unwrap()[index].args.clone()
    }

    pub fn was_terminated(&self, index: usize) -> bool {
        self.state.launches.lock().unwrap()[index]
            .terminated
            .load(Ordering::SeqCst)
    }

    /// Report output or an exit as if launch `index` produced it
    pub fn emit(&self, index: usize, event: ProcessEvent) {
        let events = self.state.launches.lock().unwrap()[index].events.clone();
        let _ = events.send(event);
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    type Handle = FakeHandle;

    async fn launch(
        &self,
        command: &str,
        args: &[String],
        events: ProcessEventSender,
    ) -> Result<FakeHandle, ProcessError> {
        if let Some(reason) = &self.state.spawn_error {
            return Err(ProcessError::SpawnFailed(reason.clone()));
        }

        let terminated = Arc::new(AtomicBool::new(false));
        let mut launches = self.state.launches.lock().unwrap();
        let pid = 4000 + launches.len() as ProcessId;
        launches.push(FakeLaunch {
            command: command.to_string(),
            args: args.to_vec(),
            events: events.clone(),
            terminated: terminated.clone(),
        });

        if let Some(code) = self.state.exit_on_launch {
            let _ = events.send(ProcessEvent::Exited(code));
        }

        Ok(FakeHandle {
            pid,
            events,
            terminated,
        })
    }
}

pub struct FakeHandle {
    pid: ProcessId,
    events: ProcessEventSender,
    terminated: Arc<AtomicBool>,
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn pid(&self) -> Option<ProcessId> {
        Some(self.pid)
    }

    async fn terminate(&mut self) -> TerminationResult {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return TerminationResult::ProcessNotFound;
        }
        let _ = self.events.send(ProcessEvent::Exited(ExitCode::Signal(15)));
        TerminationResult::Success
    }
}

/// A request the stub server received
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

#[derive(Clone, Default)]
struct StubState {
    routes: Arc<Mutex<HashMap<(String, String), (StatusCode, String)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// Answers canned JSON per method and path, 404 for everything else
pub struct StubServer {
    addr: SocketAddr,
    state: StubState,
    task: JoinHandle<()>,
}

impl StubServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = StubState::default();
        let router = Router::new().fallback(answer).with_state(state.clone());

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "stub server shut down with error");
            }
        });

        Self { addr, state, task }
    }

    pub fn route(&self, method: &str, path: &str, status: u16, body: &str) -> &Self {
        let status = StatusCode::from_u16(status).unwrap();
        self.state.routes.lock().unwrap().insert(
            (method.to_string(), path.to_string()),
            (status, body.to_string()),
        );
        self
    }

    pub fn options(&self) -> SupervisorOptions {
        SupervisorOptions::builder()
            .host("127.0.0.1")
            .port(self.addr.port())
            .build()
            .unwrap()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == method && request.path == path)
            .collect()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A port nothing listens on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn answer(State(state): State<StubState>, method: Method, uri: Uri, body: Bytes) -> Response {
    let key = (method.to_string(), uri.path().to_string());
    state.requests.lock().unwrap().push(RecordedRequest {
        method: key.0.clone(),
        path: key.1.clone(),
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    let (status, payload) = state
        .routes
        .lock()
        .unwrap()
        .get(&key)
        .cloned()
        .unwrap_or((
            StatusCode::NOT_FOUND,
            r#"{"error":"not found","status":404}"#.to_string(),
        ));

    (status, [(header::CONTENT_TYPE, "application/json")], payload).into_response()
}
