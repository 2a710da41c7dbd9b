use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The supervisor's belief about whether the managed server is up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LivenessFlag {
    #[default]
    Unknown,
    ConfirmedRunning,
    ConfirmedStopped,
}

#[derive(Debug, Default)]
struct LivenessState {
    flag: LivenessFlag,
    /// Bumped whenever the flag is forced; probe results taken under an
    /// older epoch are discarded.
    epoch: u64,
    /// Set when the flag was forced to stopped by an observed exit or an
    /// explicit stop, i.e. without a probe.
    forced: bool,
}

/// Shared liveness flag.
///
/// Exit observations always win over probe results: a probe that started
/// before an exit was observed cannot overwrite the forced
/// `ConfirmedStopped`.
#[derive(Debug, Default)]
pub struct LivenessCell {
    state: Mutex<LivenessState>,
}

impl LivenessCell {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LivenessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn flag(&self) -> LivenessFlag {
        self.lock().flag
    }

    /// Answer that needs no probe: running once confirmed, stopped once an
    /// exit or stop forced it
    pub fn settled(&self) -> Option<bool> {
        let state = self.lock();
        match state.flag {
            LivenessFlag::ConfirmedRunning => Some(true),
            LivenessFlag::ConfirmedStopped if state.forced => Some(false),
            _ => None,
        }
    }

    /// Epoch to hand back to [`LivenessCell::record_probe`]
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Apply a probe result taken at `epoch` and return the resulting flag
    pub fn record_probe(&self, epoch: u64, alive: bool) -> LivenessFlag {
        let mut state = self.lock();
        if state.epoch == epoch {
            state.flag = if alive {
                LivenessFlag::ConfirmedRunning
            } else {
                LivenessFlag::ConfirmedStopped
            };
            state.forced = false;
        }
        state.flag
    }

    /// An exit was observed or the server was stopped on purpose
    pub fn force_stopped(&self) {
        let mut state = self.lock();
        state.flag = LivenessFlag::ConfirmedStopped;
        state.forced = true;
        state.epoch += 1;
    }

    /// Forget everything known about the server
    pub fn reset(&self) {
        let mut state = self.lock();
        state.flag = LivenessFlag::Unknown;
        state.forced = false;
        state.epoch += 1;
    }

    /// The server stopped answering although it was believed running.
    /// Ignored when the flag moved on since `epoch`.
    pub fn demote(&self, epoch: u64) {
        let mut state = self.lock();
        if state.epoch == epoch && state.flag == LivenessFlag::ConfirmedRunning {
            state.flag = LivenessFlag::Unknown;
            state.epoch += 1;
        }
    }
}
