#![cfg(unix)]

mod unix_process_manager;

pub use unix_process_manager::{UnixProcessHandle, UnixProcessLauncher};

use toxiwarden_core::ProcessLauncherFactory;

pub struct UnixProcessLauncherFactory;

impl ProcessLauncherFactory for UnixProcessLauncherFactory {
    type Launcher = UnixProcessLauncher;

    fn create_launcher() -> UnixProcessLauncher {
        UnixProcessLauncher::new()
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
