use toxiwarden_core::ProcessLauncherFactory;
use tracing::info;

#[cfg(unix)]
pub type PlatformLauncher = toxiwarden_unix::UnixProcessLauncher;

#[cfg(not(unix))]
compile_error!("Unsupported platform: only Unix is currently supported");

/// Platform-independent factory that selects the launcher at compile time
pub struct PlatformLauncherFactory;

impl ProcessLauncherFactory for PlatformLauncherFactory {
    type Launcher = PlatformLauncher;

    fn create_launcher() -> PlatformLauncher {
        info!("Creating {} process launcher", Self::platform_name());
        toxiwarden_unix::UnixProcessLauncherFactory::create_launcher()
    }

    fn platform_name() -> &'static str {
        toxiwarden_unix::UnixProcessLauncherFactory::platform_name()
    }
}
