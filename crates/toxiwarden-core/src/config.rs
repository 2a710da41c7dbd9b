use crate::error::WardenError;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variables understood by [`SupervisorOptions::from_env`]
pub const ENV_HOST: &str = "TOXIPROXY_HOST";
pub const ENV_PORT: &str = "TOXIPROXY_PORT";
pub const ENV_SERVER: &str = "TOXIPROXY_SERVER";
pub const ENV_CLI: &str = "TOXIPROXY_CLI";
pub const ENV_AUTO_START: &str = "AUTO_START_SERVER";

/// Start-up polling policy: how often and how many times the supervisor
/// probes a freshly spawned server before giving up on it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Delay between two readiness probes (in milliseconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Total number of readiness probes after the spawn
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryConfig {
    /// Probe often and give up quickly, useful when the server is local and fast
    pub fn impatient() -> Self {
        Self {
            interval_ms: 100,
            max_attempts: 5,
        }
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.max_attempts == 0 {
            return Err(WardenError::configuration(
                "max_attempts must allow at least one readiness probe",
            ));
        }

        if self.interval_ms == 0 {
            return Err(WardenError::configuration("interval_ms must be positive"));
        }

        if self.interval_ms > 60_000 {
            return Err(WardenError::configuration(
                "interval_ms should not exceed 60 seconds",
            ));
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Upper bound on the time spent polling a spawned server
    pub fn max_wait(&self) -> Duration {
        self.interval() * self.max_attempts
    }
}

/// Immutable supervisor configuration, captured once at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into))]
#[serde(rename_all = "camelCase")]
pub struct SupervisorOptions {
    /// Hostname the managed server binds to and is reached at
    #[builder(default = "default_host()")]
    #[serde(default = "default_host")]
    pub host: String,

    #[builder(default = "default_port()")]
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path (or `PATH` lookup name) of the toxiproxy server binary
    #[builder(default = "default_server_binary()")]
    #[serde(default = "default_server_binary")]
    pub server_binary: String,

    /// Path (or `PATH` lookup name) of the toxiproxy CLI binary
    #[builder(default = "default_cli_binary()")]
    #[serde(default = "default_cli_binary")]
    pub cli_binary: String,

    #[builder(default = "true")]
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,

    /// Bound on every single request sent to the control API (in milliseconds)
    #[builder(default = "default_request_timeout_ms()")]
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[builder(default)]
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_binary: default_server_binary(),
            cli_binary: default_cli_binary(),
            auto_start: default_auto_start(),
            request_timeout_ms: default_request_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl SupervisorOptions {
    pub fn builder() -> SupervisorOptionsBuilder {
        SupervisorOptionsBuilder::default()
    }

    /// Read the process-wide defaults from the environment
    pub fn from_env() -> Result<Self, WardenError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build options from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, WardenError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(host) = lookup(ENV_HOST) {
            options.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            options.port = port.trim().parse().map_err(|_| {
                WardenError::configuration(format!("{ENV_PORT} is not a valid port: {port}"))
            })?;
        }
        if let Some(server) = lookup(ENV_SERVER) {
            options.server_binary = server;
        }
        if let Some(cli) = lookup(ENV_CLI) {
            options.cli_binary = cli;
        }
        if let Some(flag) = lookup(ENV_AUTO_START) {
            options.auto_start = parse_auto_start(&flag);
        }

        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), WardenError> {
        if self.host.trim().is_empty() {
            return Err(WardenError::configuration("host must not be empty"));
        }
        if self.port == 0 {
            return Err(WardenError::configuration("port must not be 0"));
        }
        if self.server_binary.trim().is_empty() {
            return Err(WardenError::configuration("server_binary must not be empty"));
        }
        if self.cli_binary.trim().is_empty() {
            return Err(WardenError::configuration("cli_binary must not be empty"));
        }
        if self.request_timeout_ms == 0 {
            return Err(WardenError::configuration(
                "request_timeout_ms must be positive",
            ));
        }
        self.retry.validate()
    }

    /// Base URL of the managed server's control API
    pub fn base_url(&self) -> String {
        // IPv6 literals need brackets in a URL authority
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }

    /// Arguments the server binary is launched with
    pub fn server_args(&self) -> Vec<String> {
        vec![
            "-host".to_string(),
            self.host.clone(),
            "-port".to_string(),
            self.port.to_string(),
        ]
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Auto-start stays on unless explicitly switched off
fn parse_auto_start(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "false" | "0" | "no" | "off"
    )
}

// Default value functions for serde and the builder
fn default_interval_ms() -> u64 {
    500
}
fn default_max_attempts() -> u32 {
    10
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    8474
}
fn default_server_binary() -> String {
    "toxiproxy-server".to_string()
}
fn default_cli_binary() -> String {
    "toxiproxy-cli".to_string()
}
fn default_auto_start() -> bool {
    true
}
fn default_request_timeout_ms() -> u64 {
    2_000
}
