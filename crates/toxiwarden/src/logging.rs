use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging setup for the binary. `RUST_LOG`, when set, overrides `level`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|level| !level.trim().is_empty()) {
            config.level = level.trim().to_ascii_lowercase();
        }
        if lookup(ENV_LOG_FORMAT).is_some_and(|format| format.trim().eq_ignore_ascii_case("json")) {
            config.format = LogFormat::Json;
        }
        config
    }
}

/// Install the global tracing subscriber. Keeps whatever subscriber is
/// already installed, so calling it more than once is harmless.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level: {}", config.level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_line_number(true);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    match installed {
        // Lost a race against another initializer
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        Err(e) => Err(anyhow::anyhow!("Failed to install tracing subscriber: {e}")),
        Ok(()) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::from_lookup(|_| None);
        assert_eq!(config, LoggingConfig::default());
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_from_lookup() {
        let config = LoggingConfig::from_lookup(|key| match key {
            ENV_LOG_LEVEL => Some("DEBUG".to_string()),
            ENV_LOG_FORMAT => Some("json".to_string()),
            _ => None,
        });
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);

        let config = LoggingConfig::from_lookup(|key| match key {
            ENV_LOG_LEVEL => Some("  ".to_string()),
            ENV_LOG_FORMAT => Some("text".to_string()),
            _ => None,
        });
        assert_eq!(config, LoggingConfig::default());
    }

    #[test]
    fn test_init_logging_twice() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            format: LogFormat::Json,
        };
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&LoggingConfig::default()).is_ok());
    }
}
