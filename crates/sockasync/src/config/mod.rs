//! Engine Configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use sockasync::config::EngineConfig;
//!
//! let config = EngineConfig::from_env()
//!     .completion_workers(4)
//!     .dispatch_threads(2);
//! config.validate()?;
//! ```

pub mod defaults;

use sockasync_core::env::{env_get, env_get_bool};
use std::time::Duration;

/// Engine configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Completion pool worker threads
    pub completion_workers: usize,
    /// Reactor dispatch threads
    pub dispatch_threads: usize,
    /// Events fetched per reactor wait
    pub max_events: usize,
    /// Reactor wait timeout
    pub wait_timeout: Duration,
    /// Idle completion worker park timeout
    pub park_timeout: Duration,
    /// New sockets try a blocking close before the abortive one
    pub blocking_close: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// min(8, max(2, nproc/2))
fn auto_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    (cpus / 2).max(2).min(8)
}

fn resolve_workers(n: usize) -> usize {
    if n == 0 {
        auto_workers()
    } else {
        n
    }
}

impl EngineConfig {
    /// Create config from defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SOCKASYNC_COMPLETION_WORKERS` - Completion pool size (0 = auto)
    /// - `SOCKASYNC_DISPATCH_THREADS` - Reactor dispatch threads
    /// - `SOCKASYNC_MAX_EVENTS` - Events per reactor wait
    /// - `SOCKASYNC_WAIT_TIMEOUT_MS` - Reactor wait timeout in milliseconds
    /// - `SOCKASYNC_PARK_TIMEOUT_MS` - Worker park timeout in milliseconds
    /// - `SOCKASYNC_BLOCKING_CLOSE` - Blocking close eligibility (0/1)
    pub fn from_env() -> Self {
        Self {
            completion_workers: resolve_workers(env_get(
                "SOCKASYNC_COMPLETION_WORKERS",
                defaults::COMPLETION_WORKERS,
            )),
            dispatch_threads: env_get("SOCKASYNC_DISPATCH_THREADS", defaults::DISPATCH_THREADS),
            max_events: env_get("SOCKASYNC_MAX_EVENTS", defaults::MAX_EVENTS),
            wait_timeout: Duration::from_millis(env_get(
                "SOCKASYNC_WAIT_TIMEOUT_MS",
                defaults::WAIT_TIMEOUT_MS,
            )),
            park_timeout: Duration::from_millis(env_get(
                "SOCKASYNC_PARK_TIMEOUT_MS",
                defaults::PARK_TIMEOUT_MS,
            )),
            blocking_close: env_get_bool("SOCKASYNC_BLOCKING_CLOSE", defaults::BLOCKING_CLOSE),
        }
    }

    /// Create config with library defaults only (no env override).
    pub fn new() -> Self {
        Self {
            completion_workers: resolve_workers(defaults::COMPLETION_WORKERS),
            dispatch_threads: defaults::DISPATCH_THREADS,
            max_events: defaults::MAX_EVENTS,
            wait_timeout: Duration::from_millis(defaults::WAIT_TIMEOUT_MS),
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            blocking_close: defaults::BLOCKING_CLOSE,
        }
    }

    // Builder methods

    pub fn completion_workers(mut self, n: usize) -> Self {
        self.completion_workers = n;
        self
    }

    pub fn dispatch_threads(mut self, n: usize) -> Self {
        self.dispatch_threads = n;
        self
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    pub fn wait_timeout(mut self, d: Duration) -> Self {
        self.wait_timeout = d;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn blocking_close(mut self, enable: bool) -> Self {
        self.blocking_close = enable;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.completion_workers == 0 {
            return Err(ConfigError::InvalidValue("completion_workers must be > 0"));
        }
        if self.completion_workers > 64 {
            return Err(ConfigError::InvalidValue("completion_workers must be <= 64"));
        }
        if self.dispatch_threads == 0 {
            return Err(ConfigError::InvalidValue("dispatch_threads must be > 0"));
        }
        if self.max_events == 0 {
            return Err(ConfigError::InvalidValue("max_events must be > 0"));
        }
        if self.max_events > i32::MAX as usize {
            return Err(ConfigError::InvalidValue("max_events must fit in an i32"));
        }
        if self.wait_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("wait_timeout must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("sockasync Configuration:");
        eprintln!("  completion_workers:  {}", self.completion_workers);
        eprintln!("  dispatch_threads:    {}", self.dispatch_threads);
        eprintln!("  max_events:          {}", self.max_events);
        eprintln!("  wait_timeout:        {:?}", self.wait_timeout);
        eprintln!("  park_timeout:        {:?}", self.park_timeout);
        eprintln!("  blocking_close:      {}", self.blocking_close);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for sockasync_core::CoreError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidValue(msg) => sockasync_core::CoreError::InvalidConfig(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env() {
        let config = EngineConfig::from_env();
        assert!(config.completion_workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_new_uses_auto_workers() {
        let config = EngineConfig::new();
        assert!((2..=8).contains(&config.completion_workers));
        assert_eq!(config.dispatch_threads, defaults::DISPATCH_THREADS);
        assert!(config.blocking_close);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .completion_workers(3)
            .dispatch_threads(2)
            .wait_timeout(Duration::from_millis(5))
            .blocking_close(false);

        assert_eq!(config.completion_workers, 3);
        assert_eq!(config.dispatch_threads, 2);
        assert_eq!(config.wait_timeout, Duration::from_millis(5));
        assert!(!config.blocking_close);
    }

    #[test]
    fn test_validation() {
        assert!(EngineConfig::new().completion_workers(0).validate().is_err());
        assert!(EngineConfig::new().completion_workers(1000).validate().is_err());
        assert!(EngineConfig::new().dispatch_threads(0).validate().is_err());
        assert_eq!(
            EngineConfig::new().max_events(0).validate(),
            Err(ConfigError::InvalidValue("max_events must be > 0"))
        );
        assert!(EngineConfig::new().wait_timeout(Duration::ZERO).validate().is_err());
    }
}
