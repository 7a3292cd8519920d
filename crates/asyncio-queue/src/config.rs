//! Completion queue configuration.
//!
//! Library defaults with runtime environment overrides.
//!
//! ```rust,ignore
//! use asyncio_queue::QueueConfig;
//!
//! let config = QueueConfig::from_env()
//!     .max_pending(1024)
//!     .poll_timeout(Some(Duration::from_millis(100)));
//! ```

use asyncio_core::env::{env_get, env_get_str};
use asyncio_core::error::AsyncIoError;
use std::time::Duration;

pub mod defaults {
    /// 0 = the poll thread blocks until a completion or a shutdown signal.
    pub const POLL_TIMEOUT_MS: u64 = 0;
    pub const MAX_PENDING: usize = 65536;
    pub const THREAD_NAME: &str = "asyncio-poll";
}

/// Completion queue configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Upper bound on one blocking wait of the poll thread. `None` waits
    /// until a completion arrives or shutdown signals the queue.
    pub poll_timeout: Option<Duration>,
    /// Registered-but-unresolved requests before issuance is refused.
    pub max_pending: usize,
    /// Name of the poll thread.
    pub thread_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl QueueConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `ASYNCIO_POLL_TIMEOUT_MS` - poll wait bound in ms (0 = unbounded)
    /// - `ASYNCIO_MAX_PENDING` - max in-flight requests per queue
    /// - `ASYNCIO_THREAD_NAME` - poll thread name
    pub fn from_env() -> Self {
        let timeout_ms = env_get("ASYNCIO_POLL_TIMEOUT_MS", defaults::POLL_TIMEOUT_MS);
        Self {
            poll_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
            max_pending: env_get("ASYNCIO_MAX_PENDING", defaults::MAX_PENDING),
            thread_name: env_get_str("ASYNCIO_THREAD_NAME", defaults::THREAD_NAME),
        }
    }

    pub fn poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn max_pending(mut self, n: usize) -> Self {
        self.max_pending = n;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pending == 0 {
            return Err(ConfigError::InvalidValue("max_pending must be > 0"));
        }
        if self.max_pending > u32::MAX as usize {
            return Err(ConfigError::InvalidValue("max_pending must fit in 32 bits"));
        }
        if self.poll_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidValue("poll_timeout must be non-zero"));
        }
        if self.thread_name.is_empty() || self.thread_name.contains('\0') {
            return Err(ConfigError::InvalidValue("thread_name must be non-empty, no NUL"));
        }
        Ok(())
    }
}

/// Configuration error
#[derive(Debug, Clone)]
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

impl From<ConfigError> for AsyncIoError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidValue(msg) => AsyncIoError::InvalidArgument(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env() {
        let config = QueueConfig::from_env();
        assert!(config.max_pending >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = QueueConfig::from_env()
            .max_pending(8)
            .poll_timeout(Some(Duration::from_millis(5)))
            .thread_name("poll-test");
        assert_eq!(config.max_pending, 8);
        assert_eq!(config.poll_timeout, Some(Duration::from_millis(5)));
        assert_eq!(config.thread_name, "poll-test");
    }

    #[test]
    fn test_validation() {
        assert!(QueueConfig::from_env().max_pending(0).validate().is_err());
        assert!(QueueConfig::from_env().poll_timeout(Some(Duration::ZERO)).validate().is_err());
        assert!(QueueConfig::from_env().thread_name("").validate().is_err());
        let err: AsyncIoError = QueueConfig::from_env().max_pending(0).validate().unwrap_err().into();
        assert!(matches!(err, AsyncIoError::InvalidArgument(_)));
    }
}
