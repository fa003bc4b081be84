//! Meeting client configuration.
//!
//! Configuration is loaded from environment variables. Every value has a
//! default; malformed values are rejected rather than silently replaced.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default for forcing TCP ICE candidates on transport creation.
pub const DEFAULT_FORCE_TCP: bool = false;

/// Default for starting the camera producer as part of a join.
pub const DEFAULT_START_VIDEO_ON_JOIN: bool = true;

/// Default outbound ring timeout in seconds.
pub const DEFAULT_RING_TIMEOUT_SECONDS: u64 = 45;

/// Default for transport reconnection.
pub const DEFAULT_RECONNECT_ENABLED: bool = true;

/// Default maximum consecutive reconnection attempts per transport.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Default base delay for reconnection backoff in milliseconds.
pub const DEFAULT_RECONNECT_BACKOFF_BASE_MS: u64 = 1_000;

/// Default maximum reconnection backoff delay in milliseconds.
pub const DEFAULT_RECONNECT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default initial layout mode (focus when false).
pub const DEFAULT_GRID_MODE: bool = false;

/// Bounded exponential backoff for transport reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Whether dead transports are re-created at all.
    pub enabled: bool,
    /// Attempts allowed before the failure becomes fatal.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub backoff_base: Duration,
    /// Upper bound for a single delay.
    pub backoff_max: Duration,
}

impl ReconnectPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// `base * 2^(attempt-1)`, capped at `backoff_max`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let mut delay = self.backoff_base;
        for _ in 1..attempt {
            delay = delay.saturating_mul(2).min(self.backoff_max);
        }
        delay.min(self.backoff_max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_RECONNECT_ENABLED,
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_MAX_MS),
        }
    }
}

/// Meeting client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Ask the server for TCP-only transports (`forceTcp`).
    pub force_tcp: bool,

    /// Start the camera producer during join (audio always starts).
    pub start_video_on_join: bool,

    /// How long an outbound call rings before giving up.
    pub ring_timeout: Duration,

    /// Transport reconnection policy.
    pub reconnect: ReconnectPolicy,

    /// Start in grid layout instead of single-peer focus.
    pub grid_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            force_tcp: DEFAULT_FORCE_TCP,
            start_video_on_join: DEFAULT_START_VIDEO_ON_JOIN,
            ring_timeout: Duration::from_secs(DEFAULT_RING_TIMEOUT_SECONDS),
            reconnect: ReconnectPolicy::default(),
            grid_mode: DEFAULT_GRID_MODE,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let force_tcp = parse_var(vars, "MEETING_FORCE_TCP", DEFAULT_FORCE_TCP)?;

        let start_video_on_join = parse_var(
            vars,
            "MEETING_START_VIDEO_ON_JOIN",
            DEFAULT_START_VIDEO_ON_JOIN,
        )?;

        let ring_timeout_seconds: u64 = parse_var(
            vars,
            "MEETING_RING_TIMEOUT_SECONDS",
            DEFAULT_RING_TIMEOUT_SECONDS,
        )?;
        if ring_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "MEETING_RING_TIMEOUT_SECONDS must be greater than zero".to_string(),
            ));
        }

        let reconnect_enabled =
            parse_var(vars, "MEETING_RECONNECT_ENABLED", DEFAULT_RECONNECT_ENABLED)?;

        let max_attempts: u32 = parse_var(
            vars,
            "MEETING_RECONNECT_MAX_ATTEMPTS",
            DEFAULT_RECONNECT_MAX_ATTEMPTS,
        )?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "MEETING_RECONNECT_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let backoff_base_ms: u64 = parse_var(
            vars,
            "MEETING_RECONNECT_BACKOFF_BASE_MS",
            DEFAULT_RECONNECT_BACKOFF_BASE_MS,
        )?;
        let backoff_max_ms: u64 = parse_var(
            vars,
            "MEETING_RECONNECT_BACKOFF_MAX_MS",
            DEFAULT_RECONNECT_BACKOFF_MAX_MS,
        )?;
        if backoff_base_ms > backoff_max_ms {
            return Err(ConfigError::InvalidValue(format!(
                "MEETING_RECONNECT_BACKOFF_BASE_MS ({backoff_base_ms}) exceeds \
                 MEETING_RECONNECT_BACKOFF_MAX_MS ({backoff_max_ms})"
            )));
        }

        let grid_mode = parse_var(vars, "MEETING_GRID_MODE", DEFAULT_GRID_MODE)?;

        Ok(Config {
            force_tcp,
            start_video_on_join,
            ring_timeout: Duration::from_secs(ring_timeout_seconds),
            reconnect: ReconnectPolicy {
                enabled: reconnect_enabled,
                max_attempts,
                backoff_base: Duration::from_millis(backoff_base_ms),
                backoff_max: Duration::from_millis(backoff_max_ms),
            },
            grid_mode,
        })
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{name} has an invalid value: {raw:?}"))
        }),
    }
}
