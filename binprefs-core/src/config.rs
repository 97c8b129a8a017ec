//! Store configuration
//!
//! Configuration is loaded from environment variables with sensible defaults,
//! or assembled with the `with_*` builder methods.

use crate::{ConfigError, PrefsResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// POLICY ENUMS
// ============================================================================

/// What happens to queued tasks when a store's executor shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShutdownPolicy {
    /// Run every queued task before the worker exits.
    #[default]
    Drain,
    /// Complete queued tasks with a discarded outcome without running them.
    Discard,
}

impl ShutdownPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownPolicy::Drain => "drain",
            ShutdownPolicy::Discard => "discard",
        }
    }
}

impl fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShutdownPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drain" => Ok(ShutdownPolicy::Drain),
            "discard" => Ok(ShutdownPolicy::Discard),
            _ => Err(ConfigError::InvalidValue {
                field: "shutdown_policy".to_string(),
                value: s.to_string(),
                reason: "expected 'drain' or 'discard'".to_string(),
            }),
        }
    }
}

/// How remote change events are reconciled with the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Apply an event only if its version is not older than the cached one.
    #[default]
    LastWriterWins,
    /// Apply events in the order they arrive.
    ArrivalOrder,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::LastWriterWins => "last-writer-wins",
            ConflictPolicy::ArrivalOrder => "arrival-order",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "last-writer-wins" | "lww" => Ok(ConflictPolicy::LastWriterWins),
            "arrival-order" | "arrival" => Ok(ConflictPolicy::ArrivalOrder),
            _ => Err(ConfigError::InvalidValue {
                field: "conflict_policy".to_string(),
                value: s.to_string(),
                reason: "expected 'last-writer-wins' or 'arrival-order'".to_string(),
            }),
        }
    }
}

// ============================================================================
// STORE CONFIGURATION
// ============================================================================

/// Per-store runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Upper bound on waiting for the store lock (in-process and cross-process).
    pub lock_timeout: Duration,

    /// How often a contended cross-process lock is retried.
    pub lock_poll_interval: Duration,

    /// Fate of queued tasks when the store's executor shuts down.
    pub shutdown_policy: ShutdownPolicy,

    /// Reconciliation rule for remote events.
    pub conflict_policy: ConflictPolicy,

    /// Whether to fsync the store directory after each rename/delete.
    pub sync_directory: bool,

    /// Whether to load every key into the cache when the store opens.
    pub warm_up: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(10),
            lock_poll_interval: Duration::from_millis(5),
            shutdown_policy: ShutdownPolicy::Drain,
            conflict_policy: ConflictPolicy::LastWriterWins,
            sync_directory: true,
            warm_up: true,
        }
    }
}

impl StoreConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a StoreConfig from environment variables.
    ///
    /// Environment variables:
    /// - `BINPREFS_LOCK_TIMEOUT_MS`: lock wait bound (default: 10000)
    /// - `BINPREFS_LOCK_POLL_MS`: cross-process lock retry interval (default: 5)
    /// - `BINPREFS_SHUTDOWN_POLICY`: "drain" or "discard" (default: drain)
    /// - `BINPREFS_CONFLICT_POLICY`: "last-writer-wins" or "arrival-order"
    /// - `BINPREFS_SYNC_DIRECTORY`: "true" or "false" (default: true)
    /// - `BINPREFS_WARM_UP`: "true" or "false" (default: true)
    ///
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> PrefsResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> PrefsResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("BINPREFS_LOCK_TIMEOUT_MS") {
            config.lock_timeout = Duration::from_millis(parse_u64("lock_timeout", &raw)?);
        }
        if let Some(raw) = lookup("BINPREFS_LOCK_POLL_MS") {
            config.lock_poll_interval = Duration::from_millis(parse_u64("lock_poll_interval", &raw)?);
        }
        if let Some(raw) = lookup("BINPREFS_SHUTDOWN_POLICY") {
            config.shutdown_policy = raw.parse()?;
        }
        if let Some(raw) = lookup("BINPREFS_CONFLICT_POLICY") {
            config.conflict_policy = raw.parse()?;
        }
        if let Some(raw) = lookup("BINPREFS_SYNC_DIRECTORY") {
            config.sync_directory = parse_bool("sync_directory", &raw)?;
        }
        if let Some(raw) = lookup("BINPREFS_WARM_UP") {
            config.warm_up = parse_bool("warm_up", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the cross-process lock poll interval.
    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    /// Set the shutdown policy.
    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }

    /// Set the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Enable or disable directory fsync after renames.
    pub fn with_sync_directory(mut self, enabled: bool) -> Self {
        self.sync_directory = enabled;
        self
    }

    /// Enable or disable eager cache warm-up.
    pub fn with_warm_up(mut self, enabled: bool) -> Self {
        self.warm_up = enabled;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - lock_timeout > 0
    /// - lock_poll_interval > 0
    /// - lock_poll_interval <= lock_timeout
    pub fn validate(&self) -> PrefsResult<()> {
        if self.lock_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "lock_timeout".to_string(),
                value: format!("{:?}", self.lock_timeout),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if self.lock_poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "lock_poll_interval".to_string(),
                value: format!("{:?}", self.lock_poll_interval),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if self.lock_poll_interval > self.lock_timeout {
            return Err(ConfigError::InvalidValue {
                field: "lock_poll_interval".to_string(),
                value: format!("{:?}", self.lock_poll_interval),
                reason: "must not exceed lock_timeout".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn parse_u64(field: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: raw.to_string(),
        reason: "expected an unsigned integer".to_string(),
    })
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            reason: "expected 'true' or 'false'".to_string(),
        }),
    }
}
