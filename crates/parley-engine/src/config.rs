use std::str::FromStr;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Tunables for the engine and its background tasks.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Credits a user record starts with on first interaction.
    pub starting_credits: i64,
    /// How often the reaper sweeps for idle sessions.
    pub reaper_interval: Duration,
    /// Sessions with no relayed message for this long are ended.
    pub session_idle_timeout: Duration,
    /// How often the rescan worker retries users left searching.
    pub rescan_interval: Duration,
    pub rescan_batch: u32,
    /// Refund the match cost when a match is voided for failed delivery.
    pub refund_on_cancel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            starting_credits: parley_db::DEFAULT_STARTING_CREDITS,
            reaper_interval: Duration::from_secs(60),
            session_idle_timeout: Duration::from_secs(3600),
            rescan_interval: Duration::from_secs(2),
            rescan_batch: 50,
            refund_on_cancel: true,
        }
    }
}

impl EngineConfig {
    /// Read `PARLEY_*` variables, falling back to the defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            starting_credits: env_or("PARLEY_DEFAULT_CREDITS", defaults.starting_credits)?,
            reaper_interval: secs_or("PARLEY_REAPER_INTERVAL_SECS", defaults.reaper_interval)?,
            session_idle_timeout: secs_or(
                "PARLEY_SESSION_IDLE_SECS",
                defaults.session_idle_timeout,
            )?,
            rescan_interval: secs_or("PARLEY_RESCAN_INTERVAL_SECS", defaults.rescan_interval)?,
            rescan_batch: env_or("PARLEY_RESCAN_BATCH", defaults.rescan_batch)?,
            refund_on_cancel: env_or("PARLEY_REFUND_ON_CANCEL", defaults.refund_on_cancel)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.starting_credits < 0 {
            return Err(EngineError::Config("starting credits must be >= 0".into()));
        }
        if self.reaper_interval.is_zero() || self.rescan_interval.is_zero() {
            return Err(EngineError::Config("task intervals must be non-zero".into()));
        }
        if self.rescan_batch == 0 {
            return Err(EngineError::Config("rescan batch must be >= 1".into()));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn secs_or(key: &str, default: Duration) -> Result<Duration> {
    env_or(key, default.as_secs()).map(Duration::from_secs)
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| EngineError::Config(format!("{} has invalid value '{}'", key, raw)))
}
