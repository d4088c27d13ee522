//! Configuration for serving and connecting.
//!
//! Loads from JSON strings (file IO left to the app). Defaults mirror the
//! zero-config behavior: unbounded budgets, eight connection attempts with
//! a two-second doubling backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Budgets and policy for one serving session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Maximum environment timesteps to serve; `None` means unbounded.
    #[serde(default)]
    pub timestep_limit: Option<u64>,
    /// Wall-clock budget in seconds; `None` means unbounded.
    #[serde(default)]
    pub wallclock_limit: Option<f64>,
    /// Reject ill-timed resets instead of honoring them.
    #[serde(default)]
    pub ignore_reset: bool,
}

impl ServeConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Wall-clock budget as a duration.
    pub fn wallclock(&self) -> Option<Duration> {
        self.wallclock_limit.map(Duration::from_secs_f64)
    }
}

/// Client connection retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Connection attempts before giving up.
    #[serde(default = "default_tries")]
    pub tries: u32,
    /// First retry delay in seconds; doubles after every failed attempt.
    #[serde(default = "default_backoff")]
    pub backoff: f64,
}

fn default_tries() -> u32 {
    8
}

fn default_backoff() -> f64 {
    2.0
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            tries: default_tries(),
            backoff: default_backoff(),
        }
    }
}

impl ConnectConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// First retry delay as a duration.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.backoff)
    }
}
