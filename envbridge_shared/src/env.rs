//! Environment collaborator contract.
//!
//! The bridge never looks inside an environment: it only needs the two
//! spaces to lay out channels, and `reset`/`step` to drive episodes.
//! Environments are synchronous; stepping is CPU work, not IO.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::channel::ChannelValue;
use crate::space::Space;

/// Result of a single environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub observation: ChannelValue,
    pub reward: f64,
    pub done: bool,
    pub info: HashMap<String, Json>,
}

impl StepOutcome {
    /// An outcome with an empty info map.
    pub fn new(observation: ChannelValue, reward: f64, done: bool) -> Self {
        Self {
            observation,
            reward,
            done,
            info: HashMap::new(),
        }
    }
}

/// A steppable environment served over the bridge.
pub trait Environment {
    fn action_space(&self) -> Space;
    fn observation_space(&self) -> Space;

    /// Starts a fresh episode and returns its first observation.
    fn reset(&mut self) -> ChannelValue;

    /// Advances one timestep under `action`.
    fn step(&mut self, action: ChannelValue) -> StepOutcome;

    /// Releases environment resources; called once when serving ends.
    fn close(&mut self) {}
}
