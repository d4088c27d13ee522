//! Remote environment driver.
//!
//! Connects to a serving bridge with exponential backoff, consumes the
//! channel description, and exposes gym-style `step`/`reset` calls. Any
//! taxonomy error raised by the bridge propagates to the caller unchanged;
//! non-terminal ones (ill-timed reset) leave the session usable.
//!
//! The client arms no wall-clock timeout of its own; budgets live on the
//! server.

use std::io;
use std::path::Path;

use tokio::time::sleep;
use tracing::{debug, info};

use envbridge_shared::bridge::{
    Bridge, CH_ACTION, CH_DONE, CH_OBSERVATION, CH_RESET, CH_REWARD,
};
use envbridge_shared::channel::ChannelValue;
use envbridge_shared::config::ConnectConfig;
use envbridge_shared::env::StepOutcome;
use envbridge_shared::error::{BridgeError, Result};
use envbridge_shared::space::Space;

/// Client-side handle on a served environment.
pub struct RemoteEnv {
    bridge: Bridge,
    action_space: Space,
    observation_space: Space,
}

impl RemoteEnv {
    /// Connects to the rendezvous directory, retrying while the socket path
    /// does not exist yet.
    pub async fn connect(base: impl AsRef<Path>, cfg: &ConnectConfig) -> Result<Self> {
        let mut bridge = Bridge::new(base);
        let mut delay = cfg.initial_backoff();
        for attempt in 1..=cfg.tries.max(1) {
            match bridge.connect().await {
                Ok(()) => break,
                Err(BridgeError::Io(e))
                    if e.kind() == io::ErrorKind::NotFound && attempt < cfg.tries =>
                {
                    debug!(attempt, delay_secs = delay.as_secs_f64(), "rendezvous not ready");
                    sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
        bridge.configure_client().await?;
        let action_space = bridge.unwrap(CH_ACTION)?;
        let observation_space = bridge.unwrap(CH_OBSERVATION)?;
        info!(?action_space, ?observation_space, "connected");
        Ok(Self {
            bridge,
            action_space,
            observation_space,
        })
    }

    pub fn action_space(&self) -> &Space {
        &self.action_space
    }

    pub fn observation_space(&self) -> &Space {
        &self.observation_space
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// One environment step: writes the action, exchanges updates, and
    /// returns observation, reward, done, and an empty info map.
    pub async fn step(&mut self, action: ChannelValue) -> Result<StepOutcome> {
        self.bridge.set_value(CH_ACTION, action)?;
        self.bridge.send().await?;
        self.bridge.recv().await?;

        let observation = self.observation()?;
        let reward = match self.bridge.value(CH_REWARD)? {
            Some(ChannelValue::Float(reward)) => reward,
            _ => 0.0,
        };
        let done = matches!(self.bridge.value(CH_DONE)?, Some(ChannelValue::Bool(true)));
        Ok(StepOutcome::new(observation, reward, done))
    }

    /// Starts a new episode and returns its first observation.
    pub async fn reset(&mut self) -> Result<ChannelValue> {
        self.bridge.set_value(CH_RESET, ChannelValue::Bool(true))?;
        self.bridge.send().await?;
        self.bridge.recv().await?;
        self.observation()
    }

    fn observation(&self) -> Result<ChannelValue> {
        self.bridge
            .value(CH_OBSERVATION)?
            .ok_or_else(|| BridgeError::Protocol("no observation received".to_string()))
    }

    pub async fn close(&mut self) {
        self.bridge.close(None, None).await;
    }
}
