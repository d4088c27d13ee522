//! Environment serving loop.
//!
//! Wraps an `Environment` behind a bridge: builds the channel set from the
//! env's spaces, listens, accepts one client, then steps the env under the
//! configured timestep and wall-clock budgets.
//!
//! Budget notes:
//! - The wall-clock deadline is computed once up front; every accept and
//!   receive runs under the remaining slice of it.
//! - A timeout or client disconnect mid-loop is terminal and carried to the
//!   peer in the close message; ill-timed resets under `ignore_reset` are
//!   relayed as non-terminal exceptions and do not consume a timestep.

use std::path::Path;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use envbridge_shared::bridge::{
    Bridge, CH_ACTION, CH_DONE, CH_OBSERVATION, CH_RESET, CH_REWARD,
};
use envbridge_shared::channel::{Channel, ChannelValue};
use envbridge_shared::config::ServeConfig;
use envbridge_shared::env::Environment;
use envbridge_shared::error::{BridgeError, RemoteError, Result};

/// Serves one environment over a rendezvous directory.
pub struct EnvServer<E> {
    bridge: Bridge,
    env: E,
}

impl<E: Environment> EnvServer<E> {
    /// Builds the channel set from the environment's spaces and starts
    /// listening on `<base>/sock`.
    pub fn new(env: E, base: impl AsRef<Path>) -> Result<Self> {
        let mut bridge = Bridge::new(base);
        bridge.wrap(CH_ACTION, &env.action_space())?;
        bridge.wrap(CH_OBSERVATION, &env.observation_space())?;
        bridge.add_channel(CH_REWARD, Channel::float())?;
        bridge.add_channel(CH_DONE, Channel::bool())?;
        bridge.add_channel(CH_RESET, Channel::bool())?;
        bridge.listen()?;
        Ok(Self { bridge, env })
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Runs the stepping loop; returns the number of timesteps served.
    pub async fn serve(&mut self, cfg: &ServeConfig) -> Result<u64> {
        let deadline = cfg.wallclock().map(|budget| Instant::now() + budget);
        self.bridge.set_timeout(cfg.wallclock());

        let mut ts = 0u64;
        match self.bridge.server_accept().await {
            Ok(()) => {}
            Err(BridgeError::Timeout) => {
                warn!("no client arrived within the wall-clock budget");
                return Ok(ts);
            }
            Err(e) => return Err(e),
        }

        // True means "no episode in progress".
        let mut done = true;

        while cfg.timestep_limit.map_or(true, |limit| ts < limit) {
            if let Some(end) = deadline {
                let now = Instant::now();
                if now >= end {
                    self.bridge
                        .close(None, Some(RemoteError::WallClockTimeout))
                        .await;
                    break;
                }
                self.bridge.set_timeout(Some(end - now));
            }
            match self.bridge.recv().await {
                Ok(()) => {}
                Err(BridgeError::Timeout) => {
                    self.bridge
                        .close(None, Some(RemoteError::WallClockTimeout))
                        .await;
                    break;
                }
                Err(BridgeError::Closed { .. }) => {
                    self.bridge
                        .close(None, Some(RemoteError::ClientDisconnect))
                        .await;
                    break;
                }
                Err(e) => return Err(e),
            }

            let reset_requested = matches!(
                self.bridge.value(CH_RESET)?,
                Some(ChannelValue::Bool(true))
            );
            if reset_requested {
                if cfg.ignore_reset && !done {
                    debug!(ts, "reset rejected mid-episode");
                    self.bridge.exception(RemoteError::Reset, None).await?;
                    self.bridge.send().await?;
                    continue;
                }
                let observation = self.env.reset();
                self.bridge.set_value(CH_OBSERVATION, observation)?;
                self.bridge.set_value(CH_RESET, ChannelValue::Bool(false))?;
                self.bridge.set_value(CH_REWARD, ChannelValue::Float(0.0))?;
                self.bridge.set_value(CH_DONE, ChannelValue::Bool(false))?;
                done = false;
            } else {
                if cfg.ignore_reset && done {
                    debug!(ts, "step rejected outside an episode");
                    self.bridge.exception(RemoteError::Reset, None).await?;
                    self.bridge.send().await?;
                    continue;
                }
                let action = self
                    .bridge
                    .value(CH_ACTION)?
                    .ok_or_else(|| BridgeError::Protocol("step without an action".to_string()))?;
                let outcome = self.env.step(action);
                self.bridge.set_value(CH_OBSERVATION, outcome.observation)?;
                self.bridge
                    .set_value(CH_REWARD, ChannelValue::Float(outcome.reward))?;
                self.bridge
                    .set_value(CH_DONE, ChannelValue::Bool(outcome.done))?;
                done = outcome.done;
            }
            self.bridge.send().await?;
            ts += 1;
        }

        if cfg.timestep_limit.is_some_and(|limit| ts >= limit) {
            info!(ts, "timestep budget exhausted");
            self.bridge
                .close(None, Some(RemoteError::TimestepTimeout))
                .await;
        }
        Ok(ts)
    }

    /// Closes the bridge (releasing the rendezvous directory contents),
    /// then the environment.
    pub async fn close(&mut self) {
        self.bridge.close(None, None).await;
        self.env.close();
    }
}
