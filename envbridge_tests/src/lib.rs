//! Test support: the tiny deterministic environments the integration
//! scenarios drive across the bridge.

use envbridge_shared::channel::ChannelValue;
use envbridge_shared::env::{Environment, StepOutcome};
use envbridge_shared::space::Space;

/// Initializes test logging; repeated calls are harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

fn as_int(action: &ChannelValue) -> i64 {
    match action {
        ChannelValue::Int(v) => *v,
        other => panic!("expected integer action, got {other:?}"),
    }
}

/// Discrete(8) actions; the action's low bits drive observation, reward,
/// and termination.
#[derive(Default)]
pub struct BitEnv;

impl Environment for BitEnv {
    fn action_space(&self) -> Space {
        Space::Discrete { n: 8 }
    }

    fn observation_space(&self) -> Space {
        Space::Discrete { n: 2 }
    }

    fn reset(&mut self) -> ChannelValue {
        ChannelValue::Int(0)
    }

    fn step(&mut self, action: ChannelValue) -> StepOutcome {
        let action = as_int(&action);
        StepOutcome::new(
            ChannelValue::Int(action & 1),
            (action & 2) as f64,
            action & 4 != 0,
        )
    }
}

/// MultiBinary(3) actions; one bit each for observation, reward, and
/// termination.
#[derive(Default)]
pub struct MultiBitEnv;

impl Environment for MultiBitEnv {
    fn action_space(&self) -> Space {
        Space::MultiBinary { n: 3 }
    }

    fn observation_space(&self) -> Space {
        Space::Discrete { n: 2 }
    }

    fn reset(&mut self) -> ChannelValue {
        ChannelValue::Int(0)
    }

    fn step(&mut self, action: ChannelValue) -> StepOutcome {
        let bits = match action {
            ChannelValue::IntVec(bits) => bits,
            other => panic!("expected bit vector action, got {other:?}"),
        };
        assert_eq!(bits.len(), 3);
        StepOutcome::new(
            ChannelValue::Int(bits[0]),
            bits[1] as f64,
            bits[2] != 0,
        )
    }
}

/// Counts steps since reset as the reward; action 1 ends the episode.
#[derive(Default)]
pub struct StepEnv {
    reward: i64,
    done: bool,
}

impl Environment for StepEnv {
    fn action_space(&self) -> Space {
        Space::Discrete { n: 2 }
    }

    fn observation_space(&self) -> Space {
        Space::Discrete { n: 1 }
    }

    fn reset(&mut self) -> ChannelValue {
        self.reward = 0;
        self.done = false;
        ChannelValue::Int(0)
    }

    fn step(&mut self, action: ChannelValue) -> StepOutcome {
        if !self.done {
            self.reward += 1;
        }
        if as_int(&action) != 0 {
            self.done = true;
        }
        StepOutcome::new(ChannelValue::Int(0), self.reward as f64, self.done)
    }
}
