//! `envbridge_server`
//!
//! Server side of the bridge:
//! - Channel construction from an environment's action/observation spaces
//! - One-client accept with the description handshake
//! - Budgeted stepping loop (timestep and wall-clock limits)
//! - Terminal close taxonomy (timeout, disconnect, budget exhaustion)

pub mod server;

pub use server::EnvServer;
