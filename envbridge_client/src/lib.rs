//! `envbridge_client`
//!
//! Client side of the bridge:
//! - Connection with exponential backoff while the rendezvous appears
//! - Channel reconstruction from the description handshake
//! - Gym-style `step`/`reset` driving the remote environment
//! - Space exposure rebuilt from channel annotations

pub mod client;

pub use client::RemoteEnv;
