//! `envbridge_shared`
//!
//! Shared libraries used by both the environment server and the agent
//! client of the local bridge.
//!
//! Design goals:
//! - Typed channels with explicit codecs; no dynamic evaluation anywhere.
//! - Clear separation of concerns (channels, wire, bridge, spaces, config).
//! - Errors that cross the wire carry stable numeric IDs.
//! - Single-task request/response on each side; the only shared mutable
//!   state is the memory-mapped region behind each array channel.

pub mod bridge;
pub mod channel;
pub mod config;
pub mod dtype;
pub mod env;
pub mod error;
pub mod shape;
pub mod space;
pub mod wire;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::bridge::*;
    pub use crate::channel::*;
    pub use crate::config::*;
    pub use crate::env::*;
    pub use crate::error::*;
    pub use crate::space::*;
}
