//! Error taxonomy.
//!
//! Errors that cross the wire carry stable numeric IDs so both sides agree
//! on the failure kind regardless of build. IDs are assigned in declaration
//! order starting at 0; extending the list is a wire-compatibility change.

use std::fmt;
use std::io;

/// Failure kinds carried by `close` and `exception` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteError {
    /// Generic remote failure; the base of the taxonomy.
    Remote = 0,
    /// The server served its full timestep budget.
    TimestepTimeout = 1,
    /// The wall-clock budget ran out on the server.
    WallClockTimeout = 2,
    /// The client vanished mid-session (server's view).
    ClientDisconnect = 3,
    /// The server vanished mid-session (client's view).
    ServerDisconnect = 4,
    /// A reset or step arrived at an illegal point; the session continues.
    Reset = 5,
}

impl RemoteError {
    /// Stable wire ID.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Looks up a kind by wire ID.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Remote),
            1 => Some(Self::TimestepTimeout),
            2 => Some(Self::WallClockTimeout),
            3 => Some(Self::ClientDisconnect),
            4 => Some(Self::ServerDisconnect),
            5 => Some(Self::Reset),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Remote => "remote error",
            Self::TimestepTimeout => "timestep limit exhausted",
            Self::WallClockTimeout => "wall-clock limit exhausted",
            Self::ClientDisconnect => "client disconnected",
            Self::ServerDisconnect => "server disconnected",
            Self::Reset => "ill-timed reset",
        };
        f.write_str(text)
    }
}

/// Errors surfaced by bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The connection is gone without a more specific remote kind.
    #[error("connection closed{}", suffix(.reason))]
    Closed { reason: Option<String> },

    /// A socket deadline expired.
    #[error("socket operation timed out")]
    Timeout,

    /// The peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport failure not attributable to a clean peer close.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A taxonomy error relayed from the peer or raised by the server loop.
    #[error("{}{}", .kind, suffix(.reason))]
    Remote {
        kind: RemoteError,
        reason: Option<String>,
    },
}

fn suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(": {reason}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
