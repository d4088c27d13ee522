//! The bridge: channel registry, handshake, update exchange, teardown.
//!
//! One bridge per process side, sharing a rendezvous directory. The server
//! role listens on `<base>/sock`, accepts exactly one peer, and sends the
//! channel description; the client role connects and reconstructs its
//! channel set from that description. After the handshake both sides
//! alternate `send` and `recv`, one update each per step.
//!
//! The channel set is fixed after the handshake: nothing may be added,
//! removed, or retyped for the lifetime of the connection.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{fence, Ordering};
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::time;
use tracing::{debug, info};

use crate::channel::{Channel, ChannelValue};
use crate::error::{BridgeError, RemoteError, Result};
use crate::space::{self, Space};
use crate::wire::{ChannelDesc, FramedConn, Signal, WireMsg};

/// Name of the rendezvous socket inside the base directory.
pub const SOCK_NAME: &str = "sock";

/// Conventional channel names used by the env server and client driver.
pub const CH_ACTION: &str = "ac";
pub const CH_OBSERVATION: &str = "ob";
pub const CH_REWARD: &str = "reward";
pub const CH_DONE: &str = "done";
pub const CH_RESET: &str = "reset";

/// Terminal session state, replayed by every later call.
#[derive(Debug, Clone)]
enum Terminal {
    Closed { reason: Option<String> },
    Remote {
        kind: RemoteError,
        reason: Option<String>,
    },
}

impl Terminal {
    fn to_error(&self) -> BridgeError {
        match self {
            Self::Closed { reason } => BridgeError::Closed {
                reason: reason.clone(),
            },
            Self::Remote { kind, reason } => BridgeError::Remote {
                kind: *kind,
                reason: reason.clone(),
            },
        }
    }
}

/// One side of a bridge session.
#[derive(Debug)]
pub struct Bridge {
    base: PathBuf,
    listener: Option<UnixListener>,
    conn: Option<FramedConn>,
    channels: BTreeMap<String, Channel>,
    timeout: Option<Duration>,
    terminal: Option<Terminal>,
    closed: bool,
}

impl Bridge {
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
            listener: None,
            conn: None,
            channels: BTreeMap::new(),
            timeout: None,
            terminal: None,
            closed: false,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn sock_path(&self) -> PathBuf {
        self.base.join(SOCK_NAME)
    }

    fn backing_path(&self, name: &str) -> PathBuf {
        self.base.join(name)
    }

    /// Registers a channel under `name` and binds its backing file.
    pub fn add_channel(&mut self, name: &str, mut channel: Channel) -> Result<()> {
        if self.channels.contains_key(name) {
            return Err(BridgeError::Protocol(format!("duplicate channel {name:?}")));
        }
        channel.bind_backing(&self.backing_path(name))?;
        self.channels.insert(name.to_string(), channel);
        Ok(())
    }

    /// Derives a channel from a space description and registers it.
    pub fn wrap(&mut self, name: &str, space: &Space) -> Result<()> {
        self.add_channel(name, space::channel_for(space)?)
    }

    /// Rebuilds the space behind a wrapped channel from its annotations.
    pub fn unwrap(&self, name: &str) -> Result<Space> {
        space::space_for(self.channel_ref(name)?)
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    fn channel_ref(&self, name: &str) -> Result<&Channel> {
        self.channels.get(name).ok_or_else(|| unknown_channel(name))
    }

    /// Writes a value into a channel, marking it dirty.
    pub fn set_value(&mut self, name: &str, value: ChannelValue) -> Result<()> {
        self.channels
            .get_mut(name)
            .ok_or_else(|| unknown_channel(name))?
            .set_value(value)
    }

    /// Current value of a channel; `None` if it was never written.
    pub fn value(&self, name: &str) -> Result<Option<ChannelValue>> {
        Ok(self.channel_ref(name)?.value())
    }

    /// Borrowed view of an `np` channel's mapped region.
    pub fn np_bytes(&self, name: &str) -> Result<&[u8]> {
        self.channel_ref(name)?
            .np_bytes()
            .ok_or_else(|| BridgeError::Protocol(format!("channel {name:?} is not mapped")))
    }

    /// Applies `timeout` to subsequent accepts and receives.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Describes every channel for the handshake.
    pub fn describe(&self) -> BTreeMap<String, ChannelDesc> {
        self.channels
            .iter()
            .map(|(name, channel)| (name.clone(), channel.describe()))
            .collect()
    }

    /// Starts listening on the rendezvous socket. The listening side owns
    /// the socket file and the channel backing files until close.
    pub fn listen(&mut self) -> Result<()> {
        let listener = UnixListener::bind(self.sock_path())?;
        info!(base = %self.base.display(), "listening");
        self.listener = Some(listener);
        Ok(())
    }

    /// Connects to the rendezvous socket.
    pub async fn connect(&mut self) -> Result<()> {
        let stream = UnixStream::connect(self.sock_path()).await?;
        self.conn = Some(FramedConn::new(stream));
        Ok(())
    }

    /// Accepts one peer and sends the channel description.
    pub async fn server_accept(&mut self) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| BridgeError::Protocol("accept without listen".to_string()))?;
        let accept = listener.accept();
        let (stream, _) = match self.timeout {
            Some(limit) => time::timeout(limit, accept)
                .await
                .map_err(|_| BridgeError::Timeout)??,
            None => accept.await?,
        };
        let mut conn = FramedConn::new(stream);
        conn.send(&WireMsg::Description(self.describe())).await?;
        self.conn = Some(conn);
        info!(channels = self.channels.len(), "peer connected");
        Ok(())
    }

    /// Consumes the description and mirrors the server's channel set,
    /// binding backing files along the way.
    pub async fn configure_client(&mut self) -> Result<()> {
        let conn = self
            .conn
            .as_mut()
            .ok_or(BridgeError::Closed { reason: None })?;
        let msg = conn.recv(self.timeout).await?;
        let WireMsg::Description(description) = msg else {
            return Err(BridgeError::Protocol(
                "expected a description as the first message".to_string(),
            ));
        };
        for (name, ChannelDesc(kind, descriptor, annotations)) in &description {
            let mut channel = Channel::make(kind, descriptor.as_deref(), annotations)?;
            channel.bind_backing(&self.backing_path(name))?;
            self.channels.insert(name.clone(), channel);
        }
        debug!(channels = self.channels.len(), "configured from description");
        Ok(())
    }

    /// Builds and transmits an update carrying every dirty channel, then
    /// clears the dirty flags.
    pub async fn send(&mut self) -> Result<()> {
        if let Some(terminal) = &self.terminal {
            return Err(terminal.to_error());
        }
        let mut content = BTreeMap::new();
        let mut mapped = false;
        for (name, channel) in &self.channels {
            if channel.is_dirty() {
                content.insert(name.clone(), channel.serialize()?);
                mapped |= channel.is_mapped();
            }
        }
        if mapped {
            // The peer reads the mapped region as soon as this update lands.
            fence(Ordering::SeqCst);
        }
        self.try_send(WireMsg::Update(content)).await?;
        for channel in self.channels.values_mut() {
            channel.clear_dirty();
        }
        Ok(())
    }

    /// Receives one message and dispatches it.
    ///
    /// Updates apply to channels and return `Ok`. A `close` tears this side
    /// down and raises the carried error; an `exception` raises without
    /// closing.
    pub async fn recv(&mut self) -> Result<()> {
        if let Some(terminal) = &self.terminal {
            return Err(terminal.to_error());
        }
        let conn = self
            .conn
            .as_mut()
            .ok_or(BridgeError::Closed { reason: None })?;
        let msg = match conn.recv(self.timeout).await {
            Ok(msg) => msg,
            Err(BridgeError::Closed { reason }) => {
                let terminal = Terminal::Closed { reason };
                self.enter_terminal(terminal.clone());
                return Err(terminal.to_error());
            }
            Err(other) => return Err(other),
        };
        match msg {
            WireMsg::Update(content) => {
                for (name, payload) in &content {
                    self.channels
                        .get_mut(name)
                        .ok_or_else(|| unknown_channel(name))?
                        .deserialize(payload)?;
                }
                Ok(())
            }
            WireMsg::Close(signal) => {
                let terminal = terminal_from(signal)?;
                debug!("peer closed the session");
                self.enter_terminal(terminal.clone());
                Err(terminal.to_error())
            }
            WireMsg::Exception(signal) => {
                let kind = kind_from(&signal)?;
                Err(BridgeError::Remote {
                    kind,
                    reason: signal.reason,
                })
            }
            WireMsg::Description(_) => Err(BridgeError::Protocol(
                "unexpected description after the handshake".to_string(),
            )),
        }
    }

    /// Relays a non-terminal taxonomy error to the peer.
    pub async fn exception(&mut self, kind: RemoteError, reason: Option<&str>) -> Result<()> {
        if let Some(terminal) = &self.terminal {
            return Err(terminal.to_error());
        }
        let signal = Signal {
            reason: reason.map(str::to_string),
            exception: Some(kind.id()),
        };
        self.try_send(WireMsg::Exception(signal)).await
    }

    /// Closes the session: best-effort close message, socket release, and
    /// rendezvous cleanup when this side owns the listener. Idempotent.
    pub async fn close(&mut self, reason: Option<&str>, exception: Option<RemoteError>) {
        if self.closed {
            return;
        }
        if let Some(conn) = self.conn.as_mut() {
            let signal = Signal {
                reason: reason.map(str::to_string),
                exception: exception.map(RemoteError::id),
            };
            if let Err(e) = conn.send(&WireMsg::Close(signal)).await {
                debug!(error = %e, "close notification failed");
            }
        }
        let terminal = match exception {
            Some(kind) => Terminal::Remote {
                kind,
                reason: reason.map(str::to_string),
            },
            None => Terminal::Closed {
                reason: reason.map(str::to_string),
            },
        };
        self.enter_terminal(terminal);
    }

    /// Sends a message, and on transport failure drains buffered incoming
    /// messages so a close or exception already in flight replaces the bare
    /// transport error.
    async fn try_send(&mut self, msg: WireMsg) -> Result<()> {
        let conn = self
            .conn
            .as_mut()
            .ok_or(BridgeError::Closed { reason: None })?;
        match conn.send(&msg).await {
            Ok(()) => Ok(()),
            Err(BridgeError::Closed { .. }) => {
                let mut last;
                loop {
                    match self.recv().await {
                        Ok(()) => continue,
                        Err(e) => {
                            last = e;
                            break;
                        }
                    }
                }
                if !self.closed {
                    self.close(None, None).await;
                }
                Err(last)
            }
            Err(other) => Err(other),
        }
    }

    /// Records the terminal state and releases sockets and, on the listening
    /// side, the rendezvous files.
    fn enter_terminal(&mut self, terminal: Terminal) {
        if self.terminal.is_none() {
            self.terminal = Some(terminal);
        }
        self.closed = true;
        self.conn = None;
        if self.listener.take().is_some() {
            self.cleanup_files();
        }
    }

    fn cleanup_files(&self) {
        let _ = fs::remove_file(self.sock_path());
        for name in self.channels.keys() {
            let _ = fs::remove_file(self.backing_path(name));
        }
        info!(base = %self.base.display(), "rendezvous cleaned up");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(conn) = self.conn.as_mut() {
            conn.send_nonblocking(&WireMsg::Close(Signal {
                reason: None,
                exception: None,
            }));
        }
        self.conn = None;
        if self.listener.take().is_some() {
            self.cleanup_files();
        }
    }
}

fn unknown_channel(name: &str) -> BridgeError {
    BridgeError::Protocol(format!("unknown channel {name:?}"))
}

fn kind_from(signal: &Signal) -> Result<RemoteError> {
    let id = signal
        .exception
        .ok_or_else(|| BridgeError::Protocol("exception message without an id".to_string()))?;
    RemoteError::from_id(id)
        .ok_or_else(|| BridgeError::Protocol(format!("unknown error id {id}")))
}

fn terminal_from(signal: Signal) -> Result<Terminal> {
    match signal.exception {
        Some(id) => Ok(Terminal::Remote {
            kind: RemoteError::from_id(id)
                .ok_or_else(|| BridgeError::Protocol(format!("unknown error id {id}")))?,
            reason: signal.reason,
        }),
        None => Ok(Terminal::Closed {
            reason: signal.reason,
        }),
    }
}
