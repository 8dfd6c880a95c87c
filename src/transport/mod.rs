//! Byte delivery to the emulator.
//!
//! Every channel owns at most one outstanding transfer. A request channel
//! drops new bodies while its [`SendSlot`] is taken; a duplex channel sends
//! whenever it is connected and leaves pacing to the socket.

pub mod duplex;
pub mod http;
pub mod request;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::http::Uri;

pub use duplex::DuplexChannel;
pub use request::{Deliver, RequestChannel};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("send task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("no response before the send timeout")]
    Timeout,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// What happened to a body handed to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Dispatched,
    /// Discarded because a transfer is outstanding or the channel is down
    Dropped,
}

/// Server status line shown by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Good,
    CommsError(String),
    Connected,
    Disconnected,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Good => f.write_str("Server Status : Good"),
            Status::CommsError(_) => f.write_str("Server Status : Comms Error!"),
            Status::Connected => f.write_str("Server Status : Connected"),
            Status::Disconnected => f.write_str("Server Status : Disconnected"),
        }
    }
}

/// Single-slot send guard. `ready` starts true.
#[derive(Debug, Clone)]
pub struct SendSlot {
    ready: Arc<AtomicBool>,
}

impl SendSlot {
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Takes the slot if it is free. The slot is released when the permit drops.
    pub fn try_acquire(&self) -> Option<SlotPermit> {
        self.ready
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotPermit {
                ready: self.ready.clone(),
            })
    }
}

impl Default for SendSlot {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SlotPermit {
    ready: Arc<AtomicBool>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.ready.store(true, Ordering::Release);
    }
}

/// A peer address, normalised to carry a scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    text: String,
    uri: Uri,
}

impl Destination {
    /// Accepts `host:port` or a full URL; `default_scheme` is prefixed when missing.
    pub fn parse(input: &str, default_scheme: &str) -> Result<Self, TransportError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TransportError::InvalidAddress(input.to_string()));
        }
        let text = if input.contains("://") {
            input.to_string()
        } else {
            format!("{}://{}", default_scheme, input)
        };
        let uri: Uri = text
            .parse()
            .map_err(|_| TransportError::InvalidAddress(input.to_string()))?;
        if uri.host().map_or(true, str::is_empty) {
            return Err(TransportError::InvalidAddress(input.to_string()));
        }
        Ok(Self { text, uri })
    }

    pub fn http(input: &str) -> Result<Self, TransportError> {
        Self::parse(input, "http")
    }

    pub fn ws(input: &str) -> Result<Self, TransportError> {
        Self::parse(input, "ws")
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// The two channel kinds behind one send interface.
pub enum Channel {
    Request(RequestChannel),
    Duplex(DuplexChannel),
}

impl Channel {
    /// Whether a send right now would be dispatched.
    pub fn accepting(&self) -> bool {
        match self {
            Channel::Request(channel) => channel.is_ready(),
            Channel::Duplex(channel) => channel.is_connected(),
        }
    }

    pub fn send(&self, body: Vec<u8>) -> SendOutcome {
        match self {
            Channel::Request(channel) => channel.send(body),
            Channel::Duplex(channel) => channel.send(body),
        }
    }

    pub fn destination(&self) -> Destination {
        match self {
            Channel::Request(channel) => channel.destination(),
            Channel::Duplex(channel) => channel.destination().clone(),
        }
    }
}
