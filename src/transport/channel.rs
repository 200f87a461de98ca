//! Transport-neutral view of a duplex realtime connection.

use futures::{future::BoxFuture, stream::BoxStream};
use tokio::sync::mpsc;
use url::Url;

use super::TransportResult;

/// Close code used when the connection vanished without a close handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code of a regular, requested closure.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when the peer sent a close frame without a status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Close code and reason reported when a connection ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason, possibly empty.
    pub reason: String,
}

impl CloseInfo {
    /// Close with `code` and `reason`.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Connection lost without a close handshake.
    pub fn abnormal() -> Self {
        Self::new(ABNORMAL_CLOSURE, "")
    }

    /// Closure requested by this side.
    pub fn normal() -> Self {
        Self::new(NORMAL_CLOSURE, "client disconnect")
    }
}

/// Inbound item produced by a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A text message.
    Text(String),
    /// A transport-level error; the connection may still close afterwards.
    Error(String),
    /// The connection ended. Nothing follows this frame.
    Close(CloseInfo),
}

/// Outbound command for a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Text frame.
    Text(String),
    /// Close the connection.
    Close,
}

/// An established connection: inbound frames plus a handle for outbound messages.
pub struct Connection {
    /// Incoming frames; ends after a close.
    pub frames: BoxStream<'static, Frame>,
    /// Queue for outgoing messages.
    pub outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl Connection {
    /// Pair an incoming frame stream with its outgoing queue.
    pub fn new(
        frames: BoxStream<'static, Frame>,
        outgoing: mpsc::UnboundedSender<Outgoing>,
    ) -> Self {
        Self { frames, outgoing }
    }
}

/// Opens realtime connections. A failed handshake is reported as an error, never a panic.
pub trait Connector: Send + Sync {
    /// Dial `url`, resolving once the handshake completed.
    fn connect(&self, url: Url) -> BoxFuture<'static, TransportResult<Connection>>;
}
