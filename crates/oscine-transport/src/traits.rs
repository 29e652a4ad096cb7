//! Transport trait definitions
//!
//! The server shell consumes these: a receiver yields whole packets (one
//! datagram, or one de-framed stream frame) and a sender accepts whole
//! packets, applying any stream framing itself.

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::error::Result;

/// Events that can occur on a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Connection closed (clean or error)
    Disconnected { reason: Option<String> },
    /// One complete packet
    Data(Bytes),
    /// Error occurred
    Error(String),
}

/// Trait for sending packets
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send one packet
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Send without waiting for buffer space
    fn try_send(&self, data: Bytes) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the sender
    async fn close(&self) -> Result<()>;
}

/// Trait for receiving packets
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Trait for transport servers (listeners)
#[async_trait]
pub trait TransportServer: Send + Sync {
    /// The sender type for accepted connections
    type Sender: TransportSender + 'static;
    /// The receiver type for accepted connections
    type Receiver: TransportReceiver + 'static;

    /// Accept a new connection
    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Close the server
    async fn close(&self) -> Result<()>;
}
