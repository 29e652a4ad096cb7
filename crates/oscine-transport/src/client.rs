//! OSC clients
//!
//! Thin packet-level wrappers over the UDP and TCP transports for sending
//! messages to a server and reading its replies.

use bytes::Bytes;
use oscine_core::{Atom, Message, Packet};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender};

#[cfg(feature = "tcp")]
use crate::tcp::{TcpConfig, TcpReceiver, TcpSender, TcpTransport};

#[cfg(feature = "udp")]
use crate::udp::{UdpConfig, UdpTransport};

/// Resolve `host:port` to the first socket address
pub async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", addr, e)))?
        .next()
        .ok_or_else(|| TransportError::ConnectionFailed(format!("{}: no addresses", addr)))
}

/// Sends packets to one OSC server over UDP
#[cfg(feature = "udp")]
pub struct UdpClient {
    transport: UdpTransport,
    target: SocketAddr,
}

#[cfg(feature = "udp")]
impl UdpClient {
    /// Bind an ephemeral local port and target `addr`
    pub async fn connect(addr: &str) -> Result<Self> {
        let target = resolve(addr).await?;
        let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let transport = UdpTransport::bind_with_config(local, UdpConfig::default()).await?;
        Ok(Self { transport, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Allow sending to broadcast addresses
    pub fn set_broadcast(&self, enable: bool) -> Result<()> {
        self.transport.set_broadcast(enable)
    }

    /// Encode and send one packet
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        let data = packet.encode()?;
        debug!("UDP sending {} bytes to {}", data.len(), self.target);
        self.transport.send_to(&data, self.target).await
    }

    /// Build and send a single message
    pub async fn send_message(&self, address: &str, args: Vec<Atom>) -> Result<()> {
        let message = Message::new(address, args)?;
        self.send(&Packet::Message(message)).await
    }

    /// Wait up to `timeout` for one reply datagram.
    ///
    /// Undecodable datagrams are logged and skipped.
    pub async fn recv(&self, timeout: Duration) -> Result<Option<Packet>> {
        let mut buf = vec![0u8; self.transport.config().max_packet_size];
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let received =
                match tokio::time::timeout_at(deadline, self.transport.recv_from(&mut buf)).await {
                    Ok(result) => result?,
                    Err(_) => return Ok(None),
                };
            let (len, from) = received;
            match Packet::decode(&buf[..len]) {
                Ok(packet) => return Ok(Some(packet)),
                Err(e) => warn!("Ignoring malformed datagram from {}: {}", from, e),
            }
        }
    }
}

/// Exchanges packets with one OSC server over a TCP stream
#[cfg(feature = "tcp")]
pub struct TcpClient {
    sender: TcpSender,
    receiver: TcpReceiver,
    target: SocketAddr,
}

#[cfg(feature = "tcp")]
impl TcpClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_config(addr, TcpConfig::default()).await
    }

    pub async fn connect_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let target = resolve(addr).await?;
        let (sender, receiver) = TcpTransport::with_config(config)
            .connect(&target.to_string())
            .await?;
        Ok(Self {
            sender,
            receiver,
            target,
        })
    }

    /// The server this client is connected to
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub async fn send(&self, packet: &Packet) -> Result<()> {
        let data: Bytes = packet.encode()?;
        self.sender.send(data).await
    }

    pub async fn send_message(&self, address: &str, args: Vec<Atom>) -> Result<()> {
        let message = Message::new(address, args)?;
        self.send(&Packet::Message(message)).await
    }

    /// Next packet from the server; `None` once the connection closes
    pub async fn recv(&mut self) -> Result<Option<Packet>> {
        loop {
            match self.receiver.recv().await {
                Some(TransportEvent::Data(data)) => return Ok(Some(Packet::decode(&data)?)),
                Some(TransportEvent::Connected) => continue,
                Some(TransportEvent::Error(e)) => return Err(TransportError::ReceiveFailed(e)),
                Some(TransportEvent::Disconnected { .. }) | None => return Ok(None),
            }
        }
    }

    /// Like [`TcpClient::recv`] but gives up after `timeout`
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    pub async fn close(&self) -> Result<()> {
        self.sender.close().await
    }
}
