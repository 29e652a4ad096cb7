//! oscine transport layer
//!
//! This crate provides the byte-moving half of an OSC server or client:
//! - Stream framing (length prefix and SLIP) over any async reader/writer
//! - UDP (one packet per datagram)
//! - TCP (framed stream)
//! - Packet-level UDP and TCP clients

pub mod client;
pub mod error;
pub mod framing;
pub mod traits;

#[cfg(feature = "udp")]
pub mod udp;

#[cfg(feature = "tcp")]
pub mod tcp;

pub use error::{Result, TransportError};
pub use framing::{read_frame, write_frame, FrameCodec, Framing};
pub use traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};

#[cfg(feature = "udp")]
pub use client::UdpClient;
#[cfg(feature = "udp")]
pub use udp::{UdpConfig, UdpReceiver, UdpSender, UdpTransport};

#[cfg(feature = "tcp")]
pub use client::TcpClient;
#[cfg(feature = "tcp")]
pub use tcp::{TcpConfig, TcpReceiver, TcpSender, TcpServer, TcpTransport};
