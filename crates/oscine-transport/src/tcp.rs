//! TCP transport implementation
//!
//! Packets travel over the stream inside frames, either length-prefixed
//! (OSC 1.0) or SLIP-encoded (OSC 1.1), selected by [`TcpConfig::framing`].

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransportError};
use crate::framing::{FrameCodec, Framing, DEFAULT_MAX_FRAME_SIZE};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};

/// Default channel buffer size for TCP connections
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 1000;

/// TCP configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TcpConfig {
    /// Stream framing mode
    pub framing: Framing,
    /// Maximum frame payload in bytes
    pub max_frame_size: usize,
    /// Read buffer size
    pub read_buffer_size: usize,
    /// Keep-alive interval in seconds (0 = disabled)
    pub keepalive_secs: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            framing: Framing::LengthPrefixed,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_size: 8192,
            keepalive_secs: 30,
        }
    }
}

impl TcpConfig {
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.framing, self.max_frame_size)
    }
}

/// TCP transport
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            config: TcpConfig::default(),
        }
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self { config }
    }

    /// Connect to a TCP server
    pub async fn connect(&self, addr: &str) -> Result<(TcpSender, TcpReceiver)> {
        info!("Connecting to TCP: {}", addr);

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let pair = spawn_connection(stream, &self.config);
        info!("TCP connected to {}", addr);
        Ok(pair)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn set_keepalive(stream: &TcpStream, secs: u64) {
    if secs == 0 {
        return;
    }
    let socket = socket2::SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new().with_time(std::time::Duration::from_secs(secs));
    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        warn!("Failed to enable TCP keepalive: {}", e);
    }
}

/// Wire a connected stream to a sender/receiver pair and spawn its IO loop
fn spawn_connection(stream: TcpStream, config: &TcpConfig) -> (TcpSender, TcpReceiver) {
    set_keepalive(&stream, config.keepalive_secs);

    let connected = Arc::new(Mutex::new(true));
    let shutdown = Arc::new(Notify::new());
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Bytes>(DEFAULT_CHANNEL_BUFFER_SIZE);
    let (incoming_tx, incoming_rx) = mpsc::channel::<TransportEvent>(DEFAULT_CHANNEL_BUFFER_SIZE);

    let sender = TcpSender {
        tx: outgoing_tx,
        connected: connected.clone(),
        shutdown: shutdown.clone(),
    };
    let receiver = TcpReceiver { rx: incoming_rx };

    let codec = config.codec();
    let read_buffer_size = config.read_buffer_size;
    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        run_tcp_io_loop(
            reader,
            writer,
            outgoing_rx,
            incoming_tx,
            codec,
            read_buffer_size,
            shutdown,
        )
        .await;
        *connected.lock() = false;
    });

    (sender, receiver)
}

/// Shared IO loop for TCP connections
async fn run_tcp_io_loop(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut outgoing_rx: mpsc::Receiver<Bytes>,
    incoming_tx: mpsc::Sender<TransportEvent>,
    codec: FrameCodec,
    read_buffer_size: usize,
    shutdown: Arc<Notify>,
) {
    let mut read_buf = BytesMut::with_capacity(read_buffer_size);
    let mut frame = BytesMut::new();

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("TCP connection closed locally");
                let _ = writer.shutdown().await;
                break;
            }

            outgoing = outgoing_rx.recv() => {
                let Some(data) = outgoing else {
                    let _ = writer.shutdown().await;
                    break;
                };
                frame.clear();
                if let Err(e) = codec.encode(&data, &mut frame) {
                    warn!("Dropping outgoing packet: {}", e);
                    continue;
                }
                if let Err(e) = writer.write_all(&frame).await {
                    error!("TCP write error: {}", e);
                    let _ = incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
            }

            result = reader.read_buf(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        debug!("TCP connection closed");
                        let reason = (!read_buf.is_empty())
                            .then(|| format!("{} bytes of partial frame discarded", read_buf.len()));
                        let _ = incoming_tx.send(TransportEvent::Disconnected { reason }).await;
                        break;
                    }
                    Ok(_) => {
                        if !drain_frames(&codec, &mut read_buf, &incoming_tx).await {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("TCP read error: {}", e);
                        let _ = incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
        }
    }
}

/// Forward every complete frame; false when the connection must close
async fn drain_frames(
    codec: &FrameCodec,
    read_buf: &mut BytesMut,
    incoming_tx: &mpsc::Sender<TransportEvent>,
) -> bool {
    loop {
        match codec.decode(read_buf) {
            Ok(Some(data)) => {
                if incoming_tx.send(TransportEvent::Data(data)).await.is_err() {
                    return false;
                }
            }
            Ok(None) => return true,
            Err(e) => {
                error!("TCP framing error: {}", e);
                let _ = incoming_tx
                    .send(TransportEvent::Disconnected {
                        reason: Some(e.to_string()),
                    })
                    .await;
                return false;
            }
        }
    }
}

/// TCP sender for writing packets
#[derive(Clone)]
pub struct TcpSender {
    tx: mpsc::Sender<Bytes>,
    connected: Arc<Mutex<bool>>,
    shutdown: Arc<Notify>,
}

#[async_trait]
impl TransportSender for TcpSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(data)
            .await
            .map_err(|_| TransportError::SendFailed("Channel closed".into()))
    }

    fn try_send(&self, data: Bytes) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        *self.connected.lock() = false;
        self.shutdown.notify_one();
        Ok(())
    }
}

/// TCP receiver for reading packets
pub struct TcpReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for TcpReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// TCP server for accepting connections
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    /// Bind to an address and create a new TCP server
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    /// Bind with custom configuration
    pub async fn bind_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {}", addr, e)))?;

        info!("TCP server listening on {} ({:?} framing)", addr, config.framing);

        Ok(Self { listener, config })
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    type Sender = TcpSender;
    type Receiver = TcpReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

        info!("TCP connection accepted from {}", peer_addr);

        let (sender, receiver) = spawn_connection(stream, &self.config);
        Ok((sender, receiver, peer_addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) -> Result<()> {
        // TcpListener closes when dropped
        Ok(())
    }
}
