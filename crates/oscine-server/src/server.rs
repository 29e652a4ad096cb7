//! Server shell
//!
//! Receives packets from a datagram socket or from stream connections and
//! hands each one to the configured [`Executor`].
//!
//! # Example
//!
//! ```no_run
//! use oscine_core::{Atom, Message};
//! use oscine_server::{Dispatcher, Server, ServerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Arc::new(Dispatcher::new());
//!     dispatcher.map(
//!         "/synth/*/freq",
//!         |address: &str, _: &[Atom], args: &[Atom]| {
//!             println!("{} {:?}", address, args);
//!             Ok(None)
//!         },
//!         vec![],
//!     )?;
//!
//!     let server = Server::new(dispatcher, ServerConfig::default())?;
//!     server.serve_udp("0.0.0.0:5005").await?;
//!     Ok(())
//! }
//! ```

use futures::future::BoxFuture;
use oscine_core::{Clock, DecodeConfig, SystemClock};
use oscine_transport::{
    TcpConfig, TcpServer, TransportEvent, TransportReceiver, TransportSender, TransportServer,
    UdpConfig, UdpTransport,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::executor::{executor_for, Executor, Policy};
use crate::pipeline::{HandlerErrorPolicy, Job, Pipeline};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Concurrency policy
    pub policy: Policy,
    /// Decoder limits
    pub decode: DecodeConfig,
    /// Hold bundle messages until their timestamp is due
    pub schedule_bundles: bool,
    /// Reaction to handler failures
    pub on_handler_error: HandlerErrorPolicy,
    /// Send handler replies back to the sender
    pub send_replies: bool,
    pub udp: UdpConfig,
    pub tcp: TcpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            decode: DecodeConfig::default(),
            schedule_bundles: false,
            on_handler_error: HandlerErrorPolicy::default(),
            send_replies: true,
            udp: UdpConfig::default(),
            tcp: TcpConfig::default(),
        }
    }
}

/// OSC server
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    executor: Arc<dyn Executor>,
    running: Arc<RwLock<bool>>,
    shutdown: watch::Sender<bool>,
}

impl Server {
    pub fn new(dispatcher: Arc<Dispatcher>, config: ServerConfig) -> Result<Self> {
        Self::with_clock(dispatcher, config, Arc::new(SystemClock))
    }

    /// Create a server that resolves bundle times against `clock`
    pub fn with_clock(
        dispatcher: Arc<Dispatcher>,
        config: ServerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let pipeline = Arc::new(Pipeline::new(dispatcher.clone(), &config, clock));
        let executor = executor_for(config.policy, pipeline)?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            dispatcher,
            executor,
            running: Arc::new(RwLock::new(false)),
            shutdown,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn policy(&self) -> Policy {
        self.executor.policy()
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    /// Packets and connections still being processed
    pub fn in_flight(&self) -> usize {
        self.executor.in_flight()
    }

    /// Bind a UDP socket and serve it until stopped
    pub async fn serve_udp(&self, addr: &str) -> Result<()> {
        let transport = UdpTransport::bind_with_config(addr, self.config.udp.clone()).await?;
        info!("OSC UDP server listening on {}", transport.local_addr()?);
        self.serve_datagrams(transport).await
    }

    /// Serve an already-bound UDP socket until stopped.
    ///
    /// Each datagram is one packet; replies go to the datagram's source.
    pub async fn serve_datagrams(&self, transport: UdpTransport) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        *self.running.write() = !*shutdown.borrow();
        let mut receiver = transport.start_receiver();

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                event = receiver.recv_from() => match event {
                    Some((TransportEvent::Data(data), peer)) => {
                        let mut job = Job::new(data, Some(peer));
                        if self.config.send_replies {
                            job = job.with_reply(Arc::new(transport.sender_to(peer)));
                        }
                        self.executor.execute(job).await;
                    }
                    Some((TransportEvent::Error(e), _)) => error!("UDP receive error: {}", e),
                    Some(_) => {}
                    None => break,
                }
            }
        }

        info!("UDP server stopped");
        Ok(())
    }

    /// Bind a TCP listener and serve it until stopped
    pub async fn serve_tcp(&self, addr: &str) -> Result<()> {
        let server = TcpServer::bind_with_config(addr, self.config.tcp.clone()).await?;
        info!("OSC TCP server listening on {}", server.local_addr()?);
        self.serve_stream(server).await
    }

    /// Accept connections from any stream transport until stopped
    pub async fn serve_stream<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer,
    {
        let mut shutdown = self.shutdown.subscribe();
        *self.running.write() = !*shutdown.borrow();

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                accepted = server.accept() => match accepted {
                    Ok((sender, receiver, peer)) => {
                        info!("New connection from {}", peer);
                        let connection = self.handle_connection(Arc::new(sender), receiver, peer);
                        self.executor.spawn_connection(connection).await;
                    }
                    Err(e) => error!("Accept error: {}", e),
                }
            }
        }

        if let Err(e) = server.close().await {
            warn!("Error closing listener: {}", e);
        }
        info!("Stream server stopped");
        Ok(())
    }

    /// Read loop for one stream connection; every frame becomes a job
    fn handle_connection<R>(
        &self,
        sender: Arc<dyn TransportSender>,
        mut receiver: R,
        peer: SocketAddr,
    ) -> BoxFuture<'static, ()>
    where
        R: TransportReceiver + 'static,
    {
        let executor = Arc::clone(&self.executor);
        let send_replies = self.config.send_replies;
        let mut shutdown = self.shutdown.subscribe();

        Box::pin(async move {
            loop {
                tokio::select! {
                    _ = stopped(&mut shutdown) => {
                        debug!("Closing connection to {} for shutdown", peer);
                        break;
                    }
                    event = receiver.recv() => match event {
                        Some(TransportEvent::Data(data)) => {
                            let mut job = Job::new(data, Some(peer));
                            if send_replies {
                                job = job.with_reply(sender.clone());
                            }
                            executor.execute(job).await;
                        }
                        Some(TransportEvent::Connected) => {}
                        Some(TransportEvent::Disconnected { reason }) => {
                            info!("Client {} disconnected: {:?}", peer, reason);
                            break;
                        }
                        Some(TransportEvent::Error(e)) => {
                            error!("Transport error from {}: {}", peer, e);
                            break;
                        }
                        None => {
                            info!("Client {} disconnected", peer);
                            break;
                        }
                    }
                }
            }

            if let Err(e) = sender.close().await {
                debug!("Error closing connection to {}: {}", peer, e);
            }
        })
    }

    /// Stop accepting packets and connections
    pub fn stop(&self) {
        *self.running.write() = false;
        self.shutdown.send_replace(true);
        info!("Server stopping");
    }

    /// Stop, then wait for in-flight packets and connections to finish
    pub async fn shutdown(&self) {
        self.stop();
        self.executor.drain().await;
        debug!("Server drained");
    }
}

/// Resolves once the shutdown flag is set or its sender is gone
async fn stopped(rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *rx.borrow_and_update();
        if stop {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oscine_transport::Framing;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.policy, Policy::Sequential);
        assert!(config.send_replies);
        assert!(!config.schedule_bundles);
        assert_eq!(config.decode.max_depth, oscine_core::DEFAULT_MAX_DEPTH);
        assert_eq!(config.tcp.framing, Framing::LengthPrefixed);
    }

    #[test]
    fn test_config_from_toml() {
        let config: ServerConfig = toml::from_str(
            r#"
            policy = "worker"
            schedule_bundles = true
            on_handler_error = "abort-packet"

            [decode]
            max_depth = 8

            [tcp]
            framing = "slip"
            "#,
        )
        .unwrap();

        assert_eq!(config.policy, Policy::Worker);
        assert!(config.schedule_bundles);
        assert_eq!(config.on_handler_error, HandlerErrorPolicy::AbortPacket);
        assert_eq!(config.decode.max_depth, 8);
        assert_eq!(
            config.decode.max_array_depth,
            oscine_core::DEFAULT_MAX_ARRAY_DEPTH
        );
        assert_eq!(config.tcp.framing, Framing::Slip);
        // untouched sections keep their defaults
        assert!(config.send_replies);
        assert_eq!(config.udp, UdpConfig::default());
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let result: std::result::Result<ServerConfig, _> = toml::from_str(r#"policy = "forking""#);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stop_ends_idle_udp_server() {
        let server = Arc::new(Server::new(Arc::new(Dispatcher::new()), ServerConfig::default()).unwrap());
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        let task = {
            let server = server.clone();
            tokio::spawn(async move { server.serve_datagrams(transport).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(server.is_running());

        server.shutdown().await;
        assert!(!server.is_running());
        task.await.unwrap().unwrap();
    }
}
