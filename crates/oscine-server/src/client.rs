//! TCP client that routes incoming packets through a [`Dispatcher`]

use oscine_core::Packet;
use oscine_transport::{TcpClient, TcpConfig, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::error::Result;

/// Talks to one OSC server and hands whatever it sends back to handlers.
///
/// Handlers see the server's address as their peer. Replies returned by
/// client-side handlers are discarded.
pub struct DispatchClient {
    client: TcpClient,
    dispatcher: Arc<Dispatcher>,
}

impl DispatchClient {
    pub fn new(client: TcpClient, dispatcher: Arc<Dispatcher>) -> Self {
        Self { client, dispatcher }
    }

    pub async fn connect(addr: &str, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        Self::connect_with_config(addr, TcpConfig::default(), dispatcher).await
    }

    pub async fn connect_with_config(
        addr: &str,
        config: TcpConfig,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self> {
        let client = TcpClient::connect_with_config(addr, config).await?;
        Ok(Self::new(client, dispatcher))
    }

    pub fn client(&self) -> &TcpClient {
        &self.client
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn send(&self, packet: &Packet) -> Result<()> {
        Ok(self.client.send(packet).await?)
    }

    /// Dispatch every packet the server sends until nothing arrives for
    /// `timeout` or the connection closes. Returns how many were handled.
    pub async fn handle_messages(&mut self, timeout: Duration) -> Result<usize> {
        let peer = Some(self.client.target());
        let mut handled = 0;
        loop {
            let packet = match self.client.recv_timeout(timeout).await {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    debug!("Server {} closed the connection", self.client.target());
                    break;
                }
                Err(TransportError::Timeout) => break,
                Err(TransportError::Parse(e)) => {
                    warn!("Ignoring malformed packet from {}: {}", self.client.target(), e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            handled += 1;
            for message in packet.messages() {
                let routed = self.dispatcher.route_async(message, peer).await;
                for e in &routed.errors {
                    warn!("Client handler failed for {}: {:#}", message.address(), e);
                }
                if !routed.replies.is_empty() {
                    debug!("Discarding {} client-side replies", routed.replies.len());
                }
            }
        }
        Ok(handled)
    }

    pub async fn close(&self) -> Result<()> {
        Ok(self.client.close().await?)
    }
}
