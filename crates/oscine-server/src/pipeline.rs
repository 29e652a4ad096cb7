//! Per-packet processing
//!
//! A [`Job`] is one received packet plus the way back to its sender. The
//! [`Pipeline`] decodes it, optionally waits for bundle timestamps, runs the
//! dispatcher and hands handler replies back to the transport. Executors
//! decide where and when a pipeline run happens.

use bytes::Bytes;
use oscine_core::{Clock, DecodeConfig, Message, Packet, Timestamp};
use oscine_transport::TransportSender;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::dispatcher::{Dispatcher, Routed};
use crate::server::ServerConfig;

/// How the server reacts when a handler fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerErrorPolicy {
    /// Log the failure and still send the packet's replies
    #[default]
    LogAndContinue,
    /// Log the failure and discard every reply of the packet
    AbortPacket,
}

/// One received packet
pub struct Job {
    pub data: Bytes,
    pub peer: Option<SocketAddr>,
    /// Where handler replies go; `None` discards them
    pub reply: Option<Arc<dyn TransportSender>>,
}

impl Job {
    pub fn new(data: Bytes, peer: Option<SocketAddr>) -> Self {
        Self {
            data,
            peer,
            reply: None,
        }
    }

    pub fn with_reply(mut self, sender: Arc<dyn TransportSender>) -> Self {
        self.reply = Some(sender);
        self
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("len", &self.data.len())
            .field("peer", &self.peer)
            .field("reply", &self.reply.is_some())
            .finish()
    }
}

struct Peer(Option<SocketAddr>);

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(addr) => write!(f, "{}", addr),
            None => f.write_str("<local>"),
        }
    }
}

#[derive(Default)]
struct Outcome {
    replies: Vec<Message>,
    failures: usize,
}

impl Outcome {
    fn absorb(&mut self, routed: Routed, peer: &Peer) {
        for e in &routed.errors {
            warn!("Handler failure for packet from {}: {:#}", peer, e);
        }
        self.failures += routed.errors.len();
        self.replies.extend(routed.replies);
    }
}

/// Decode, dispatch and reply for a single packet
pub struct Pipeline {
    dispatcher: Arc<Dispatcher>,
    decode: DecodeConfig,
    schedule_bundles: bool,
    on_handler_error: HandlerErrorPolicy,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(dispatcher: Arc<Dispatcher>, config: &ServerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            dispatcher,
            decode: config.decode.clone(),
            schedule_bundles: config.schedule_bundles,
            on_handler_error: config.on_handler_error,
            clock,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Same settings against a private copy of the registration table
    pub fn isolated(&self) -> Self {
        Self {
            dispatcher: Arc::new(self.dispatcher.snapshot()),
            decode: self.decode.clone(),
            schedule_bundles: self.schedule_bundles,
            on_handler_error: self.on_handler_error,
            clock: self.clock.clone(),
        }
    }

    /// Process a job on the current thread, sleeping it for scheduled bundles
    pub fn run_blocking(&self, job: Job) {
        let replies = self.process_blocking(&job);
        self.deliver(&job, replies);
    }

    /// Decode and dispatch on the current thread, returning the encoded
    /// replies instead of sending them
    pub fn process_blocking(&self, job: &Job) -> Vec<Bytes> {
        let peer = Peer(job.peer);
        let Some(packet) = self.decode(job, &peer) else {
            return Vec::new();
        };

        let mut outcome = Outcome::default();
        for (due, message) in self.schedule(&packet) {
            if let Some(delay) = self.delay(due) {
                std::thread::sleep(delay);
            }
            outcome.absorb(self.dispatcher.route_from(message, job.peer), &peer);
        }
        self.finish(job, &peer, outcome)
    }

    /// Hand encoded replies to the job's reply path without waiting
    pub fn deliver(&self, job: &Job, replies: Vec<Bytes>) {
        let peer = Peer(job.peer);
        for data in replies {
            try_deliver(job, &peer, data);
        }
    }

    /// Process a job inline on the calling task, awaiting reply delivery
    pub async fn run_inline(&self, job: Job) {
        let peer = Peer(job.peer);
        let Some(packet) = self.decode(&job, &peer) else {
            return;
        };

        let mut outcome = Outcome::default();
        for (due, message) in self.schedule(&packet) {
            if let Some(delay) = self.delay(due) {
                tokio::time::sleep(delay).await;
            }
            outcome.absorb(self.dispatcher.route_async(message, job.peer).await, &peer);
        }

        let replies = self.finish(&job, &peer, outcome);
        if let Some(sender) = &job.reply {
            for data in replies {
                if let Err(e) = sender.send(data).await {
                    error!("Failed to send reply to {}: {}", peer, e);
                }
            }
        }
    }

    /// Process a job as a cooperative task, yielding between messages and
    /// wherever an async handler awaits
    pub async fn run_cooperative(&self, job: Job) {
        let peer = Peer(job.peer);
        let Some(packet) = self.decode(&job, &peer) else {
            return;
        };

        let mut outcome = Outcome::default();
        for (due, message) in self.schedule(&packet) {
            match self.delay(due) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => tokio::task::yield_now().await,
            }
            outcome.absorb(self.dispatcher.route_async(message, job.peer).await, &peer);
        }

        let replies = self.finish(&job, &peer, outcome);
        self.deliver(&job, replies);
    }

    fn decode(&self, job: &Job, peer: &Peer) -> Option<Packet> {
        match Packet::decode_with(&job.data, &self.decode) {
            Ok(packet) => {
                debug!("Received {} bytes from {}", job.data.len(), peer);
                Some(packet)
            }
            Err(e) => {
                warn!("Dropping malformed packet from {}: {}", peer, e);
                None
            }
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::from_system_time(self.clock.now())
    }

    /// Messages in dispatch order, with due times when scheduling is on
    fn schedule<'p>(&self, packet: &'p Packet) -> Vec<(Option<Timestamp>, &'p Message)> {
        if self.schedule_bundles {
            packet
                .timed_messages(self.now())
                .into_iter()
                .map(|(due, message)| (Some(due), message))
                .collect()
        } else {
            packet.messages().into_iter().map(|m| (None, m)).collect()
        }
    }

    fn delay(&self, due: Option<Timestamp>) -> Option<Duration> {
        due?.delay_from(self.now())
    }

    /// Apply the error policy and encode what should go back to the peer
    fn finish(&self, job: &Job, peer: &Peer, outcome: Outcome) -> Vec<Bytes> {
        if outcome.failures > 0 && self.on_handler_error == HandlerErrorPolicy::AbortPacket {
            warn!(
                "Aborting packet from {} after {} handler failure(s), discarding {} replies",
                peer,
                outcome.failures,
                outcome.replies.len()
            );
            return Vec::new();
        }
        if outcome.replies.is_empty() {
            return Vec::new();
        }
        if job.reply.is_none() {
            debug!("No reply path to {}, discarding {} replies", peer, outcome.replies.len());
            return Vec::new();
        }

        outcome
            .replies
            .iter()
            .filter_map(|reply| match reply.encode() {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!("Cannot encode reply {} for {}: {}", reply.address(), peer, e);
                    None
                }
            })
            .collect()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("dispatcher", &self.dispatcher)
            .field("decode", &self.decode)
            .field("schedule_bundles", &self.schedule_bundles)
            .field("on_handler_error", &self.on_handler_error)
            .finish()
    }
}

/// Non-blocking reply delivery for jobs running off the server's runtime
fn try_deliver(job: &Job, peer: &Peer, data: Bytes) {
    if let Some(sender) = &job.reply {
        if let Err(e) = sender.try_send(data) {
            error!("Failed to send reply to {}: {}", peer, e);
        }
    }
}
