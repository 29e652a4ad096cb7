//! Top-level OSC packets

use crate::bundle::{self, Bundle};
use crate::message::{self, Message};
use crate::{CodecError, ParseError, Timestamp};
use bytes::{Bytes, BytesMut};

/// Default bundle nesting limit
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Default type tag array nesting limit
pub const DEFAULT_MAX_ARRAY_DEPTH: usize = 32;

/// Hard ceiling on both nesting limits, whatever the configuration says
pub const DEPTH_CEILING: usize = 256;

/// Decoder limits
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DecodeConfig {
    /// Maximum bundle nesting; a top-level bundle is depth 1
    pub max_depth: usize,
    /// Maximum `[` nesting inside one type tag string
    pub max_array_depth: usize,
}

impl DecodeConfig {
    /// Bundle nesting limit actually enforced
    pub fn depth_limit(&self) -> usize {
        self.max_depth.min(DEPTH_CEILING)
    }

    /// Array nesting limit actually enforced
    pub fn array_depth_limit(&self) -> usize {
        self.max_array_depth.min(DEPTH_CEILING)
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_array_depth: DEFAULT_MAX_ARRAY_DEPTH,
        }
    }
}

/// A message or a bundle
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Packet {
    Message(Message),
    Bundle(Bundle),
}

impl Packet {
    /// Decode a datagram or stream frame with the default limits
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        Self::decode_with(bytes, &DecodeConfig::default())
    }

    pub fn decode_with(bytes: &[u8], config: &DecodeConfig) -> Result<Self, ParseError> {
        match bytes.first() {
            None => Err(ParseError::Empty),
            Some(b'/') => message::decode_span(bytes, 0, bytes.len(), config).map(Packet::Message),
            Some(b'#') => {
                bundle::decode_span(bytes, 0, bytes.len(), 1, config).map(Packet::Bundle)
            }
            Some(&byte) => Err(ParseError::UnknownPacket(byte)),
        }
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        match self {
            Packet::Message(m) => m.encode(),
            Packet::Bundle(b) => b.encode(),
        }
    }

    pub fn encode_to(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        match self {
            Packet::Message(m) => m.encode_to(buf),
            Packet::Bundle(b) => b.encode_to(buf),
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Packet::Message(m) => m.encoded_len(),
            Packet::Bundle(b) => b.encoded_len(),
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Packet::Message(m) => Some(m),
            Packet::Bundle(_) => None,
        }
    }

    pub fn as_bundle(&self) -> Option<&Bundle> {
        match self {
            Packet::Bundle(b) => Some(b),
            Packet::Message(_) => None,
        }
    }

    /// Every message in the packet, depth-first in element order
    pub fn messages(&self) -> Vec<&Message> {
        self.walk(Timestamp::IMMEDIATE)
            .into_iter()
            .map(|(_, m)| m)
            .collect()
    }

    /// Every message paired with the time it is due.
    ///
    /// A message inherits the timestamp of its innermost enclosing bundle;
    /// immediate, past, and unbundled messages are due at `now`. The result
    /// is sorted by due time, keeping element order among equal times.
    pub fn timed_messages(&self, now: Timestamp) -> Vec<(Timestamp, &Message)> {
        let mut out: Vec<(Timestamp, &Message)> = self
            .walk(Timestamp::IMMEDIATE)
            .into_iter()
            .map(|(ts, m)| {
                let due = if ts.is_immediate() || ts <= now { now } else { ts };
                (due, m)
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Flatten with an explicit stack so deep nesting never grows the call stack
    fn walk(&self, outer: Timestamp) -> Vec<(Timestamp, &Message)> {
        let mut out = Vec::new();
        let mut stack: Vec<(Timestamp, &Packet)> = vec![(outer, self)];
        while let Some((ts, packet)) = stack.pop() {
            match packet {
                Packet::Message(m) => out.push((ts, m)),
                Packet::Bundle(b) => {
                    for element in b.elements.iter().rev() {
                        stack.push((b.timestamp, element));
                    }
                }
            }
        }
        out
    }
}

impl From<Message> for Packet {
    fn from(m: Message) -> Self {
        Packet::Message(m)
    }
}

impl From<Bundle> for Packet {
    fn from(b: Bundle) -> Self {
        Packet::Bundle(b)
    }
}
