//! OSC bundles
//!
//! ```text
//! "#bundle\0"  timetag(8)  [len(4) element]*
//! ```
//!
//! Each element is a message or another bundle, prefixed by its byte length.

use crate::codec::{self, Reader};
use crate::message::{self, Message};
use crate::packet::{DecodeConfig, Packet};
use crate::{CodecError, ParseError, Timestamp, BUNDLE_TAG};
use bytes::{BufMut, Bytes, BytesMut};

/// A timestamped group of messages and nested bundles
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bundle {
    pub timestamp: Timestamp,
    pub elements: Vec<Packet>,
}

impl Bundle {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            elements: Vec::new(),
        }
    }

    /// A bundle to be executed on receipt
    pub fn immediate() -> Self {
        Self::new(Timestamp::IMMEDIATE)
    }

    pub fn builder(timestamp: Timestamp) -> BundleBuilder {
        BundleBuilder::new(timestamp)
    }

    pub fn push(&mut self, element: impl Into<Packet>) {
        self.elements.push(element.into());
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn encoded_len(&self) -> usize {
        BUNDLE_TAG.len()
            + 8
            + self
                .elements
                .iter()
                .map(|e| 4 + e.encoded_len())
                .sum::<usize>()
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Append the wire encoding to `buf`
    pub fn encode_to(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_slice(BUNDLE_TAG);
        codec::encode_timestamp(buf, self.timestamp);

        for element in &self.elements {
            let len_at = buf.len();
            buf.put_u32(0);
            element.encode_to(buf)?;
            let len = (buf.len() - len_at - 4) as u32;
            buf[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
        }
        Ok(())
    }

    /// Decode a standalone bundle with the default depth limit
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        decode_span(bytes, 0, bytes.len(), 1, &DecodeConfig::default())
    }
}

/// Decode a bundle occupying `buf[start..end]` at nesting level `depth`
pub(crate) fn decode_span(
    buf: &[u8],
    start: usize,
    end: usize,
    depth: usize,
    config: &DecodeConfig,
) -> Result<Bundle, ParseError> {
    if depth > config.depth_limit() {
        return Err(ParseError::DepthExceeded {
            limit: config.depth_limit(),
        });
    }

    let mut reader = Reader::at(&buf[..end], start);
    match reader.take(BUNDLE_TAG.len(), "bundle tag") {
        Ok(tag) if tag == BUNDLE_TAG => {}
        _ => return Err(ParseError::BadBundleTag),
    }
    let timestamp = reader.read_timestamp()?;

    let mut elements = Vec::new();
    while !reader.is_empty() {
        let len_offset = reader.position();
        let len = reader.read_i32("bundle element length")?;
        if len < 0 {
            return Err(CodecError::NegativeLength {
                len,
                offset: len_offset,
            }
            .into());
        }
        let len = len as usize;
        let offset = reader.position();
        if len > reader.remaining() {
            return Err(ParseError::ElementOverrun {
                offset,
                len,
                remaining: reader.remaining(),
            });
        }
        if len == 0 {
            return Err(ParseError::EmptyElement { offset });
        }

        let element_end = offset + len;
        let element = match buf[offset] {
            b'/' => Packet::Message(message::decode_span(buf, offset, element_end, config)?),
            b'#' => Packet::Bundle(decode_span(buf, offset, element_end, depth + 1, config)?),
            byte => return Err(ParseError::UnknownElement { offset, byte }),
        };
        elements.push(element);
        reader.take(len, "bundle element")?;
    }

    Ok(Bundle {
        timestamp,
        elements,
    })
}

/// Accumulates elements before producing a [`Bundle`]
#[derive(Debug, Clone, Default)]
pub struct BundleBuilder {
    bundle: Bundle,
}

impl BundleBuilder {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            bundle: Bundle::new(timestamp),
        }
    }

    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.bundle.timestamp = timestamp;
        self
    }

    pub fn message(mut self, message: Message) -> Self {
        self.bundle.push(message);
        self
    }

    pub fn bundle(mut self, bundle: Bundle) -> Self {
        self.bundle.push(bundle);
        self
    }

    pub fn element(mut self, element: impl Into<Packet>) -> Self {
        self.bundle.push(element);
        self
    }

    pub fn build(self) -> Bundle {
        self.bundle
    }
}
