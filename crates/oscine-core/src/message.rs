//! OSC messages
//!
//! Wire layout:
//!
//! ```text
//! address  ",tags"  arg0 arg1 ...
//! ```
//!
//! The address and the type tag string are both padded OSC strings; each
//! argument follows in tag order with its own encoding.

use crate::codec::{self, Reader};
use crate::pattern::has_wildcards;
use crate::types::{type_tag_string, Atom};
use crate::{CodecError, DecodeConfig, ParseError};
use bytes::{Bytes, BytesMut};
use std::fmt;

/// An address plus an ordered argument list
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    address: String,
    args: Vec<Atom>,
}

impl Message {
    /// Create a message to send. The address must be a concrete target:
    /// it starts with `/` and contains no NUL or wildcard characters.
    pub fn new(address: impl Into<String>, args: Vec<Atom>) -> Result<Self, ParseError> {
        let address = address.into();
        validate_address(&address)?;
        Ok(Self { address, args })
    }

    pub fn builder(address: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(address)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn args(&self) -> &[Atom] {
        &self.args
    }

    pub fn into_parts(self) -> (String, Vec<Atom>) {
        (self.address, self.args)
    }

    /// The type tag string, e.g. `",ifs"`
    pub fn type_tags(&self) -> String {
        type_tag_string(&self.args)
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        let tags = self.type_tags();
        codec::string_size(&self.address)
            + codec::string_size(&tags)
            + self.args.iter().map(codec::encoded_size).sum::<usize>()
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Append the wire encoding to `buf`
    pub fn encode_to(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        codec::encode_string(buf, &self.address)?;
        codec::encode_string(buf, &self.type_tags())?;
        for arg in &self.args {
            codec::encode_atom(buf, arg)?;
        }
        Ok(())
    }

    /// Decode a standalone message that must span all of `bytes`.
    ///
    /// Received addresses may contain wildcard characters; they are matched
    /// literally by the dispatcher.
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        decode_span(bytes, 0, bytes.len(), &DecodeConfig::default())
    }
}

/// Decode a message occupying `buf[start..end]`, reporting absolute offsets
pub(crate) fn decode_span(
    buf: &[u8],
    start: usize,
    end: usize,
    config: &DecodeConfig,
) -> Result<Message, ParseError> {
    let mut reader = Reader::at(&buf[..end], start);

    let address_offset = reader.position();
    let address = reader.read_string()?;
    if !address.starts_with('/') {
        return Err(ParseError::InvalidAddress(format!(
            "address at offset {} must start with '/': {:?}",
            address_offset, address
        )));
    }
    let address = address.to_string();

    // pre-1.0 senders may omit the type tag string entirely
    if reader.is_empty() {
        return Ok(Message {
            address,
            args: Vec::new(),
        });
    }

    if reader.peek() != Some(b',') {
        let tags = reader.read_string().unwrap_or("");
        return Err(ParseError::InvalidTypeTags(tags.to_string()));
    }

    let tags_offset = reader.position();
    let tags = reader.read_string()?;
    let args = codec::decode_arguments(
        &mut reader,
        &tags[1..],
        tags_offset + 1,
        config.array_depth_limit(),
    )?;

    if !reader.is_empty() {
        return Err(ParseError::TrailingBytes {
            offset: reader.position(),
            remaining: reader.remaining(),
        });
    }

    Ok(Message { address, args })
}

/// Check that `address` is a valid concrete send target
pub fn validate_address(address: &str) -> Result<(), ParseError> {
    if !address.starts_with('/') {
        return Err(ParseError::InvalidAddress(format!(
            "address must start with '/': {:?}",
            address
        )));
    }
    if address.contains('\0') {
        return Err(ParseError::InvalidAddress(format!(
            "address contains NUL: {:?}",
            address
        )));
    }
    if has_wildcards(address) {
        return Err(ParseError::InvalidAddress(format!(
            "wildcards are not allowed in a send address: {:?}",
            address
        )));
    }
    Ok(())
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.address, self.type_tags())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Accumulates arguments before producing a [`Message`]
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    address: String,
    args: Vec<Atom>,
}

impl MessageBuilder {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, value: impl Into<Atom>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Append several arguments
    pub fn args<I, T>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Atom>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn push(&mut self, value: impl Into<Atom>) {
        self.args.push(value.into());
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Validate the address and finalize
    pub fn build(self) -> Result<Message, ParseError> {
        Message::new(self.address, self.args)
    }
}
