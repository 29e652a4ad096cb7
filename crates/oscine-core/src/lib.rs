//! oscine core
//!
//! Open Sound Control 1.0/1.1 wire model and codec.
//!
//! This crate provides:
//! - Argument values ([`Atom`]) and their binary encoding ([`codec`])
//! - Messages and bundles ([`Message`], [`Bundle`], [`Packet`])
//! - NTP time tags ([`Timestamp`])
//! - Address pattern matching ([`Pattern`])
//!
//! It performs no I/O; transports and dispatch live in `oscine-transport`
//! and `oscine-server`.

pub mod bundle;
pub mod codec;
pub mod error;
pub mod message;
pub mod packet;
pub mod pattern;
pub mod time;
pub mod types;

pub use bundle::{Bundle, BundleBuilder};
pub use error::{CodecError, Error, ParseError, PatternError, Result};
pub use message::{Message, MessageBuilder};
pub use packet::{
    DecodeConfig, Packet, DEFAULT_MAX_ARRAY_DEPTH, DEFAULT_MAX_DEPTH, DEPTH_CEILING,
};
pub use pattern::Pattern;
pub use time::{Clock, SystemClock, Timestamp};
pub use types::{type_tag_string, Atom, Color, Midi};

/// Literal that opens every bundle
pub const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Conventional OSC server port
pub const DEFAULT_PORT: u16 = 5005;
