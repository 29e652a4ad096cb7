//! Error types for the OSC codec

use thiserror::Error;

/// Result type alias for oscine-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Malformed or unencodable atom data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// Not enough bytes left for the value being read
    #[error("truncated {what} at offset {offset}: need {needed} bytes, have {have}")]
    Truncated {
        what: &'static str,
        offset: usize,
        needed: usize,
        have: usize,
    },

    /// String with no NUL terminator before the end of the buffer
    #[error("unterminated string at offset {offset}")]
    Unterminated { offset: usize },

    /// String or blob whose 4-byte padding runs past the end of the buffer
    #[error("misaligned {what} at offset {offset}: padded length {padded} exceeds {have} remaining bytes")]
    Misaligned {
        what: &'static str,
        offset: usize,
        padded: usize,
        have: usize,
    },

    /// Type tag character with no known encoding
    #[error("unknown type tag '{tag}' at offset {offset}")]
    UnknownTypeTag { tag: char, offset: usize },

    /// `]` without an open array, or `[` never closed
    #[error("unbalanced array brackets in type tags at offset {offset}")]
    UnbalancedArray { offset: usize },

    /// Arrays nested deeper than the decoder allows
    #[error("array nesting exceeds depth limit {limit} at offset {offset}")]
    ArrayTooDeep { limit: usize, offset: usize },

    /// String bytes are not valid UTF-8
    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// Blob length word is negative
    #[error("negative blob length {len} at offset {offset}")]
    NegativeLength { len: i32, offset: usize },

    /// Char atom carries a value that is not a Unicode scalar
    #[error("invalid char 0x{value:08x} at offset {offset}")]
    InvalidChar { value: u32, offset: usize },

    /// String contains a NUL byte and cannot be encoded
    #[error("string contains an interior NUL byte: {0:?}")]
    InteriorNul(String),

    /// Blob exceeds the int32 length field
    #[error("blob too large: {0} bytes (max 2147483647)")]
    BlobTooLarge(usize),

    /// Unix time outside the representable NTP era
    #[error("time {0} is outside the NTP era (1900-2036)")]
    TimeOutOfRange(f64),
}

/// Malformed message or bundle framing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Atom-level failure inside a message
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Zero-length packet
    #[error("empty packet")]
    Empty,

    /// Packet starts with neither `/` nor `#bundle`
    #[error("unknown packet type: leading byte 0x{0:02x}")]
    UnknownPacket(u8),

    /// Address does not start with `/`, contains NUL, or uses wildcards as a send target
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Type tag string present but not introduced by `,`
    #[error("type tag string must start with ',', found {0:?}")]
    InvalidTypeTags(String),

    /// A standalone message left bytes after its last argument
    #[error("{remaining} trailing bytes after message at offset {offset}")]
    TrailingBytes { offset: usize, remaining: usize },

    /// Bundle does not start with `#bundle\0`
    #[error("missing #bundle tag")]
    BadBundleTag,

    /// Bundle element length word runs past the end of the bundle
    #[error("bundle element at offset {offset} claims {len} bytes, {remaining} remaining")]
    ElementOverrun {
        offset: usize,
        len: usize,
        remaining: usize,
    },

    /// Bundle element of length zero
    #[error("empty bundle element at offset {offset}")]
    EmptyElement { offset: usize },

    /// Bundle element starting with neither `/` nor `#bundle`
    #[error("unknown bundle element at offset {offset}: leading byte 0x{byte:02x}")]
    UnknownElement { offset: usize, byte: u8 },

    /// Bundles nested deeper than the configured limit
    #[error("bundle nesting exceeds depth limit {limit}")]
    DepthExceeded { limit: usize },
}

/// Malformed address pattern syntax
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("empty address pattern")]
    Empty,

    /// `[` or `{` never closed
    #[error("unclosed '{open}' opened at offset {offset} in pattern {pattern:?}")]
    Unclosed {
        open: char,
        offset: usize,
        pattern: String,
    },

    /// `]` or `}` with nothing to close
    #[error("unexpected '{close}' at offset {offset} in pattern {pattern:?}")]
    Unexpected {
        close: char,
        offset: usize,
        pattern: String,
    },

    #[error("empty character set at offset {offset} in pattern {pattern:?}")]
    EmptySet { offset: usize, pattern: String },

    #[error("reversed range '{from}-{to}' at offset {offset} in pattern {pattern:?}")]
    InvalidRange {
        from: char,
        to: char,
        offset: usize,
        pattern: String,
    },

    /// `{` or `[` inside `{...}`
    #[error("nested group at offset {offset} in pattern {pattern:?}")]
    Nested { offset: usize, pattern: String },

    /// Translation to the matching engine failed
    #[error("pattern {pattern:?} could not be compiled: {reason}")]
    Compile { pattern: String, reason: String },
}

/// Any oscine-core failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("pattern error: {0}")]
    Pattern(#[from] PatternError),
}
