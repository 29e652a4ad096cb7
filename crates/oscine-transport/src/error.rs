//! Transport error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("accept failed: {0}")]
    AcceptFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed SLIP frame: {0}")]
    Slip(String),

    /// Stream ended in the middle of a frame
    #[error("truncated frame: {0} bytes buffered at end of stream")]
    TruncatedFrame(usize),

    #[error("not connected")]
    NotConnected,

    #[error("send buffer full")]
    BufferFull,

    #[error("codec error: {0}")]
    Codec(#[from] oscine_core::CodecError),

    #[error("parse error: {0}")]
    Parse(#[from] oscine_core::ParseError),
}
