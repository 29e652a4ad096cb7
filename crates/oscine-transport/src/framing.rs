//! Stream framing
//!
//! Datagram transports carry one packet per datagram. Byte streams need
//! explicit boundaries, in one of two forms:
//!
//! - OSC 1.0: each packet is preceded by a 4-byte big-endian length.
//! - OSC 1.1: each packet is SLIP-encoded between two END bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, TransportError};

/// SLIP special bytes
pub mod slip {
    pub const END: u8 = 0xC0;
    pub const ESC: u8 = 0xDB;
    pub const ESC_END: u8 = 0xDC;
    pub const ESC_ESC: u8 = 0xDD;
}

/// Default maximum frame size (64KB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Stream framing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Framing {
    /// 4-byte big-endian length prefix (OSC 1.0)
    #[default]
    LengthPrefixed,
    /// Double-END SLIP (OSC 1.1)
    Slip,
}

/// Incremental frame encoder/decoder
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    framing: Framing,
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(framing: Framing, max_frame_size: usize) -> Self {
        Self {
            framing,
            max_frame_size,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Take one complete frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.framing {
            Framing::LengthPrefixed => self.decode_length_prefixed(buf),
            Framing::Slip => self.decode_slip(buf),
        }
    }

    /// Append one framed packet to `out`
    pub fn encode(&self, data: &[u8], out: &mut BytesMut) -> Result<()> {
        if data.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: data.len(),
                max: self.max_frame_size,
            });
        }
        match self.framing {
            Framing::LengthPrefixed => {
                out.reserve(4 + data.len());
                out.put_u32(data.len() as u32);
                out.extend_from_slice(data);
            }
            Framing::Slip => {
                out.reserve(data.len() + 2);
                out.put_u8(slip::END);
                for &b in data {
                    match b {
                        slip::END => out.put_slice(&[slip::ESC, slip::ESC_END]),
                        slip::ESC => out.put_slice(&[slip::ESC, slip::ESC_ESC]),
                        other => out.put_u8(other),
                    }
                }
                out.put_u8(slip::END);
            }
        }
        Ok(())
    }

    fn decode_length_prefixed(&self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let len = (&buf[..4]).get_u32() as usize;
        if len > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        if buf.len() < 4 + len {
            buf.reserve(4 + len - buf.len());
            return Ok(None);
        }
        buf.advance(4);
        Ok(Some(buf.split_to(len).freeze()))
    }

    fn decode_slip(&self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        loop {
            // skip the END bytes between frames
            let leading = buf.iter().take_while(|&&b| b == slip::END).count();
            buf.advance(leading);

            let Some(end) = buf.iter().position(|&b| b == slip::END) else {
                // every escaped byte takes two bytes on the wire
                if buf.len() > self.max_frame_size * 2 {
                    return Err(TransportError::FrameTooLarge {
                        size: buf.len(),
                        max: self.max_frame_size,
                    });
                }
                return Ok(None);
            };

            let raw = buf.split_to(end);
            buf.advance(1);
            if raw.is_empty() {
                continue;
            }
            let frame = unescape(&raw)?;
            if frame.len() > self.max_frame_size {
                return Err(TransportError::FrameTooLarge {
                    size: frame.len(),
                    max: self.max_frame_size,
                });
            }
            return Ok(Some(frame));
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(Framing::default(), DEFAULT_MAX_FRAME_SIZE)
    }
}

fn unescape(raw: &[u8]) -> Result<Bytes> {
    let mut out = BytesMut::with_capacity(raw.len());
    let mut bytes = raw.iter();
    while let Some(&b) = bytes.next() {
        if b != slip::ESC {
            out.put_u8(b);
            continue;
        }
        match bytes.next() {
            Some(&slip::ESC_END) => out.put_u8(slip::END),
            Some(&slip::ESC_ESC) => out.put_u8(slip::ESC),
            Some(&other) => {
                return Err(TransportError::Slip(format!(
                    "invalid escape sequence 0xDB 0x{:02X}",
                    other
                )))
            }
            None => return Err(TransportError::Slip("trailing escape byte".into())),
        }
    }
    Ok(out.freeze())
}

/// Read one frame from a byte source.
///
/// `buf` carries bytes across calls. Returns `Ok(None)` on a clean end of
/// stream between frames.
pub async fn read_frame<R>(reader: &mut R, codec: &FrameCodec, buf: &mut BytesMut) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = codec.decode(buf)? {
            return Ok(Some(frame));
        }
        if reader.read_buf(buf).await? == 0 {
            let pending = match codec.framing() {
                Framing::LengthPrefixed => buf.len(),
                Framing::Slip => buf.iter().filter(|&&b| b != slip::END).count(),
            };
            if pending == 0 {
                return Ok(None);
            }
            return Err(TransportError::TruncatedFrame(pending));
        }
    }
}

/// Write one framed packet to a byte sink
pub async fn write_frame<W>(writer: &mut W, codec: &FrameCodec, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = BytesMut::with_capacity(data.len() + 4);
    codec.encode(data, &mut out)?;
    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}
