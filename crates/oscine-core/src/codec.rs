//! OSC atom codec
//!
//! Byte-level encoding for every argument type. All numbers are big-endian.
//! Strings are NUL-terminated and padded to a multiple of 4 bytes; blobs carry
//! a 4-byte length word followed by their payload padded to a multiple of 4.
//! Padding bytes are written as zero but never inspected on decode.

use crate::types::{tag, Atom, Color, Midi};
use crate::{CodecError, Timestamp};
use bytes::{BufMut, BytesMut};

/// Round `len` up to the next multiple of 4
#[inline(always)]
pub const fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

/// Encoded size of a string including terminator and padding
#[inline(always)]
pub const fn string_size(s: &str) -> usize {
    pad4(s.len() + 1)
}

// ============================================================================
// ENCODING
// ============================================================================

/// Write a NUL-terminated, 4-byte padded string
pub fn encode_string(buf: &mut BytesMut, s: &str) -> Result<(), CodecError> {
    let bytes = s.as_bytes();
    if bytes.contains(&0) {
        return Err(CodecError::InteriorNul(s.to_string()));
    }
    let total = string_size(s);
    buf.reserve(total);
    buf.extend_from_slice(bytes);
    buf.put_bytes(0, total - bytes.len());
    Ok(())
}

/// Write a length-prefixed, 4-byte padded blob
pub fn encode_blob(buf: &mut BytesMut, data: &[u8]) -> Result<(), CodecError> {
    if data.len() > i32::MAX as usize {
        return Err(CodecError::BlobTooLarge(data.len()));
    }
    let padded = pad4(data.len());
    buf.reserve(4 + padded);
    buf.put_i32(data.len() as i32);
    buf.extend_from_slice(data);
    buf.put_bytes(0, padded - data.len());
    Ok(())
}

#[inline]
pub fn encode_timestamp(buf: &mut BytesMut, ts: Timestamp) {
    buf.put_u32(ts.seconds);
    buf.put_u32(ts.fraction);
}

/// Write the payload of one atom. Tag-only atoms write nothing; arrays write
/// their items' payloads in order (the brackets live in the tag string).
pub fn encode_atom(buf: &mut BytesMut, atom: &Atom) -> Result<(), CodecError> {
    match atom {
        Atom::Int(i) => buf.put_i32(*i),
        Atom::Long(i) => buf.put_i64(*i),
        Atom::Float(f) => buf.put_f32(*f),
        Atom::Double(f) => buf.put_f64(*f),
        Atom::String(s) | Atom::Symbol(s) => encode_string(buf, s)?,
        Atom::Blob(b) => encode_blob(buf, b)?,
        Atom::Char(c) => buf.put_u32(*c as u32),
        Atom::Color(c) => buf.put_slice(&c.to_bytes()),
        Atom::Midi(m) => buf.put_slice(&m.to_bytes()),
        Atom::Time(ts) => encode_timestamp(buf, *ts),
        Atom::Bool(_) | Atom::Nil | Atom::Infinitum => {}
        Atom::Array(items) => {
            for item in items {
                encode_atom(buf, item)?;
            }
        }
    }
    Ok(())
}

/// Payload size of one atom, used to pre-size encode buffers
pub fn encoded_size(atom: &Atom) -> usize {
    match atom {
        Atom::Int(_) | Atom::Float(_) | Atom::Char(_) | Atom::Color(_) | Atom::Midi(_) => 4,
        Atom::Long(_) | Atom::Double(_) | Atom::Time(_) => 8,
        Atom::String(s) | Atom::Symbol(s) => string_size(s),
        Atom::Blob(b) => 4 + pad4(b.len()),
        Atom::Bool(_) | Atom::Nil | Atom::Infinitum => 0,
        Atom::Array(items) => items.iter().map(encoded_size).sum(),
    }
}

// ============================================================================
// DECODING
// ============================================================================

/// Cursor over a packet buffer that tracks the absolute offset for errors
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Start reading at `pos`
    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self {
            buf,
            pos: pos.min(buf.len()),
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// Consume exactly `n` bytes
    pub fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                what,
                offset: self.pos,
                needed: n,
                have: self.remaining(),
            });
        }
        let buf = self.buf;
        let out = &buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], CodecError> {
        let bytes = self.take(N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u32(&mut self, what: &'static str) -> Result<u32, CodecError> {
        self.take_array::<4>(what).map(u32::from_be_bytes)
    }

    pub fn read_i32(&mut self, what: &'static str) -> Result<i32, CodecError> {
        self.take_array::<4>(what).map(i32::from_be_bytes)
    }

    pub fn read_i64(&mut self, what: &'static str) -> Result<i64, CodecError> {
        self.take_array::<8>(what).map(i64::from_be_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        self.take_array::<4>("float32").map(f32::from_be_bytes)
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        self.take_array::<8>("float64").map(f64::from_be_bytes)
    }

    pub fn read_timestamp(&mut self) -> Result<Timestamp, CodecError> {
        let seconds = self.read_u32("timetag")?;
        let fraction = self.read_u32("timetag")?;
        Ok(Timestamp::new(seconds, fraction))
    }

    /// Read a NUL-terminated string and skip its padding
    pub fn read_string(&mut self) -> Result<&'a str, CodecError> {
        let start = self.pos;
        let buf = self.buf;
        let rest = &buf[start..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::Unterminated { offset: start })?;
        let padded = pad4(len + 1);
        if padded > rest.len() {
            return Err(CodecError::Misaligned {
                what: "string",
                offset: start,
                padded,
                have: rest.len(),
            });
        }
        let text =
            std::str::from_utf8(&rest[..len]).map_err(|_| CodecError::InvalidUtf8 { offset: start })?;
        self.pos += padded;
        Ok(text)
    }

    /// Read a length-prefixed blob and skip its padding
    pub fn read_blob(&mut self) -> Result<&'a [u8], CodecError> {
        let offset = self.pos;
        let len = self.read_i32("blob length")?;
        if len < 0 {
            return Err(CodecError::NegativeLength { len, offset });
        }
        let len = len as usize;
        let padded = pad4(len);
        if padded > self.remaining() {
            if len > self.remaining() {
                return Err(CodecError::Truncated {
                    what: "blob",
                    offset: self.pos,
                    needed: len,
                    have: self.remaining(),
                });
            }
            return Err(CodecError::Misaligned {
                what: "blob",
                offset: self.pos,
                padded,
                have: self.remaining(),
            });
        }
        let buf = self.buf;
        let data = &buf[self.pos..self.pos + len];
        self.pos += padded;
        Ok(data)
    }
}

/// Decode the payload of a single non-array tag at the reader's position
pub fn decode_atom(reader: &mut Reader<'_>, type_tag: char, tag_offset: usize) -> Result<Atom, CodecError> {
    let atom = match type_tag {
        tag::INT32 => Atom::Int(reader.read_i32("int32")?),
        tag::INT64 => Atom::Long(reader.read_i64("int64")?),
        tag::FLOAT32 => Atom::Float(reader.read_f32()?),
        tag::FLOAT64 => Atom::Double(reader.read_f64()?),
        tag::STRING => Atom::String(reader.read_string()?.to_string()),
        tag::SYMBOL => Atom::Symbol(reader.read_string()?.to_string()),
        tag::BLOB => Atom::Blob(reader.read_blob()?.to_vec()),
        tag::CHAR => {
            let offset = reader.position();
            let value = reader.read_u32("char")?;
            Atom::Char(char::from_u32(value).ok_or(CodecError::InvalidChar { value, offset })?)
        }
        tag::COLOR => Atom::Color(Color::from_bytes(reader.take_array::<4>("color")?)),
        tag::MIDI => Atom::Midi(Midi::from_bytes(reader.take_array::<4>("midi")?)),
        tag::TIME => Atom::Time(reader.read_timestamp()?),
        tag::TRUE => Atom::Bool(true),
        tag::FALSE => Atom::Bool(false),
        tag::NIL => Atom::Nil,
        tag::INFINITUM => Atom::Infinitum,
        tag::ARRAY_OPEN | tag::ARRAY_CLOSE => {
            return Err(CodecError::UnbalancedArray { offset: tag_offset })
        }
        other => {
            return Err(CodecError::UnknownTypeTag {
                tag: other,
                offset: tag_offset,
            })
        }
    };
    Ok(atom)
}

/// Standalone form of [`decode_atom`]: decode one atom from `bytes` at
/// `cursor` and return it with the cursor just past its payload.
pub fn decode_at(bytes: &[u8], cursor: usize, type_tag: char) -> Result<(Atom, usize), CodecError> {
    let mut reader = Reader::at(bytes, cursor);
    let atom = decode_atom(&mut reader, type_tag, cursor)?;
    Ok((atom, reader.position()))
}

/// Decode every argument named by `tags` (without the leading `,`).
///
/// `tags_offset` is the buffer offset of the first tag character, used for
/// error reporting. Arrays are assembled with an explicit stack, and an
/// array opened more than `max_array_depth` levels deep is rejected, since
/// dropping or printing an [`Atom::Array`] recurses once per level.
pub fn decode_arguments(
    reader: &mut Reader<'_>,
    tags: &str,
    tags_offset: usize,
    max_array_depth: usize,
) -> Result<Vec<Atom>, CodecError> {
    let mut stack: Vec<(usize, Vec<Atom>)> = Vec::new();
    let mut current: Vec<Atom> = Vec::with_capacity(tags.len());

    for (i, c) in tags.char_indices() {
        let offset = tags_offset + i;
        match c {
            tag::ARRAY_OPEN => {
                if stack.len() >= max_array_depth {
                    return Err(CodecError::ArrayTooDeep {
                        limit: max_array_depth,
                        offset,
                    });
                }
                stack.push((offset, std::mem::take(&mut current)));
            }
            tag::ARRAY_CLOSE => {
                let (_, parent) = stack.pop().ok_or(CodecError::UnbalancedArray { offset })?;
                let items = std::mem::replace(&mut current, parent);
                current.push(Atom::Array(items));
            }
            other => current.push(decode_atom(reader, other, offset)?),
        }
    }

    if let Some((offset, _)) = stack.last() {
        return Err(CodecError::UnbalancedArray { offset: *offset });
    }
    Ok(current)
}
