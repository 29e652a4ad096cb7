//! OSC argument values

use crate::Timestamp;
use std::fmt;

/// Type tag characters
pub mod tag {
    pub const INT32: char = 'i';
    pub const INT64: char = 'h';
    pub const FLOAT32: char = 'f';
    pub const FLOAT64: char = 'd';
    pub const STRING: char = 's';
    pub const SYMBOL: char = 'S';
    pub const BLOB: char = 'b';
    pub const CHAR: char = 'c';
    pub const COLOR: char = 'r';
    pub const MIDI: char = 'm';
    pub const TIME: char = 't';
    pub const TRUE: char = 'T';
    pub const FALSE: char = 'F';
    pub const NIL: char = 'N';
    pub const INFINITUM: char = 'I';
    pub const ARRAY_OPEN: char = '[';
    pub const ARRAY_CLOSE: char = ']';
}

/// A MIDI message packed into 4 bytes: port id, status, data1, data2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Midi {
    pub port: u8,
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl Midi {
    pub const fn new(port: u8, status: u8, data1: u8, data2: u8) -> Self {
        Self {
            port,
            status,
            data1,
            data2,
        }
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        [self.port, self.status, self.data1, self.data2]
    }

    pub const fn from_bytes(b: [u8; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }
}

/// 32-bit RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl Color {
    pub const fn new(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        [self.red, self.green, self.blue, self.alpha]
    }

    pub const fn from_bytes(b: [u8; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }
}

/// A single typed OSC argument
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Atom {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Symbol(String),
    Blob(Vec<u8>),
    Char(char),
    Color(Color),
    Midi(Midi),
    Time(Timestamp),
    /// `T` or `F`
    Bool(bool),
    Nil,
    Infinitum,
    Array(Vec<Atom>),
}

impl Atom {
    /// The type tag for this atom. Arrays report their opening bracket.
    pub fn type_tag(&self) -> char {
        match self {
            Atom::Int(_) => tag::INT32,
            Atom::Long(_) => tag::INT64,
            Atom::Float(_) => tag::FLOAT32,
            Atom::Double(_) => tag::FLOAT64,
            Atom::String(_) => tag::STRING,
            Atom::Symbol(_) => tag::SYMBOL,
            Atom::Blob(_) => tag::BLOB,
            Atom::Char(_) => tag::CHAR,
            Atom::Color(_) => tag::COLOR,
            Atom::Midi(_) => tag::MIDI,
            Atom::Time(_) => tag::TIME,
            Atom::Bool(true) => tag::TRUE,
            Atom::Bool(false) => tag::FALSE,
            Atom::Nil => tag::NIL,
            Atom::Infinitum => tag::INFINITUM,
            Atom::Array(_) => tag::ARRAY_OPEN,
        }
    }

    /// Append this atom's full tag sequence (including nested array tags)
    pub fn write_type_tags(&self, out: &mut String) {
        match self {
            Atom::Array(items) => {
                out.push(tag::ARRAY_OPEN);
                for item in items {
                    item.write_type_tags(out);
                }
                out.push(tag::ARRAY_CLOSE);
            }
            other => out.push(other.type_tag()),
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Atom::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Atom::Int(i) => Some(*i as i64),
            Atom::Long(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Atom::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Atom::Float(f) => Some(*f as f64),
            Atom::Double(f) => Some(*f),
            Atom::Int(i) => Some(*i as f64),
            Atom::Long(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Atom::String(s) | Atom::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Atom::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Atom::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Atom]> {
        match self {
            Atom::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Atom::Nil)
    }
}

/// Build the type tag string (`",ifs"`) for an argument list
pub fn type_tag_string(args: &[Atom]) -> String {
    let mut tags = String::with_capacity(args.len() + 1);
    tags.push(',');
    for arg in args {
        arg.write_type_tags(&mut tags);
    }
    tags
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Int(i) => write!(f, "{}", i),
            Atom::Long(i) => write!(f, "{}", i),
            Atom::Float(v) => write!(f, "{}", v),
            Atom::Double(v) => write!(f, "{}", v),
            Atom::String(s) => write!(f, "{:?}", s),
            Atom::Symbol(s) => write!(f, "'{}", s),
            Atom::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            Atom::Char(c) => write!(f, "{:?}", c),
            Atom::Color(c) => write!(
                f,
                "#{:02x}{:02x}{:02x}{:02x}",
                c.red, c.green, c.blue, c.alpha
            ),
            Atom::Midi(m) => write!(
                f,
                "midi({} {:02x} {} {})",
                m.port, m.status, m.data1, m.data2
            ),
            Atom::Time(ts) => write!(f, "@{}", ts),
            Atom::Bool(b) => write!(f, "{}", b),
            Atom::Nil => f.write_str("nil"),
            Atom::Infinitum => f.write_str("inf"),
            Atom::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i32> for Atom {
    fn from(v: i32) -> Self {
        Atom::Int(v)
    }
}

impl From<i64> for Atom {
    fn from(v: i64) -> Self {
        Atom::Long(v)
    }
}

impl From<f32> for Atom {
    fn from(v: f32) -> Self {
        Atom::Float(v)
    }
}

impl From<f64> for Atom {
    fn from(v: f64) -> Self {
        Atom::Double(v)
    }
}

impl From<&str> for Atom {
    fn from(v: &str) -> Self {
        Atom::String(v.to_string())
    }
}

impl From<String> for Atom {
    fn from(v: String) -> Self {
        Atom::String(v)
    }
}

impl From<Vec<u8>> for Atom {
    fn from(v: Vec<u8>) -> Self {
        Atom::Blob(v)
    }
}

impl From<&[u8]> for Atom {
    fn from(v: &[u8]) -> Self {
        Atom::Blob(v.to_vec())
    }
}

impl From<bool> for Atom {
    fn from(v: bool) -> Self {
        Atom::Bool(v)
    }
}

impl From<char> for Atom {
    fn from(v: char) -> Self {
        Atom::Char(v)
    }
}

impl From<Midi> for Atom {
    fn from(v: Midi) -> Self {
        Atom::Midi(v)
    }
}

impl From<Color> for Atom {
    fn from(v: Color) -> Self {
        Atom::Color(v)
    }
}

impl From<Timestamp> for Atom {
    fn from(v: Timestamp) -> Self {
        Atom::Time(v)
    }
}

impl From<Vec<Atom>> for Atom {
    fn from(v: Vec<Atom>) -> Self {
        Atom::Array(v)
    }
}

impl<T: Into<Atom>> From<Option<T>> for Atom {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Atom::Nil)
    }
}
