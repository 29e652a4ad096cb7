//! Command-line argument values
//!
//! `send` takes its OSC arguments as words. A word is either typed with a
//! tag prefix (`i:42`, `f:0.5`, `s:hello`, `b:c0ffee`) or a bare tag for
//! the argument-less types (`T`, `F`, `N`, `I`). Untyped words are guessed:
//! integer, then float, then `true`/`false`, then string.

use anyhow::{anyhow, bail, Context, Result};
use oscine_core::{Atom, Color, Midi, Timestamp};

pub fn parse_atoms<S: AsRef<str>>(words: &[S]) -> Result<Vec<Atom>> {
    words
        .iter()
        .map(|w| parse_atom(w.as_ref()).with_context(|| format!("bad argument {:?}", w.as_ref())))
        .collect()
}

pub fn parse_atom(word: &str) -> Result<Atom> {
    match word {
        "T" => return Ok(Atom::Bool(true)),
        "F" => return Ok(Atom::Bool(false)),
        "N" => return Ok(Atom::Nil),
        "I" => return Ok(Atom::Infinitum),
        _ => {}
    }

    let Some((tag, value)) = split_tag(word) else {
        return Ok(guess(word));
    };

    let atom = match tag {
        'i' => Atom::Int(value.parse()?),
        'h' => Atom::Long(value.parse()?),
        'f' => Atom::Float(value.parse()?),
        'd' => Atom::Double(value.parse()?),
        's' => Atom::String(value.to_string()),
        'S' => Atom::Symbol(value.to_string()),
        'c' => {
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Atom::Char(c),
                _ => bail!("char needs exactly one character"),
            }
        }
        'b' => Atom::Blob(hex(value)?),
        'r' => Atom::Color(Color::from_bytes(word4(value)?)),
        'm' => Atom::Midi(Midi::from_bytes(word4(value)?)),
        't' => Atom::Time(Timestamp::from_unix_time(value.parse()?)?),
        other => return Err(anyhow!("unknown type tag {:?}", other)),
    };
    Ok(atom)
}

/// `x:rest` where `x` is a single character
fn split_tag(word: &str) -> Option<(char, &str)> {
    let mut chars = word.chars();
    let tag = chars.next()?;
    let rest = chars.as_str().strip_prefix(':')?;
    Some((tag, rest))
}

fn guess(word: &str) -> Atom {
    if let Ok(i) = word.parse::<i32>() {
        Atom::Int(i)
    } else if let Ok(f) = word.parse::<f32>() {
        Atom::Float(f)
    } else if let Ok(b) = word.parse::<bool>() {
        Atom::Bool(b)
    } else {
        Atom::String(word.to_string())
    }
}

fn hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        bail!("hex needs an even number of digits");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| anyhow!("invalid hex at offset {}", i))
        })
        .collect()
}

fn word4(s: &str) -> Result<[u8; 4]> {
    let bytes = hex(s)?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow!("expected 4 bytes, got {}", b.len()))
}
