//! OSC address patterns
//!
//! Dispatch registrations use the OSC wildcard grammar:
//!
//! ```text
//! ?          any single character
//! *          any run of characters, including '/'
//! [abc]      one character from the set; [a-z] ranges, [!a] / [^a] negate
//! {foo,bar}  one of the literal alternatives
//! ```
//!
//! Patterns are anchored at both ends. A pattern without metacharacters is
//! compared by string equality; anything else is translated once into a
//! regular expression.

use crate::PatternError;
use std::fmt;

/// Characters with wildcard meaning in an address pattern
pub const METACHARACTERS: &[char] = &['*', '?', '[', ']', '{', '}'];

/// Check if a string contains any wildcard metacharacter
pub fn has_wildcards(s: &str) -> bool {
    s.contains(METACHARACTERS)
}

/// A compiled address pattern
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Option<regex_lite::Regex>,
}

impl Pattern {
    /// Compile a pattern string
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let regex = if has_wildcards(pattern) {
            let translated = translate(pattern)?;
            Some(
                regex_lite::Regex::new(&translated).map_err(|e| PatternError::Compile {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?,
            )
        } else {
            None
        };

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Check if a concrete address matches this pattern
    #[inline]
    pub fn matches(&self, address: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(address),
            None => address == self.source,
        }
    }

    /// True when the pattern has no wildcards and matches by equality
    pub fn is_literal(&self) -> bool {
        self.regex.is_none()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("source", &self.source)
            .field("literal", &self.is_literal())
            .finish()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl TryFrom<&str> for Pattern {
    type Error = PatternError;

    fn try_from(s: &str) -> Result<Self, PatternError> {
        Pattern::compile(s)
    }
}

impl std::str::FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, PatternError> {
        Pattern::compile(s)
    }
}

/// Convenience one-shot match. Invalid patterns match nothing.
pub fn pattern_match(pattern: &str, address: &str) -> bool {
    Pattern::compile(pattern)
        .map(|p| p.matches(address))
        .unwrap_or(false)
}

/// Translate an OSC pattern into an anchored regex
fn translate(pattern: &str) -> Result<String, PatternError> {
    let mut out = String::with_capacity(pattern.len() * 2 + 8);
    out.push_str("(?s)^");

    let mut chars = pattern.char_indices().peekable();
    while let Some((offset, c)) = chars.next() {
        match c {
            '?' => out.push('.'),
            '*' => {
                // collapse runs of '*'
                while matches!(chars.peek(), Some((_, '*'))) {
                    chars.next();
                }
                out.push_str(".*");
            }
            '[' => {
                let mut members = Vec::new();
                let mut closed = false;
                for (i, m) in chars.by_ref() {
                    if m == ']' {
                        closed = true;
                        break;
                    }
                    members.push((i, m));
                }
                if !closed {
                    return Err(PatternError::Unclosed {
                        open: '[',
                        offset,
                        pattern: pattern.to_string(),
                    });
                }
                translate_set(pattern, offset, &members, &mut out)?;
            }
            '{' => {
                let mut alternatives = vec![String::new()];
                let mut closed = false;
                for (i, m) in chars.by_ref() {
                    match m {
                        '}' => {
                            closed = true;
                            break;
                        }
                        ',' => alternatives.push(String::new()),
                        '{' | '[' => {
                            return Err(PatternError::Nested {
                                offset: i,
                                pattern: pattern.to_string(),
                            })
                        }
                        other => {
                            if let Some(last) = alternatives.last_mut() {
                                last.push(other);
                            }
                        }
                    }
                }
                if !closed {
                    return Err(PatternError::Unclosed {
                        open: '{',
                        offset,
                        pattern: pattern.to_string(),
                    });
                }
                out.push_str("(?:");
                for (i, alt) in alternatives.iter().enumerate() {
                    if i > 0 {
                        out.push('|');
                    }
                    out.push_str(&regex_lite::escape(alt));
                }
                out.push(')');
            }
            ']' | '}' => {
                return Err(PatternError::Unexpected {
                    close: c,
                    offset,
                    pattern: pattern.to_string(),
                })
            }
            other => push_escaped(&mut out, other),
        }
    }

    out.push('$');
    Ok(out)
}

/// Emit a regex character class for the members of `[...]`
fn translate_set(
    pattern: &str,
    open: usize,
    members: &[(usize, char)],
    out: &mut String,
) -> Result<(), PatternError> {
    let (negated, members) = match members.first() {
        Some((_, '!')) | Some((_, '^')) => (true, &members[1..]),
        _ => (false, members),
    };
    if members.is_empty() {
        return Err(PatternError::EmptySet {
            offset: open,
            pattern: pattern.to_string(),
        });
    }

    out.push('[');
    if negated {
        out.push('^');
    }

    let mut i = 0;
    while i < members.len() {
        let (offset, from) = members[i];
        // '-' is a range only between two members; leading/trailing '-' is literal
        if i + 2 < members.len() && members[i + 1].1 == '-' {
            let to = members[i + 2].1;
            if from > to {
                return Err(PatternError::InvalidRange {
                    from,
                    to,
                    offset,
                    pattern: pattern.to_string(),
                });
            }
            push_escaped(out, from);
            out.push('-');
            push_escaped(out, to);
            i += 3;
        } else {
            push_escaped(out, from);
            i += 1;
        }
    }

    out.push(']');
    Ok(())
}

#[inline]
fn push_escaped(out: &mut String, c: char) {
    let mut tmp = [0u8; 4];
    out.push_str(&regex_lite::escape(c.encode_utf8(&mut tmp)));
}
