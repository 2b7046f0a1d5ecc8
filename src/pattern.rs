//! Pattern compilation and bounded payload matching.
//!
//! A pattern specification (kind + raw value) compiles once into an
//! immutable byte predicate. Matching never examines more than
//! [`INSPECTION_WINDOW`] bytes of a payload.

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PatternError;

/// Maximum number of leading payload bytes the matcher may examine.
pub const INSPECTION_WINDOW: usize = 4096;

/// Maximum length of a compiled literal or decoded hex pattern, in bytes.
pub const MAX_PATTERN_BYTES: usize = 1024;

/// Maximum length of the raw pattern value, in characters.
pub const MAX_PATTERN_INPUT_CHARS: usize = 2048;

/// Maximum length of a regex source, in characters. The sole ReDoS
/// mitigation: no runtime timeout is enforced beyond this cap.
pub const MAX_REGEX_SOURCE_CHARS: usize = 256;

/// Supported pattern matching types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    String,
    Hex,
    Regex,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternKind::String => write!(f, "string"),
            PatternKind::Hex => write!(f, "hex"),
            PatternKind::Regex => write!(f, "regex"),
        }
    }
}

/// Immutable byte-matching predicate compiled from a pattern specification.
#[derive(Debug, Clone)]
pub enum CompiledMatcher {
    /// Empty pattern value. A listener with no pattern is valid and never
    /// signals.
    Never,
    Literal(Vec<u8>),
    Regex(Regex),
}

impl CompiledMatcher {
    /// Compiles a pattern value according to its kind.
    ///
    /// String patterns become a literal byte search over their UTF-8
    /// encoding. Hex patterns are decoded after stripping space and colon
    /// separators. Regex patterns compile over the byte alphabet and are
    /// searched unanchored.
    pub fn compile(kind: PatternKind, value: &str) -> Result<Self, PatternError> {
        if value.is_empty() {
            return Ok(CompiledMatcher::Never);
        }

        if value.chars().count() > MAX_PATTERN_INPUT_CHARS {
            return Err(PatternError::PatternTooLong {
                limit: MAX_PATTERN_INPUT_CHARS,
                unit: "characters",
            });
        }

        match kind {
            PatternKind::String => {
                let bytes = value.as_bytes().to_vec();
                if bytes.len() > MAX_PATTERN_BYTES {
                    return Err(PatternError::PatternTooLong {
                        limit: MAX_PATTERN_BYTES,
                        unit: "bytes",
                    });
                }
                Ok(CompiledMatcher::Literal(bytes))
            }
            PatternKind::Hex => {
                let bytes = decode_hex(value)?;
                if bytes.len() > MAX_PATTERN_BYTES {
                    return Err(PatternError::PatternTooLong {
                        limit: MAX_PATTERN_BYTES,
                        unit: "bytes",
                    });
                }
                Ok(CompiledMatcher::Literal(bytes))
            }
            PatternKind::Regex => {
                if value.chars().count() > MAX_REGEX_SOURCE_CHARS {
                    return Err(PatternError::PatternTooLong {
                        limit: MAX_REGEX_SOURCE_CHARS,
                        unit: "characters",
                    });
                }
                let regex =
                    Regex::new(value).map_err(|e| PatternError::InvalidRegex(e.to_string()))?;
                Ok(CompiledMatcher::Regex(regex))
            }
        }
    }

    /// True if the pattern occurs anywhere within the inspection window.
    ///
    /// The payload is truncated to [`INSPECTION_WINDOW`] bytes before the
    /// predicate runs; no path may match over unbounded input.
    pub fn matches(&self, payload: &[u8]) -> bool {
        let window = &payload[..payload.len().min(INSPECTION_WINDOW)];
        match self {
            CompiledMatcher::Never => false,
            CompiledMatcher::Literal(pattern) => find_bytes(window, pattern).is_some(),
            CompiledMatcher::Regex(regex) => regex.is_match(window),
        }
    }
}

/// Decodes a hex pattern value, ignoring space and colon separators.
fn decode_hex(value: &str) -> Result<Vec<u8>, PatternError> {
    let cleaned: Vec<char> = value.chars().filter(|c| *c != ' ' && *c != ':').collect();

    if cleaned.len() % 2 != 0 {
        return Err(PatternError::OddLength);
    }

    let mut bytes = Vec::with_capacity(cleaned.len() / 2);
    for pair in cleaned.chunks(2) {
        let hi = hex_digit(pair[0])?;
        let lo = hex_digit(pair[1])?;
        bytes.push((hi << 4) | lo);
    }
    Ok(bytes)
}

fn hex_digit(c: char) -> Result<u8, PatternError> {
    c.to_digit(16)
        .map(|d| d as u8)
        .ok_or(PatternError::InvalidHexDigit(c))
}

/// Byte pattern search using a first-byte scan.
fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }

    let first = needle[0];
    let mut pos = 0;

    while pos <= haystack.len() - needle.len() {
        match haystack[pos..].iter().position(|&b| b == first) {
            Some(offset) => {
                let start = pos + offset;
                if start + needle.len() > haystack.len() {
                    return None;
                }
                if &haystack[start..start + needle.len()] == needle {
                    return Some(start);
                }
                pos = start + 1;
            }
            None => return None,
        }
    }
    None
}
